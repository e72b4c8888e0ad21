mod util;
use dist_assembly::algs::communicator::Communicator;
use dist_assembly::algs::split_reduction::ProcessGroup;
use dist_assembly::algs::vec_reduce::{NormType, NormValue, dot_begin, dot_end, norm_begin, norm_end};
use dist_assembly::assembly_error::AssemblyError;
use dist_assembly::config::StashOptions;
use dist_assembly::data::dist_vec::DistVec;
use dist_assembly::data::stash_index::InsertMode;
use dist_assembly::topology::ownership::OwnershipMap;
use util::*;

#[test]
fn every_rank_accumulates_into_every_entry() {
    let got = run_ranks(3, |comm| {
        let mut v = DistVec::from_local_size(comm, 4, 1, &StashOptions::default()).unwrap();
        let all: Vec<i64> = (0..12).collect();
        v.set_values(&all, &[1.0; 12], InsertMode::Accumulate).unwrap();
        v.assembly_begin().unwrap();
        v.assembly_end().unwrap();
        v.local().to_vec()
    });
    for local in got {
        assert_eq!(local, vec![3.0; 4]);
    }
}

#[test]
fn silent_rank_adopts_agreed_insert_mode() {
    let got = run_ranks(2, |comm| {
        let rank = comm.rank();
        let owners = OwnershipMap::new(vec![0, 2, 4]).unwrap();
        let mut v = DistVec::new(comm, owners, 1, &StashOptions::default()).unwrap();
        v.local_mut().fill(9.0);
        if rank == 0 {
            v.set_values(&[2, 3, -1], &[1.0, 2.0, 3.0], InsertMode::Insert)
                .unwrap();
        }
        v.assembly_begin().unwrap();
        v.assembly_end().unwrap();
        v.local().to_vec()
    });
    assert_eq!(got[0], vec![9.0, 9.0]);
    assert_eq!(got[1], vec![1.0, 2.0]);
}

#[test]
fn inconsistent_modes_fail_everywhere() {
    let got = run_ranks(2, |comm| {
        let rank = comm.rank();
        let mut v = DistVec::from_local_size(comm, 2, 1, &StashOptions::default()).unwrap();
        let mode = if rank == 0 {
            InsertMode::Insert
        } else {
            InsertMode::Accumulate
        };
        v.set_values(&[0], &[1.0], mode).unwrap();
        matches!(
            v.assembly_begin(),
            Err(AssemblyError::InconsistentInsertMode)
        )
    });
    assert_eq!(got, vec![true, true]);
}

#[test]
fn blocked_values_travel_through_block_stash() {
    let got = run_ranks(2, |comm| {
        let rank = comm.rank();
        let mut v = DistVec::from_local_size(comm, 4, 2, &StashOptions::default()).unwrap();
        // blocks 0,1 on rank 0 and 2,3 on rank 1
        let target = if rank == 0 { 3 } else { 0 };
        let base = 10.0 * (rank as f64 + 1.0);
        v.set_values_blocked(&[target], &[base, base + 1.0], InsertMode::Accumulate)
            .unwrap();
        v.set_values(&[1], &[0.5], InsertMode::Accumulate).unwrap();
        v.assembly_begin().unwrap();
        let ((_, _), (bn, _)) = v.stash_info();
        v.assembly_end().unwrap();
        (bn, v.local().to_vec())
    });
    assert_eq!(got[0], (1, vec![20.0, 22.0, 0.0, 0.0]));
    assert_eq!(got[1], (1, vec![0.0, 0.0, 10.0, 11.0]));
}

#[test]
fn ignore_off_process_drops_remote_entries() {
    let opts = StashOptions {
        ignore_off_process_entries: true,
        ..Default::default()
    };
    let got = run_ranks(2, |comm| {
        let rank = comm.rank() as i64;
        let mut v = DistVec::from_local_size(comm, 1, 1, &opts).unwrap();
        v.set_values(&[0, 1], &[5.0, 5.0], InsertMode::Insert).unwrap();
        v.assembly_begin().unwrap();
        v.assembly_end().unwrap();
        (rank, v.local().to_vec())
    });
    assert_eq!(got, vec![(0, vec![5.0]), (1, vec![5.0])]);
}

#[test]
fn split_phase_norms_across_ranks() {
    let got = run_ranks(2, |comm| {
        let rank = comm.rank();
        let group = ProcessGroup::new(comm.clone());
        let mut x = DistVec::from_local_size(comm, 2, 1, &StashOptions::default()).unwrap();
        // x = [1, -2, 2, 4]
        let vals = if rank == 0 { [1.0, -2.0] } else { [2.0, 4.0] };
        x.local_mut().copy_from_slice(&vals);
        let reg = group.split_reduction();
        let d = dot_begin(&reg, &x, &x).unwrap();
        let two = norm_begin(&reg, &x, NormType::Two).unwrap();
        let max = norm_begin(&reg, &x, NormType::Max).unwrap();
        let both = norm_begin(&reg, &x, NormType::OneAndTwo).unwrap();
        (
            dot_end(&reg, d).unwrap(),
            norm_end(&reg, two, NormType::Two).unwrap().value(),
            norm_end(&reg, max, NormType::Max).unwrap().value(),
            norm_end(&reg, both, NormType::OneAndTwo).unwrap(),
        )
    });
    for (dot, two, max, both) in got {
        assert_eq!(dot, 25.0);
        assert_eq!(two, 5.0);
        assert_eq!(max, 4.0);
        assert_eq!(both, NormValue::OneAndTwo { one: 9.0, two: 5.0 });
    }
}
