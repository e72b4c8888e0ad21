mod util;
use dist_assembly::algs::combine::{CombineOp, CountOp, ScalarReduce, pack_tagged};
use dist_assembly::algs::communicator::{CommTag, Communicator, LocalComm, Wait, wait_any};
use dist_assembly::assembly_error::AssemblyError;
use util::*;

#[test]
fn local_round_trip() {
    let tag = CommTag(0x1000);
    let comms = LocalComm::world(2);

    let msg = b"hello";
    comms[0].isend(1, tag.as_u16(), msg).wait();

    let mut handles = vec![Some(comms[1].irecv_any(tag.as_u16()))];
    let (_, env) = wait_any(&mut handles).unwrap();
    assert_eq!(env.source, 0);
    assert_eq!(&env.data[..], msg);
}

#[test]
fn local_fifo_order() {
    let tag = CommTag(0x1001);
    let comms = LocalComm::world(2);

    for i in 0..10u8 {
        comms[0].isend(1, tag.as_u16(), &[i]);
    }
    let mut handles: Vec<_> = (0..10)
        .map(|_| Some(comms[1].irecv_any(tag.as_u16())))
        .collect();
    let mut out = Vec::new();
    while let Some((_, env)) = wait_any(&mut handles) {
        out.push(env.data[0]);
    }
    assert_eq!(out, (0u8..10u8).collect::<Vec<_>>());
}

#[test]
fn any_source_collects_every_peer() {
    let tag = CommTag(0x1002).as_u16();
    let got = run_ranks(4, |comm| {
        if comm.rank() != 0 {
            comm.isend(0, tag, &[comm.rank() as u8]);
            return Vec::new();
        }
        let mut handles: Vec<_> = (0..3).map(|_| Some(comm.irecv_any(tag))).collect();
        let mut seen = Vec::new();
        while let Some((_, env)) = wait_any(&mut handles) {
            assert_eq!(env.data[0] as usize, env.source);
            seen.push(env.source);
        }
        seen
    });
    assert_permutation(&got[0], &[1, 2, 3]);
}

#[test]
fn collectives_agree_on_every_rank() {
    let got = run_ranks(3, |comm| {
        let r = comm.rank() as u64;
        let mut counts = [0u64; 6];
        let mut local = [0u64; 6];
        // rank r sends r+1 entries to rank (r+1) % 3
        let dest = ((r + 1) % 3) as usize;
        local[dest] = r + 1;
        local[3 + dest] = 1;
        comm.all_reduce_u64(&local, &mut counts, CountOp::MaxSum)
            .unwrap();
        let mut min = [0.0];
        comm.all_reduce_f64(&[r as f64], &mut min, ScalarReduce::Native(CombineOp::Min))
            .unwrap();
        (counts, min[0])
    });
    for (counts, min) in got {
        assert_eq!(counts, [3, 1, 2, 1, 1, 1]);
        assert_eq!(min, 0.0);
    }
}

#[test]
fn mismatched_contributions_fail_on_every_rank() {
    let got = run_ranks(2, |comm| {
        let local = vec![1u64; comm.rank() + 1];
        let mut out = vec![0u64; local.len()];
        matches!(
            comm.all_reduce_u64(&local, &mut out, CountOp::Sum),
            Err(AssemblyError::CommError { .. })
        )
    });
    assert_eq!(got, vec![true, true]);
}

#[test]
fn corrupt_operator_tag_fails_on_every_rank() {
    let got = run_ranks(2, |comm| {
        let mut local = pack_tagged(&[1.0, 2.0], &[CombineOp::Sum, CombineOp::Max]);
        // rank 1 sends an operator tag no kernel knows
        if comm.rank() == 1 {
            local[3] = 42.0;
        }
        let mut out = vec![0.0; local.len()];
        comm.all_reduce_f64(&local, &mut out, ScalarReduce::Tagged)
            .is_err()
    });
    assert_eq!(got, vec![true, true]);
}
