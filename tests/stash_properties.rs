mod util;
use dist_assembly::algs::communicator::Communicator;
use dist_assembly::algs::stash::Stash;
use dist_assembly::data::stash_index::InsertMode;
use dist_assembly::topology::ownership::OwnershipMap;
use proptest::prelude::*;
use util::*;

const RANKS: usize = 3;

/// Boundaries from three local lengths (empty ranks allowed).
fn owners_from(lens: &[u64]) -> OwnershipMap {
    let mut b = vec![0];
    for &n in lens {
        b.push(b.last().unwrap() + n);
    }
    OwnershipMap::new(b).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_every_entry_reaches_its_owner_once(
        lens in prop::collection::vec(0u64..6, RANKS),
        raw in prop::collection::vec((0usize..RANKS, 0u64..1000, -50i32..50), 0..80),
    ) {
        prop_assume!(lens.iter().sum::<u64>() > 0);
        let owners = owners_from(&lens);
        let extent = owners.extent();
        // (putting rank, index, value)
        let entries: Vec<(usize, i64, f64)> = raw
            .iter()
            .map(|&(src, i, v)| (src, (i % extent) as i64, v as f64))
            .collect();

        let got = run_ranks(RANKS, |comm| {
            let rank = comm.rank();
            let mut stash: Stash<i64, _> = Stash::new(comm, owners.clone(), 1).unwrap();
            for &(src, i, v) in &entries {
                if src == rank {
                    stash.put(i, &[v], InsertMode::Accumulate).unwrap();
                }
            }
            flatten(&scatter_cycle(&mut stash).unwrap())
        });

        for (dest, received) in got.iter().enumerate() {
            let want: Vec<(usize, i64, Vec<f64>)> = entries
                .iter()
                .filter(|&&(_, i, _)| owners.owner(i as u64).unwrap() == dest)
                .map(|&(src, i, v)| (src, i, vec![v]))
                .collect();
            let key = |t: &(usize, i64, Vec<f64>)| (t.0, t.1, t.2[0] as i64);
            let mut got_keys: Vec<_> = received.iter().map(key).collect();
            let mut want_keys: Vec<_> = want.iter().map(key).collect();
            got_keys.sort();
            want_keys.sort();
            prop_assert_eq!(got_keys, want_keys);
        }
    }
}
