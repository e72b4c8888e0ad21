#![allow(dead_code)]
use dist_assembly::algs::communicator::{Communicator, LocalComm};
use dist_assembly::algs::stash::{Stash, StashMessage};
use dist_assembly::assembly_error::AssemblyError;
use dist_assembly::data::stash_index::StashIndex;

/// Run `f` on `n` ranks, one thread per rank; results come back in rank order.
pub fn run_ranks<T, F>(n: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(LocalComm) -> T + Sync,
{
    let comms = LocalComm::world(n);
    std::thread::scope(|s| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                let f = &f;
                s.spawn(move || f(comm))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("rank thread panicked"))
            .collect()
    })
}

/// Full scatter cycle; messages sorted by source rank.
pub fn scatter_cycle<I: StashIndex, C: Communicator>(
    stash: &mut Stash<I, C>,
) -> Result<Vec<StashMessage<I>>, AssemblyError> {
    stash.scatter_begin()?;
    let mut msgs = Vec::new();
    while let Some(msg) = stash.scatter_get_message()? {
        msgs.push(msg);
    }
    stash.scatter_end()?;
    msgs.sort_by_key(|m| m.source);
    Ok(msgs)
}

/// Flatten messages into `(source, index, payload)` triples.
pub fn flatten<I: StashIndex>(msgs: &[StashMessage<I>]) -> Vec<(usize, I, Vec<f64>)> {
    msgs.iter()
        .flat_map(|m| m.iter().map(move |(i, v)| (m.source, i, v.to_vec())))
        .collect()
}

/// Assert vec is a permutation of another vec (order-agnostic).
pub fn assert_permutation<T: Ord + Clone + std::fmt::Debug>(got: &[T], want: &[T]) {
    let mut a = got.to_vec();
    a.sort();
    let mut b = want.to_vec();
    b.sort();
    assert_eq!(a, b, "not a permutation\n got={:?}\nwant={:?}", got, want);
}
