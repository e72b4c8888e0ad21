//! Scatter protocol of the stash.
//!
//! 1. classify buffered entries by owner,
//! 2. one `MaxSum` all-reduce tells each rank how many messages it will
//!    receive and the largest one it can get,
//! 3. post one any-source receive per expected message on each channel,
//! 4. pack and send one values block and one indices block per owner.
//!
//! Messages are reassembled from their two halves in a completion map keyed
//! by source rank, since the two channels may complete in either order.

use super::Stash;
use crate::algs::combine::CountOp;
use crate::algs::communicator::{Communicator, Envelope, Wait, wait_any};
use crate::algs::wire::{
    CHANNEL_INDICES, CHANNEL_VALUES, WireScalar, decode_block, encode_block,
};
use crate::assembly_error::AssemblyError;
use crate::data::stash_index::StashIndex;
use bytes::Bytes;
use hashbrown::HashMap;

/// Entries delivered from one source rank.
#[derive(Clone, Debug, PartialEq)]
pub struct StashMessage<I> {
    pub source: usize,
    pub bs: usize,
    pub indices: Vec<I>,
    pub values: Vec<f64>,
}

impl<I: StashIndex> StashMessage<I> {
    /// Number of entries.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// `(index, payload)` pairs in the order the sender put them.
    pub fn iter(&self) -> impl Iterator<Item = (I, &[f64])> + '_ {
        self.indices
            .iter()
            .copied()
            .zip(self.values.chunks_exact(self.bs.max(1)))
    }
}

/// Halves received so far from one source.
#[derive(Default)]
struct Halves {
    values: Option<Bytes>,
    indices: Option<Bytes>,
}

/// In-flight state between `scatter_begin` and `scatter_end`.
pub(super) struct ScatterState<I, C: Communicator> {
    /// Slots `..nrecv` listen on the values channel, the rest on indices.
    recvs: Vec<Option<C::AnyRecvHandle>>,
    nrecv: usize,
    sends: Vec<C::SendHandle>,
    pending: HashMap<usize, Halves>,
    loopback: Option<StashMessage<I>>,
    delivered: usize,
    /// Largest message, in entries, any rank sends here.
    max_entries: usize,
}

impl<I: StashIndex, C: Communicator> Stash<I, C> {
    /// Start moving buffered entries to their owners.
    ///
    /// Collective: every rank of the communicator must call it, including
    /// ranks with nothing to send.
    pub fn scatter_begin(&mut self) -> Result<(), AssemblyError> {
        if self.scatter.is_some() {
            return Err(AssemblyError::ScatterInProgress);
        }
        let size = self.comm.size();
        let rank = self.comm.rank();
        let bs = self.bs();

        // 1) classify entries by owner
        let mut owner_of = Vec::with_capacity(self.entries.len());
        let mut counts = vec![0usize; size];
        for (index, _) in self.entries.iter() {
            let key = index.ownership_key().ok_or_else(|| {
                AssemblyError::InvalidOwnership(format!("stashed index {index:?} has no owner"))
            })?;
            let owner = self.owners.owner(key)?;
            counts[owner] += 1;
            owner_of.push(owner);
        }

        // 2) agree on message counts and the largest message per receiver
        let mut local = vec![0u64; 2 * size];
        for (j, &n) in counts.iter().enumerate() {
            if j != rank && n > 0 {
                local[j] = n as u64;
                local[size + j] = 1;
            }
        }
        let mut global = vec![0u64; 2 * size];
        self.comm.all_reduce_u64(&local, &mut global, CountOp::MaxSum)?;
        let max_entries = global[rank] as usize;
        let nrecv = global[size + rank] as usize;

        // 3) post receives on both channels
        let mut recvs = Vec::with_capacity(2 * nrecv);
        recvs.extend((0..nrecv).map(|_| Some(self.comm.irecv_any(self.tags.values.as_u16()))));
        recvs.extend((0..nrecv).map(|_| Some(self.comm.irecv_any(self.tags.indices.as_u16()))));

        // 4) pack per owner, keeping put order within each owner
        let mut packed_idx: Vec<Vec<I::Wire>> =
            counts.iter().map(|&n| Vec::with_capacity(n)).collect();
        let mut packed_val: Vec<Vec<WireScalar>> =
            counts.iter().map(|&n| Vec::with_capacity(n * bs)).collect();
        for ((index, payload), &owner) in self.entries.iter().zip(&owner_of) {
            packed_idx[owner].push(index.to_wire());
            packed_val[owner].extend(payload.iter().copied().map(WireScalar::of));
        }
        let mut sends = Vec::new();
        let mut loopback = None;
        for (j, (idx, val)) in packed_idx.into_iter().zip(packed_val).enumerate() {
            if counts[j] == 0 {
                continue;
            }
            if j == rank {
                loopback = Some(StashMessage {
                    source: rank,
                    bs,
                    indices: idx.into_iter().map(I::from_wire).collect(),
                    values: val.into_iter().map(WireScalar::get).collect(),
                });
                continue;
            }
            sends.push(self.comm.isend(
                j,
                self.tags.values.as_u16(),
                &encode_block(CHANNEL_VALUES, counts[j], &val),
            ));
            sends.push(self.comm.isend(
                j,
                self.tags.indices.as_u16(),
                &encode_block(CHANNEL_INDICES, counts[j], &idx),
            ));
        }

        let (n, reallocs) = self.get_info();
        log::debug!(
            "[rank {rank}] stash has {n} entries, uses {reallocs} mallocs; expecting {nrecv} messages"
        );
        self.scatter = Some(ScatterState {
            recvs,
            nrecv,
            sends,
            pending: HashMap::new(),
            loopback,
            delivered: 0,
            max_entries,
        });
        Ok(())
    }

    /// Block until one complete message is available and return it.
    ///
    /// Returns `Ok(None)` once every expected message has been delivered.
    pub fn scatter_get_message(&mut self) -> Result<Option<StashMessage<I>>, AssemblyError> {
        let bs = self.bs();
        let st = self
            .scatter
            .as_mut()
            .ok_or(AssemblyError::NoScatterInProgress)?;
        if let Some(msg) = st.loopback.take() {
            return Ok(Some(msg));
        }
        loop {
            if st.delivered == st.nrecv {
                return Ok(None);
            }
            let Some((slot, env)) = wait_any(&mut st.recvs) else {
                return Err(AssemblyError::comm(
                    self.comm.rank(),
                    format!(
                        "receives exhausted with {} of {} messages delivered",
                        st.delivered, st.nrecv
                    ),
                ));
            };
            if let Some((source, halves)) = st.accept(slot, env)? {
                st.delivered += 1;
                return halves.into_message(source, bs, st.max_entries).map(Some);
            }
        }
    }

    /// Finish the cycle: drain unread messages, wait for sends, record the
    /// sizing hint, and reset the stash for the next cycle.
    pub fn scatter_end(&mut self) -> Result<(), AssemblyError> {
        let mut st = self
            .scatter
            .take()
            .ok_or(AssemblyError::NoScatterInProgress)?;
        let rank = self.comm.rank();

        let undelivered = st.nrecv - st.delivered;
        let mut maybe_err = None;
        if undelivered > 0 {
            log::warn!("[rank {rank}] scatter ended with {undelivered} undelivered messages; discarding");
            while let Some((slot, env)) = wait_any(&mut st.recvs) {
                if let Err(e) = st.accept(slot, env) {
                    maybe_err.get_or_insert(e);
                }
            }
        }

        // always drain all send handles before returning
        for send in st.sends {
            send.wait();
        }

        let sized = self.entries.finish_cycle();
        self.mode = None;
        match maybe_err {
            Some(err) => Err(err),
            None => sized,
        }
    }
}

impl<I, C: Communicator> ScatterState<I, C> {
    /// File one completed channel half; returns both halves once the
    /// source's message is complete.
    fn accept(
        &mut self,
        slot: usize,
        env: Envelope,
    ) -> Result<Option<(usize, Halves)>, AssemblyError> {
        let on_values = slot < self.nrecv;
        log::trace!(
            "received {} bytes on {} channel from rank {}",
            env.data.len(),
            if on_values { "values" } else { "indices" },
            env.source
        );
        let halves = self.pending.entry(env.source).or_default();
        let half = if on_values {
            &mut halves.values
        } else {
            &mut halves.indices
        };
        if half.replace(env.data).is_some() {
            return Err(AssemblyError::comm(
                env.source,
                "second message on one channel within a single scatter",
            ));
        }
        if halves.values.is_some() && halves.indices.is_some() {
            return Ok(self.pending.remove(&env.source).map(|h| (env.source, h)));
        }
        Ok(None)
    }
}

impl Halves {
    fn into_message<I: StashIndex>(
        self,
        source: usize,
        bs: usize,
        max_entries: usize,
    ) -> Result<StashMessage<I>, AssemblyError> {
        let (Some(values), Some(indices)) = (self.values, self.indices) else {
            return Err(AssemblyError::comm(source, "incomplete message"));
        };
        let (nv, vals): (usize, Vec<WireScalar>) = decode_block(&values, CHANNEL_VALUES, bs)
            .map_err(|msg| AssemblyError::comm(source, msg))?;
        let (ni, idx): (usize, Vec<I::Wire>) = decode_block(&indices, CHANNEL_INDICES, 1)
            .map_err(|msg| AssemblyError::comm(source, msg))?;
        if nv != ni {
            return Err(AssemblyError::comm(
                source,
                format!("values block has {nv} entries, indices block has {ni}"),
            ));
        }
        if nv > max_entries {
            return Err(AssemblyError::comm(
                source,
                format!("message of {nv} entries exceeds the agreed maximum {max_entries}"),
            ));
        }
        Ok(StashMessage {
            source,
            bs,
            indices: idx.into_iter().map(I::from_wire).collect(),
            values: vals.into_iter().map(WireScalar::get).collect(),
        })
    }
}
