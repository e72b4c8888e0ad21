//! Thin façade over intra-process (threads as ranks) or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees).
//! All handles are **waitable** but non-blocking; the stash calls
//! `.wait()` or [`wait_any`] before it trusts that a buffer is ready.
//! Collectives are blocking and must be entered by every rank of the group
//! in the same order.

use crate::algs::combine::{CountOp, ScalarReduce, combine_scalar, combine_u64};
use crate::algs::wire::{cast_slice, pod_vec};
use crate::assembly_error::AssemblyError;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;

/// Typed message tag. Collaborators derive channel tags from a base with
/// [`CommTag::offset`] so concurrent exchanges never collide.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CommTag(pub u16);

impl CommTag {
    #[inline]
    pub const fn new(tag: u16) -> Self {
        Self(tag)
    }
    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }
    #[inline]
    pub const fn offset(self, by: u16) -> Self {
        Self(self.0.wrapping_add(by))
    }
}

/// Tags for the two channels of one stash exchange.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StashCommTags {
    /// Channel carrying value blocks.
    pub values: CommTag,
    /// Channel carrying index blocks.
    pub indices: CommTag,
}

impl StashCommTags {
    /// Construct tags from a base, assigning deterministic offsets per channel.
    #[inline]
    pub const fn from_base(base: CommTag) -> Self {
        Self {
            values: base,
            indices: base.offset(1),
        }
    }
}

/// A received message together with the rank that sent it.
#[derive(Clone, Debug)]
pub struct Envelope {
    pub source: usize,
    pub data: Bytes,
}

/// A send that can be waited on until its buffer is released.
pub trait Wait {
    fn wait(self);
}

/// A receive posted without a fixed source.
pub trait AnySourceHandle {
    /// Non-blocking completion check; yields the message once it arrived.
    fn test(&mut self) -> Option<Envelope>;
}

/// Non-blocking communication interface plus the few collectives the
/// assembly and reduction protocols need.
pub trait Communicator: Send + Sync + 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv_any`.
    type AnyRecvHandle: AnySourceHandle;

    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    fn irecv_any(&self, tag: u16) -> Self::AnyRecvHandle;

    /// Element-wise all-reduce of `u64` words.
    fn all_reduce_u64(
        &self,
        local: &[u64],
        global: &mut [u64],
        op: CountOp,
    ) -> Result<(), AssemblyError>;

    /// Element-wise all-reduce of `f64` words.
    fn all_reduce_f64(
        &self,
        local: &[f64],
        global: &mut [f64],
        op: ScalarReduce,
    ) -> Result<(), AssemblyError>;
}

/// Block until one outstanding handle completes.
///
/// Completed slots are set to `None`. Returns `None` when no handle is
/// outstanding.
pub fn wait_any<H: AnySourceHandle>(handles: &mut [Option<H>]) -> Option<(usize, Envelope)> {
    if handles.iter().all(Option::is_none) {
        return None;
    }
    loop {
        for (slot, handle) in handles.iter_mut().enumerate() {
            if let Some(h) = handle {
                if let Some(env) = h.test() {
                    *handle = None;
                    return Some((slot, env));
                }
            }
        }
        std::thread::yield_now();
    }
}

/// Compile-time no-op comm for pure serial unit tests: one rank, no peers.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Wait for () {
    fn wait(self) {}
}

impl AnySourceHandle for () {
    fn test(&mut self) -> Option<Envelope> {
        None
    }
}

impl Communicator for NoComm {
    type SendHandle = ();
    type AnyRecvHandle = ();

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv_any(&self, _tag: u16) {}

    fn all_reduce_u64(
        &self,
        local: &[u64],
        global: &mut [u64],
        _op: CountOp,
    ) -> Result<(), AssemblyError> {
        global.copy_from_slice(local);
        Ok(())
    }

    fn all_reduce_f64(
        &self,
        local: &[f64],
        global: &mut [f64],
        _op: ScalarReduce,
    ) -> Result<(), AssemblyError> {
        global.copy_from_slice(local);
        Ok(())
    }
}

// --- LocalComm: ranks are threads of one process ---

type MailKey = (usize, u16); // (dst, tag)

/// Shared state of an in-process group: per-(dst, tag) FIFO mailboxes and
/// a generation-counted rendezvous for collectives.
pub struct LocalWorld {
    size: usize,
    mailbox: DashMap<MailKey, VecDeque<Envelope>>,
    state: Mutex<Rendezvous>,
    turn: Condvar,
}

struct Rendezvous {
    generation: u64,
    arrived: usize,
    slots: Vec<Option<Bytes>>,
    result: Option<Result<Bytes, String>>,
}

impl LocalWorld {
    pub fn new(size: usize) -> Arc<Self> {
        Arc::new(Self {
            size,
            mailbox: DashMap::new(),
            state: Mutex::new(Rendezvous {
                generation: 0,
                arrived: 0,
                slots: vec![None; size],
                result: None,
            }),
            turn: Condvar::new(),
        })
    }

    fn post(&self, dst: usize, tag: u16, env: Envelope) {
        self.mailbox.entry((dst, tag)).or_default().push_back(env);
    }

    fn take(&self, dst: usize, tag: u16) -> Option<Envelope> {
        self.mailbox.get_mut(&(dst, tag))?.pop_front()
    }

    /// Every rank deposits `contribution`; the last arrival folds all of
    /// them in rank order and publishes the result to the group.
    fn collective<F>(&self, rank: usize, contribution: Vec<u8>, fold: F) -> Result<Bytes, String>
    where
        F: FnOnce(&[Bytes]) -> Result<Vec<u8>, String>,
    {
        let mut st = self.state.lock();
        let my_generation = st.generation;
        st.slots[rank] = Some(Bytes::from(contribution));
        st.arrived += 1;
        if st.arrived == self.size {
            let parts: Vec<Bytes> = st
                .slots
                .iter_mut()
                .map(|slot| slot.take().unwrap_or_default())
                .collect();
            st.result = Some(fold(&parts).map(Bytes::from));
            st.arrived = 0;
            st.generation = st.generation.wrapping_add(1);
            self.turn.notify_all();
        } else {
            while st.generation == my_generation {
                self.turn.wait(&mut st);
            }
        }
        st.result
            .clone()
            .unwrap_or_else(|| Err("collective finished without a result".into()))
    }
}

/// One rank's view of a [`LocalWorld`].
#[derive(Clone)]
pub struct LocalComm {
    world: Arc<LocalWorld>,
    rank: usize,
}

impl LocalComm {
    pub fn new(world: Arc<LocalWorld>, rank: usize) -> Self {
        Self { world, rank }
    }

    /// Build a group of `size` ranks sharing one world.
    pub fn world(size: usize) -> Vec<LocalComm> {
        let world = LocalWorld::new(size);
        (0..size)
            .map(|rank| LocalComm::new(world.clone(), rank))
            .collect()
    }

    fn fold_words<T, F>(
        &self,
        local: &[T],
        global: &mut [T],
        combine: F,
    ) -> Result<(), AssemblyError>
    where
        T: bytemuck::Pod,
        F: Fn(&[T], &mut [T]) -> Result<(), String>,
    {
        let n = local.len();
        let out = self
            .world
            .collective(self.rank, cast_slice(local).to_vec(), |parts| {
                let mut acc: Vec<T> = pod_vec(&parts[0]);
                for (src, part) in parts.iter().enumerate().skip(1) {
                    let words: Vec<T> = pod_vec(part);
                    if words.len() != acc.len() {
                        return Err(format!(
                            "rank {src} contributed {} words, rank 0 contributed {}",
                            words.len(),
                            acc.len()
                        ));
                    }
                    combine(&words, &mut acc)?;
                }
                Ok(cast_slice(&acc).to_vec())
            })
            .map_err(|msg| AssemblyError::comm(self.rank, msg))?;
        let words: Vec<T> = pod_vec(&out);
        if words.len() != n {
            return Err(AssemblyError::comm(
                self.rank,
                format!("collective returned {} words, expected {n}", words.len()),
            ));
        }
        global.copy_from_slice(&words);
        Ok(())
    }
}

impl std::fmt::Debug for LocalComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalComm")
            .field("rank", &self.rank)
            .field("size", &self.world.size)
            .finish()
    }
}

/// Any-source receive on a [`LocalWorld`].
pub struct LocalAnyHandle {
    world: Arc<LocalWorld>,
    dst: usize,
    tag: u16,
}

impl AnySourceHandle for LocalAnyHandle {
    fn test(&mut self) -> Option<Envelope> {
        self.world.take(self.dst, self.tag)
    }
}

impl Communicator for LocalComm {
    type SendHandle = ();
    type AnyRecvHandle = LocalAnyHandle;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.world.size
    }

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        let env = Envelope {
            source: self.rank,
            data: Bytes::copy_from_slice(buf),
        };
        self.world.post(peer, tag, env);
    }

    fn irecv_any(&self, tag: u16) -> Self::AnyRecvHandle {
        LocalAnyHandle {
            world: self.world.clone(),
            dst: self.rank,
            tag,
        }
    }

    fn all_reduce_u64(
        &self,
        local: &[u64],
        global: &mut [u64],
        op: CountOp,
    ) -> Result<(), AssemblyError> {
        self.fold_words(local, global, |input, inout| {
            combine_u64(op, input, inout);
            Ok(())
        })
    }

    fn all_reduce_f64(
        &self,
        local: &[f64],
        global: &mut [f64],
        op: ScalarReduce,
    ) -> Result<(), AssemblyError> {
        self.fold_words(local, global, |input, inout| {
            combine_scalar(op, input, inout).map_err(|e| e.to_string())
        })
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use crate::algs::combine::{CombineOp, combine_tagged};
    use mpi::collective::{SystemOperation, UserOperation};
    use mpi::environment::Universe;
    use mpi::request::{Request, StaticScope};
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;
    use mpi::Threading;

    #[derive(Clone)]
    pub struct MpiComm {
        pub world: Arc<SimpleCommunicator>,
        pub rank: usize,
        pub size: usize,
        _universe: Arc<Universe>,
    }

    // SAFETY: MPI is initialized with `Threading::Multiple`, so the
    // communicator may be used from any thread.
    unsafe impl Send for MpiComm {}
    unsafe impl Sync for MpiComm {}

    impl MpiComm {
        pub fn new() -> Result<Self, AssemblyError> {
            let (universe, level) = mpi::initialize_with_threading(Threading::Multiple)
                .ok_or_else(|| AssemblyError::comm(0, "MPI already initialized"))?;
            if level < Threading::Multiple {
                log::warn!("MPI provides threading level {level:?}; use MpiComm from one thread");
            }
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Ok(Self {
                world: Arc::new(world),
                rank,
                size,
                _universe: Arc::new(universe),
            })
        }

        fn system_op(op: CombineOp) -> SystemOperation {
            match op {
                CombineOp::Sum => SystemOperation::sum(),
                CombineOp::Max => SystemOperation::max(),
                CombineOp::Min => SystemOperation::min(),
            }
        }
    }

    /// Immediate send over a buffer owned by the handle.
    pub struct MpiSendHandle {
        req: Option<Request<'static, [u8]>>,
        buf: *mut [u8],
    }

    impl Wait for MpiSendHandle {
        fn wait(mut self) {
            if let Some(req) = self.req.take() {
                req.wait();
            }
            // SAFETY: `buf` was leaked from a Box in `isend` and the request
            // that borrowed it has completed.
            drop(unsafe { Box::from_raw(self.buf) });
        }
    }

    pub struct MpiAnyHandle {
        world: Arc<SimpleCommunicator>,
        tag: u16,
    }

    impl AnySourceHandle for MpiAnyHandle {
        fn test(&mut self) -> Option<Envelope> {
            let (msg, _) = self
                .world
                .any_process()
                .immediate_matched_probe_with_tag(self.tag as i32)?;
            let (data, status) = msg.matched_receive_vec::<u8>();
            Some(Envelope {
                source: status.source_rank() as usize,
                data: Bytes::from(data),
            })
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSendHandle;
        type AnyRecvHandle = MpiAnyHandle;

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiSendHandle {
            let owned: &'static mut [u8] = Box::leak(buf.to_vec().into_boxed_slice());
            let ptr: *mut [u8] = owned;
            // SAFETY: the leaked buffer lives until `MpiSendHandle::wait` frees it.
            let data: &'static [u8] = unsafe { &*ptr };
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, data, tag as i32);
            MpiSendHandle {
                req: Some(req),
                buf: ptr,
            }
        }

        fn irecv_any(&self, tag: u16) -> MpiAnyHandle {
            MpiAnyHandle {
                world: self.world.clone(),
                tag,
            }
        }

        fn all_reduce_u64(
            &self,
            local: &[u64],
            global: &mut [u64],
            op: CountOp,
        ) -> Result<(), AssemblyError> {
            match op {
                CountOp::Sum => self.world.all_reduce_into(local, global, SystemOperation::sum()),
                CountOp::BitOr => {
                    self.world
                        .all_reduce_into(local, global, SystemOperation::bitwise_or())
                }
                CountOp::MaxSum => {
                    let max_sum = UserOperation::commutative(|x, y| {
                        let (Some(x), Some(y)) = (x.downcast::<u64>(), y.downcast::<u64>()) else {
                            log::error!("max-sum reduction applied to a non-u64 buffer");
                            return;
                        };
                        combine_u64(CountOp::MaxSum, x, y);
                    });
                    self.world.all_reduce_into(local, global, &max_sum);
                }
            }
            Ok(())
        }

        fn all_reduce_f64(
            &self,
            local: &[f64],
            global: &mut [f64],
            op: ScalarReduce,
        ) -> Result<(), AssemblyError> {
            match op {
                ScalarReduce::Native(op) => {
                    self.world.all_reduce_into(local, global, Self::system_op(op))
                }
                ScalarReduce::Tagged => {
                    // First failure seen by this rank's kernel.
                    let failed: Mutex<Option<AssemblyError>> = Mutex::new(None);
                    let tagged = UserOperation::commutative(|x, y| {
                        let result = match (x.downcast::<f64>(), y.downcast::<f64>()) {
                            (Some(x), Some(y)) => combine_tagged(x, y),
                            _ => Err(AssemblyError::CorruptReduction(f64::NAN)),
                        };
                        if let Err(e) = result {
                            failed.lock().get_or_insert(e);
                        }
                    });
                    self.world.all_reduce_into(local, global, &tagged);
                    drop(tagged);
                    if let Some(e) = failed.into_inner() {
                        log::error!("[rank {}] tagged reduction failed: {e}", self.rank);
                        return Err(e);
                    }
                }
            }
            Ok(())
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;
