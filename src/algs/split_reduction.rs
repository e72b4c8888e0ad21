//! Split-phase collective reductions.
//!
//! Callers open any number of independent reductions with
//! [`SplitReductionHandle::begin`], keep working, then close them with
//! [`SplitReductionHandle::end`] in the order they were opened. The first
//! `end` of a batch performs a single collective for the whole batch:
//! a native reduction when every slot uses the same operator, otherwise one
//! tagged reduction that applies each slot's operator.
//!
//! The registry is owned by its [`ProcessGroup`], created on first use and
//! dropped with the group.

use crate::algs::combine::{CombineOp, ScalarReduce, pack_tagged};
use crate::algs::communicator::Communicator;
use crate::assembly_error::AssemblyError;
use crate::debug_invariants::DebugInvariants;
use once_cell::unsync::OnceCell;
use std::cell::RefCell;

/// Initial number of slots; the slot arrays double from here.
const INITIAL_SLOTS: usize = 32;

/// Receipt for one opened reduction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Ticket {
    slot: usize,
    op: CombineOp,
    batch: u64,
}

impl Ticket {
    pub fn slot(&self) -> usize {
        self.slot
    }
    pub fn op(&self) -> CombineOp {
        self.op
    }
    pub fn batch(&self) -> u64 {
        self.batch
    }
}

/// Registry state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BatchState {
    /// Accepting `begin`.
    Open,
    /// Collective done, `end` calls draining results.
    Resolved,
}

/// Pending partials and results of one batch.
#[derive(Debug)]
pub struct SplitReduction {
    state: BatchState,
    local: Vec<f64>,
    global: Vec<f64>,
    ops: Vec<CombineOp>,
    ends: usize,
    batch: u64,
}

impl Default for SplitReduction {
    fn default() -> Self {
        Self::new()
    }
}

impl SplitReduction {
    pub fn new() -> Self {
        Self {
            state: BatchState::Open,
            local: Vec::new(),
            global: Vec::new(),
            ops: Vec::new(),
            ends: 0,
            batch: 0,
        }
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    /// Reductions opened and not yet ended.
    pub fn pending(&self) -> usize {
        self.ops.len() - self.ends
    }

    pub fn batch(&self) -> u64 {
        self.batch
    }

    fn begin(&mut self, op: CombineOp, partial: f64) -> Result<Ticket, AssemblyError> {
        if self.state == BatchState::Resolved {
            return Err(AssemblyError::BatchNotDrained {
                pending: self.pending(),
            });
        }
        if self.ops.len() == self.ops.capacity() {
            let next = (2 * self.ops.capacity()).max(INITIAL_SLOTS);
            let more = next - self.ops.len();
            self.local.try_reserve_exact(more)?;
            self.ops.try_reserve_exact(more)?;
        }
        let slot = self.ops.len();
        self.local.push(partial);
        self.ops.push(op);
        Ok(Ticket {
            slot,
            op,
            batch: self.batch,
        })
    }

    fn end<C: Communicator>(
        &mut self,
        comm: &C,
        ticket: Ticket,
        expect: CombineOp,
    ) -> Result<f64, AssemblyError> {
        if ticket.batch != self.batch {
            return Err(AssemblyError::StaleTicket {
                ticket: ticket.batch,
                current: self.batch,
            });
        }
        if self.state == BatchState::Open {
            if self.ops.is_empty() {
                return Err(AssemblyError::EndWithoutBegin);
            }
            self.apply(comm)?;
            self.state = BatchState::Resolved;
        }
        if self.ends >= self.ops.len() {
            return Err(AssemblyError::EndWithoutBegin);
        }
        if ticket.slot != self.ends {
            return Err(AssemblyError::EndOutOfOrder {
                expected: self.ends,
                got: ticket.slot,
            });
        }
        let opened = self.ops[ticket.slot];
        if opened != expect {
            return Err(AssemblyError::OperatorMismatch {
                slot: ticket.slot,
                opened,
                requested: expect,
            });
        }
        let result = self.global[ticket.slot];
        self.ends += 1;
        if self.ends == self.ops.len() {
            self.reset();
        }
        self.debug_assert_invariants();
        Ok(result)
    }

    /// One collective for every pending slot.
    fn apply<C: Communicator>(&mut self, comm: &C) -> Result<(), AssemblyError> {
        let n = self.ops.len();
        self.global.clear();
        self.global.try_reserve_exact(n)?;
        if comm.size() == 1 {
            self.global.extend_from_slice(&self.local);
            return Ok(());
        }
        let first = self.ops[0];
        if self.ops.iter().all(|&op| op == first) {
            log::debug!("split reduction: {n} slots, native {first:?}");
            self.global.resize(n, 0.0);
            comm.all_reduce_f64(&self.local, &mut self.global, ScalarReduce::Native(first))
        } else {
            log::debug!("split reduction: {n} slots, mixed operators");
            let packed = pack_tagged(&self.local, &self.ops);
            let mut reduced = vec![0.0; packed.len()];
            comm.all_reduce_f64(&packed, &mut reduced, ScalarReduce::Tagged)?;
            self.global.extend_from_slice(&reduced[..n]);
            Ok(())
        }
    }

    fn reset(&mut self) {
        self.state = BatchState::Open;
        self.local.clear();
        self.global.clear();
        self.ops.clear();
        self.ends = 0;
        self.batch = self.batch.wrapping_add(1);
    }
}

impl DebugInvariants for SplitReduction {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "SplitReduction");
    }

    fn validate_invariants(&self) -> Result<(), AssemblyError> {
        if self.local.len() != self.ops.len() {
            return Err(AssemblyError::PayloadLength {
                expected: self.ops.len(),
                got: self.local.len(),
            });
        }
        if self.ends > self.ops.len() {
            return Err(AssemblyError::EndWithoutBegin);
        }
        if self.state == BatchState::Open && self.ends != 0 {
            return Err(AssemblyError::BatchNotDrained {
                pending: self.pending(),
            });
        }
        Ok(())
    }
}

/// A communicator together with the per-group reduction registry.
pub struct ProcessGroup<C: Communicator> {
    comm: C,
    registry: OnceCell<RefCell<SplitReduction>>,
}

impl<C: Communicator> ProcessGroup<C> {
    pub fn new(comm: C) -> Self {
        Self {
            comm,
            registry: OnceCell::new(),
        }
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    /// Handle to the group's registry, creating it on first use.
    pub fn split_reduction(&self) -> SplitReductionHandle<'_, C> {
        let registry = self.registry.get_or_init(|| {
            log::debug!(
                "[rank {}] creating split reduction registry",
                self.comm.rank()
            );
            RefCell::new(SplitReduction::new())
        });
        SplitReductionHandle {
            comm: &self.comm,
            registry,
        }
    }

    pub fn has_registry(&self) -> bool {
        self.registry.get().is_some()
    }
}

impl<C: Communicator> Drop for ProcessGroup<C> {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.take() {
            let pending = registry.borrow().pending();
            if pending > 0 {
                log::warn!(
                    "[rank {}] destroying split reduction registry with {pending} pending reductions",
                    self.comm.rank()
                );
            }
            log::debug!(
                "[rank {}] destroyed split reduction registry",
                self.comm.rank()
            );
        }
    }
}

/// Borrowed access to a group's registry.
pub struct SplitReductionHandle<'g, C: Communicator> {
    comm: &'g C,
    registry: &'g RefCell<SplitReduction>,
}

impl<C: Communicator> SplitReductionHandle<'_, C> {
    /// Open a reduction of `partial` under `op`.
    pub fn begin(&self, op: CombineOp, partial: f64) -> Result<Ticket, AssemblyError> {
        self.registry.borrow_mut().begin(op, partial)
    }

    /// Close `ticket` and return the reduced value.
    ///
    /// Collective on the first call of a batch.
    pub fn end(&self, ticket: Ticket) -> Result<f64, AssemblyError> {
        self.end_as(ticket, ticket.op)
    }

    /// Like [`end`](Self::end) but checks the slot was opened with `op`.
    pub fn end_as(&self, ticket: Ticket, op: CombineOp) -> Result<f64, AssemblyError> {
        self.registry.borrow_mut().end(self.comm, ticket, op)
    }

    pub fn state(&self) -> BatchState {
        self.registry.borrow().state()
    }

    pub fn pending(&self) -> usize {
        self.registry.borrow().pending()
    }
}
