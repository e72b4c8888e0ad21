//! AssemblyError: unified error type for dist-assembly public APIs
//!
//! Every fallible operation of the stash, the ownership map and the split
//! reduction registry reports through this type. Ordering and state errors
//! indicate a bug in the caller's control flow and are never retried.

use crate::algs::combine::CombineOp;
use crate::data::stash_index::InsertMode;
use std::collections::TryReserveError;
use thiserror::Error;

/// Unified error type for assembly and reduction operations.
#[derive(Debug, Error)]
pub enum AssemblyError {
    /// A global index lies at or beyond the extent of the ownership map.
    #[error("index {index} out of range for global extent {extent}")]
    IndexOutOfRange { index: u64, extent: u64 },
    /// Partition boundaries are not a valid ownership map.
    #[error("invalid ownership map: {0}")]
    InvalidOwnership(String),
    /// A payload block did not have the stash block size.
    #[error("payload has {got} scalars, block size requires {expected}")]
    PayloadLength { expected: usize, got: usize },
    /// Insert and accumulate were mixed within one assembly cycle.
    #[error("cannot {requested} values in a cycle that already used {current}")]
    MixedInsertMode {
        current: InsertMode,
        requested: InsertMode,
    },
    /// Some processes inserted values while others accumulated.
    #[error("some processes inserted values while others added")]
    InconsistentInsertMode,
    /// `put` or `scatter_begin` while a scatter is already open.
    #[error("scatter already in progress; call scatter_end first")]
    ScatterInProgress,
    /// `scatter_get_message` or `scatter_end` without `scatter_begin`.
    #[error("no scatter in progress; call scatter_begin first")]
    NoScatterInProgress,
    /// Message-passing failure or malformed message from a peer.
    #[error("communication error with rank {neighbor}: {source}")]
    CommError {
        neighbor: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// Growing a buffer failed.
    #[error("allocation failed while growing buffer: {0}")]
    AllocationFailed(#[from] TryReserveError),
    /// `end` was called for a ticket other than the next one in issue order.
    #[error("reduction end called out of order: expected slot {expected}, got slot {got}")]
    EndOutOfOrder { expected: usize, got: usize },
    /// `begin` was called while results of the previous batch are still being drained.
    #[error("reduction begin called before all ends of the previous batch ({pending} pending)")]
    BatchNotDrained { pending: usize },
    /// `end` was called more times than `begin`.
    #[error("reduction end called with no pending reductions")]
    EndWithoutBegin,
    /// Ticket belongs to a batch that has already been drained.
    #[error("ticket from batch {ticket} used in batch {current}")]
    StaleTicket { ticket: u64, current: u64 },
    /// The finishing call expected a different combine operator for this slot.
    #[error("slot {slot} was opened with {opened:?} but finished as {requested:?}")]
    OperatorMismatch {
        slot: usize,
        opened: CombineOp,
        requested: CombineOp,
    },
    /// A tag word in a mixed-operator reduction was not a known operator.
    #[error("corrupt reduction tag {0}")]
    CorruptReduction(f64),
}

impl AssemblyError {
    /// Wrap a plain message as a communication error with `neighbor`.
    pub fn comm(neighbor: usize, msg: impl Into<String>) -> Self {
        AssemblyError::CommError {
            neighbor,
            source: msg.into().into(),
        }
    }
}
