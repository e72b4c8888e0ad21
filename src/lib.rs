#![cfg_attr(docsrs, feature(doc_cfg))]
//! # dist-assembly
//!
//! dist-assembly is the assembly and reduction substrate of distributed
//! vectors and sparse matrices. Every rank owns a contiguous range of a
//! global index space; application code may write entries owned by other
//! ranks and may open many independent global reductions at once.
//!
//! ## Features
//! - [`Stash`](algs::stash::Stash): buffers off-process entries and delivers
//!   them to their owners with a four-phase scatter (count exchange, posted
//!   any-source receives, packed sends, message-by-message delivery)
//! - [`ProcessGroup`](algs::split_reduction::ProcessGroup): split-phase
//!   reductions where any mix of sum, max and min slots costs one collective
//! - [`DistVec`](data::dist_vec::DistVec): a distributed vector driving both
//!   through `set_values` / `assembly_begin` / `assembly_end`
//! - Pluggable communication backends: serial [`NoComm`](algs::communicator::NoComm),
//!   threads-as-ranks [`LocalComm`](algs::communicator::LocalComm), and MPI
//!   (`mpi-support` feature)
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! dist-assembly = "0.1"
//! # Optional features:
//! # features = ["mpi-support", "check-invariants"]
//! ```
//!
//! The ordering contract is the caller's: every rank must call
//! `scatter_begin`/`scatter_end` and open/close reductions in the same
//! sequence. Only local misuse is detected.

pub mod algs;
pub mod assembly_error;
pub mod config;
pub mod data;
pub mod debug_invariants;
pub mod topology;

pub use debug_invariants::DebugInvariants;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::combine::CombineOp;
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::communicator::{
        CommTag, Communicator, LocalComm, NoComm, StashCommTags,
    };
    pub use crate::algs::split_reduction::{ProcessGroup, SplitReductionHandle, Ticket};
    pub use crate::algs::stash::{Stash, StashMessage};
    pub use crate::algs::vec_reduce::{NormType, NormValue};
    pub use crate::assembly_error::AssemblyError;
    pub use crate::config::StashOptions;
    pub use crate::data::dist_vec::DistVec;
    pub use crate::data::sizing::SizingPolicy;
    pub use crate::data::stash_index::{InsertMode, MatIndex, StashIndex};
    pub use crate::topology::ownership::OwnershipMap;
}
