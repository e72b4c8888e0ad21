//! Communication, exchange and reduction algorithms.

pub mod combine;
pub mod communicator;
pub mod split_reduction;
pub mod stash;
pub mod vec_reduce;
pub mod wire;

pub use split_reduction::ProcessGroup;
pub use stash::Stash;
