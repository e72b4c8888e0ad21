//! Data module: entry storage, sizing and the distributed vector.

pub mod dist_vec;
pub mod entry_buffer;
pub mod sizing;
pub mod stash_index;

pub use dist_vec::DistVec;
pub use stash_index::{InsertMode, MatIndex, StashIndex};
