//! Partitioning of the global index space across ranks.

pub mod ownership;

pub use ownership::OwnershipMap;
