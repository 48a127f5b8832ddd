pub mod executor;
pub mod tracker;

pub use tracker::{PositionStore, PositionTracker};
