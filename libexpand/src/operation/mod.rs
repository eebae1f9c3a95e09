//! Operation layer: the grow operations and the tracker that runs them.
//!
//! | Module | Responsibility |
//! |---|---|
//! | [`executor`] | provider-level and node-local grow, status persistence |
//! | [`tracker`] | one in-flight operation per volume, panic recovery |

pub mod executor;
pub mod tracker;

pub use executor::{OperationExecutor, VolumeToMount};
pub use tracker::{GeneratedOperation, OperationResult, OperationTracker};
