//! In-memory views of the world kept by the expansion controller.
//!
//! | Cache | Holds |
//! |---|---|
//! | [`DesiredStateOfWorld`] | claims believed to need a grow |
//! | [`ActualStateOfWorld`] | capacity last confirmed on each claim's status |
//!
//! Both are shared between the event-handling path and the reconciler and
//! are internally synchronized.  Neither is authoritative: the claim status
//! in the remote store is.

pub mod actual_state;
pub mod desired_state;

pub use actual_state::ActualStateOfWorld;
pub use desired_state::{DesiredStateOfWorld, VolumeResizeRequest};
