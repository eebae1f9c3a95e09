//! # libexpand — volume expansion control loop for RK8s
//!
//! `libexpand` grows persistent volumes whose claims request more storage
//! than they were provisioned with.  A grow runs in two stages: the
//! provider grows the backing storage, then (for filesystem volumes) the
//! node grows the filesystem on the larger device.  Progress is persisted
//! as conditions on the claim's status so a restarted controller resumes
//! where it stopped.  It follows the RK8s conventions (Tokio async runtime,
//! `tracing` for observability, `thiserror` for structured errors).
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Claim, volume, condition and event data model. |
//! | [`quantity`] | Resource quantities (`5Gi`, `500M`, ...). |
//! | [`error`] | [`ExpandError`] and the outcome classes. |
//! | [`config`] | [`ExpandConfig`]: feature gates and loop period. |
//! | [`telemetry`] | `tracing-subscriber` setup. |
//! | [`patch`] | Two-way JSON merge patches. |
//! | [`status`] | Resize status machine on the claim. |
//! | [`client`] | [`ClaimClient`] and [`EventRecorder`] seams, in-memory store. |
//! | [`plugin`] | [`Expander`] / [`NodeExpander`] capabilities and registry. |
//! | [`cache`] | Desired and actual state of world. |
//! | [`operation`] | Grow operations and the per-volume tracker. |
//! | [`reconciler`] | Periodic dispatch of pending grows. |
//! | [`controller`] | [`ExpandController`]: watch handlers plus reconciler. |
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use libexpand::{ExpandConfig, ExpandController, MemoryStore, PluginRegistry, TracingRecorder};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() {
//! let config = ExpandConfig::from_env();
//! let recorder = Arc::new(TracingRecorder::new(config.component.clone()));
//! let controller = ExpandController::new(
//!     config,
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(PluginRegistry::new()),
//!     recorder,
//! );
//! controller.run(CancellationToken::new()).await;
//! # }
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod operation;
pub mod patch;
pub mod plugin;
pub mod quantity;
pub mod reconciler;
pub mod status;
pub mod telemetry;
pub mod types;

pub use cache::{ActualStateOfWorld, DesiredStateOfWorld, VolumeResizeRequest};
pub use client::{ClaimClient, EventRecorder, MemoryRecorder, MemoryStore, TracingRecorder};
pub use config::ExpandConfig;
pub use controller::ExpandController;
pub use error::ExpandError;
pub use operation::{OperationExecutor, OperationResult, VolumeToMount};
pub use plugin::{Expander, NodeExpander, NodeResizeOptions, PluginRegistry, VolumePlugin};
pub use quantity::Quantity;
pub use reconciler::Reconciler;
pub use types::*;
