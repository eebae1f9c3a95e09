//! Seams to the remote object store and the cluster event sink.
//!
//! The controller never talks to a concrete API server.  It is handed a
//! [`ClaimClient`] (read claims and volumes, apply merge patches) and an
//! [`EventRecorder`] at construction.  [`memory`] provides in-process
//! implementations used by tests and embedders without a live cluster.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::ExpandError;
use crate::types::{EventType, ObjectReference, PersistentVolume, PersistentVolumeClaim};

pub mod memory;

pub use memory::{MemoryRecorder, MemoryStore, RecordedEvent};

/// Access to claim and volume objects in the remote store.
///
/// Patches are JSON merge patches.  A patch carrying
/// `metadata.resourceVersion` is applied only if the stored object still has
/// that version; otherwise the call fails with [`ExpandError::Conflict`].
#[async_trait]
pub trait ClaimClient: Send + Sync {
    /// Fetch a claim fresh from the store.
    async fn get_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PersistentVolumeClaim, ExpandError>;

    /// Fetch a persistent volume fresh from the store.
    async fn get_volume(&self, name: &str) -> Result<PersistentVolume, ExpandError>;

    /// Patch the status subresource of a claim.  Only `status` (and the
    /// `metadata.resourceVersion` precondition) is honoured.
    async fn patch_claim_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<PersistentVolumeClaim, ExpandError>;

    /// Patch a persistent volume.
    async fn patch_volume(&self, name: &str, patch: &Value)
    -> Result<PersistentVolume, ExpandError>;
}

/// Sink for cluster events.  Recording is fire-and-forget.
pub trait EventRecorder: Send + Sync {
    fn record(&self, object: &ObjectReference, type_: EventType, reason: &str, message: &str);
}

/// Recorder that only writes events to the log.
#[derive(Debug, Clone)]
pub struct TracingRecorder {
    component: String,
}

impl TracingRecorder {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }
}

impl EventRecorder for TracingRecorder {
    fn record(&self, object: &ObjectReference, type_: EventType, reason: &str, message: &str) {
        match type_ {
            EventType::Normal => {
                info!(component = %self.component, %object, reason, message, "event")
            }
            EventType::Warning => {
                warn!(component = %self.component, %object, reason, message, "event")
            }
        }
    }
}
