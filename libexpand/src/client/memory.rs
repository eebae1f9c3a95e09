//! In-process [`ClaimClient`] and [`EventRecorder`] implementations.
//!
//! [`MemoryStore`] behaves like the API server for the calls this crate
//! makes: every write bumps `metadata.resourceVersion`, merge patches are
//! applied to the stored JSON form, and a stale `resourceVersion` in a patch
//! is rejected with [`ExpandError::Conflict`].

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::{ClaimClient, EventRecorder};
use crate::error::ExpandError;
use crate::types::{EventType, ObjectReference, PersistentVolume, PersistentVolumeClaim};

/// Versioned in-memory object store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    claims: DashMap<(String, String), PersistentVolumeClaim>,
    volumes: DashMap<String, PersistentVolume>,
    version: AtomicU64,
    claim_patches: AtomicUsize,
    volume_patches: AtomicUsize,
    /// Number of upcoming claim patches that fail with an API error.
    failing_claim_patches: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    /// Insert or replace a claim, assigning a UID if it has none.
    pub fn insert_claim(&self, mut pvc: PersistentVolumeClaim) -> PersistentVolumeClaim {
        if pvc.metadata.uid.is_none() {
            pvc.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        }
        pvc.metadata.resource_version = Some(self.next_version());
        let key = (
            pvc.metadata.namespace.clone().unwrap_or_default(),
            pvc.metadata.name.clone(),
        );
        self.claims.insert(key, pvc.clone());
        pvc
    }

    pub fn insert_volume(&self, mut pv: PersistentVolume) -> PersistentVolume {
        if pv.metadata.uid.is_none() {
            pv.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        }
        pv.metadata.resource_version = Some(self.next_version());
        self.volumes.insert(pv.metadata.name.clone(), pv.clone());
        pv
    }

    pub fn remove_claim(&self, namespace: &str, name: &str) -> Option<PersistentVolumeClaim> {
        self.claims
            .remove(&(namespace.to_owned(), name.to_owned()))
            .map(|(_, pvc)| pvc)
    }

    /// Snapshot of a stored claim.
    pub fn claim(&self, namespace: &str, name: &str) -> Option<PersistentVolumeClaim> {
        self.claims
            .get(&(namespace.to_owned(), name.to_owned()))
            .map(|r| r.clone())
    }

    /// Snapshot of a stored volume.
    pub fn volume(&self, name: &str) -> Option<PersistentVolume> {
        self.volumes.get(name).map(|r| r.clone())
    }

    /// Number of successful claim status patches.
    pub fn claim_patch_count(&self) -> usize {
        self.claim_patches.load(Ordering::SeqCst)
    }

    /// Number of successful volume patches.
    pub fn volume_patch_count(&self) -> usize {
        self.volume_patches.load(Ordering::SeqCst)
    }

    /// Make the next `n` claim status patches fail.
    pub fn fail_next_claim_patches(&self, n: usize) {
        self.failing_claim_patches.store(n, Ordering::SeqCst);
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_claim_patches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Check the `metadata.resourceVersion` precondition of `patch`.
fn check_precondition(name: &str, stored: Option<&str>, patch: &Value) -> Result<(), ExpandError> {
    let Some(expected) = patch
        .get("metadata")
        .and_then(|m| m.get("resourceVersion"))
        .and_then(Value::as_str)
    else {
        return Ok(());
    };
    let found = stored.unwrap_or_default();
    if expected != found {
        return Err(ExpandError::Conflict {
            name: name.to_owned(),
            expected: expected.to_owned(),
            found: found.to_owned(),
        });
    }
    Ok(())
}

/// Apply `patch` to the JSON form of `object` and read it back.
fn patched<T: Serialize + DeserializeOwned>(object: &T, patch: &Value) -> Result<T, ExpandError> {
    let mut doc = serde_json::to_value(object).map_err(ExpandError::serialization)?;
    json_patch::merge(&mut doc, patch);
    serde_json::from_value(doc).map_err(ExpandError::serialization)
}

#[async_trait]
impl ClaimClient for MemoryStore {
    async fn get_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PersistentVolumeClaim, ExpandError> {
        self.claim(namespace, name)
            .ok_or_else(|| ExpandError::ClaimNotFound(format!("{namespace}/{name}")))
    }

    async fn get_volume(&self, name: &str) -> Result<PersistentVolume, ExpandError> {
        self.volume(name)
            .ok_or_else(|| ExpandError::VolumeNotFound(name.to_owned()))
    }

    async fn patch_claim_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<PersistentVolumeClaim, ExpandError> {
        let key_name = format!("{namespace}/{name}");
        if self.take_injected_failure() {
            return Err(ExpandError::Api(format!("patch {key_name}: injected failure")));
        }

        let mut entry = self
            .claims
            .get_mut(&(namespace.to_owned(), name.to_owned()))
            .ok_or_else(|| ExpandError::ClaimNotFound(key_name.clone()))?;
        check_precondition(
            &key_name,
            entry.metadata.resource_version.as_deref(),
            patch,
        )?;

        // The status subresource ignores everything outside `status`.
        let status_only = match patch.get("status") {
            Some(status) => serde_json::json!({ "status": status }),
            None => serde_json::json!({}),
        };
        let mut updated = patched(&*entry, &status_only)?;
        updated.metadata.resource_version = Some(self.next_version());
        *entry = updated.clone();
        self.claim_patches.fetch_add(1, Ordering::SeqCst);

        debug!(claim = %key_name, %patch, "claim status patched");
        Ok(updated)
    }

    async fn patch_volume(
        &self,
        name: &str,
        patch: &Value,
    ) -> Result<PersistentVolume, ExpandError> {
        let mut entry = self
            .volumes
            .get_mut(name)
            .ok_or_else(|| ExpandError::VolumeNotFound(name.to_owned()))?;
        check_precondition(name, entry.metadata.resource_version.as_deref(), patch)?;

        let mut updated = patched(&*entry, patch)?;
        updated.metadata.resource_version = Some(self.next_version());
        *entry = updated.clone();
        self.volume_patches.fetch_add(1, Ordering::SeqCst);

        debug!(volume = %name, %patch, "volume patched");
        Ok(updated)
    }
}

/// An event captured by [`MemoryRecorder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub object: ObjectReference,
    pub type_: EventType,
    pub reason: String,
    pub message: String,
}

/// Recorder that keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    events: Mutex<Vec<RecordedEvent>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events recorded so far, oldest first.
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn events_of(&self, type_: EventType) -> Vec<RecordedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.type_ == type_)
            .collect()
    }
}

impl EventRecorder for MemoryRecorder {
    fn record(&self, object: &ObjectReference, type_: EventType, reason: &str, message: &str) {
        if let Ok(mut events) = self.events.lock() {
            events.push(RecordedEvent {
                object: object.clone(),
                type_,
                reason: reason.to_owned(),
                message: message.to_owned(),
            });
        }
    }
}
