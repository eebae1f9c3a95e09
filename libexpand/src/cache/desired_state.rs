//! Desired state of world: claims that want to grow.

use dashmap::DashMap;
use tracing::{debug, info};

use crate::quantity::Quantity;
use crate::types::{PersistentVolumeClaim, UniqueClaimName, VolumeSpec};

/// One claim believed to need growth.
#[derive(Debug, Clone)]
pub struct VolumeResizeRequest {
    pub claim: PersistentVolumeClaim,
    pub volume_spec: VolumeSpec,
    /// Provisioned capacity from the claim's status when queued.
    pub current_size: Quantity,
    /// Requested capacity from the claim's spec.
    pub expected_size: Quantity,
    pub resize_done: bool,
}

impl VolumeResizeRequest {
    pub fn unique_claim_key(&self) -> UniqueClaimName {
        self.claim.unique_name()
    }
}

/// Claims with an outstanding resize request, keyed by claim UID.
///
/// Entries are never dropped on completion, only flagged done; the owner of
/// claim delete events must call [`DesiredStateOfWorld::delete_claim`] to
/// prune them.
#[derive(Debug, Default)]
pub struct DesiredStateOfWorld {
    requests: DashMap<UniqueClaimName, VolumeResizeRequest>,
}

impl DesiredStateOfWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a resize for `new_claim` if it requests more than it has.
    ///
    /// Returns `true` when an entry was inserted or overwritten.  A request
    /// that is not larger than the provisioned capacity leaves the cache
    /// untouched, including any request already in flight for the claim.
    pub fn add_or_update(
        &self,
        new_claim: &PersistentVolumeClaim,
        old_claim: Option<&PersistentVolumeClaim>,
        volume_spec: VolumeSpec,
    ) -> bool {
        let expected_size = new_claim.requested_storage();
        let current_size = new_claim.status_storage();
        if expected_size <= current_size {
            debug!(
                claim = %new_claim.key(),
                %expected_size,
                %current_size,
                "claim does not request more than it has, ignoring",
            );
            return false;
        }

        let key = new_claim.unique_name();
        info!(
            claim = %new_claim.key(),
            uid = %key,
            previous = %old_claim.map(|c| c.requested_storage()).unwrap_or_default(),
            %current_size,
            %expected_size,
            "claim queued for resize",
        );
        self.requests.insert(
            key,
            VolumeResizeRequest {
                claim: new_claim.clone(),
                volume_spec,
                current_size,
                expected_size,
                resize_done: false,
            },
        );
        true
    }

    /// Requests not yet done.  Order is unspecified.
    pub fn list_pending(&self) -> Vec<VolumeResizeRequest> {
        self.requests
            .iter()
            .filter(|entry| !entry.resize_done)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Flag the request for `key` as done.  Absent keys are ignored: a
    /// duplicate completion is a normal race with reconciliation.
    pub fn mark_done(&self, key: &UniqueClaimName) {
        match self.requests.get_mut(key) {
            Some(mut entry) => {
                entry.resize_done = true;
                debug!(uid = %key, "resize request marked done");
            }
            None => debug!(uid = %key, "no resize request to mark done"),
        }
    }

    /// Flag the request for `key` as done if it asks for no more than
    /// `size`.  A larger request that replaced the entry stays pending.
    pub fn mark_done_if(&self, key: &UniqueClaimName, size: &Quantity) -> bool {
        let Some(mut entry) = self.requests.get_mut(key) else {
            debug!(uid = %key, "no resize request to mark done");
            return false;
        };
        if entry.expected_size > *size {
            debug!(
                uid = %key,
                completed = %size,
                expected_size = %entry.expected_size,
                "resize request was raised while growing, keeping it pending",
            );
            return false;
        }
        entry.resize_done = true;
        debug!(uid = %key, %size, "resize request marked done");
        true
    }

    /// Drop the entry for a deleted claim.
    pub fn delete_claim(&self, key: &UniqueClaimName) -> Option<VolumeResizeRequest> {
        self.requests.remove(key).map(|(_, request)| request)
    }

    pub fn get(&self, key: &UniqueClaimName) -> Option<VolumeResizeRequest> {
        self.requests.get(key).map(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ObjectMeta, RESOURCE_STORAGE};

    fn claim(uid: &str, requested: u64, status: u64) -> PersistentVolumeClaim {
        let mut pvc = PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: format!("claim-{uid}"),
                namespace: Some("default".into()),
                uid: Some(uid.into()),
                ..Default::default()
            },
            ..Default::default()
        };
        pvc.spec
            .resources
            .requests
            .insert(RESOURCE_STORAGE.into(), Quantity::gibibytes(requested));
        pvc.status
            .capacity
            .insert(RESOURCE_STORAGE.into(), Quantity::gibibytes(status));
        pvc
    }

    #[test]
    fn grow_request_is_queued() {
        let dsw = DesiredStateOfWorld::new();
        assert!(dsw.add_or_update(&claim("a", 10, 5), None, VolumeSpec::default()));

        let pending = dsw.list_pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].expected_size, Quantity::gibibytes(10));
        assert_eq!(pending[0].current_size, Quantity::gibibytes(5));
        assert_eq!(pending[0].unique_claim_key(), UniqueClaimName::from("a"));
    }

    #[test]
    fn shrink_or_equal_is_never_queued() {
        let dsw = DesiredStateOfWorld::new();
        assert!(!dsw.add_or_update(&claim("a", 5, 5), None, VolumeSpec::default()));
        assert!(!dsw.add_or_update(&claim("b", 3, 5), None, VolumeSpec::default()));
        assert!(dsw.is_empty());
    }

    #[test]
    fn smaller_update_does_not_resurrect_or_remove() {
        let dsw = DesiredStateOfWorld::new();
        dsw.add_or_update(&claim("a", 10, 5), None, VolumeSpec::default());
        dsw.mark_done(&"a".into());

        // Status caught up: the done entry stays done.
        dsw.add_or_update(&claim("a", 10, 10), None, VolumeSpec::default());
        assert!(dsw.list_pending().is_empty());
        assert!(dsw.get(&"a".into()).unwrap().resize_done);

        // In-flight request survives an update that no longer looks larger.
        dsw.add_or_update(&claim("b", 20, 5), None, VolumeSpec::default());
        dsw.add_or_update(&claim("b", 5, 5), None, VolumeSpec::default());
        assert_eq!(dsw.list_pending().len(), 1);
    }

    #[test]
    fn newer_request_overwrites() {
        let dsw = DesiredStateOfWorld::new();
        let first = claim("a", 10, 5);
        dsw.add_or_update(&first, None, VolumeSpec::default());
        dsw.add_or_update(&claim("a", 20, 5), Some(&first), VolumeSpec::default());
        let pending = dsw.list_pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].expected_size, Quantity::gibibytes(20));
    }

    #[test]
    fn mark_done_on_missing_key_is_noop() {
        let dsw = DesiredStateOfWorld::new();
        dsw.mark_done(&"ghost".into());
        assert!(dsw.is_empty());
    }

    #[test]
    fn completion_of_smaller_request_keeps_raised_one_pending() {
        let dsw = DesiredStateOfWorld::new();
        let first = claim("a", 10, 5);
        dsw.add_or_update(&first, None, VolumeSpec::default());
        dsw.add_or_update(&claim("a", 20, 10), Some(&first), VolumeSpec::default());

        assert!(!dsw.mark_done_if(&"a".into(), &Quantity::gibibytes(10)));
        let pending = dsw.list_pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].expected_size, Quantity::gibibytes(20));

        assert!(dsw.mark_done_if(&"a".into(), &Quantity::gibibytes(20)));
        assert!(dsw.list_pending().is_empty());
        assert!(!dsw.mark_done_if(&"ghost".into(), &Quantity::gibibytes(20)));
    }

    #[test]
    fn delete_prunes_entry() {
        let dsw = DesiredStateOfWorld::new();
        dsw.add_or_update(&claim("a", 10, 5), None, VolumeSpec::default());
        assert!(dsw.delete_claim(&"a".into()).is_some());
        assert!(dsw.is_empty());
        assert!(dsw.delete_claim(&"a".into()).is_none());
    }
}
