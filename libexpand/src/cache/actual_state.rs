//! Actual state of world: capacity confirmed on each claim's status.
//!
//! Fed from watch events, not from the operation layer, so an entry only
//! moves once the store has accepted a status patch.

use dashmap::DashMap;
use tracing::trace;

use crate::quantity::Quantity;
use crate::types::{PersistentVolumeClaim, UniqueClaimName};

#[derive(Debug, Default)]
pub struct ActualStateOfWorld {
    capacities: DashMap<UniqueClaimName, Quantity>,
}

impl ActualStateOfWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the status capacity carried by a watched claim.
    pub fn observe(&self, pvc: &PersistentVolumeClaim) -> Quantity {
        let capacity = pvc.status_storage();
        trace!(claim = %pvc.key(), %capacity, "observed claim capacity");
        self.capacities.insert(pvc.unique_name(), capacity.clone());
        capacity
    }

    pub fn capacity(&self, key: &UniqueClaimName) -> Option<Quantity> {
        self.capacities.get(key).map(|r| r.clone())
    }

    /// Whether the confirmed capacity of `key` has reached `size`.
    pub fn has_capacity(&self, key: &UniqueClaimName, size: &Quantity) -> bool {
        self.capacities.get(key).is_some_and(|c| *c >= *size)
    }

    pub fn forget(&self, key: &UniqueClaimName) {
        self.capacities.remove(key);
    }
}
