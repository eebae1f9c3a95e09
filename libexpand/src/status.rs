//! Resize status machine.
//!
//! Expansion progress lives on the claim's status, not in memory, so a
//! restarted controller resumes from what the store says:
//!
//! ```text
//!   (no resize condition) ──mark_resize_in_progress──▶ Resizing
//!   Resizing ──mark_for_fs_resize──▶ FileSystemResizePending
//!   Resizing | FileSystemResizePending ──mark_resize_finished──▶ (none)
//! ```
//!
//! Every transition is a two-way merge patch computed between the claim as
//! read and a locally mutated copy, guarded by the read `resourceVersion`.

use std::collections::HashMap;

use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::client::ClaimClient;
use crate::error::ExpandError;
use crate::patch;
use crate::quantity::Quantity;
use crate::types::{
    ClaimCondition, ClaimConditionType, PersistentVolume, PersistentVolumeClaim, RESOURCE_STORAGE,
};

/// Message set on the `FileSystemResizePending` condition.
pub const FS_RESIZE_PENDING_MESSAGE: &str =
    "Waiting for user to (re-)start a pod to finish file system resize of volume on node.";

/// `namespace/name` of a claim.
pub fn claim_to_claim_key(pvc: &PersistentVolumeClaim) -> String {
    pvc.key()
}

/// Merge `desired` resize conditions into `existing`.
///
/// Conditions of other kinds are copied through in their original order.
/// An existing resize condition is replaced only when the desired one of the
/// same kind has a different status, so the transition time does not churn;
/// a resize condition with no desired counterpart is dropped.  Desired
/// conditions whose kind was not present are appended after everything else.
pub fn merge_resize_conditions(
    existing: &[ClaimCondition],
    desired: &[ClaimCondition],
) -> Vec<ClaimCondition> {
    let mut pending: HashMap<&ClaimConditionType, (&ClaimCondition, bool)> = desired
        .iter()
        .map(|c| (&c.type_, (c, false)))
        .collect();

    let mut merged = Vec::with_capacity(existing.len() + desired.len());
    for condition in existing {
        if !condition.type_.is_resize() {
            merged.push(condition.clone());
            continue;
        }
        if let Some((wanted, consumed)) = pending.get_mut(&condition.type_) {
            if wanted.status != condition.status {
                merged.push((*wanted).clone());
            } else {
                merged.push(condition.clone());
            }
            *consumed = true;
        }
    }

    merged.extend(
        pending
            .into_values()
            .filter(|(_, consumed)| !consumed)
            .map(|(c, _)| c.clone()),
    );
    merged
}

/// Apply [`merge_resize_conditions`] to a claim in place.
pub fn merge_resize_condition_on_claim(
    pvc: &mut PersistentVolumeClaim,
    resize_conditions: &[ClaimCondition],
) {
    pvc.status.conditions = merge_resize_conditions(&pvc.status.conditions, resize_conditions);
}

/// Patch the claim's status from `old` to `new`.
///
/// The patch is the two-way diff of the marshalled forms, plus `old`'s
/// `resourceVersion` as a precondition.  Marshalling and remote failures are
/// returned to the caller, which decides whether to retry.
#[instrument(skip_all, fields(claim = %claim_to_claim_key(old)))]
pub async fn patch_claim_status(
    old: &PersistentVolumeClaim,
    new: &PersistentVolumeClaim,
    client: &dyn ClaimClient,
) -> Result<PersistentVolumeClaim, ExpandError> {
    let key = claim_to_claim_key(old);
    let mut patch = patch::diff(old, new)
        .map_err(|e| e.context(&format!("create status patch for claim {key}")))?;
    if patch::is_empty(&patch) {
        debug!("claim status unchanged, skipping patch");
        return Ok(old.clone());
    }
    guard_with_resource_version(&mut patch, old.metadata.resource_version.as_deref());

    debug!(%patch, "patching claim status");
    client
        .patch_claim_status(
            old.metadata.namespace.as_deref().unwrap_or_default(),
            &old.metadata.name,
            &patch,
        )
        .await
}

/// Record the new provisioned size on the persistent volume.
#[instrument(skip_all, fields(volume = %pv.metadata.name, new_size = %new_size))]
pub async fn update_pv_size(
    pv: &PersistentVolume,
    new_size: &Quantity,
    client: &dyn ClaimClient,
) -> Result<PersistentVolume, ExpandError> {
    let mut updated = pv.clone();
    updated
        .spec
        .capacity
        .insert(RESOURCE_STORAGE.to_owned(), new_size.clone());

    let mut patch = patch::diff(pv, &updated)
        .map_err(|e| e.context(&format!("create patch for volume {}", pv.metadata.name)))?;
    guard_with_resource_version(&mut patch, pv.metadata.resource_version.as_deref());

    client.patch_volume(&pv.metadata.name, &patch).await
}

/// Mark the provider-level grow as in progress (`Resizing=True`).
pub async fn mark_resize_in_progress(
    pvc: &PersistentVolumeClaim,
    client: &dyn ClaimClient,
) -> Result<PersistentVolumeClaim, ExpandError> {
    let condition = ClaimCondition::now(ClaimConditionType::Resizing);
    let mut updated = pvc.clone();
    merge_resize_condition_on_claim(&mut updated, &[condition]);
    patch_claim_status(pvc, &updated, client).await
}

/// Mark the node-local filesystem grow as pending
/// (`FileSystemResizePending=True`, replacing `Resizing`).
pub async fn mark_for_fs_resize(
    pvc: &PersistentVolumeClaim,
    client: &dyn ClaimClient,
) -> Result<PersistentVolumeClaim, ExpandError> {
    let condition = ClaimCondition::now(ClaimConditionType::FileSystemResizePending)
        .with_message(FS_RESIZE_PENDING_MESSAGE);
    let mut updated = pvc.clone();
    merge_resize_condition_on_claim(&mut updated, &[condition]);
    patch_claim_status(pvc, &updated, client).await
}

/// Mark the whole resize finished after a provider-only grow.
pub async fn mark_resize_finished(
    pvc: &PersistentVolumeClaim,
    new_size: &Quantity,
    client: &dyn ClaimClient,
) -> Result<PersistentVolumeClaim, ExpandError> {
    mark_fs_resize_finished(pvc, new_size, client).await
}

/// Set the claim's status capacity to `new_size` and clear every resize
/// condition.
pub async fn mark_fs_resize_finished(
    pvc: &PersistentVolumeClaim,
    new_size: &Quantity,
    client: &dyn ClaimClient,
) -> Result<PersistentVolumeClaim, ExpandError> {
    let mut updated = pvc.clone();
    updated
        .status
        .capacity
        .insert(RESOURCE_STORAGE.to_owned(), new_size.clone());
    merge_resize_condition_on_claim(&mut updated, &[]);
    patch_claim_status(pvc, &updated, client).await
}

fn guard_with_resource_version(patch: &mut Value, resource_version: Option<&str>) {
    let Some(version) = resource_version else {
        return;
    };
    if let Value::Object(map) = patch {
        let metadata = map.entry("metadata").or_insert_with(|| json!({}));
        if let Value::Object(metadata) = metadata {
            metadata.insert("resourceVersion".to_owned(), json!(version));
        }
    }
}
