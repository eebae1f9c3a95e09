//! The two-stage grow: provider-level ([`OperationExecutor::grow_pvc`]) and
//! node-local ([`OperationExecutor::node_expand_volume`]).
//!
//! Both return [`OperationResult`]: `Ok(true)` when there is nothing left to
//! do, `Ok(false)` when the grow must wait for a later lifecycle phase, and
//! `Err` on failure.  [`OperationExecutor::expand_volume`] and
//! [`OperationExecutor::expand_node_volume`] run them on the tracker, which
//! recovers panics and keeps one operation in flight per claim.

use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, info, instrument, warn};

use super::tracker::{GeneratedOperation, OperationResult, OperationTracker};
use crate::cache::{DesiredStateOfWorld, VolumeResizeRequest};
use crate::client::{ClaimClient, EventRecorder};
use crate::config::ExpandConfig;
use crate::error::ExpandError;
use crate::plugin::{NodeResizeOptions, PluginRegistry};
use crate::status;
use crate::types::{
    ClaimConditionType, EventType, ObjectReference, UniqueClaimName, VolumeSpec, reasons,
};

/// A volume being mounted on a node, as seen by the node-local grow.
#[derive(Debug, Clone)]
pub struct VolumeToMount {
    pub volume_name: String,
    /// Pod the volume is mounted for; events go here when set.
    pub pod: Option<ObjectReference>,
    pub volume_spec: VolumeSpec,
    pub device_path: String,
    pub device_mount_path: String,
    /// The volume is already mounted and in use by a running pod.
    pub in_use: bool,
}

impl VolumeToMount {
    fn claim_ref(&self) -> Option<&ObjectReference> {
        self.volume_spec
            .persistent_volume
            .as_ref()
            .and_then(|pv| pv.spec.claim_ref.as_ref())
    }

    /// Tracker key: the bound claim's UID, or the volume name when the
    /// claim reference carries none.
    fn operation_key(&self) -> UniqueClaimName {
        match self.claim_ref().and_then(|r| r.uid.as_deref()) {
            Some(uid) => UniqueClaimName::from(uid),
            None => UniqueClaimName::from(self.volume_name.as_str()),
        }
    }

    /// The pod when one is named, otherwise the bound claim.
    fn event_target(&self) -> Option<ObjectReference> {
        self.pod.clone().or_else(|| self.claim_ref().cloned())
    }

    fn message(&self, prefix: &str, detail: &str) -> String {
        match detail {
            "" => format!("{prefix} for volume {:?}", self.volume_name),
            _ => format!("{prefix} for volume {:?}: {detail}", self.volume_name),
        }
    }
}

/// Runs grow operations against the remote store and volume plugins.
#[derive(Clone)]
pub struct OperationExecutor {
    config: ExpandConfig,
    client: Arc<dyn ClaimClient>,
    registry: Arc<PluginRegistry>,
    recorder: Arc<dyn EventRecorder>,
    tracker: Arc<OperationTracker>,
}

impl OperationExecutor {
    pub fn new(
        config: ExpandConfig,
        client: Arc<dyn ClaimClient>,
        registry: Arc<PluginRegistry>,
        recorder: Arc<dyn EventRecorder>,
    ) -> Self {
        Self {
            config,
            client,
            registry,
            recorder,
            tracker: Arc::new(OperationTracker::new()),
        }
    }

    pub fn tracker(&self) -> &OperationTracker {
        &self.tracker
    }

    pub fn is_operation_pending(&self, key: &UniqueClaimName) -> bool {
        self.tracker.is_operation_pending(key)
    }

    /// Dispatch [`Self::grow_pvc`] for `request` on the tracker.
    ///
    /// Returns [`ExpandError::AlreadyExists`] if an operation for the same
    /// claim is still running.  When the grow finishes, or fails in a way a
    /// retry cannot fix, the request is marked done in `dsw` unless a larger
    /// request replaced it meanwhile.  A failure that is not transient is
    /// reported once as a warning event.
    pub fn expand_volume(
        &self,
        request: VolumeResizeRequest,
        dsw: Arc<DesiredStateOfWorld>,
    ) -> Result<(), ExpandError> {
        let key = request.unique_claim_key();
        let target = request.claim.object_ref();
        let recorder = Arc::clone(&self.recorder);
        let completed = key.clone();
        let expected_size = request.expected_size.clone();

        let this = self.clone();
        let op = GeneratedOperation::new(
            "expand_volume",
            async move { this.grow_pvc(&request).await }.boxed(),
        )
        .on_error(move |err| {
            if !err.is_transient() {
                recorder.record(
                    &target,
                    EventType::Warning,
                    reasons::VOLUME_RESIZE_FAILED,
                    &err.to_string(),
                );
            }
        })
        .on_complete(move |result| {
            let finished = match result {
                Ok(done) => *done,
                Err(err) => !err.is_transient(),
            };
            if finished {
                dsw.mark_done_if(&completed, &expected_size);
            }
        });

        self.tracker.run(key, op)
    }

    /// Dispatch [`Self::node_expand_volume`] for `volume` on the tracker.
    ///
    /// Shares the per-claim slot with [`Self::expand_volume`], so a node
    /// grow never overlaps a provider grow of the same claim.  A failure
    /// that is not transient is reported once as a warning event.
    pub fn expand_node_volume(&self, volume: VolumeToMount) -> Result<(), ExpandError> {
        let key = volume.operation_key();
        let target = volume.event_target();
        let recorder = Arc::clone(&self.recorder);

        let this = self.clone();
        let op = GeneratedOperation::new(
            "node_expand_volume",
            async move { this.node_expand_volume(&volume).await }.boxed(),
        )
        .on_error(move |err| match target {
            Some(target) if !err.is_transient() => recorder.record(
                &target,
                EventType::Warning,
                reasons::FILE_SYSTEM_RESIZE_FAILED,
                &err.to_string(),
            ),
            _ => {}
        });

        self.tracker.run(key, op)
    }

    /// Grow the storage backing a claim at the provider, then record the
    /// outcome on the volume and the claim.
    #[instrument(skip_all, fields(claim = %request.claim.key(), volume = request.volume_spec.name()))]
    pub async fn grow_pvc(&self, request: &VolumeResizeRequest) -> OperationResult {
        if !self.config.expand_persistent_volumes {
            debug!("volume expansion disabled");
            return Ok(true);
        }
        let spec = &request.volume_spec;
        if spec.inline_volume_spec_for_csi_migration {
            debug!("migrated inline volume is not resizable");
            return Ok(true);
        }
        let Some(plugin) = self.registry.find_expandable_plugin_by_spec(spec) else {
            debug!("no expandable plugin for volume");
            return Ok(true);
        };
        let (Some(expander), Some(volume)) =
            (plugin.expander.as_ref(), spec.persistent_volume.as_ref())
        else {
            return Ok(true);
        };

        let claim = &request.claim;
        let pvc = self
            .client
            .get_claim(
                claim.metadata.namespace.as_deref().unwrap_or_default(),
                &claim.metadata.name,
            )
            .await
            .map_err(|e| e.context("grow: get claim"))?;
        let pv = self
            .client
            .get_volume(&volume.metadata.name)
            .await
            .map_err(|e| e.context("grow: get volume"))?;

        let expected = pvc.requested_storage();
        let current = pvc.status_storage();
        if current >= expected {
            debug!(%current, %expected, "claim already has the requested capacity");
            return Ok(true);
        }

        let mut pvc = pvc;
        let backing = pv.spec_storage();
        let new_size = if backing >= expected {
            debug!(%backing, %expected, "backing volume already grown");
            backing
        } else {
            pvc = status::mark_resize_in_progress(&pvc, self.client.as_ref())
                .await
                .map_err(|e| e.context("grow: mark resize in progress"))?;

            let fresh_spec = VolumeSpec::from_persistent_volume(pv.clone(), spec.read_only);
            let new_size = match expander
                .expand_volume_device(&fresh_spec, &expected, &current)
                .await
            {
                Ok(size) => size,
                Err(err) => {
                    let err = err.context("expand volume device");
                    warn!(error = %err, "provider grow failed");
                    self.recorder.record(
                        &pvc.object_ref(),
                        EventType::Warning,
                        reasons::VOLUME_RESIZE_FAILED,
                        &err.to_string(),
                    );
                    return Err(err);
                }
            };

            status::update_pv_size(&pv, &new_size, self.client.as_ref())
                .await
                .map_err(|e| e.context("grow: update volume size"))?;
            self.recorder.record(
                &pvc.object_ref(),
                EventType::Normal,
                reasons::VOLUME_RESIZE_SUCCESSFUL,
                &format!("volume {} grown from {current} to {new_size}", pv.metadata.name),
            );
            info!(%current, %new_size, "backing volume grown");
            new_size
        };

        if plugin.requires_fs_resize {
            if pvc
                .condition(&ClaimConditionType::FileSystemResizePending)
                .is_none()
            {
                status::mark_for_fs_resize(&pvc, self.client.as_ref())
                    .await
                    .map_err(|e| e.context("grow: mark for filesystem resize"))?;
            }
        } else {
            status::mark_resize_finished(&pvc, &new_size, self.client.as_ref())
                .await
                .map_err(|e| e.context("grow: mark resize finished"))?;
        }
        Ok(true)
    }

    /// Grow the filesystem of a volume on the node it is mounted on, then
    /// record the new capacity on the claim.
    #[instrument(skip_all, fields(volume = %volume.volume_name))]
    pub async fn node_expand_volume(&self, volume: &VolumeToMount) -> OperationResult {
        if !self.config.expand_persistent_volumes {
            debug!("volume expansion disabled");
            return Ok(true);
        }
        let spec = &volume.volume_spec;
        if spec.inline_volume_spec_for_csi_migration {
            debug!("migrated inline volume is not resizable");
            return Ok(true);
        }
        if volume.in_use && !self.config.expand_in_use_persistent_volumes {
            debug!("expansion of in-use volumes disabled");
            return Ok(true);
        }

        let Some(plugin) = self.registry.find_node_expandable_plugin_by_spec(spec) else {
            return Ok(true);
        };
        let (Some(node_expander), Some(pv)) =
            (plugin.node_expander.as_ref(), spec.persistent_volume.as_ref())
        else {
            return Ok(true);
        };
        if !plugin.requires_fs_resize {
            return Ok(true);
        }

        let claim_ref = pv
            .spec
            .claim_ref
            .as_ref()
            .ok_or(ExpandError::MissingField("spec.claimRef"))?;
        let pvc = self
            .client
            .get_claim(
                claim_ref.namespace.as_deref().unwrap_or_default(),
                &claim_ref.name,
            )
            .await
            .map_err(|e| e.context("node expand: get claim"))?;

        let old_size = pvc.status_storage();
        let new_size = pv.spec_storage();
        if old_size >= new_size {
            return Ok(true);
        }
        debug!(device_path = %volume.device_path, %old_size, %new_size, "filesystem resize requested");

        let target = volume.pod.clone().unwrap_or_else(|| pvc.object_ref());
        if spec.read_only {
            let message = volume.message(
                "node expand volume failed",
                "requested read-only file system",
            );
            warn!("{message}");
            self.recorder.record(
                &target,
                EventType::Warning,
                reasons::FILE_SYSTEM_RESIZE_FAILED,
                &message,
            );
            return Ok(true);
        }

        let opts = NodeResizeOptions {
            volume_spec: spec.clone(),
            device_path: volume.device_path.clone(),
            device_mount_path: volume.device_mount_path.clone(),
            old_size: old_size.clone(),
            new_size: new_size.clone(),
        };
        let resized = node_expander
            .node_expand(opts)
            .await
            .map_err(|e| e.context("node expand volume"))?;
        if !resized {
            // Retried after the volume is published.
            debug!("filesystem resize deferred");
            return Ok(false);
        }

        let message = volume.message("node expand volume succeeded", "");
        info!("{message}");
        self.recorder.record(
            &target,
            EventType::Normal,
            reasons::FILE_SYSTEM_RESIZE_SUCCESSFUL,
            &message,
        );
        status::mark_fs_resize_finished(&pvc, &new_size, self.client.as_ref())
            .await
            .map_err(|e| e.context("node expand volume: update claim status"))?;
        Ok(true)
    }
}

impl std::fmt::Debug for OperationExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationExecutor")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("pending", &self.tracker.pending_count())
            .finish_non_exhaustive()
    }
}
