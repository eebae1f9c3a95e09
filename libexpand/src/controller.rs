//! Expansion controller: claim watch handlers feeding the caches, plus the
//! reconciler driving the grows.
//!
//! The watch plumbing itself lives outside this crate.  Whatever delivers
//! claim add/update/delete notifications calls [`ExpandController::claim_added`],
//! [`ExpandController::claim_updated`] and [`ExpandController::claim_deleted`].

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::cache::{ActualStateOfWorld, DesiredStateOfWorld};
use crate::client::{ClaimClient, EventRecorder};
use crate::config::ExpandConfig;
use crate::error::ExpandError;
use crate::operation::OperationExecutor;
use crate::plugin::PluginRegistry;
use crate::reconciler::Reconciler;
use crate::types::{PersistentVolumeClaim, VolumeSpec};

pub struct ExpandController {
    config: ExpandConfig,
    client: Arc<dyn ClaimClient>,
    dsw: Arc<DesiredStateOfWorld>,
    asw: Arc<ActualStateOfWorld>,
    executor: OperationExecutor,
}

impl ExpandController {
    pub fn new(
        config: ExpandConfig,
        client: Arc<dyn ClaimClient>,
        registry: Arc<PluginRegistry>,
        recorder: Arc<dyn EventRecorder>,
    ) -> Self {
        let executor =
            OperationExecutor::new(config.clone(), Arc::clone(&client), registry, recorder);
        Self {
            config,
            client,
            dsw: Arc::new(DesiredStateOfWorld::new()),
            asw: Arc::new(ActualStateOfWorld::new()),
            executor,
        }
    }

    pub fn desired_state(&self) -> &Arc<DesiredStateOfWorld> {
        &self.dsw
    }

    pub fn actual_state(&self) -> &Arc<ActualStateOfWorld> {
        &self.asw
    }

    pub fn executor(&self) -> &OperationExecutor {
        &self.executor
    }

    /// Handle a newly observed claim.  Returns whether it was queued.
    pub async fn claim_added(&self, pvc: &PersistentVolumeClaim) -> Result<bool, ExpandError> {
        self.enqueue(None, pvc).await
    }

    /// Handle a claim update.  Returns whether it was queued.
    pub async fn claim_updated(
        &self,
        old: &PersistentVolumeClaim,
        new: &PersistentVolumeClaim,
    ) -> Result<bool, ExpandError> {
        self.enqueue(Some(old), new).await
    }

    /// Forget a deleted claim in both caches.
    pub fn claim_deleted(&self, pvc: &PersistentVolumeClaim) {
        let key = pvc.unique_name();
        if self.dsw.delete_claim(&key).is_some() {
            info!(claim = %pvc.key(), "dropped resize request of deleted claim");
        }
        self.asw.forget(&key);
    }

    #[instrument(skip_all, fields(claim = %new.key()))]
    async fn enqueue(
        &self,
        old: Option<&PersistentVolumeClaim>,
        new: &PersistentVolumeClaim,
    ) -> Result<bool, ExpandError> {
        let key = new.unique_name();
        let previous = self.asw.capacity(&key);
        let observed = self.asw.observe(new);
        if let Some(previous) = previous.filter(|p| *p != observed) {
            info!(%previous, %observed, "claim capacity changed");
        }
        if let Some(request) = self.dsw.get(&key) {
            if !request.resize_done && observed >= request.expected_size {
                debug!(%observed, "claim capacity confirmed");
                self.dsw.mark_done(&key);
            }
        }

        if new.requested_storage() <= observed {
            return Ok(false);
        }
        let Some(volume_name) = new.spec.volume_name.as_deref() else {
            debug!("claim is not bound yet");
            return Ok(false);
        };
        let pv = self
            .client
            .get_volume(volume_name)
            .await
            .map_err(|e| e.context("resolve bound volume"))?;

        Ok(self
            .dsw
            .add_or_update(new, old, VolumeSpec::from_persistent_volume(pv, false)))
    }

    /// Run the reconciler until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        if !self.config.expand_persistent_volumes {
            info!("volume expansion disabled, requests are completed without growing");
        }
        Reconciler::new(
            self.config.loop_period,
            self.executor.clone(),
            Arc::clone(&self.dsw),
        )
        .run(cancel)
        .await;
    }
}

impl std::fmt::Debug for ExpandController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpandController")
            .field("config", &self.config)
            .field("pending", &self.dsw.list_pending().len())
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}
