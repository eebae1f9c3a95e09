//! Periodic reconciliation of the desired state of world.
//!
//! Each tick dispatches a grow for every pending request whose volume has
//! no operation in flight.  Dispatch is asynchronous, so a tick only walks
//! the cache.  Transient failures are retried on the next tick, with the
//! period itself as the backoff.  Any other failure ends the request.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::cache::DesiredStateOfWorld;
use crate::operation::OperationExecutor;

pub struct Reconciler {
    loop_period: Duration,
    dsw: Arc<DesiredStateOfWorld>,
    executor: OperationExecutor,
}

impl Reconciler {
    pub fn new(
        loop_period: Duration,
        executor: OperationExecutor,
        dsw: Arc<DesiredStateOfWorld>,
    ) -> Self {
        Self {
            loop_period,
            dsw,
            executor,
        }
    }

    /// Tick until `cancel` fires.  Cancellation is observed between ticks.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.loop_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(period = ?self.loop_period, "expand reconciler started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.reconcile();
                }
            }
        }
        info!("expand reconciler stopped");
    }

    /// One pass over the pending requests.  Returns how many grows were
    /// dispatched.
    pub fn reconcile(&self) -> usize {
        let mut dispatched = 0;
        for request in self.dsw.list_pending() {
            let key = request.unique_claim_key();
            if self.executor.is_operation_pending(&key) {
                debug!(claim = %request.claim.key(), "operation for claim is already pending");
                continue;
            }

            let claim = request.claim.key();
            let current = request.current_size.clone();
            let expected = request.expected_size.clone();
            match self.executor.expand_volume(request, Arc::clone(&self.dsw)) {
                Ok(()) => {
                    dispatched += 1;
                    info!(%claim, %current, %expected, "resizing claim");
                }
                Err(err) => error!(%claim, error = %err, "failed to dispatch claim resize"),
            }
        }
        dispatched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use crate::client::{MemoryRecorder, MemoryStore};
    use crate::config::ExpandConfig;
    use crate::error::ExpandError;
    use crate::plugin::{Expander, PluginRegistry, VolumePlugin};
    use crate::quantity::Quantity;
    use crate::types::{
        CsiVolumeSource, EventType, ObjectMeta, PersistentVolume, PersistentVolumeClaim,
        RESOURCE_STORAGE, VolumeSpec, reasons,
    };

    const DRIVER: &str = "disk.csi.example.com";

    /// Expander that holds every call until released.
    #[derive(Default)]
    struct GatedExpander {
        calls: AtomicUsize,
        gate: Notify,
    }

    #[async_trait]
    impl Expander for GatedExpander {
        async fn expand_volume_device(
            &self,
            _spec: &VolumeSpec,
            new_size: &Quantity,
            _old_size: &Quantity,
        ) -> Result<Quantity, ExpandError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            Ok(new_size.clone())
        }
    }

    fn seed(store: &MemoryStore) -> (PersistentVolumeClaim, PersistentVolume) {
        let mut pv = PersistentVolume::default();
        pv.metadata.name = "pv-1".into();
        pv.spec
            .capacity
            .insert(RESOURCE_STORAGE.into(), Quantity::gibibytes(5));
        pv.spec.csi = Some(CsiVolumeSource {
            driver: DRIVER.into(),
            volume_handle: "vol-1".into(),
            read_only: false,
        });
        let pv = store.insert_volume(pv);

        let mut pvc = PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: "data".into(),
                namespace: Some("default".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        pvc.spec.volume_name = Some("pv-1".into());
        pvc.spec
            .resources
            .requests
            .insert(RESOURCE_STORAGE.into(), Quantity::gibibytes(10));
        pvc.status
            .capacity
            .insert(RESOURCE_STORAGE.into(), Quantity::gibibytes(5));
        (store.insert_claim(pvc), pv)
    }

    /// Expander that panics on every call.
    #[derive(Default)]
    struct CrashingExpander {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Expander for CrashingExpander {
        async fn expand_volume_device(
            &self,
            _spec: &VolumeSpec,
            _new_size: &Quantity,
            _old_size: &Quantity,
        ) -> Result<Quantity, ExpandError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            panic!("provider driver crashed")
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        recorder: Arc<MemoryRecorder>,
        dsw: Arc<DesiredStateOfWorld>,
        reconciler: Reconciler,
    }

    fn harness(expander: Arc<dyn Expander>) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let recorder = Arc::new(MemoryRecorder::new());
        let registry = Arc::new(PluginRegistry::new());
        registry.register(VolumePlugin::new(DRIVER).with_expander(expander));
        let executor = OperationExecutor::new(
            ExpandConfig::default(),
            store.clone(),
            registry,
            recorder.clone(),
        );
        let dsw = Arc::new(DesiredStateOfWorld::new());
        let reconciler = Reconciler::new(Duration::from_millis(10), executor, Arc::clone(&dsw));
        Harness {
            store,
            recorder,
            dsw,
            reconciler,
        }
    }

    #[tokio::test]
    async fn in_flight_volume_is_not_dispatched_twice() {
        let expander = Arc::new(GatedExpander::default());
        let Harness {
            store,
            dsw,
            reconciler,
            ..
        } = harness(expander.clone());
        let (pvc, pv) = seed(&store);
        dsw.add_or_update(&pvc, None, VolumeSpec::from_persistent_volume(pv, false));

        assert_eq!(reconciler.reconcile(), 1);
        // The grow is parked inside the expander.
        while expander.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(reconciler.reconcile(), 0);
        assert_eq!(reconciler.reconcile(), 0);

        expander.gate.notify_one();
        reconciler.executor.tracker().wait().await;

        assert_eq!(expander.calls.load(Ordering::SeqCst), 1);
        assert!(dsw.list_pending().is_empty());
        assert_eq!(reconciler.reconcile(), 0);

        let stored = store.claim("default", "data").unwrap();
        assert_eq!(stored.status_storage(), Quantity::gibibytes(10));
    }

    #[tokio::test]
    async fn panicking_grow_is_dispatched_and_reported_once() {
        let expander = Arc::new(CrashingExpander::default());
        let Harness {
            store,
            recorder,
            dsw,
            reconciler,
        } = harness(expander.clone());
        let (pvc, pv) = seed(&store);
        dsw.add_or_update(&pvc, None, VolumeSpec::from_persistent_volume(pv, false));

        for _ in 0..5 {
            reconciler.reconcile();
            reconciler.executor.tracker().wait().await;
        }

        assert_eq!(expander.calls.load(Ordering::SeqCst), 1);
        let warnings = recorder.events_of(EventType::Warning);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].reason, reasons::VOLUME_RESIZE_FAILED);
        assert!(warnings[0].message.contains("provider driver crashed"));
        assert!(dsw.list_pending().is_empty());
        assert_eq!(reconciler.executor.tracker().pending_count(), 0);
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let expander = Arc::new(GatedExpander::default());
        let reconciler = harness(expander).reconciler;
        let cancel = CancellationToken::new();
        let stopper = cancel.clone();

        let handle = tokio::spawn(async move { reconciler.run(stopper).await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("reconciler did not stop")
            .unwrap();
    }
}
