//! Per-volume operation tracking.
//!
//! At most one operation runs per [`UniqueClaimName`].  Operations are
//! spawned on the tokio runtime so a slow grow never blocks the caller, and
//! a panic inside one is caught and turned into [`ExpandError::Panicked`]
//! instead of taking the controller down.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::ExpandError;
use crate::types::UniqueClaimName;

/// Outcome of an operation: see [`crate::error`] for the three classes.
pub type OperationResult = Result<bool, ExpandError>;

type EventHook = Box<dyn FnOnce(&ExpandError) + Send>;
type CompleteHook = Box<dyn FnOnce(&OperationResult) + Send>;

/// An operation together with its supporting hooks.
pub struct GeneratedOperation {
    pub name: String,
    operation: BoxFuture<'static, OperationResult>,
    event_hook: Option<EventHook>,
    complete_hook: Option<CompleteHook>,
}

impl GeneratedOperation {
    pub fn new(name: impl Into<String>, operation: BoxFuture<'static, OperationResult>) -> Self {
        Self {
            name: name.into(),
            operation,
            event_hook: None,
            complete_hook: None,
        }
    }

    /// Called with the error when the operation fails, before the
    /// completion hook.
    pub fn on_error(mut self, hook: impl FnOnce(&ExpandError) + Send + 'static) -> Self {
        self.event_hook = Some(Box::new(hook));
        self
    }

    /// Called with every outcome, last.
    pub fn on_complete(mut self, hook: impl FnOnce(&OperationResult) + Send + 'static) -> Self {
        self.complete_hook = Some(Box::new(hook));
        self
    }

    /// Drive the operation to completion, recovering a panic into an error,
    /// then run the hooks.
    pub async fn run(self) -> OperationResult {
        let Self {
            name,
            operation,
            event_hook,
            complete_hook,
        } = self;

        let result = match AssertUnwindSafe(operation).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(ExpandError::Panicked {
                operation: name,
                message: panic_message(payload.as_ref()),
            }),
        };

        if let (Err(err), Some(hook)) = (&result, event_hook) {
            hook(err);
        }
        if let Some(hook) = complete_hook {
            hook(&result);
        }
        result
    }
}

impl std::fmt::Debug for GeneratedOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedOperation")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// Releases a pending key when dropped.
struct PendingGuard {
    pending: Arc<DashMap<UniqueClaimName, String>>,
    key: UniqueClaimName,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.remove(&self.key);
    }
}

/// Tracks in-flight operations keyed by volume.
#[derive(Debug, Default)]
pub struct OperationTracker {
    /// Key to the name of the operation running for it.
    pending: Arc<DashMap<UniqueClaimName, String>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl OperationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `op` for `key` unless an operation for `key` is already in
    /// flight, in which case [`ExpandError::AlreadyExists`] is returned and
    /// `op` is dropped without running.
    ///
    /// The key stays pending until the operation and both hooks finish.
    pub fn run(&self, key: UniqueClaimName, op: GeneratedOperation) -> Result<(), ExpandError> {
        match self.pending.entry(key.clone()) {
            Entry::Occupied(running) => {
                return Err(ExpandError::AlreadyExists(format!(
                    "{key} ({})",
                    running.get()
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(op.name.clone());
            }
        }

        let guard = PendingGuard {
            pending: Arc::clone(&self.pending),
            key,
        };
        let handle = tokio::spawn(async move {
            let name = op.name.clone();
            let key = guard.key.clone();
            match op.run().await {
                Ok(true) => info!(operation = %name, %key, "operation finished"),
                Ok(false) => debug!(operation = %name, %key, "operation not finished yet"),
                Err(err) if err.is_transient() => {
                    warn!(operation = %name, %key, error = %err, "operation failed transiently")
                }
                Err(err) => error!(operation = %name, %key, error = %err, "operation failed"),
            }
            drop(guard);
        });

        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.retain(|t| !t.is_finished());
            tasks.push(handle);
        }
        Ok(())
    }

    pub fn is_operation_pending(&self, key: &UniqueClaimName) -> bool {
        self.pending.contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Wait for every operation spawned so far.
    pub async fn wait(&self) {
        let tasks = match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(_) => return,
        };
        for task in tasks {
            if let Err(err) = task.await {
                error!(error = %err, "operation task aborted");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn second_operation_for_same_key_is_refused() {
        let tracker = OperationTracker::new();
        let (release, gate) = oneshot::channel::<()>();
        let key = UniqueClaimName::from("u-1");

        let blocked = GeneratedOperation::new(
            "grow",
            async move {
                let _ = gate.await;
                Ok(true)
            }
            .boxed(),
        );
        tracker.run(key.clone(), blocked).unwrap();
        assert!(tracker.is_operation_pending(&key));

        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let second = GeneratedOperation::new(
            "grow",
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            }
            .boxed(),
        );
        let err = tracker.run(key.clone(), second).unwrap_err();
        assert!(matches!(err, ExpandError::AlreadyExists(_)));

        // Other keys are independent.
        tracker
            .run(
                "u-2".into(),
                GeneratedOperation::new("grow", async { Ok(true) }.boxed()),
            )
            .unwrap();

        release.send(()).unwrap();
        tracker.wait().await;
        assert!(!tracker.is_operation_pending(&key));
        assert_eq!(tracker.pending_count(), 0);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    async fn explode() -> OperationResult {
        panic!("boom")
    }

    #[tokio::test]
    async fn panic_is_recovered_and_key_released() {
        let tracker = OperationTracker::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let events = Arc::clone(&seen);
        let completions = Arc::new(AtomicUsize::new(0));
        let done = Arc::clone(&completions);

        let op = GeneratedOperation::new("grow", explode().boxed())
            .on_error(move |err| events.lock().unwrap().push(err.clone()))
            .on_complete(move |result| {
                assert!(result.is_err());
                done.fetch_add(1, Ordering::SeqCst);
            });

        let key = UniqueClaimName::from("u-1");
        tracker.run(key.clone(), op).unwrap();
        tracker.wait().await;

        assert!(!tracker.is_operation_pending(&key));
        assert_eq!(completions.load(Ordering::SeqCst), 1);
        let seen = seen.lock().unwrap();
        match &seen[..] {
            [ExpandError::Panicked { operation, message }] => {
                assert_eq!(operation, "grow");
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected errors: {other:?}"),
        }
    }

    #[tokio::test]
    async fn hooks_see_outcome() {
        let errors = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&errors);
        let result = GeneratedOperation::new("node-expand", async { Ok(false) }.boxed())
            .on_error(move |_| {
                counted.fetch_add(1, Ordering::SeqCst);
            })
            .run()
            .await;
        assert!(matches!(result, Ok(false)));
        assert_eq!(errors.load(Ordering::SeqCst), 0);

        let result = GeneratedOperation::new(
            "node-expand",
            async { Err(ExpandError::Api("unavailable".into())) }.boxed(),
        )
        .run()
        .await;
        assert!(matches!(result, Err(ExpandError::Api(_))));
    }
}
