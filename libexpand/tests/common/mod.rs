#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use libexpand::{
    ExpandError, Expander, MemoryRecorder, MemoryStore, NodeExpander, NodeResizeOptions,
    PersistentVolume, PersistentVolumeClaim, PluginRegistry, Quantity, VolumeSpec,
};

pub const DRIVER: &str = "disk.csi.rk8s.io";

pub fn load_claim() -> PersistentVolumeClaim {
    serde_yaml::from_str(include_str!("../fixtures/claim.yaml")).expect("claim fixture")
}

pub fn load_volume() -> PersistentVolume {
    serde_yaml::from_str(include_str!("../fixtures/volume.yaml")).expect("volume fixture")
}

/// Store seeded with the fixture claim and volume, the volume bound back to
/// the claim.
pub fn seeded_store() -> (Arc<MemoryStore>, PersistentVolumeClaim, PersistentVolume) {
    let store = Arc::new(MemoryStore::new());
    let pvc = store.insert_claim(load_claim());
    let mut pv = load_volume();
    pv.spec.claim_ref = Some(pvc.object_ref());
    let pv = store.insert_volume(pv);
    (store, pvc, pv)
}

/// Provider expander that grows to exactly the requested size.
#[derive(Default)]
pub struct CountingExpander {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Expander for CountingExpander {
    async fn expand_volume_device(
        &self,
        _spec: &VolumeSpec,
        new_size: &Quantity,
        _old_size: &Quantity,
    ) -> Result<Quantity, ExpandError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(new_size.clone())
    }
}

/// Node expander returning a fixed answer and remembering its inputs.
pub struct ScriptedNodeExpander {
    pub answer: bool,
    pub calls: AtomicUsize,
    pub seen: std::sync::Mutex<Vec<(Quantity, Quantity)>>,
}

impl ScriptedNodeExpander {
    pub fn new(answer: bool) -> Self {
        Self {
            answer,
            calls: AtomicUsize::new(0),
            seen: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NodeExpander for ScriptedNodeExpander {
    async fn node_expand(&self, opts: NodeResizeOptions) -> Result<bool, ExpandError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .unwrap()
            .push((opts.old_size, opts.new_size));
        Ok(self.answer)
    }
}

pub fn recorder() -> Arc<MemoryRecorder> {
    Arc::new(MemoryRecorder::new())
}

pub fn registry() -> Arc<PluginRegistry> {
    Arc::new(PluginRegistry::new())
}
