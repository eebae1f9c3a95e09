//! Volume plugin capabilities and the registry resolving them.
//!
//! The controller does not know how to grow a cloud disk or a filesystem.
//! Each volume plugin kind registers a [`VolumePlugin`] carrying the
//! strategies it supports:
//!
//! 1. **Expander**: provider-level grow of the backing storage.
//! 2. **NodeExpander**: node-local filesystem grow on the mounted device.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::error::ExpandError;
use crate::quantity::Quantity;
use crate::types::{PluginKind, VolumeSpec};

/// Provider-level grow of the storage backing a volume.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Expander: Send + Sync {
    /// Grow the volume's backing device from `old_size` to at least
    /// `new_size` and return the size actually provisioned, which may be
    /// rounded up by the provider.
    async fn expand_volume_device(
        &self,
        spec: &VolumeSpec,
        new_size: &Quantity,
        old_size: &Quantity,
    ) -> Result<Quantity, ExpandError>;
}

/// Inputs to a node-local filesystem grow.
#[derive(Debug, Clone)]
pub struct NodeResizeOptions {
    pub volume_spec: VolumeSpec,
    /// Block device backing the volume on this node.
    pub device_path: String,
    /// Where the device is mounted, empty when not staged yet.
    pub device_mount_path: String,
    pub old_size: Quantity,
    pub new_size: Quantity,
}

/// Node-local filesystem grow.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NodeExpander: Send + Sync {
    /// Grow the filesystem on an already-larger device.
    ///
    /// `Ok(false)` means the grow cannot happen yet (for example the volume
    /// must be published first) and should be retried later; it is not a
    /// failure.
    async fn node_expand(&self, opts: NodeResizeOptions) -> Result<bool, ExpandError>;
}

/// The expansion strategies of one volume plugin kind.
pub struct VolumePlugin {
    pub kind: PluginKind,
    /// Whether a node-local filesystem grow must follow the provider grow.
    pub requires_fs_resize: bool,
    pub expander: Option<Arc<dyn Expander>>,
    pub node_expander: Option<Arc<dyn NodeExpander>>,
}

impl VolumePlugin {
    pub fn new(kind: impl Into<PluginKind>) -> Self {
        Self {
            kind: kind.into(),
            requires_fs_resize: false,
            expander: None,
            node_expander: None,
        }
    }

    pub fn with_expander(mut self, expander: Arc<dyn Expander>) -> Self {
        self.expander = Some(expander);
        self
    }

    /// Attach a node expander; plugins with one require a filesystem grow.
    pub fn with_node_expander(mut self, node_expander: Arc<dyn NodeExpander>) -> Self {
        self.node_expander = Some(node_expander);
        self.requires_fs_resize = true;
        self
    }
}

impl std::fmt::Debug for VolumePlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumePlugin")
            .field("kind", &self.kind)
            .field("requires_fs_resize", &self.requires_fs_resize)
            .field("expander", &self.expander.is_some())
            .field("node_expander", &self.node_expander.is_some())
            .finish()
    }
}

/// Registry of volume plugins, keyed by [`PluginKind`].
#[derive(Debug, Default)]
pub struct PluginRegistry {
    plugins: DashMap<PluginKind, Arc<VolumePlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin, replacing any previous plugin of the same kind.
    pub fn register(&self, plugin: VolumePlugin) {
        info!(kind = %plugin.kind, ?plugin, "volume plugin registered");
        self.plugins.insert(plugin.kind.clone(), Arc::new(plugin));
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    fn find_by_spec(&self, spec: &VolumeSpec) -> Option<Arc<VolumePlugin>> {
        let kind = spec.plugin_kind()?;
        let plugin = self.plugins.get(&kind).map(|r| Arc::clone(r.value()));
        if plugin.is_none() {
            debug!(%kind, volume = spec.name(), "no volume plugin registered");
        }
        plugin
    }

    /// The plugin for `spec` if it can grow the backing storage.
    pub fn find_expandable_plugin_by_spec(&self, spec: &VolumeSpec) -> Option<Arc<VolumePlugin>> {
        self.find_by_spec(spec).filter(|p| p.expander.is_some())
    }

    /// The plugin for `spec` if it can grow a filesystem on the node.
    pub fn find_node_expandable_plugin_by_spec(
        &self,
        spec: &VolumeSpec,
    ) -> Option<Arc<VolumePlugin>> {
        self.find_by_spec(spec).filter(|p| p.node_expander.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CsiVolumeSource, PersistentVolume};

    fn spec_for(driver: &str) -> VolumeSpec {
        let mut pv = PersistentVolume::default();
        pv.metadata.name = "pv-1".into();
        pv.spec.csi = Some(CsiVolumeSource {
            driver: driver.into(),
            volume_handle: "h".into(),
            read_only: false,
        });
        VolumeSpec::from_persistent_volume(pv, false)
    }

    #[test]
    fn lookup_by_driver() {
        let registry = PluginRegistry::new();
        registry.register(
            VolumePlugin::new("disk.csi.example.com")
                .with_expander(Arc::new(MockExpander::new()))
                .with_node_expander(Arc::new(MockNodeExpander::new())),
        );
        registry.register(
            VolumePlugin::new("nfs.csi.example.com").with_expander(Arc::new(MockExpander::new())),
        );

        let disk = spec_for("disk.csi.example.com");
        let plugin = registry.find_expandable_plugin_by_spec(&disk).unwrap();
        assert!(plugin.requires_fs_resize);
        assert!(registry.find_node_expandable_plugin_by_spec(&disk).is_some());

        let nfs = spec_for("nfs.csi.example.com");
        assert!(!registry.find_expandable_plugin_by_spec(&nfs).unwrap().requires_fs_resize);
        assert!(registry.find_node_expandable_plugin_by_spec(&nfs).is_none());

        assert!(registry.find_expandable_plugin_by_spec(&spec_for("unknown")).is_none());
        assert!(registry.find_expandable_plugin_by_spec(&VolumeSpec::default()).is_none());
    }

    #[tokio::test]
    async fn mocked_expander_reports_provisioned_size() {
        let mut expander = MockExpander::new();
        expander
            .expect_expand_volume_device()
            .returning(|_, new_size, _| Ok(new_size.clone()));

        let got = expander
            .expand_volume_device(
                &spec_for("disk.csi.example.com"),
                &Quantity::gibibytes(10),
                &Quantity::gibibytes(5),
            )
            .await
            .unwrap();
        assert_eq!(got, Quantity::gibibytes(10));
    }
}
