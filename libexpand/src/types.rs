//! Core data model: claims, persistent volumes, resize conditions and the
//! internal volume spec the operation layer works on.
//!
//! The claim and volume types mirror the subset of the Kubernetes
//! `PersistentVolumeClaim` / `PersistentVolume` JSON shape this crate reads
//! or patches.  They are all [`Serialize`]/[`Deserialize`] so status patches
//! can be computed from their marshalled forms.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::quantity::Quantity;

/// Resource name of storage capacity in `requests` / `capacity` maps.
pub const RESOURCE_STORAGE: &str = "storage";

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Unique key of a claim, derived from its cluster-assigned UID.
///
/// Name and namespace are not used: a claim can be deleted and recreated
/// under the same name while an old request is still cached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UniqueClaimName(pub String);

impl fmt::Display for UniqueClaimName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for UniqueClaimName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UniqueClaimName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Volume plugin kind used to look up expansion capabilities,
/// e.g. the CSI driver name `"ebs.csi.aws.com"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PluginKind(pub String);

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for PluginKind {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PluginKind {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Object metadata
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Reference to an object, used for claim refs and event subjects.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

impl fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.kind, ns, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

/// Type of a claim condition.
///
/// Only the two resize kinds are interpreted; anything else written by other
/// controllers is carried through as [`ClaimConditionType::Other`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(from = "String", into = "String")]
pub enum ClaimConditionType {
    /// Provider-level grow in progress.
    Resizing,
    /// Provider-level grow done, node-local filesystem grow pending.
    FileSystemResizePending,
    Other(String),
}

impl ClaimConditionType {
    /// Whether this is one of the resize condition kinds.
    pub fn is_resize(&self) -> bool {
        matches!(self, Self::Resizing | Self::FileSystemResizePending)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Resizing => "Resizing",
            Self::FileSystemResizePending => "FileSystemResizePending",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for ClaimConditionType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Resizing" => Self::Resizing,
            "FileSystemResizePending" => Self::FileSystemResizePending,
            _ => Self::Other(s),
        }
    }
}

impl From<ClaimConditionType> for String {
    fn from(t: ClaimConditionType) -> Self {
        match t {
            ClaimConditionType::Other(s) => s,
            known => known.as_str().to_owned(),
        }
    }
}

impl fmt::Display for ClaimConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClaimCondition {
    #[serde(rename = "type")]
    pub type_: ClaimConditionType,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ClaimCondition {
    /// A `True` condition of the given type stamped with the current time.
    pub fn now(type_: ClaimConditionType) -> Self {
        Self {
            type_,
            status: ConditionStatus::True,
            last_transition_time: Some(Utc::now()),
            reason: None,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

// ---------------------------------------------------------------------------
// PersistentVolumeClaim
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceRequirements {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, Quantity>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClaimSpec {
    #[serde(default)]
    pub resources: ResourceRequirements,
    /// Name of the bound persistent volume, empty while unbound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClaimStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub capacity: BTreeMap<String, Quantity>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ClaimCondition>,
}

/// A user-facing storage claim.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PersistentVolumeClaim {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ClaimSpec,
    #[serde(default)]
    pub status: ClaimStatus,
}

impl PersistentVolumeClaim {
    /// Requested storage from `spec.resources.requests`.
    pub fn requested_storage(&self) -> Quantity {
        self.spec
            .resources
            .requests
            .get(RESOURCE_STORAGE)
            .cloned()
            .unwrap_or_default()
    }

    /// Provisioned storage from `status.capacity`.
    pub fn status_storage(&self) -> Quantity {
        self.status
            .capacity
            .get(RESOURCE_STORAGE)
            .cloned()
            .unwrap_or_default()
    }

    pub fn unique_name(&self) -> UniqueClaimName {
        UniqueClaimName(self.metadata.uid.clone().unwrap_or_default())
    }

    /// `namespace/name`, used in logs and error messages.
    pub fn key(&self) -> String {
        format!(
            "{}/{}",
            self.metadata.namespace.as_deref().unwrap_or_default(),
            self.metadata.name
        )
    }

    pub fn object_ref(&self) -> ObjectReference {
        ObjectReference {
            kind: "PersistentVolumeClaim".to_owned(),
            namespace: self.metadata.namespace.clone(),
            name: self.metadata.name.clone(),
            uid: self.metadata.uid.clone(),
        }
    }

    /// The condition of the given type, if present.
    pub fn condition(&self, type_: &ClaimConditionType) -> Option<&ClaimCondition> {
        self.status.conditions.iter().find(|c| &c.type_ == type_)
    }
}

// ---------------------------------------------------------------------------
// PersistentVolume
// ---------------------------------------------------------------------------

/// CSI-backed volume source.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CsiVolumeSource {
    pub driver: String,
    pub volume_handle: String,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolumeSpec {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub capacity: BTreeMap<String, Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_ref: Option<ObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csi: Option<CsiVolumeSource>,
}

/// A provisioned storage volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PersistentVolume {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PersistentVolumeSpec,
}

impl PersistentVolume {
    /// Provisioned storage from `spec.capacity`.
    pub fn spec_storage(&self) -> Quantity {
        self.spec
            .capacity
            .get(RESOURCE_STORAGE)
            .cloned()
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Volume spec
// ---------------------------------------------------------------------------

/// The operation layer's view of a volume: the bound persistent volume plus
/// how it is used.
#[derive(Debug, Clone, Default)]
pub struct VolumeSpec {
    pub persistent_volume: Option<PersistentVolume>,
    /// Mounted read-only; filesystem resize cannot proceed.
    pub read_only: bool,
    /// An inline volume migrated to CSI.  Such volumes are not first-class
    /// provisioned volumes and are never resized through this path.
    pub inline_volume_spec_for_csi_migration: bool,
}

impl VolumeSpec {
    pub fn from_persistent_volume(pv: PersistentVolume, read_only: bool) -> Self {
        Self {
            persistent_volume: Some(pv),
            read_only,
            inline_volume_spec_for_csi_migration: false,
        }
    }

    pub fn name(&self) -> &str {
        self.persistent_volume
            .as_ref()
            .map(|pv| pv.metadata.name.as_str())
            .unwrap_or_default()
    }

    /// Plugin kind resolving the volume's expansion capabilities.
    pub fn plugin_kind(&self) -> Option<PluginKind> {
        self.persistent_volume
            .as_ref()
            .and_then(|pv| pv.spec.csi.as_ref())
            .map(|csi| PluginKind(csi.driver.clone()))
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => f.write_str("Normal"),
            Self::Warning => f.write_str("Warning"),
        }
    }
}

/// Event reasons emitted by this crate.
pub mod reasons {
    pub const VOLUME_RESIZE_FAILED: &str = "VolumeResizeFailed";
    pub const VOLUME_RESIZE_SUCCESSFUL: &str = "VolumeResizeSuccessful";
    pub const FILE_SYSTEM_RESIZE_FAILED: &str = "FileSystemResizeFailed";
    pub const FILE_SYSTEM_RESIZE_SUCCESSFUL: &str = "FileSystemResizeSuccessful";
}
