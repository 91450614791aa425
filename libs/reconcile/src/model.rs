//! Workload and instance records as observed from the cluster store.
//!
//! These types are owned by the store; the reconciler only reads them and
//! proposes status updates. Field names serialize in camelCase to match the
//! persisted layout.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::selector::LabelSelector;

/// Labels attached to an object.
pub type Labels = BTreeMap<String, String>;

/// Kind name stamped on owner references pointing at a workload.
pub const WORKLOAD_KIND: &str = "PodSet";

/// API version stamped on owner references pointing at a workload.
pub const WORKLOAD_API_VERSION: &str = "pixiu.pixiu.io/v1alpha1";

/// Namespace-scoped identity of an object.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for NamespacedName {
    type Err = String;

    /// Parses `namespace/name`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() => {
                Ok(Self::new(namespace, name))
            }
            _ => Err(format!("expected namespace/name, got {s:?}")),
        }
    }
}

/// Back-reference from an instance to the object that manages it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: Uuid,
    #[serde(default)]
    pub controller: bool,
    #[serde(default)]
    pub block_owner_deletion: bool,
}

/// Lifecycle phase of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstancePhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Terminating,
}

impl fmt::Display for InstancePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Terminating => "terminating",
        };
        f.write_str(s)
    }
}

/// Readiness signal reported for an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Readiness {
    pub ready: bool,

    /// When `ready` last changed value.
    pub last_transition_time: DateTime<Utc>,
}

/// One concrete worker unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub namespace: String,
    pub name: String,
    pub uid: Uuid,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub owner_references: Vec<OwnerReference>,
    pub phase: InstancePhase,
    #[serde(default)]
    pub readiness: Option<Readiness>,
    pub creation_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub spec: serde_json::Value,
}

impl Instance {
    /// Namespace and name of this instance.
    pub fn key(&self) -> NamespacedName {
        NamespacedName::new(&self.namespace, &self.name)
    }

    /// Returns the owner reference marked as the managing controller.
    pub fn controller_ref(&self) -> Option<&OwnerReference> {
        self.owner_references.iter().find(|r| r.controller)
    }
}

/// Template used to stamp new instances.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceTemplate {
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub spec: serde_json::Value,
}

/// Desired state of a workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSpec {
    pub replicas: u32,
    pub selector: LabelSelector,
    #[serde(default)]
    pub template: InstanceTemplate,
    #[serde(default)]
    pub min_ready_seconds: u32,
}

/// Persisted status block of a workload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadStatus {
    pub replicas: u32,
    pub ready_replicas: u32,
    pub available_replicas: u32,
    pub observed_generation: i64,
}

/// The desired-state record for a replicated unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workload {
    pub namespace: String,
    pub name: String,
    pub uid: Uuid,
    #[serde(default)]
    pub generation: i64,
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default)]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    pub spec: WorkloadSpec,
    #[serde(default)]
    pub status: WorkloadStatus,
}

impl Workload {
    /// Namespace and name of this workload.
    pub fn key(&self) -> NamespacedName {
        NamespacedName::new(&self.namespace, &self.name)
    }

    pub fn is_being_deleted(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    /// Builds the controller reference stamped onto instances created for
    /// this workload.
    pub fn controller_ref(&self) -> OwnerReference {
        OwnerReference {
            api_version: WORKLOAD_API_VERSION.to_string(),
            kind: WORKLOAD_KIND.to_string(),
            name: self.name.clone(),
            uid: self.uid,
            controller: true,
            block_owner_deletion: true,
        }
    }
}
