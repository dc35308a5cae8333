//! Project instance records as seen by the driver
//!
//! An [`Instance`] is owned by the caller's persistence layer. The driver
//! reads it to build the desired resource set and writes back only the
//! fields it is responsible for: url, lifecycle state and the workload kind.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Prefix applied to Service names whose safe name starts with a digit
pub const NUMERIC_NAME_PREFIX: &str = "srv-";

/// Lifecycle state of an instance
///
/// The launcher inside an instance may report states this driver does not
/// model explicitly; those are carried verbatim in [`InstanceState::Other`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InstanceState {
    #[default]
    Unknown,
    Starting,
    Started,
    Stopping,
    Suspended,
    Running,
    Other(String),
}

impl InstanceState {
    pub fn as_str(&self) -> &str {
        match self {
            InstanceState::Unknown => "unknown",
            InstanceState::Starting => "starting",
            InstanceState::Started => "started",
            InstanceState::Stopping => "stopping",
            InstanceState::Suspended => "suspended",
            InstanceState::Running => "running",
            InstanceState::Other(state) => state,
        }
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, InstanceState::Suspended)
    }
}

impl From<String> for InstanceState {
    fn from(value: String) -> Self {
        match value.as_str() {
            "unknown" => InstanceState::Unknown,
            "starting" => InstanceState::Starting,
            "started" => InstanceState::Started,
            "stopping" => InstanceState::Stopping,
            "suspended" => InstanceState::Suspended,
            "running" => InstanceState::Running,
            _ => InstanceState::Other(value),
        }
    }
}

impl From<InstanceState> for String {
    fn from(value: InstanceState) -> Self {
        value.as_str().to_string()
    }
}

impl FromStr for InstanceState {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(InstanceState::from(s.to_string()))
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kubernetes object kind backing an instance's workload
///
/// Older instances ran as bare Pods. Every provisioning pass now creates a
/// Deployment and records it, so the migration only goes Pod -> Deployment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadKind {
    #[default]
    Pod,
    Deployment,
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkloadKind::Pod => write!(f, "Pod"),
            WorkloadKind::Deployment => write!(f, "Deployment"),
        }
    }
}

/// Resource tier ("stack") assigned to an instance
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTier {
    /// CPU in 1/100th of a core; 100 equals one core
    #[serde(default)]
    pub cpu: Option<u32>,
    /// Memory in MB
    #[serde(default)]
    pub memory: Option<u32>,
    /// Container image reference, may include a tag
    #[serde(default)]
    pub container: Option<String>,
}

/// High-availability setting
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HaSettings {
    pub replicas: i32,
}

/// Per-instance settings bag
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSettings {
    #[serde(default)]
    pub custom_hostname: Option<String>,
    #[serde(default)]
    pub ha: Option<HaSettings>,
    #[serde(default)]
    pub credential_secret: Option<String>,
    #[serde(default, rename = "k8sType")]
    pub workload_kind: Option<WorkloadKind>,
}

/// A tenant-owned runtime instance
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub id: String,
    pub name: String,
    /// Hashid of the owning team
    pub team_id: String,
    #[serde(default)]
    pub tier: ResourceTier,
    /// Externally reachable URL, empty until first provisioned
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub state: InstanceState,
    #[serde(default)]
    pub settings: InstanceSettings,
}

impl Instance {
    /// Platform-safe form of the instance name
    pub fn safe_name(&self) -> String {
        safe_name(&self.name)
    }

    /// Name of the Service fronting the workload
    ///
    /// Service names must be DNS-1035 labels, so digit-leading names get
    /// [`NUMERIC_NAME_PREFIX`].
    pub fn service_name(&self) -> String {
        let safe = self.safe_name();
        if safe.starts_with(|c: char| c.is_ascii_digit()) {
            format!("{NUMERIC_NAME_PREFIX}{safe}")
        } else {
            safe
        }
    }

    /// Name of the primary Ingress (also its TLS secret)
    pub fn route_name(&self) -> String {
        self.safe_name()
    }

    /// Name of the custom-hostname Ingress (also its TLS secret)
    pub fn custom_route_name(&self) -> String {
        format!("{}-custom", self.safe_name())
    }

    pub fn volume_name(&self) -> String {
        format!("{}-pvc", self.id)
    }

    /// Workload kind recorded for this instance; unrecorded means a legacy Pod
    pub fn workload_kind(&self) -> WorkloadKind {
        self.settings.workload_kind.unwrap_or_default()
    }

    pub fn is_ha(&self) -> bool {
        self.settings.ha.is_some()
    }

    pub fn summary(&self) -> InstanceSummary {
        InstanceSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            state: self.state.clone(),
            team_id: self.team_id.clone(),
            workload_kind: self.settings.workload_kind,
        }
    }
}

/// Minimal projection of an instance, used by the startup sweep
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSummary {
    pub id: String,
    pub name: String,
    pub state: InstanceState,
    pub team_id: String,
    #[serde(default)]
    pub workload_kind: Option<WorkloadKind>,
}

impl InstanceSummary {
    pub fn safe_name(&self) -> String {
        safe_name(&self.name)
    }
}

/// Normalize a human-readable name into a platform-safe object name
pub fn safe_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                '-'
            }
        })
        .collect()
}
