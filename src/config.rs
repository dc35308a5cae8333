//! Driver configuration
//!
//! [`DriverOptions`] is read from a YAML file whose keys match the driver
//! options block of the FlowForge platform configuration. Every field has a
//! default, so an empty file (or no file) yields a working local setup.
//! A handful of settings are only ever supplied through the process
//! environment; those are captured once at load time in [`EnvOverrides`].

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use k8s_openapi::api::core::v1::{PodSecurityContext, Probe, SecurityContext, Toleration};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::controller::poller::PollPolicy;
use crate::error::{Error, Result};

pub const DEFAULT_NAMESPACE: &str = "flowforge";
pub const DEFAULT_K8S_RETRIES: u32 = 10;

/// Service types an instance endpoint may use
pub const ALLOWED_SERVICE_TYPES: [&str; 2] = ["ClusterIP", "NodePort"];

/// Persistent storage for instances
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageOptions {
    pub enabled: bool,
    pub storage_class: Option<String>,
    /// Requested volume size, e.g. `5Gi`
    pub size: Option<String>,
}

/// Probe overrides for the instance container
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectProbes {
    pub liveness_probe: Option<Probe>,
    pub readiness_probe: Option<Probe>,
    pub startup_probe: Option<Probe>,
}

/// Settings for the optional second route on a user-supplied hostname
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CustomHostnameOptions {
    pub enabled: bool,
    pub cert_manager_issuer: Option<String>,
    pub ingress_annotations: Option<BTreeMap<String, String>>,
    pub ingress_class: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceOptions {
    #[serde(rename = "type")]
    pub service_type: String,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            service_type: "ClusterIP".to_string(),
        }
    }
}

/// Settings that are only read from the process environment
///
/// JSON-valued overrides are kept raw and parsed when a template is built,
/// so a malformed value is reported and skipped instead of failing startup.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EnvOverrides {
    /// `DEPLOYMENT_TOLERATIONS`, a JSON array of tolerations
    pub deployment_tolerations: Option<String>,
    /// `INGRESS_ANNOTATIONS`, a JSON object of base route annotations
    pub ingress_annotations: Option<String>,
    /// `INGRESS_CLASS_NAME`
    pub ingress_class_name: Option<String>,
    /// `EDITOR_SERVICE_ACCOUNT`
    pub editor_service_account: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            deployment_tolerations: lookup("DEPLOYMENT_TOLERATIONS"),
            ingress_annotations: lookup("INGRESS_ANNOTATIONS"),
            ingress_class_name: lookup("INGRESS_CLASS_NAME").filter(|v| !v.is_empty()),
            editor_service_account: lookup("EDITOR_SERVICE_ACCOUNT"),
        }
    }

    pub fn tolerations(&self) -> Result<Option<Vec<Toleration>>> {
        self.deployment_tolerations
            .as_deref()
            .map(|raw| {
                serde_json::from_str(raw).map_err(|e| {
                    Error::ConfigError(format!("DEPLOYMENT_TOLERATIONS is not valid JSON: {e}"))
                })
            })
            .transpose()
    }

    pub fn base_ingress_annotations(&self) -> Result<BTreeMap<String, String>> {
        match self.ingress_annotations.as_deref() {
            None => Ok(BTreeMap::new()),
            Some(raw) => serde_json::from_str(raw).map_err(|e| {
                Error::ConfigError(format!("INGRESS_ANNOTATIONS is not valid JSON: {e}"))
            }),
        }
    }
}

/// Options controlling how instances are rendered and supervised
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DriverOptions {
    /// Container registry prefix for the default images
    pub registry: String,
    pub project_namespace: String,
    /// Domain instances are published under, e.g. `example.com`
    pub domain: String,
    /// Public URL of the platform, supplies the scheme for new instance URLs
    pub base_url: String,
    /// Platform API URL handed to instances and agents
    pub api_url: String,
    /// Delay between platform readiness observations, in milliseconds
    pub k8s_delay: u64,
    /// Readiness observations before giving up
    pub k8s_retries: u32,
    pub project_selector: Option<BTreeMap<String, String>>,
    pub registry_secrets: Vec<String>,
    /// ConfigMap holding `chain.pem` for a private certificate authority
    #[serde(rename = "privateCA")]
    pub private_ca: Option<String>,
    pub storage: StorageOptions,
    pub pod_security_context: Option<PodSecurityContext>,
    pub container_security_context: Option<SecurityContext>,
    pub project_labels: Option<BTreeMap<String, String>>,
    pub project_probes: ProjectProbes,
    pub project_ingress_annotations: Option<BTreeMap<String, String>>,
    pub cert_manager_issuer: Option<String>,
    pub custom_hostname: CustomHostnameOptions,
    pub service: ServiceOptions,
    pub scheduler_name: Option<String>,
    pub cloud_provider: Option<String>,
    pub log_passthrough: bool,
    /// Whether an enterprise license is active
    pub licensed: bool,
    pub mqtt_schema_container: Option<String>,
    #[serde(alias = "default_stack")]
    pub default_stack: Option<serde_json::Map<String, serde_json::Value>>,
    pub sweep_delay_ms: u64,
    pub sweep_jitter_ms: u64,
    pub launcher_timeout_ms: u64,
    pub logs_timeout_ms: u64,
    #[serde(skip)]
    pub env: EnvOverrides,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            registry: String::new(),
            project_namespace: DEFAULT_NAMESPACE.to_string(),
            domain: String::new(),
            base_url: "http://localhost:3000".to_string(),
            api_url: "http://forge.flowforge:3000".to_string(),
            k8s_delay: 1000,
            k8s_retries: DEFAULT_K8S_RETRIES,
            project_selector: None,
            registry_secrets: Vec::new(),
            private_ca: None,
            storage: StorageOptions::default(),
            pod_security_context: None,
            container_security_context: None,
            project_labels: None,
            project_probes: ProjectProbes::default(),
            project_ingress_annotations: None,
            cert_manager_issuer: None,
            custom_hostname: CustomHostnameOptions::default(),
            service: ServiceOptions::default(),
            scheduler_name: None,
            cloud_provider: None,
            log_passthrough: false,
            licensed: false,
            mqtt_schema_container: None,
            default_stack: None,
            sweep_delay_ms: 1000,
            sweep_jitter_ms: 5,
            launcher_timeout_ms: 1000,
            logs_timeout_ms: 2000,
            env: EnvOverrides::default(),
        }
    }
}

impl DriverOptions {
    /// Load options from an optional YAML file and the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let options = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    Error::ConfigError(format!("failed to read {}: {e}", path.display()))
                })?;
                info!("Loading driver options from {}", path.display());
                Self::from_yaml(&raw)?
            }
            None => Self::default(),
        };
        options.with_env(EnvOverrides::from_env()).finish()
    }

    /// Parse options from YAML without consulting the environment
    pub fn from_yaml(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn with_env(mut self, env: EnvOverrides) -> Self {
        self.env = env;
        self
    }

    /// Normalize and validate
    pub fn finish(mut self) -> Result<Self> {
        if !self.registry.is_empty() && !self.registry.ends_with('/') {
            self.registry.push('/');
        }
        if self.project_namespace.is_empty() {
            self.project_namespace = DEFAULT_NAMESPACE.to_string();
        }
        if self.k8s_retries == 0 {
            self.k8s_retries = DEFAULT_K8S_RETRIES;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if !ALLOWED_SERVICE_TYPES.contains(&self.service.service_type.as_str()) {
            return Err(Error::ConfigError(
                "Service type must be either NodePort or ClusterIP".to_string(),
            ));
        }
        url::Url::parse(&self.base_url)
            .map_err(|e| Error::ConfigError(format!("baseUrl {:?}: {e}", self.base_url)))?;
        Ok(())
    }

    pub fn namespace(&self) -> &str {
        &self.project_namespace
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy::new(Duration::from_millis(self.k8s_delay), self.k8s_retries)
    }

    /// OpenShift clusters with an enterprise license run with the
    /// platform-assigned security contexts
    pub fn strips_security_contexts(&self) -> bool {
        self.licensed && self.cloud_provider.as_deref() == Some("openshift")
    }

    pub fn launcher_timeout(&self) -> Duration {
        Duration::from_millis(self.launcher_timeout_ms)
    }

    pub fn logs_timeout(&self) -> Duration {
        Duration::from_millis(self.logs_timeout_ms)
    }

    /// Base delay plus a random jitter below `sweep_jitter_ms`
    pub fn sweep_delay(&self) -> Duration {
        use rand::Rng;
        let jitter = if self.sweep_jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..self.sweep_jitter_ms)
        };
        Duration::from_millis(self.sweep_delay_ms + jitter)
    }

    /// Custom hostname options, when the feature is switched on
    pub fn custom_hostname(&self) -> Option<&CustomHostnameOptions> {
        self.custom_hostname.enabled.then_some(&self.custom_hostname)
    }

    /// Image for instances without an explicit container in their tier
    pub fn default_image(&self) -> String {
        format!("{}flowforge/node-red", self.registry)
    }

    pub fn agent_image(&self) -> String {
        self.mqtt_schema_container
            .clone()
            .unwrap_or_else(|| format!("{}flowfuse/mqtt-schema-agent", self.registry))
    }
}
