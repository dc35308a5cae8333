//! Driver facade
//!
//! [`Driver`] wires the platform, persistence, credential and control-plane
//! boundaries to the lifecycle orchestrator. Lifecycle operations live in
//! `lifecycle.rs`, the startup sweep in `sweep.rs` and broker agents in
//! `broker_agent.rs`; this file holds construction, init/shutdown and the
//! launcher passthroughs.

use std::sync::Arc;

use futures::future::try_join_all;
use futures::stream::select_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::DriverOptions;
use crate::controller::control_plane::{ControlPlane, LauncherCommand, ResourceStream};
use crate::controller::platform::Platform;
use crate::controller::resources::WEB_PORT;
use crate::controller::state_cache::{CacheEntry, InMemoryStateCache, StateCache};
use crate::controller::store::{CredentialIssuer, InstanceStore};
use crate::controller::sweep::SweepReport;
use crate::error::{Error, Result};
use crate::model::Instance;

/// Runtime settings handed to the launcher
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LauncherSettings {
    #[serde(rename = "projectID")]
    pub project_id: String,
    pub port: i32,
    pub root_dir: String,
    pub user_dir: String,
}

/// Resource samples from one or more launchers
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    #[serde(default)]
    pub meta: Value,
    #[serde(default)]
    pub resources: Vec<Value>,
    #[serde(default)]
    pub count: usize,
}

impl ResourceSnapshot {
    /// Wrap a launcher response; bare arrays get empty meta
    pub fn from_launcher(value: Value) -> Result<Self> {
        match value {
            Value::Array(resources) => Ok(Self {
                meta: json!({}),
                count: resources.len(),
                resources,
            }),
            other => Ok(serde_json::from_value(other)?),
        }
    }
}

pub struct Driver {
    pub(crate) platform: Arc<dyn Platform>,
    pub(crate) store: Arc<dyn InstanceStore>,
    pub(crate) credentials: Arc<dyn CredentialIssuer>,
    pub(crate) cache: Arc<dyn StateCache>,
    pub(crate) control_plane: Arc<dyn ControlPlane>,
    pub(crate) options: DriverOptions,
    sweep: Mutex<Option<JoinHandle<SweepReport>>>,
}

impl Driver {
    pub fn new(
        platform: Arc<dyn Platform>,
        store: Arc<dyn InstanceStore>,
        credentials: Arc<dyn CredentialIssuer>,
        control_plane: Arc<dyn ControlPlane>,
        options: DriverOptions,
    ) -> Self {
        Self {
            platform,
            store,
            credentials,
            cache: Arc::new(InMemoryStateCache::new()),
            control_plane,
            options,
            sweep: Mutex::new(None),
        }
    }

    /// Replace the default in-memory state cache
    pub fn with_cache(mut self, cache: Arc<dyn StateCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn options(&self) -> &DriverOptions {
        &self.options
    }

    pub fn namespace(&self) -> &str {
        self.options.namespace()
    }

    pub async fn cached_state(&self, id: &str) -> Option<CacheEntry> {
        self.cache.get(id).await
    }

    /// Seed the state cache and schedule the reconciliation sweep
    ///
    /// Returns the stack property schema.
    #[instrument(skip(self))]
    pub async fn init(self: &Arc<Self>) -> Result<Value> {
        if self.options.custom_hostname().is_some() {
            info!("Enabling custom hostname support");
        }
        if self.options.cloud_provider.as_deref() == Some("openshift") && !self.options.licensed {
            info!("OpenShift cloud provider set, but no enterprise license");
        }

        let instances = self.store.list_instances().await?;
        let seeded = self.seed_cache(&instances).await;
        info!(
            "Seeded state cache with {} of {} instances",
            seeded,
            instances.len()
        );

        let delay = self.options.sweep_delay();
        let driver = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            driver.sweep(&instances).await
        });
        if let Some(previous) = self.sweep.lock().await.replace(handle) {
            previous.abort();
        }

        Ok(stack_schema())
    }

    /// Wait for the scheduled sweep to finish
    pub async fn join_sweep(&self) -> Option<SweepReport> {
        let handle = self.sweep.lock().await.take()?;
        match handle.await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!("Reconciliation sweep did not complete: {}", e);
                None
            }
        }
    }

    /// Cancel a sweep that has not finished yet
    pub async fn shutdown(&self) {
        if let Some(handle) = self.sweep.lock().await.take() {
            handle.abort();
            debug!("Cancelled pending reconciliation sweep");
        }
    }

    // ========================================================================
    // Launcher passthroughs
    // ========================================================================

    pub(crate) fn service_host(&self, instance: &Instance) -> String {
        format!("{}.{}", instance.service_name(), self.namespace())
    }

    async fn ensure_known(&self, instance: &Instance) -> Result<CacheEntry> {
        self.cache
            .get(&instance.id)
            .await
            .ok_or_else(|| Error::UnknownInstance(instance.id.clone()))
    }

    /// Every replica for HA instances, otherwise the Service host
    async fn launcher_targets(&self, instance: &Instance) -> Result<Vec<String>> {
        if instance.is_ha() {
            self.platform
                .endpoint_addresses(self.namespace(), &instance.service_name())
                .await
        } else {
            Ok(vec![self.service_host(instance)])
        }
    }

    async fn broadcast(&self, instance: &Instance, command: LauncherCommand) -> Result<()> {
        let targets = self.launcher_targets(instance).await?;
        try_join_all(
            targets
                .iter()
                .map(|host| self.control_plane.command(host, &command)),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self, instance), fields(instance = %instance.id))]
    pub async fn start_flows(&self, instance: &Instance) -> Result<()> {
        self.ensure_known(instance).await?;
        self.broadcast(instance, LauncherCommand::start()).await
    }

    #[instrument(skip(self, instance), fields(instance = %instance.id))]
    pub async fn stop_flows(&self, instance: &Instance) -> Result<()> {
        self.ensure_known(instance).await?;
        self.broadcast(instance, LauncherCommand::stop()).await
    }

    #[instrument(skip(self, instance), fields(instance = %instance.id))]
    pub async fn restart_flows(&self, instance: &Instance) -> Result<()> {
        self.ensure_known(instance).await?;
        self.broadcast(instance, LauncherCommand::restart()).await
    }

    /// Log a user out of every replica
    #[instrument(skip(self, instance, token), fields(instance = %instance.id))]
    pub async fn revoke_user_token(&self, instance: &Instance, token: &str) -> Result<()> {
        debug!("Instance {} - logging out runtime user", instance.id);
        self.broadcast(instance, LauncherCommand::logout(token)).await
    }

    /// Launcher log entries, merged across replicas and ordered by `ts`
    pub async fn logs(&self, instance: &Instance) -> Result<Vec<Value>> {
        self.ensure_known(instance).await?;
        if !instance.is_ha() {
            return self.control_plane.logs(&self.service_host(instance)).await;
        }

        let targets = self.launcher_targets(instance).await?;
        let replicas = try_join_all(targets.iter().map(|host| self.control_plane.logs(host))).await?;
        let mut entries: Vec<Value> = replicas.into_iter().flatten().collect();
        sort_by_timestamp(&mut entries);
        Ok(entries)
    }

    pub async fn resources(&self, instance: &Instance) -> Result<ResourceSnapshot> {
        self.ensure_known(instance).await?;
        if !instance.is_ha() {
            let value = self
                .control_plane
                .resources(&self.service_host(instance))
                .await?;
            return ResourceSnapshot::from_launcher(value);
        }

        let targets = self.launcher_targets(instance).await?;
        let replicas = try_join_all(
            targets
                .iter()
                .map(|host| self.control_plane.resources(host)),
        )
        .await?;

        let mut meta = json!({});
        let mut samples = Vec::new();
        for (i, value) in replicas.into_iter().enumerate() {
            let snapshot = ResourceSnapshot::from_launcher(value)?;
            if i == 0 {
                meta = snapshot.meta;
            }
            samples.extend(snapshot.resources);
        }
        sort_by_timestamp(&mut samples);
        Ok(ResourceSnapshot {
            meta,
            count: samples.len(),
            resources: samples,
        })
    }

    /// Live resource frames from every replica, in arrival order
    pub async fn resources_stream(&self, instance: &Instance) -> Result<ResourceStream> {
        self.ensure_known(instance).await?;
        let targets = self.launcher_targets(instance).await?;
        let streams = try_join_all(
            targets
                .iter()
                .map(|host| self.control_plane.resource_stream(host)),
        )
        .await?;
        Ok(Box::pin(select_all(streams)))
    }

    pub fn settings(&self, instance: &Instance) -> LauncherSettings {
        LauncherSettings {
            project_id: instance.id.clone(),
            port: WEB_PORT,
            root_dir: "/".to_string(),
            user_dir: "data".to_string(),
        }
    }

    /// Stack defaults, overlaid with configured `defaultStack` values
    pub fn default_stack_properties(&self) -> Map<String, Value> {
        let mut properties = Map::new();
        properties.insert("cpu".to_string(), json!(10));
        properties.insert("memory".to_string(), json!(256));
        properties.insert("container".to_string(), json!("flowfuse/node-red"));
        if let Some(overrides) = &self.options.default_stack {
            properties.extend(overrides.clone());
        }
        properties
    }

    // ========================================================================
    // Static files
    // ========================================================================

    pub async fn list_files(&self, instance: &Instance, path: &str) -> Result<Value> {
        self.control_plane
            .list_files(&self.service_host(instance), path)
            .await
    }

    pub async fn update_file(&self, instance: &Instance, path: &str, update: &Value) -> Result<()> {
        self.control_plane
            .update_file(&self.service_host(instance), path, update)
            .await
    }

    pub async fn delete_file(&self, instance: &Instance, path: &str) -> Result<()> {
        self.control_plane
            .delete_file(&self.service_host(instance), path)
            .await
    }

    pub async fn create_directory(
        &self,
        instance: &Instance,
        path: &str,
        directory: &str,
    ) -> Result<()> {
        self.control_plane
            .create_directory(&self.service_host(instance), path, directory)
            .await
    }

    pub async fn upload_file(&self, instance: &Instance, path: &str, contents: Vec<u8>) -> Result<()> {
        self.control_plane
            .upload_file(&self.service_host(instance), path, contents)
            .await
    }
}

fn sort_by_timestamp(entries: &mut [Value]) {
    entries.sort_by(|a, b| {
        let a = a["ts"].as_f64().unwrap_or_default();
        let b = b["ts"].as_f64().unwrap_or_default();
        a.total_cmp(&b)
    });
}

/// Editable stack properties and their validation rules
pub fn stack_schema() -> Value {
    json!({
        "stack": {
            "properties": {
                "cpu": {
                    "label": "CPU Cores (in 1/100th units)",
                    "validate": "^([1-9][0-9]{0,2}|1000)$",
                    "invalidMessage": "Invalid value - must be a number between 1 and 1000, where 100 represents 1 CPU core",
                    "description": "Defines the CPU resources each Project should receive, in units of 1/100th of a CPU core. 100 equates to 1 CPU core"
                },
                "memory": {
                    "label": "Memory (MB)",
                    "validate": "^[1-9]\\d*$",
                    "invalidMessage": "Invalid value - must be a number",
                    "description": "How much memory the container for each Project will be granted, recommended value 256"
                },
                "container": {
                    "label": "Container Location",
                    "validate": "^((?:(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9])(?:(?:\\.(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9]))+)?(?::[0-9]+)?/)?[a-z0-9]+(?:(?:(?:[._]|__|[-]*)[a-z0-9]+)+)?(?:(?:/[a-z0-9]+(?:(?:(?:[._]|__|[-]*)[a-z0-9]+)+)?)+)?)(?::([\\w][\\w.-]{0,127}))?(?:@([A-Za-z][A-Za-z0-9]*(?:[-_+.][A-Za-z][A-Za-z0-9]*)*[:][[:xdigit:]]{32,}))?$",
                    "invalidMessage": "Invalid value - must be a Docker image",
                    "description": "Container image location, can include a tag"
                }
            }
        }
    })
}
