//! Instance lifecycle: start, stop, remove and details
//!
//! Start converges the desired resource set in order: volume, workload,
//! endpoint, route(s). Each object goes through [`upsert`] and a presence
//! poll. Stop and remove tear down in reverse with every deletion isolated,
//! reporting per-step outcomes in a [`TeardownReport`].
//!
//! The state cache is written only here (and by the sweep): `starting` on
//! start, `stopping` then `suspended` on stop, launcher-reported states in
//! details, and removed on remove.

use std::time::Instant;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, instrument, warn};

use crate::controller::driver::Driver;
use crate::controller::platform::{ManagedObject, ResourceKind};
use crate::controller::poller::{wait_for_absence, wait_for_presence};
use crate::controller::resources::{instance_url, route_uses_tls, DesiredResourceSet};
use crate::controller::teardown::TeardownReport;
use crate::controller::upsert::{upsert, OnConflict};
use crate::error::Result;
use crate::model::{Instance, InstanceState, WorkloadKind};

#[cfg(feature = "metrics")]
use crate::controller::metrics;

/// Observed state of an instance
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InstanceDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub state: InstanceState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    /// Remaining fields reported by the launcher
    #[serde(flatten)]
    pub info: Map<String, Value>,
}

impl InstanceDetails {
    fn state_only(state: InstanceState) -> Self {
        Self {
            id: None,
            state,
            error: None,
            meta: None,
            info: Map::new(),
        }
    }

    fn starting(id: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            state: InstanceState::Starting,
            error: None,
            meta: Some(json!({})),
            info: Map::new(),
        }
    }

    fn starting_with_error(id: &str, error: String) -> Self {
        Self {
            error: Some(error),
            ..Self::starting(id)
        }
    }

    /// Split a launcher `/info` payload into known fields and the rest
    fn from_info(id: &str, info: Value) -> Self {
        let mut fields = match info {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let state = fields
            .remove("state")
            .and_then(|s| s.as_str().map(|s| InstanceState::from(s.to_string())))
            .unwrap_or_default();
        let id = fields
            .remove("id")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| id.to_string());
        let error = fields
            .remove("error")
            .and_then(|v| v.as_str().map(str::to_string));
        let meta = fields.remove("meta");
        Self {
            id: Some(id),
            state,
            error,
            meta,
            info: fields,
        }
    }
}

/// How far along the workload is, judged from its status
#[derive(Debug, PartialEq, Eq)]
enum WorkloadPhase {
    Starting,
    Ready,
    Unexpected(String),
}

fn deployment_phase(deployment: &Deployment) -> WorkloadPhase {
    let condition = deployment
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|c| c.first());
    match condition {
        Some(c) if c.status == "False" => WorkloadPhase::Starting,
        Some(c)
            if c.status == "True"
                && (c.type_ == "Available"
                    || (c.type_ == "Progressing"
                        && c.reason.as_deref() == Some("NewReplicaSetAvailable"))) =>
        {
            WorkloadPhase::Ready
        }
        Some(c) => WorkloadPhase::Unexpected(format!(
            "Unexpected pod status '{}', type '{}'",
            c.status, c.type_
        )),
        None => WorkloadPhase::Unexpected("Deployment has no status conditions".to_string()),
    }
}

fn pod_phase(pod: &Pod) -> WorkloadPhase {
    match pod.status.as_ref().and_then(|s| s.phase.as_deref()) {
        Some("Pending") => WorkloadPhase::Starting,
        Some("Running") => WorkloadPhase::Ready,
        other => WorkloadPhase::Unexpected(format!(
            "Unexpected pod status '{}'",
            other.unwrap_or("unknown")
        )),
    }
}

fn workload_resource(kind: WorkloadKind) -> ResourceKind {
    match kind {
        WorkloadKind::Deployment => ResourceKind::Deployment,
        WorkloadKind::Pod => ResourceKind::Pod,
    }
}

impl Driver {
    /// Provision or re-provision an instance
    ///
    /// Returns once every resource has been observed on the platform. The
    /// cache reads `starting` afterwards; [`Driver::details`] reports
    /// readiness.
    #[instrument(skip(self, instance), fields(instance = %instance.id, name = %instance.name))]
    pub async fn start(&self, instance: &Instance) -> Result<()> {
        let started = Instant::now();
        self.cache.set(&instance.id, InstanceState::Starting).await;

        let result = self.provision(instance).await;
        if let Err(e) = &result {
            error!("Instance {} - start failed: {}", instance.id, e);
        }

        #[cfg(feature = "metrics")]
        metrics::observe_lifecycle_duration_seconds("start", started.elapsed().as_secs_f64());
        debug!("Start took {:?}", started.elapsed());
        result
    }

    /// Converge the desired resource set without touching the cache first
    pub(crate) async fn provision(&self, instance: &Instance) -> Result<()> {
        let namespace = self.namespace();
        let policy = self.options.poll_policy();
        let platform = self.platform.as_ref();

        let url = instance_url(instance, &self.options)?;
        if instance.url.as_deref() != Some(url.as_str()) {
            self.store.save_url(&instance.id, &url).await?;
        }
        let mut instance = instance.clone();
        instance.url = Some(url);

        let tokens = self.credentials.refresh_instance_tokens(&instance).await?;
        let desired = DesiredResourceSet::build(&instance, &self.options, &tokens)?;

        if let Some(volume) = &desired.volume {
            let volume = ManagedObject::PersistentVolumeClaim(volume.clone());
            self.ensure_secondary(&instance, &volume, OnConflict::Keep)
                .await?;
        }

        let workload = ManagedObject::Deployment(desired.workload.clone());
        if let Err(e) = upsert(platform, namespace, &workload, OnConflict::Replace).await {
            error!(
                "Instance {} - unexpected error creating deployment: {}",
                instance.id, e
            );
            return Err(e);
        }
        wait_for_presence(
            platform,
            namespace,
            ResourceKind::Deployment,
            workload.name(),
            policy,
        )
        .await?;

        // Record the new kind before the legacy pod goes
        self.store
            .save_workload_kind(&instance.id, WorkloadKind::Deployment)
            .await?;
        if instance.workload_kind() == WorkloadKind::Pod {
            self.remove_legacy_pod(&instance).await;
        }

        let endpoint = ManagedObject::Service(desired.endpoint.clone());
        if self
            .ensure_secondary(&instance, &endpoint, OnConflict::Keep)
            .await?
        {
            wait_for_presence(
                platform,
                namespace,
                ResourceKind::Service,
                endpoint.name(),
                policy,
            )
            .await?;
        }

        let route = ManagedObject::Ingress(desired.route.clone());
        let route_applied = self
            .ensure_secondary(&instance, &route, OnConflict::Replace)
            .await?;
        if let Some(custom) = &desired.custom_route {
            let custom = ManagedObject::Ingress(custom.clone());
            self.ensure_secondary(&instance, &custom, OnConflict::Replace)
                .await?;
        }
        if route_applied {
            wait_for_presence(
                platform,
                namespace,
                ResourceKind::Ingress,
                route.name(),
                policy,
            )
            .await?;
        }

        info!("Instance {} started", instance.id);
        self.store
            .save_state(&instance.id, InstanceState::Running)
            .await?;
        self.cache.set(&instance.id, InstanceState::Starting).await;
        Ok(())
    }

    /// Upsert a non-workload object; suspended instances only warn on failure
    ///
    /// Returns `false` when a failure was tolerated.
    async fn ensure_secondary(
        &self,
        instance: &Instance,
        object: &ManagedObject,
        policy: OnConflict,
    ) -> Result<bool> {
        match upsert(self.platform.as_ref(), self.namespace(), object, policy).await {
            Ok(_) => Ok(true),
            Err(e) if instance.state.is_suspended() => {
                warn!(
                    "Instance {} - error creating {} {}: {}",
                    instance.id,
                    object.kind(),
                    object.name(),
                    e
                );
                Ok(false)
            }
            Err(e) => {
                error!(
                    "Instance {} - error creating {} {}: {}",
                    instance.id,
                    object.kind(),
                    object.name(),
                    e
                );
                Err(e)
            }
        }
    }

    /// Bare pods predate Deployments; drop one once its Deployment exists
    async fn remove_legacy_pod(&self, instance: &Instance) {
        let name = instance.safe_name();
        match self
            .platform
            .delete(self.namespace(), ResourceKind::Pod, &name)
            .await
        {
            Ok(()) => info!("Instance {} - removed legacy pod {}", instance.id, name),
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!(
                "Instance {} - could not remove legacy pod {}: {}",
                instance.id, name, e
            ),
        }
    }

    /// Delete route(s) and any TLS secrets cert-manager issued for them
    async fn delete_routes(&self, instance: &Instance, report: &mut TeardownReport) {
        let route = instance.route_name();
        self.delete_step(report, "route", ResourceKind::Ingress, &route)
            .await;

        if route_uses_tls(
            self.options.cert_manager_issuer.as_deref(),
            self.options.project_ingress_annotations.as_ref(),
        ) {
            self.delete_step(report, "route-tls", ResourceKind::Secret, &route)
                .await;
        } else {
            report.skip("route-tls", ResourceKind::Secret, &route);
        }

        if let Some(custom) = self.options.custom_hostname() {
            let custom_route = instance.custom_route_name();
            self.delete_step(report, "custom-route", ResourceKind::Ingress, &custom_route)
                .await;
            if route_uses_tls(
                custom.cert_manager_issuer.as_deref(),
                custom.ingress_annotations.as_ref(),
            ) {
                self.delete_step(report, "custom-route-tls", ResourceKind::Secret, &custom_route)
                    .await;
            } else {
                report.skip("custom-route-tls", ResourceKind::Secret, &custom_route);
            }
        }
    }

    async fn delete_step(
        &self,
        report: &mut TeardownReport,
        step: &'static str,
        kind: ResourceKind,
        name: &str,
    ) {
        let result = self.platform.delete(self.namespace(), kind, name).await;
        report.record(step, kind, name, result);
    }

    /// Poll for absence after a delete; a timeout marks the step lingering
    async fn await_gone(
        &self,
        report: &mut TeardownReport,
        step: &'static str,
        kind: ResourceKind,
        name: &str,
    ) {
        let deleted = report.outcome(step).is_some_and(|o| o.is_gone());
        if !deleted {
            return;
        }
        let policy = self.options.poll_policy();
        if wait_for_absence(self.platform.as_ref(), self.namespace(), kind, name, policy)
            .await
            .is_err()
        {
            report.mark_lingering(step);
        }
    }

    /// Suspend an instance, keeping its volume
    ///
    /// The cache and persisted state move to `suspended` only once the
    /// workload is gone or confirmed absent.
    #[instrument(skip(self, instance), fields(instance = %instance.id, name = %instance.name))]
    pub async fn stop(&self, instance: &Instance) -> TeardownReport {
        let started = Instant::now();
        self.cache.set(&instance.id, InstanceState::Stopping).await;
        let mut report = TeardownReport::new(&instance.id);

        // Deleting the workload matters most; earlier steps never block it
        self.delete_routes(instance, &mut report).await;
        self.await_gone(&mut report, "route", ResourceKind::Ingress, &instance.route_name())
            .await;

        let endpoint = instance.service_name();
        self.delete_step(&mut report, "endpoint", ResourceKind::Service, &endpoint)
            .await;
        self.await_gone(&mut report, "endpoint", ResourceKind::Service, &endpoint)
            .await;

        let kind = workload_resource(instance.workload_kind());
        let name = instance.safe_name();
        self.delete_step(&mut report, "workload", kind, &name).await;

        if report.outcome("workload").is_some_and(|o| o.is_gone()) {
            self.cache.set(&instance.id, InstanceState::Suspended).await;
            if let Err(e) = self
                .store
                .save_state(&instance.id, InstanceState::Suspended)
                .await
            {
                warn!("Instance {} - could not persist suspended state: {}", instance.id, e);
            }
            self.await_gone(&mut report, "workload", kind, &name).await;
        }

        report.log();
        #[cfg(feature = "metrics")]
        metrics::observe_lifecycle_duration_seconds("stop", started.elapsed().as_secs_f64());
        debug!("Stop took {:?}", started.elapsed());
        report
    }

    /// Delete every resource of an instance, including its volume
    #[instrument(skip(self, instance), fields(instance = %instance.id, name = %instance.name))]
    pub async fn remove(&self, instance: &Instance) -> TeardownReport {
        let started = Instant::now();
        let mut report = TeardownReport::new(&instance.id);

        self.delete_routes(instance, &mut report).await;
        self.delete_step(
            &mut report,
            "endpoint",
            ResourceKind::Service,
            &instance.service_name(),
        )
        .await;
        // A suspended instance has no workload, but state may be out of sync
        self.delete_step(
            &mut report,
            "workload",
            workload_resource(instance.workload_kind()),
            &instance.safe_name(),
        )
        .await;

        let volume = instance.volume_name();
        if self.options.storage.enabled {
            self.delete_step(
                &mut report,
                "volume",
                ResourceKind::PersistentVolumeClaim,
                &volume,
            )
            .await;
        } else {
            report.skip("volume", ResourceKind::PersistentVolumeClaim, &volume);
        }

        self.cache.delete(&instance.id).await;
        report.log();
        #[cfg(feature = "metrics")]
        metrics::observe_lifecycle_duration_seconds("remove", started.elapsed().as_secs_f64());
        debug!("Remove took {:?}", started.elapsed());
        report
    }

    /// Current state of an instance; never fails
    #[instrument(skip(self, instance), fields(instance = %instance.id))]
    pub async fn details(&self, instance: &Instance) -> InstanceDetails {
        let cached = match self.cache.get(&instance.id).await {
            Some(entry) => entry,
            None => return InstanceDetails::state_only(InstanceState::Unknown),
        };
        // Only ask the launcher when the instance should be running
        if cached.state.is_suspended() {
            return InstanceDetails::state_only(cached.state);
        }

        let kind = workload_resource(instance.workload_kind());
        let phase = match self
            .platform
            .get(self.namespace(), kind, &instance.safe_name())
            .await
        {
            Ok(ManagedObject::Deployment(d)) => deployment_phase(&d),
            Ok(ManagedObject::Pod(p)) => pod_phase(&p),
            Ok(other) => WorkloadPhase::Unexpected(format!(
                "Unexpected workload kind {}",
                other.kind()
            )),
            Err(e) => {
                debug!("Error getting workload status for instance {}: {}", instance.id, e);
                return InstanceDetails {
                    meta: None,
                    ..InstanceDetails::starting_with_error(&instance.id, e.to_string())
                };
            }
        };

        match phase {
            WorkloadPhase::Starting => {
                self.cache.set(&instance.id, InstanceState::Starting).await;
                InstanceDetails::starting(&instance.id)
            }
            WorkloadPhase::Unexpected(reason) => {
                InstanceDetails::starting_with_error(&instance.id, reason)
            }
            WorkloadPhase::Ready => {
                // Replicas of an HA instance report the same state; ask the Service
                match self.control_plane.info(&self.service_host(instance)).await {
                    Ok(info) => {
                        let details = InstanceDetails::from_info(&instance.id, info);
                        self.cache.set(&instance.id, details.state.clone()).await;
                        details
                    }
                    Err(e) => {
                        debug!("Error getting state from instance {}: {}", instance.id, e);
                        InstanceDetails::starting(&instance.id)
                    }
                }
            }
        }
    }
}
