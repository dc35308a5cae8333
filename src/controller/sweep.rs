//! Startup reconciliation
//!
//! After a driver restart the cache is empty and any workload may have
//! disappeared while nobody was watching. [`Driver::init`] seeds `unknown`
//! entries and schedules one delayed pass: suspended instances are left
//! alone, instances whose workload is missing are re-provisioned, and
//! running broker agents without a pod are recreated.

use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::controller::driver::Driver;
use crate::controller::platform::ResourceKind;
use crate::model::{InstanceState, InstanceSummary, WorkloadKind};

#[cfg(feature = "metrics")]
use crate::controller::metrics;

/// What one reconciliation pass did
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    /// Instances whose workload was found
    pub present: Vec<String>,
    pub suspended: Vec<String>,
    pub recreated: Vec<String>,
    /// Instance id and the error that stopped its check or recreation
    pub failed: Vec<(String, String)>,
    /// Broker agent objects that were provisioned
    pub agents: Vec<String>,
}

impl Driver {
    /// Seed `unknown` for every instance without a cache entry
    pub(crate) async fn seed_cache(&self, instances: &[InstanceSummary]) -> usize {
        let mut seeded = 0;
        for instance in instances {
            if self.cache.seed(&instance.id, InstanceState::Unknown).await {
                seeded += 1;
            }
        }
        seeded
    }

    /// Run one reconciliation pass over `instances` and broker agents
    ///
    /// Per-instance failures are recorded and never abort the pass.
    #[instrument(skip(self, instances), fields(count = instances.len()))]
    pub async fn sweep(&self, instances: &[InstanceSummary]) -> SweepReport {
        debug!("Restarting instances");
        let mut report = SweepReport::default();
        let namespace = self.namespace();

        for summary in instances {
            if summary.state.is_suspended() {
                self.cache.set(&summary.id, InstanceState::Suspended).await;
                report.suspended.push(summary.id.clone());
                continue;
            }

            let kind = match summary.workload_kind.unwrap_or_default() {
                WorkloadKind::Deployment => ResourceKind::Deployment,
                WorkloadKind::Pod => ResourceKind::Pod,
            };
            let name = summary.safe_name();
            info!("Testing {} {} ({}) in {} exists", kind, summary.id, name, namespace);

            match self.platform.get(namespace, kind, &name).await {
                Ok(_) => {
                    info!("{} {} in {} found", kind, summary.id, namespace);
                    report.present.push(summary.id.clone());
                }
                Err(e) if e.is_not_found() => {
                    info!("Instance {} - recreating deployment", summary.id);
                    let recreated = match self.store.load_instance(&summary.id).await {
                        Ok(instance) => self.provision(&instance).await,
                        Err(e) => Err(e),
                    };
                    match recreated {
                        Ok(()) => {
                            #[cfg(feature = "metrics")]
                            metrics::inc_sweep_recreated();
                            report.recreated.push(summary.id.clone());
                        }
                        Err(e) => {
                            error!("Instance {} - error resuming instance: {}", summary.id, e);
                            report.failed.push((summary.id.clone(), e.to_string()));
                        }
                    }
                }
                Err(e) => {
                    error!(
                        "Error reading {} for instance '{}' {}: {}",
                        kind, name, summary.id, e
                    );
                    report.failed.push((summary.id.clone(), e.to_string()));
                }
            }
        }

        self.sweep_broker_agents(&mut report).await;

        info!(
            "Reconciliation pass complete: {} present, {} recreated, {} suspended, {} failed",
            report.present.len(),
            report.recreated.len(),
            report.suspended.len(),
            report.failed.len()
        );
        report
    }

    async fn sweep_broker_agents(&self, report: &mut SweepReport) {
        let brokers = match self.store.list_broker_credentials().await {
            Ok(brokers) => brokers,
            Err(e) => {
                warn!("Could not list broker credentials: {}", e);
                return;
            }
        };

        for credentials in brokers.iter().filter(|b| b.is_running()) {
            let Some(agent) = credentials.agent() else {
                continue;
            };
            let name = agent.object_name();
            info!(
                "Testing broker agent {} in {} pod exists",
                agent.broker.token(),
                self.namespace()
            );
            match self
                .platform
                .get(self.namespace(), ResourceKind::Pod, &name)
                .await
            {
                Ok(_) => info!("Broker agent pod {} found", name),
                Err(e) if e.is_not_found() => {
                    debug!("Broker agent {} - recreating pod", name);
                    self.start_broker_agent(&agent).await;
                    report.agents.push(name);
                }
                Err(e) => warn!("Error reading broker agent pod {}: {}", name, e),
            }
        }
    }
}
