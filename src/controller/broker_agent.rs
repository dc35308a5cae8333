//! MQTT schema agents
//!
//! Each running broker gets a small agent Pod plus a Service in front of it.
//! None of these operations propagate errors: agents are auxiliary and the
//! next sweep recreates a missing one.

use serde_json::{json, Value};
use tracing::{debug, error, info, instrument, warn};

use crate::controller::control_plane::AgentCommand;
use crate::controller::driver::Driver;
use crate::controller::platform::{ManagedObject, ResourceKind};
use crate::controller::poller::wait_for_presence;
use crate::controller::resources::{build_agent_pod, build_agent_service};
use crate::controller::upsert::{upsert, OnConflict};
use crate::error::Result;
use crate::model::BrokerAgent;

impl Driver {
    fn agent_host(&self, agent: &BrokerAgent) -> String {
        format!("{}.{}", agent.object_name(), self.namespace())
    }

    /// Provision the agent Pod and Service; failures are logged
    #[instrument(skip(self, agent), fields(team = %agent.team_id, broker = agent.broker.token()))]
    pub async fn start_broker_agent(&self, agent: &BrokerAgent) {
        info!(
            "Starting MQTT schema agent {} for {}",
            agent.broker.token(),
            agent.team_id
        );
        if let Err(e) = self.provision_broker_agent(agent).await {
            error!(
                "Error creating MQTT schema agent {}: {}",
                agent.object_name(),
                e
            );
        }
    }

    async fn provision_broker_agent(&self, agent: &BrokerAgent) -> Result<()> {
        let namespace = self.namespace();
        let policy = self.options.poll_policy();
        let platform = self.platform.as_ref();

        let token = self.credentials.refresh_agent_token(agent).await?;
        let pod = ManagedObject::Pod(build_agent_pod(agent, &self.options, &token));
        let service = ManagedObject::Service(build_agent_service(agent, &self.options));

        upsert(platform, namespace, &pod, OnConflict::Keep).await?;
        wait_for_presence(platform, namespace, ResourceKind::Pod, pod.name(), policy).await?;
        upsert(platform, namespace, &service, OnConflict::Keep).await?;
        wait_for_presence(
            platform,
            namespace,
            ResourceKind::Service,
            service.name(),
            policy,
        )
        .await?;
        Ok(())
    }

    /// Delete the agent Service, then its Pod
    #[instrument(skip(self, agent), fields(team = %agent.team_id, broker = agent.broker.token()))]
    pub async fn stop_broker_agent(&self, agent: &BrokerAgent) {
        let name = agent.object_name();
        for kind in [ResourceKind::Service, ResourceKind::Pod] {
            match self.platform.delete(self.namespace(), kind, &name).await {
                Ok(()) => debug!("Deleted {} {}", kind, name),
                Err(e) if e.is_not_found() => {}
                Err(e) => error!(
                    "Error deleting MQTT agent {} {}: {}",
                    kind,
                    agent.broker.token(),
                    e
                ),
            }
        }
    }

    /// Agent status, or an `error_getting_status` object
    pub async fn broker_agent_state(&self, agent: &BrokerAgent) -> Value {
        match self.control_plane.agent_status(&self.agent_host(agent)).await {
            Ok(status) => status,
            Err(e) => json!({
                "error": "error_getting_status",
                "message": e.to_string(),
            }),
        }
    }

    /// Forward `start`, `restart` or `stop`; other commands are ignored
    pub async fn send_broker_agent_command(&self, agent: &BrokerAgent, command: &str) {
        let Some(command) = AgentCommand::parse(command) else {
            debug!("Ignoring unknown agent command {:?}", command);
            return;
        };
        if let Err(e) = self
            .control_plane
            .agent_command(&self.agent_host(agent), command)
            .await
        {
            warn!(
                "MQTT agent {} did not accept {}: {}",
                agent.object_name(),
                command.as_str(),
                e
            );
        }
    }
}
