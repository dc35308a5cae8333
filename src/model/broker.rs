//! Broker credentials and their schema-agent sidecars

use serde::{Deserialize, Serialize};

/// Token used in object names and env for the team-wide broker
pub const TEAM_BROKER_TOKEN: &str = "team-broker";

/// Which broker an agent is attached to
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "camelCase")]
pub enum BrokerRef {
    /// The shared broker every team gets
    TeamDefault,
    /// A team-owned third-party broker, by hashid
    Specific(String),
}

impl BrokerRef {
    /// Identifier reported to the agent and used in labels
    pub fn token(&self) -> &str {
        match self {
            BrokerRef::TeamDefault => TEAM_BROKER_TOKEN,
            BrokerRef::Specific(id) => id,
        }
    }

    pub fn is_team_default(&self) -> bool {
        matches!(self, BrokerRef::TeamDefault)
    }
}

/// A broker agent to run for a team
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerAgent {
    pub team_id: String,
    pub broker: BrokerRef,
}

impl BrokerAgent {
    pub fn new(team_id: impl Into<String>, broker: BrokerRef) -> Self {
        Self {
            team_id: team_id.into(),
            broker,
        }
    }

    /// Object name shared by the agent Pod and Service
    pub fn object_name(&self) -> String {
        format!(
            "mqtt-schema-agent-{}-{}",
            self.team_id.to_lowercase(),
            self.broker.token().to_lowercase()
        )
    }
}

/// Stored broker credential record, as listed by the persistence layer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerCredentials {
    /// Owning team hashid; credentials whose team is gone carry `None`
    #[serde(default)]
    pub team_id: Option<String>,
    pub broker: BrokerRef,
    pub state: String,
}

impl BrokerCredentials {
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }

    /// Agent descriptor, when the credentials still belong to a team
    pub fn agent(&self) -> Option<BrokerAgent> {
        self.team_id
            .as_ref()
            .map(|team| BrokerAgent::new(team.clone(), self.broker.clone()))
    }
}
