//! Persistence and credential boundaries
//!
//! The platform database owns instance records and broker credentials; the
//! driver only reads them and writes back url, state and workload kind.
//! Token issuance is likewise external. [`MemoryInstanceStore`] and
//! [`LocalCredentialIssuer`] back the standalone binary.

use std::collections::BTreeMap;

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{
    BrokerAgent, BrokerCredentials, Instance, InstanceState, InstanceSummary, WorkloadKind,
};

/// Broker connection details issued alongside instance tokens
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerAuth {
    pub url: String,
    pub username: String,
    pub password: String,
}

/// Credentials minted for one provisioning pass
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokens {
    pub client_id: String,
    pub client_secret: String,
    pub token: String,
    #[serde(default)]
    pub broker: Option<BrokerAuth>,
}

#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Every known instance, minimal projection
    async fn list_instances(&self) -> Result<Vec<InstanceSummary>>;

    async fn load_instance(&self, id: &str) -> Result<Instance>;

    async fn save_url(&self, id: &str, url: &str) -> Result<()>;

    async fn save_state(&self, id: &str, state: InstanceState) -> Result<()>;

    async fn save_workload_kind(&self, id: &str, kind: WorkloadKind) -> Result<()>;

    async fn list_broker_credentials(&self) -> Result<Vec<BrokerCredentials>>;
}

#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    /// Mint fresh instance credentials, invalidating the previous ones
    async fn refresh_instance_tokens(&self, instance: &Instance) -> Result<AuthTokens>;

    /// Mint a fresh team token for a broker agent
    async fn refresh_agent_token(&self, agent: &BrokerAgent) -> Result<String>;
}

/// Seed file for [`MemoryInstanceStore`]
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Inventory {
    pub instances: Vec<Instance>,
    pub brokers: Vec<BrokerCredentials>,
}

#[derive(Debug, Default)]
pub struct MemoryInstanceStore {
    instances: RwLock<BTreeMap<String, Instance>>,
    brokers: RwLock<Vec<BrokerCredentials>>,
}

impl MemoryInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_inventory(inventory: Inventory) -> Self {
        let instances = inventory
            .instances
            .into_iter()
            .map(|i| (i.id.clone(), i))
            .collect();
        Self {
            instances: RwLock::new(instances),
            brokers: RwLock::new(inventory.brokers),
        }
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let inventory: Inventory = serde_yaml::from_str(raw)?;
        Ok(Self::from_inventory(inventory))
    }

    pub async fn insert(&self, instance: Instance) {
        self.instances
            .write()
            .await
            .insert(instance.id.clone(), instance);
    }

    pub async fn add_broker(&self, credentials: BrokerCredentials) {
        self.brokers.write().await.push(credentials);
    }

    /// Snapshot of a stored record
    pub async fn instance(&self, id: &str) -> Option<Instance> {
        self.instances.read().await.get(id).cloned()
    }

    async fn update<F>(&self, id: &str, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Instance) + Send,
    {
        let mut instances = self.instances.write().await;
        let instance = instances
            .get_mut(id)
            .ok_or_else(|| Error::StoreError(format!("instance {id} not found")))?;
        apply(instance);
        Ok(())
    }
}

#[async_trait]
impl InstanceStore for MemoryInstanceStore {
    async fn list_instances(&self) -> Result<Vec<InstanceSummary>> {
        Ok(self
            .instances
            .read()
            .await
            .values()
            .map(Instance::summary)
            .collect())
    }

    async fn load_instance(&self, id: &str) -> Result<Instance> {
        self.instance(id)
            .await
            .ok_or_else(|| Error::NotFound {
                kind: "Instance",
                name: id.to_string(),
            })
    }

    async fn save_url(&self, id: &str, url: &str) -> Result<()> {
        self.update(id, |i| i.url = Some(url.to_string())).await
    }

    async fn save_state(&self, id: &str, state: InstanceState) -> Result<()> {
        debug!(instance = id, state = %state, "Persisting state");
        self.update(id, |i| i.state = state).await
    }

    async fn save_workload_kind(&self, id: &str, kind: WorkloadKind) -> Result<()> {
        self.update(id, |i| i.settings.workload_kind = Some(kind))
            .await
    }

    async fn list_broker_credentials(&self) -> Result<Vec<BrokerCredentials>> {
        Ok(self.brokers.read().await.clone())
    }
}

/// Issues random credentials without a backing platform
#[derive(Clone, Debug, Default)]
pub struct LocalCredentialIssuer {
    broker_url: Option<String>,
}

impl LocalCredentialIssuer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also hand out broker credentials pointing at `url`
    pub fn with_broker(url: impl Into<String>) -> Self {
        Self {
            broker_url: Some(url.into()),
        }
    }
}

fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[async_trait]
impl CredentialIssuer for LocalCredentialIssuer {
    async fn refresh_instance_tokens(&self, instance: &Instance) -> Result<AuthTokens> {
        let broker = self.broker_url.as_ref().map(|url| BrokerAuth {
            url: url.clone(),
            username: format!("instance:{}", instance.id),
            password: random_token(32),
        });
        Ok(AuthTokens {
            client_id: format!("ffnr_{}", random_token(32)),
            client_secret: random_token(48),
            token: format!("ffpt_{}", random_token(32)),
            broker,
        })
    }

    async fn refresh_agent_token(&self, _agent: &BrokerAgent) -> Result<String> {
        Ok(format!("fftt_{}", random_token(32)))
    }
}
