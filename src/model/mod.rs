//! Domain model for the FlowForge Kubernetes driver
//!
//! Instances, their resource tiers and settings, and broker agents.

pub mod broker;
pub mod instance;


pub use broker::{BrokerAgent, BrokerCredentials, BrokerRef, TEAM_BROKER_TOKEN};
pub use instance::{
    safe_name, HaSettings, Instance, InstanceSettings, InstanceState, InstanceSummary,
    ResourceTier, WorkloadKind, NUMERIC_NAME_PREFIX,
};
