//! Controller module for FlowForge project instances
//!
//! The [`Driver`] provisions, supervises and tears down the Kubernetes
//! resources behind each instance, and bridges to the launcher running
//! inside it.

pub mod annotations;
mod broker_agent;
pub mod control_plane;
mod driver;
mod lifecycle;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod platform;
pub mod poller;
pub mod resources;
#[cfg(test)]
mod resources_test;
pub mod state_cache;
pub mod store;
mod sweep;
pub mod teardown;
#[cfg(test)]
pub(crate) mod testing;
pub mod upsert;

pub use control_plane::{AgentCommand, ControlPlane, HttpControlPlane, LauncherCommand};
pub use driver::{stack_schema, Driver, LauncherSettings, ResourceSnapshot};
pub use lifecycle::InstanceDetails;
pub use platform::{KubePlatform, ManagedObject, Platform, ResourceKind};
pub use resources::DesiredResourceSet;
pub use state_cache::{CacheEntry, InMemoryStateCache, StateCache};
pub use store::{CredentialIssuer, InstanceStore, Inventory, LocalCredentialIssuer, MemoryInstanceStore};
pub use sweep::SweepReport;
pub use teardown::{StepOutcome, TeardownReport};
