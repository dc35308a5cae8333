//! In-memory doubles for driver tests
//!
//! `FakePlatform` keeps objects exactly as they were written, so a second
//! upsert of an identical object compares equal. Failures are injected per
//! kind.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;

use crate::config::DriverOptions;
use crate::controller::control_plane::{
    AgentCommand, ControlPlane, LauncherCommand, ResourceStream,
};
use crate::controller::driver::Driver;
use crate::controller::platform::{ManagedObject, Platform, ResourceKind};
use crate::controller::store::{AuthTokens, CredentialIssuer, MemoryInstanceStore};
use crate::error::{Error, Result};
use crate::model::{BrokerAgent, Instance, InstanceSettings, InstanceState, ResourceTier};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn sample_instance(id: &str, name: &str) -> Instance {
    Instance {
        id: id.to_string(),
        name: name.to_string(),
        team_id: "TeamA1".to_string(),
        tier: ResourceTier {
            cpu: Some(10),
            memory: Some(256),
            container: None,
        },
        url: None,
        state: InstanceState::Running,
        settings: InstanceSettings::default(),
    }
}

pub fn fixed_tokens() -> AuthTokens {
    AuthTokens {
        client_id: "client-id".to_string(),
        client_secret: "client-secret".to_string(),
        token: "project-token".to_string(),
        broker: None,
    }
}

/// Options with fast polling: 1 ms interval, 3 attempts
pub fn test_options() -> DriverOptions {
    DriverOptions {
        registry: "registry.example.com/".to_string(),
        domain: "example.com".to_string(),
        base_url: "https://forge.example.com".to_string(),
        k8s_delay: 1,
        k8s_retries: 3,
        sweep_delay_ms: 1,
        sweep_jitter_ms: 1,
        ..Default::default()
    }
}

fn injected(kind: ResourceKind, name: &str) -> Error {
    Error::KubeError(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("injected failure for {} {}", kind, name),
        reason: "InternalError".to_string(),
        code: 500,
    }))
}

// ---------------------------------------------------------------------------
// FakePlatform
// ---------------------------------------------------------------------------

#[derive(Default)]
struct PlatformState {
    objects: HashMap<(ResourceKind, String), ManagedObject>,
    creates: HashMap<ResourceKind, usize>,
    replaces: HashMap<ResourceKind, usize>,
    deletes: HashMap<ResourceKind, usize>,
    fail_creates: HashSet<ResourceKind>,
    fail_deletes: HashSet<ResourceKind>,
    fail_gets: HashSet<ResourceKind>,
    lingering: HashSet<ResourceKind>,
    endpoints: HashMap<String, Vec<String>>,
}

/// Single-namespace platform held in memory
#[derive(Default)]
pub struct FakePlatform {
    state: Mutex<PlatformState>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object without counting it as a create
    pub fn insert(&self, object: ManagedObject) {
        let key = (object.kind(), object.name().to_string());
        self.state.lock().unwrap().objects.insert(key, object);
    }

    pub fn remove(&self, kind: ResourceKind, name: &str) {
        self.state
            .lock()
            .unwrap()
            .objects
            .remove(&(kind, name.to_string()));
    }

    pub fn contains(&self, kind: ResourceKind, name: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .objects
            .contains_key(&(kind, name.to_string()))
    }

    pub fn object(&self, kind: ResourceKind, name: &str) -> Option<ManagedObject> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(&(kind, name.to_string()))
            .cloned()
    }

    /// Number of live objects of `kind`
    pub fn count(&self, kind: ResourceKind) -> usize {
        self.state
            .lock()
            .unwrap()
            .objects
            .keys()
            .filter(|(k, _)| *k == kind)
            .count()
    }

    pub fn creates(&self, kind: ResourceKind) -> usize {
        *self.state.lock().unwrap().creates.get(&kind).unwrap_or(&0)
    }

    pub fn replaces(&self, kind: ResourceKind) -> usize {
        *self.state.lock().unwrap().replaces.get(&kind).unwrap_or(&0)
    }

    pub fn deletes(&self, kind: ResourceKind) -> usize {
        *self.state.lock().unwrap().deletes.get(&kind).unwrap_or(&0)
    }

    pub fn fail_creates(&self, kind: ResourceKind) {
        self.state.lock().unwrap().fail_creates.insert(kind);
    }

    pub fn fail_deletes(&self, kind: ResourceKind) {
        self.state.lock().unwrap().fail_deletes.insert(kind);
    }

    pub fn fail_gets(&self, kind: ResourceKind) {
        self.state.lock().unwrap().fail_gets.insert(kind);
    }

    /// Accept deletes of `kind` but keep the objects readable
    pub fn linger(&self, kind: ResourceKind) {
        self.state.lock().unwrap().lingering.insert(kind);
    }

    pub fn set_endpoints(&self, service: &str, addresses: &[&str]) {
        self.state.lock().unwrap().endpoints.insert(
            service.to_string(),
            addresses.iter().map(|a| a.to_string()).collect(),
        );
    }
}

#[async_trait]
impl Platform for FakePlatform {
    async fn create(&self, _namespace: &str, object: &ManagedObject) -> Result<ManagedObject> {
        let mut state = self.state.lock().unwrap();
        let kind = object.kind();
        let name = object.name().to_string();
        if state.fail_creates.contains(&kind) {
            return Err(injected(kind, &name));
        }
        if state.objects.contains_key(&(kind, name.clone())) {
            return Err(Error::Conflict {
                kind: kind.as_str(),
                name,
            });
        }
        state.objects.insert((kind, name), object.clone());
        *state.creates.entry(kind).or_default() += 1;
        Ok(object.clone())
    }

    async fn get(&self, _namespace: &str, kind: ResourceKind, name: &str) -> Result<ManagedObject> {
        let state = self.state.lock().unwrap();
        if state.fail_gets.contains(&kind) {
            return Err(injected(kind, name));
        }
        state
            .objects
            .get(&(kind, name.to_string()))
            .cloned()
            .ok_or_else(|| Error::NotFound {
                kind: kind.as_str(),
                name: name.to_string(),
            })
    }

    async fn replace(&self, _namespace: &str, object: &ManagedObject) -> Result<ManagedObject> {
        let mut state = self.state.lock().unwrap();
        let kind = object.kind();
        state
            .objects
            .insert((kind, object.name().to_string()), object.clone());
        *state.replaces.entry(kind).or_default() += 1;
        Ok(object.clone())
    }

    async fn delete(&self, _namespace: &str, kind: ResourceKind, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_deletes.contains(&kind) {
            return Err(injected(kind, name));
        }
        let key = (kind, name.to_string());
        if !state.objects.contains_key(&key) {
            return Err(Error::NotFound {
                kind: kind.as_str(),
                name: name.to_string(),
            });
        }
        if !state.lingering.contains(&kind) {
            state.objects.remove(&key);
        }
        *state.deletes.entry(kind).or_default() += 1;
        Ok(())
    }

    async fn endpoint_addresses(&self, _namespace: &str, service: &str) -> Result<Vec<String>> {
        self.state
            .lock()
            .unwrap()
            .endpoints
            .get(service)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                kind: "Endpoints",
                name: service.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// StubIssuer
// ---------------------------------------------------------------------------

/// Issues a new deterministic token on every call
#[derive(Default)]
pub struct StubIssuer {
    issued: AtomicUsize,
}

impl StubIssuer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialIssuer for StubIssuer {
    async fn refresh_instance_tokens(&self, _instance: &Instance) -> Result<AuthTokens> {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(AuthTokens {
            token: format!("project-token-{n}"),
            ..fixed_tokens()
        })
    }

    async fn refresh_agent_token(&self, _agent: &BrokerAgent) -> Result<String> {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("team-token-{n}"))
    }
}

// ---------------------------------------------------------------------------
// StubControlPlane
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ControlPlaneState {
    info: Option<Value>,
    logs: HashMap<String, Vec<Value>>,
    resources: HashMap<String, Value>,
    frames: HashMap<String, Vec<String>>,
    agent_status: Option<Value>,
    commands: Vec<(String, LauncherCommand)>,
    agent_commands: Vec<(String, AgentCommand)>,
    info_hosts: Vec<String>,
    file_calls: Vec<String>,
}

/// Launcher and agent answers configured per host; unset answers fail
#[derive(Default)]
pub struct StubControlPlane {
    state: Mutex<ControlPlaneState>,
}

impl StubControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_info(&self, info: Value) {
        self.state.lock().unwrap().info = Some(info);
    }

    pub fn set_logs(&self, host: &str, logs: Vec<Value>) {
        self.state.lock().unwrap().logs.insert(host.to_string(), logs);
    }

    pub fn set_resources(&self, host: &str, resources: Value) {
        self.state
            .lock()
            .unwrap()
            .resources
            .insert(host.to_string(), resources);
    }

    pub fn set_frames(&self, host: &str, frames: &[&str]) {
        self.state.lock().unwrap().frames.insert(
            host.to_string(),
            frames.iter().map(|f| f.to_string()).collect(),
        );
    }

    pub fn set_agent_status(&self, status: Value) {
        self.state.lock().unwrap().agent_status = Some(status);
    }

    pub fn commands(&self) -> Vec<(String, LauncherCommand)> {
        self.state.lock().unwrap().commands.clone()
    }

    pub fn agent_commands(&self) -> Vec<(String, AgentCommand)> {
        self.state.lock().unwrap().agent_commands.clone()
    }

    pub fn info_hosts(&self) -> Vec<String> {
        self.state.lock().unwrap().info_hosts.clone()
    }

    pub fn file_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().file_calls.clone()
    }

    fn unreachable(host: &str) -> Error {
        Error::UpstreamUnavailable(format!("{host}: connection refused"))
    }

    fn record_file_call(&self, call: String) {
        self.state.lock().unwrap().file_calls.push(call);
    }
}

#[async_trait]
impl ControlPlane for StubControlPlane {
    async fn info(&self, host: &str) -> Result<Value> {
        let mut state = self.state.lock().unwrap();
        state.info_hosts.push(host.to_string());
        state.info.clone().ok_or_else(|| Self::unreachable(host))
    }

    async fn command(&self, host: &str, command: &LauncherCommand) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .commands
            .push((host.to_string(), command.clone()));
        Ok(())
    }

    async fn logs(&self, host: &str) -> Result<Vec<Value>> {
        self.state
            .lock()
            .unwrap()
            .logs
            .get(host)
            .cloned()
            .ok_or_else(|| Self::unreachable(host))
    }

    async fn resources(&self, host: &str) -> Result<Value> {
        self.state
            .lock()
            .unwrap()
            .resources
            .get(host)
            .cloned()
            .ok_or_else(|| Self::unreachable(host))
    }

    async fn resource_stream(&self, host: &str) -> Result<ResourceStream> {
        let frames = self
            .state
            .lock()
            .unwrap()
            .frames
            .get(host)
            .cloned()
            .ok_or_else(|| Self::unreachable(host))?;
        Ok(Box::pin(stream::iter(
            frames.into_iter().map(|f| Ok(Message::text(f))),
        )))
    }

    async fn agent_status(&self, host: &str) -> Result<Value> {
        self.state
            .lock()
            .unwrap()
            .agent_status
            .clone()
            .ok_or_else(|| Self::unreachable(host))
    }

    async fn agent_command(&self, host: &str, command: AgentCommand) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .agent_commands
            .push((host.to_string(), command));
        Ok(())
    }

    async fn list_files(&self, host: &str, path: &str) -> Result<Value> {
        self.record_file_call(format!("list {host} {path}"));
        Ok(serde_json::json!({ "files": [] }))
    }

    async fn update_file(&self, host: &str, path: &str, _update: &Value) -> Result<()> {
        self.record_file_call(format!("update {host} {path}"));
        Ok(())
    }

    async fn delete_file(&self, host: &str, path: &str) -> Result<()> {
        self.record_file_call(format!("delete {host} {path}"));
        Ok(())
    }

    async fn create_directory(&self, host: &str, path: &str, directory: &str) -> Result<()> {
        self.record_file_call(format!("mkdir {host} {path} {directory}"));
        Ok(())
    }

    async fn upload_file(&self, host: &str, path: &str, contents: Vec<u8>) -> Result<()> {
        self.record_file_call(format!("upload {host} {path} {}", contents.len()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// A driver wired to in-memory doubles, with handles to each of them
pub struct Harness {
    pub driver: Arc<Driver>,
    pub platform: Arc<FakePlatform>,
    pub store: Arc<MemoryInstanceStore>,
    pub issuer: Arc<StubIssuer>,
    pub control_plane: Arc<StubControlPlane>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_options(test_options())
    }

    pub fn with_options(options: DriverOptions) -> Self {
        let platform = Arc::new(FakePlatform::new());
        let store = Arc::new(MemoryInstanceStore::new());
        let issuer = Arc::new(StubIssuer::new());
        let control_plane = Arc::new(StubControlPlane::new());
        let driver = Arc::new(Driver::new(
            platform.clone(),
            store.clone(),
            issuer.clone(),
            control_plane.clone(),
            options,
        ));
        Self {
            driver,
            platform,
            store,
            issuer,
            control_plane,
        }
    }

    /// Persist `instance` and return the stored copy
    pub async fn add(&self, instance: Instance) -> Instance {
        self.store.insert(instance.clone()).await;
        instance
    }

    /// Reload the persisted record
    pub async fn reload(&self, id: &str) -> Instance {
        self.store.instance(id).await.unwrap()
    }
}

/// Upper bound for tests that wait on spawned work
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);
