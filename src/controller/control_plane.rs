//! HTTP bridge to instance launchers and broker agents
//!
//! Every instance runs a launcher next to its runtime, listening on the
//! management port under `/flowforge`. It answers `/info`, accepts
//! `/command`, serves `/logs` and `/resources` (also as a WebSocket) and
//! exposes the static file store under `/files/_/`. Broker agents expose a
//! small status/command API on their own port.
//!
//! Callers address a launcher or agent by host only; the bridge owns ports
//! and paths.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{future, Stream, StreamExt, TryStreamExt};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, instrument};
use url::Url;

use crate::controller::resources::{AGENT_PORT, LAUNCHER_PORT};
use crate::error::{Error, Result};

/// Live resource frames from one or more launchers
pub type ResourceStream = Pin<Box<dyn Stream<Item = Result<Message>> + Send>>;

/// Body of a launcher `/command` request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LauncherCommand {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl LauncherCommand {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            token: None,
        }
    }

    pub fn start() -> Self {
        Self::new("start")
    }

    pub fn stop() -> Self {
        Self::new("stop")
    }

    pub fn restart() -> Self {
        Self::new("restart")
    }

    /// Revoke a user session token
    pub fn logout(token: impl Into<String>) -> Self {
        Self {
            cmd: "logout".to_string(),
            token: Some(token.into()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgentCommand {
    Start,
    Stop,
}

impl AgentCommand {
    /// `restart` maps onto start; unknown commands are ignored
    pub fn parse(command: &str) -> Option<Self> {
        match command {
            "start" | "restart" => Some(AgentCommand::Start),
            "stop" => Some(AgentCommand::Stop),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentCommand::Start => "start",
            AgentCommand::Stop => "stop",
        }
    }
}

#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Launcher status, including its reported `state`
    async fn info(&self, host: &str) -> Result<Value>;

    async fn command(&self, host: &str, command: &LauncherCommand) -> Result<()>;

    async fn logs(&self, host: &str) -> Result<Vec<Value>>;

    async fn resources(&self, host: &str) -> Result<Value>;

    async fn resource_stream(&self, host: &str) -> Result<ResourceStream>;

    async fn agent_status(&self, host: &str) -> Result<Value>;

    async fn agent_command(&self, host: &str, command: AgentCommand) -> Result<()>;

    async fn list_files(&self, host: &str, path: &str) -> Result<Value>;

    async fn update_file(&self, host: &str, path: &str, update: &Value) -> Result<()>;

    async fn delete_file(&self, host: &str, path: &str) -> Result<()>;

    async fn create_directory(&self, host: &str, path: &str, directory: &str) -> Result<()>;

    async fn upload_file(&self, host: &str, path: &str, contents: Vec<u8>) -> Result<()>;
}

/// [`ControlPlane`] over plain HTTP
#[derive(Clone, Debug)]
pub struct HttpControlPlane {
    client: Client,
    launcher_port: u16,
    agent_port: u16,
    request_timeout: Duration,
    logs_timeout: Duration,
}

impl HttpControlPlane {
    pub fn new(request_timeout: Duration, logs_timeout: Duration) -> Result<Self> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            launcher_port: LAUNCHER_PORT as u16,
            agent_port: AGENT_PORT as u16,
            request_timeout,
            logs_timeout,
        })
    }

    /// Override the launcher and agent ports
    pub fn with_ports(mut self, launcher_port: u16, agent_port: u16) -> Self {
        self.launcher_port = launcher_port;
        self.agent_port = agent_port;
        self
    }

    fn launcher_url(&self, host: &str, path: &str) -> String {
        format!("http://{}:{}/flowforge/{}", host, self.launcher_port, path)
    }

    fn agent_url(&self, host: &str, path: &str) -> String {
        format!("http://{}:{}/api/v1/{}", host, self.agent_port, path)
    }

    /// File store URL; the path is encoded as a single segment
    pub fn file_url(&self, host: &str, path: &str) -> Result<Url> {
        let base = self.launcher_url(host, "files/_/");
        let mut url = Url::parse(&base)
            .map_err(|e| Error::ConfigError(format!("invalid launcher url {base}: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| Error::ConfigError(format!("launcher url {base} cannot be a base")))?
            .pop_if_empty()
            .push(path);
        Ok(url)
    }
}

fn unavailable(url: &str, err: reqwest::Error) -> Error {
    Error::UpstreamUnavailable(format!("{url}: {err}"))
}

async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(Error::UpstreamStatus {
            status: status.as_u16(),
            url: response.url().to_string(),
        })
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    #[instrument(skip(self))]
    async fn info(&self, host: &str) -> Result<Value> {
        let url = self.launcher_url(host, "info");
        let response = self
            .client
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| unavailable(&url, e))?;
        Ok(check(response).await?.json().await?)
    }

    #[instrument(skip(self), fields(cmd = %command.cmd))]
    async fn command(&self, host: &str, command: &LauncherCommand) -> Result<()> {
        let url = self.launcher_url(host, "command");
        let response = self
            .client
            .post(&url)
            .json(command)
            .send()
            .await
            .map_err(|e| unavailable(&url, e))?;
        check(response).await?;
        debug!("Sent {} to {}", command.cmd, host);
        Ok(())
    }

    async fn logs(&self, host: &str) -> Result<Vec<Value>> {
        let url = self.launcher_url(host, "logs");
        let response = self
            .client
            .get(&url)
            .timeout(self.logs_timeout)
            .send()
            .await
            .map_err(|e| unavailable(&url, e))?;
        Ok(check(response).await?.json().await?)
    }

    async fn resources(&self, host: &str) -> Result<Value> {
        let url = self.launcher_url(host, "resources");
        let response = self
            .client
            .get(&url)
            .timeout(self.logs_timeout)
            .send()
            .await
            .map_err(|e| unavailable(&url, e))?;
        Ok(check(response).await?.json().await?)
    }

    #[instrument(skip(self))]
    async fn resource_stream(&self, host: &str) -> Result<ResourceStream> {
        let url = format!("ws://{}:{}/flowforge/resources", host, self.launcher_port);
        let (socket, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("{url}: {e}")))?;
        debug!("Connected resource stream {}", url);

        let frames = socket
            .map_err(move |e| Error::UpstreamUnavailable(format!("resource stream: {e}")))
            .try_filter(|m| future::ready(m.is_text() || m.is_binary()));
        Ok(Box::pin(frames))
    }

    async fn agent_status(&self, host: &str) -> Result<Value> {
        let url = self.agent_url(host, "status");
        let response = self
            .client
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| unavailable(&url, e))?;
        Ok(check(response).await?.json().await?)
    }

    #[instrument(skip(self), fields(cmd = command.as_str()))]
    async fn agent_command(&self, host: &str, command: AgentCommand) -> Result<()> {
        let url = self.agent_url(host, &format!("commands/{}", command.as_str()));
        let response = self
            .client
            .post(&url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| unavailable(&url, e))?;
        check(response).await?;
        Ok(())
    }

    async fn list_files(&self, host: &str, path: &str) -> Result<Value> {
        let url = self.file_url(host, path)?;
        let response = self
            .client
            .get(url.clone())
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| unavailable(url.as_str(), e))?;
        Ok(check(response).await?.json().await?)
    }

    async fn update_file(&self, host: &str, path: &str, update: &Value) -> Result<()> {
        let url = self.file_url(host, path)?;
        let response = self
            .client
            .put(url.clone())
            .json(update)
            .send()
            .await
            .map_err(|e| unavailable(url.as_str(), e))?;
        check(response).await?;
        Ok(())
    }

    async fn delete_file(&self, host: &str, path: &str) -> Result<()> {
        let url = self.file_url(host, path)?;
        let response = self
            .client
            .delete(url.clone())
            .send()
            .await
            .map_err(|e| unavailable(url.as_str(), e))?;
        check(response).await?;
        Ok(())
    }

    async fn create_directory(&self, host: &str, path: &str, directory: &str) -> Result<()> {
        let url = self.file_url(host, path)?;
        let response = self
            .client
            .post(url.clone())
            .json(&serde_json::json!({ "path": directory }))
            .send()
            .await
            .map_err(|e| unavailable(url.as_str(), e))?;
        check(response).await?;
        Ok(())
    }

    async fn upload_file(&self, host: &str, path: &str, contents: Vec<u8>) -> Result<()> {
        let url = self.file_url(host, path)?;
        let part = reqwest::multipart::Part::bytes(contents).file_name(path.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);
        let response = self
            .client
            .post(url.clone())
            .multipart(form)
            .send()
            .await
            .map_err(|e| unavailable(url.as_str(), e))?;
        check(response).await?;
        Ok(())
    }
}
