//! Request and response bodies for the REST API

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
        }
    }
}

/// Body of `POST /api/v1/instances/{id}/command`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommandRequest {
    /// `start`, `stop`, `restart` or `logout`
    pub command: String,
    /// Session token, required for `logout`
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommandResponse {
    pub id: String,
    pub command: String,
}
