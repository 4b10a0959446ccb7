//! External decision service client.
//!
//! Posts the run's identity facts and expects `{"result": bool}` back.
//! Unreachability or a malformed reply is a transient error; the engine
//! treats that fail-closed when the stage is required for an allow.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;
use warden_core::{WardenError, WardenResult};

/// Input document sent to the decision service
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionInput {
    /// Logical module name
    pub module: String,
    /// Requested capability names
    pub caps: Vec<String>,
    /// Artifact checksum, hex
    pub checksum: String,
    /// Verified signer identity, when signature verification ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signer: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DecisionReply {
    result: bool,
}

/// Client for the external decision service
pub struct DecisionClient {
    url: String,
    client: reqwest::Client,
}

impl DecisionClient {
    /// Create a client for the given decision endpoint
    #[must_use]
    pub fn new(url: String, timeout_ms: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { url, client }
    }

    /// Ask the service whether the run is allowed.
    ///
    /// # Errors
    ///
    /// Returns a transient error on transport failure, a non-200 status,
    /// or an unparseable reply
    pub async fn decide(&self, input: &DecisionInput) -> WardenResult<bool> {
        let body = serde_json::json!({ "input": input });
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                warn!(error = %err, "decision service unreachable");
                transient()
            })?;
        if !response.status().is_success() {
            warn!(status = %response.status(), "decision service non-success");
            return Err(transient());
        }
        let reply: DecisionReply = response.json().await.map_err(|err| {
            warn!(error = %err, "decision service reply unparseable");
            transient()
        })?;
        Ok(reply.result)
    }
}

fn transient() -> WardenError {
    WardenError::Transient {
        collaborator: "decision_service".to_string(),
    }
}
