//! Event sink implementations.

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tracing::warn;
use warden_core::{EventSink, WardenError};

/// Sink that posts events to the durable bus endpoint
pub struct BusSink {
    url: String,
    client: reqwest::Client,
}

impl BusSink {
    /// Create a sink posting to `url`
    #[must_use]
    pub fn new(url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { url, client }
    }
}

#[async_trait]
impl EventSink for BusSink {
    async fn publish(&self, event: serde_json::Value) -> Result<(), WardenError> {
        let response = self
            .client
            .post(&self.url)
            .json(&event)
            .send()
            .await
            .map_err(|err| {
                warn!(error = %err, "event bus unreachable");
                WardenError::Transient {
                    collaborator: "event_sink".to_string(),
                }
            })?;
        if !response.status().is_success() {
            warn!(status = %response.status(), "event bus rejected event");
            return Err(WardenError::Transient {
                collaborator: "event_sink".to_string(),
            });
        }
        Ok(())
    }
}

/// In-memory sink for tests and dry deployments
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<serde_json::Value>>,
}

impl MemorySink {
    /// Create an empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything published so far
    #[must_use]
    pub fn events(&self) -> Vec<serde_json::Value> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of events published
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether nothing was published
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn publish(&self, event: serde_json::Value) -> Result<(), WardenError> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
        Ok(())
    }
}
