//! Warden server wiring.
//!
//! Builds the component graph from configuration and exposes the HTTP
//! surface: submission, status polling, the lifecycle event stream,
//! metrics, and health.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;

use async_trait::async_trait;
use std::sync::Arc;
use warden_core::metrics::WardenMetrics;
use warden_core::traits::{EventSink, RunExecutor};
use warden_core::{WardenConfig, WardenError};
use warden_fetch::Resolver;
use warden_gateway::{BusSink, KvStore, SyscallGateway};
use warden_ingress::IngressService;
use warden_policy::PolicyEngine;
use warden_runtime::Runtime;

/// Sink used when no bus endpoint is configured: events are dropped
/// after tracing, nothing accumulates.
struct NopSink;

#[async_trait]
impl EventSink for NopSink {
    async fn publish(&self, event: serde_json::Value) -> Result<(), WardenError> {
        tracing::debug!(event = %event, "event dropped (no bus configured)");
        Ok(())
    }
}

/// Build the full ingress service from deployment configuration.
#[must_use]
pub fn build_service(config: WardenConfig) -> Arc<IngressService> {
    let metrics = Arc::new(WardenMetrics::new());

    let sink: Arc<dyn EventSink> = match &config.gateway.bus_url {
        Some(url) => Arc::new(BusSink::new(url.clone())),
        None => Arc::new(NopSink),
    };

    let gateway = Arc::new(SyscallGateway::new(
        &config.gateway,
        config.capability_grants(),
        Arc::new(KvStore::new()),
        Arc::clone(&sink),
        Arc::clone(&metrics),
    ));
    let executor: Arc<dyn RunExecutor> =
        Arc::new(Runtime::new(gateway, Arc::clone(&metrics)));
    let policy = PolicyEngine::from_config(&config, Arc::clone(&metrics));
    let resolver = Resolver::new(config.fetch.clone(), Arc::clone(&metrics));

    Arc::new(IngressService::new(
        config, policy, resolver, executor, sink, metrics,
    ))
}
