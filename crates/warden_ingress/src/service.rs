//! The ingress service.

use crate::canary;
use crate::events::{EventBroadcaster, RunEvent, RunEventKind};
use crate::idempotency::IdempotencyStore;
use crate::runs::RunTable;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{info, warn};
use warden_core::capability::CapabilitySet;
use warden_core::error::ErrorKind;
use warden_core::metrics::WardenMetrics;
use warden_core::traits::{EventSink, RunExecutor};
use warden_core::{RunId, RunMode, RunRequest, RunState, RunStatus, WardenConfig, WardenError};
use warden_fetch::{ModuleLocator, Resolver};
use warden_policy::PolicyEngine;

/// Reply to a submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// The run id (of the cached run, when served from the cache)
    pub run_id: RunId,
    /// Admission mode
    pub mode: RunMode,
    /// Whether the request was accepted
    pub accepted: bool,
    /// Rejection reason, when not accepted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// The ingress API: submit, status, event stream.
///
/// All stores are owned here and injected at construction; nothing is a
/// process global. The accept path never blocks on execution: live work
/// runs on an independent task behind the concurrency semaphore.
pub struct IngressService {
    config: WardenConfig,
    policy: PolicyEngine,
    resolver: Resolver,
    executor: Arc<dyn RunExecutor>,
    runs: Arc<RunTable>,
    idempotency: Arc<IdempotencyStore>,
    broadcaster: EventBroadcaster,
    sink: Arc<dyn EventSink>,
    metrics: Arc<WardenMetrics>,
    semaphore: Arc<Semaphore>,
    waiting: AtomicUsize,
}

impl IngressService {
    /// Wire up the service
    #[must_use]
    pub fn new(
        config: WardenConfig,
        policy: PolicyEngine,
        resolver: Resolver,
        executor: Arc<dyn RunExecutor>,
        sink: Arc<dyn EventSink>,
        metrics: Arc<WardenMetrics>,
    ) -> Self {
        let runs = Arc::new(RunTable::new(Duration::from_secs(
            config.ingress.run_ttl_secs,
        )));
        let idempotency = Arc::new(IdempotencyStore::new(Duration::from_secs(
            config.ingress.idempotency_ttl_secs,
        )));
        let semaphore = Arc::new(Semaphore::new(config.ingress.max_concurrent.max(1)));
        Self {
            config,
            policy,
            resolver,
            executor,
            runs,
            idempotency,
            broadcaster: EventBroadcaster::default(),
            sink,
            metrics,
            semaphore,
            waiting: AtomicUsize::new(0),
        }
    }

    /// Submit a run. Returns immediately; live execution proceeds
    /// asynchronously and later failures surface only via status and the
    /// event stream.
    ///
    /// # Errors
    ///
    /// Returns a validation error for malformed requests; no run is
    /// created in that case
    pub async fn submit(self: &Arc<Self>, request: RunRequest) -> Result<SubmitResponse, WardenError> {
        if !self.config.enabled {
            return Ok(SubmitResponse {
                run_id: RunId::new(),
                mode: RunMode::Frozen,
                accepted: false,
                reason: Some("disabled".to_string()),
            });
        }

        self.validate(&request)?;
        let key = IdempotencyStore::key_for(&request);

        // retry cache: identical requests inside the TTL get the first
        // terminal result back without re-executing
        if let Some(cached) = self.idempotency.get(&key) {
            self.runs.insert(cached.clone());
            self.metrics.runs_total.inc("cached");
            return Ok(SubmitResponse {
                run_id: cached.run_id,
                mode: RunMode::Cached,
                accepted: true,
                reason: None,
            });
        }

        // emergency freeze overrides everything else: accepted, never
        // executed, and deliberately not cached for retry
        if self.config.frozen {
            let mut state = RunState::accepted(RunId::new(), request, RunMode::Frozen);
            let run_id = state.run_id;
            let _ = state.finish(None, warden_core::limits::Usage::empty());
            self.runs.insert(state);
            self.publish(RunEvent::new(run_id, RunEventKind::Accepted, mode_detail("frozen")));
            self.metrics.runs_total.inc("frozen");
            return Ok(SubmitResponse {
                run_id,
                mode: RunMode::Frozen,
                accepted: true,
                reason: None,
            });
        }

        if !canary::admit(&key, self.config.canary_fraction) {
            return Ok(self.submit_dry_run(request, &key));
        }
        self.submit_live(request, key)
    }

    /// Current view of a run, or `None` when unknown or expired
    #[must_use]
    pub fn get_status(&self, run_id: RunId) -> Option<RunState> {
        self.runs.get(run_id)
    }

    /// Subscribe to lifecycle events from this point on
    #[must_use]
    pub fn event_stream(&self) -> tokio::sync::broadcast::Receiver<RunEvent> {
        self.broadcaster.subscribe()
    }

    /// The metrics registry this service records into
    #[must_use]
    pub fn metrics(&self) -> &Arc<WardenMetrics> {
        &self.metrics
    }

    fn validate(&self, request: &RunRequest) -> Result<(), WardenError> {
        ModuleLocator::parse(
            &request.locator,
            &request.checksum,
            request.signature_url.clone(),
        )?;
        CapabilitySet::from_names(&request.capabilities).map_err(|reason| {
            WardenError::Validation {
                field: "capabilities".to_string(),
                reason,
            }
        })?;
        Ok(())
    }

    fn submit_dry_run(self: &Arc<Self>, request: RunRequest, key: &str) -> SubmitResponse {
        let decision = self.policy.evaluate_request(&request);
        let state = RunState::accepted(RunId::new(), request, RunMode::DryRun);
        let run_id = state.run_id;
        self.runs.insert(state);
        self.publish(RunEvent::new(run_id, RunEventKind::Accepted, mode_detail("dry-run")));

        if decision.allowed {
            // a canary miss is a no-op execution: started, then nothing
            // further on the stream
            self.publish(RunEvent::new(run_id, RunEventKind::Started, mode_detail("dry-run")));
            if let Some(state) = self.runs.update(run_id, |s| {
                let _ = s.finish(None, warden_core::limits::Usage::empty());
            }) {
                self.idempotency.put(key, state);
            }
            self.metrics.runs_total.inc("dryrun");
        } else {
            self.finish_error(
                run_id,
                key,
                ErrorKind::PolicyDenied,
                &decision.reason,
                warden_core::limits::Usage::empty(),
            );
            self.metrics.runs_total.inc("denied");
        }

        SubmitResponse {
            run_id,
            mode: RunMode::DryRun,
            accepted: true,
            reason: None,
        }
    }

    fn submit_live(self: &Arc<Self>, request: RunRequest, key: String) -> Result<SubmitResponse, WardenError> {
        // bounded queue: saturated semaphore plus a full wait queue means
        // reject now, never queue unboundedly
        if self.semaphore.available_permits() == 0
            && self.waiting.load(Ordering::Acquire) >= self.config.ingress.queue_depth
        {
            self.metrics.backpressure_rejects.inc();
            return Ok(SubmitResponse {
                run_id: RunId::new(),
                mode: RunMode::Live,
                accepted: false,
                reason: Some("backpressure".to_string()),
            });
        }

        let state = RunState::accepted(RunId::new(), request, RunMode::Live);
        let run_id = state.run_id;
        self.runs.insert(state);
        self.publish(RunEvent::new(run_id, RunEventKind::Accepted, mode_detail("live")));

        let service = Arc::clone(self);
        tokio::spawn(async move {
            service.run_live(run_id, key).await;
        });

        Ok(SubmitResponse {
            run_id,
            mode: RunMode::Live,
            accepted: true,
            reason: None,
        })
    }

    async fn run_live(self: Arc<Self>, run_id: RunId, key: String) {
        self.waiting.fetch_add(1, Ordering::AcqRel);
        let permit = Arc::clone(&self.semaphore).acquire_owned().await;
        self.waiting.fetch_sub(1, Ordering::AcqRel);
        let Ok(_permit) = permit else {
            return;
        };

        let Some(state) = self.runs.get(run_id) else {
            return;
        };
        let request = state.request.clone();

        // request-time policy stages; a deny precedes any fetch or sandbox
        let decision = self.policy.evaluate_request(&request);
        if !decision.allowed {
            self.finish_error(
                run_id,
                &key,
                ErrorKind::PolicyDenied,
                &decision.reason,
                warden_core::limits::Usage::empty(),
            );
            self.metrics.runs_total.inc("denied");
            return;
        }

        let locator = match ModuleLocator::parse(
            &request.locator,
            &request.checksum,
            request.signature_url.clone(),
        ) {
            Ok(locator) => locator,
            Err(err) => {
                self.finish_error(
                    run_id,
                    &key,
                    err.kind(),
                    &err.public_reason(),
                    warden_core::limits::Usage::empty(),
                );
                self.metrics.runs_total.inc("error");
                return;
            }
        };

        let artifact = match self.resolver.resolve(&locator).await {
            Ok(artifact) => artifact,
            Err(err) => {
                // fetch or verify failure: no sandbox was ever created
                self.finish_error(
                    run_id,
                    &key,
                    err.kind(),
                    &err.public_reason(),
                    warden_core::limits::Usage::empty(),
                );
                self.metrics.runs_total.inc("error");
                return;
            }
        };

        // artifact-time policy stages: signature, decision service
        let decision = self.policy.evaluate_artifact(&request, &artifact).await;
        if !decision.allowed {
            self.finish_error(
                run_id,
                &key,
                ErrorKind::PolicyDenied,
                &decision.reason,
                warden_core::limits::Usage::empty(),
            );
            self.metrics.runs_total.inc("denied");
            return;
        }

        let Some(running) = self.runs.update(run_id, |s| {
            let _ = s.advance(RunStatus::Running);
        }) else {
            return;
        };
        self.publish(RunEvent::new(run_id, RunEventKind::Started, mode_detail("live")));

        match self
            .executor
            .execute(&running, &artifact.bytes, &decision.capabilities, &decision.limits)
            .await
        {
            Ok(outcome) => {
                for record in &outcome.syscalls {
                    self.publish(RunEvent::new(
                        run_id,
                        RunEventKind::Syscall,
                        Some(serde_json::json!({ "kind": record.kind, "ok": record.ok })),
                    ));
                }
                let result = outcome.result.clone();
                if let Some(state) = self.runs.update(run_id, |s| {
                    let _ = s.finish(outcome.result.clone(), outcome.usage);
                }) {
                    self.idempotency.put(&key, state);
                }
                self.publish(RunEvent::new(
                    run_id,
                    RunEventKind::Finished,
                    Some(serde_json::json!({ "result": result, "usage": outcome.usage })),
                ));
                self.metrics.runs_total.inc("ok");
                info!(run_id = %run_id, syscalls = outcome.syscalls.len(), "run finished");
            }
            Err(exec_err) => {
                self.finish_error(
                    run_id,
                    &key,
                    exec_err.error.kind(),
                    &exec_err.error.public_reason(),
                    exec_err.usage,
                );
                self.metrics.runs_total.inc("error");
            }
        }
    }

    fn finish_error(
        &self,
        run_id: RunId,
        key: &str,
        kind: ErrorKind,
        reason: &str,
        usage: warden_core::limits::Usage,
    ) {
        warn!(run_id = %run_id, kind = %kind, reason, "run failed");
        if let Some(state) = self.runs.update(run_id, |s| {
            let _ = s.fail(kind, reason.to_string(), usage);
        }) {
            self.idempotency.put(key, state);
        }
        self.publish(RunEvent::new(
            run_id,
            RunEventKind::Error,
            Some(serde_json::json!({ "kind": kind, "reason": reason })),
        ));
    }

    /// Publish to the in-process stream and forward to the durable sink.
    /// Sink failures are transient and never fail the run.
    fn publish(&self, event: RunEvent) {
        self.broadcaster.publish(event.clone());
        if let Ok(payload) = serde_json::to_value(&event) {
            let sink = Arc::clone(&self.sink);
            tokio::spawn(async move {
                if let Err(err) = sink.publish(payload).await {
                    warn!(error = %err, "lifecycle event sink publish failed");
                }
            });
        }
    }
}

fn mode_detail(mode: &str) -> Option<serde_json::Value> {
    Some(serde_json::json!({ "mode": mode }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use warden_core::limits::{LimitHints, ResourceLimits, Usage};
    use warden_core::traits::{ExecutionError, ExecutionOutcome};
    use warden_fetch::artifact::sha256_hex;

    struct StubExecutor {
        calls: AtomicUsize,
        delay_ms: u64,
        fail: bool,
    }

    impl StubExecutor {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay_ms: 0,
                fail: false,
            }
        }

        fn slow(delay_ms: u64) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay_ms,
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay_ms: 0,
                fail: true,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RunExecutor for StubExecutor {
        async fn execute(
            &self,
            _state: &RunState,
            _module_bytes: &[u8],
            _capabilities: &CapabilitySet,
            _limits: &ResourceLimits,
        ) -> Result<ExecutionOutcome, ExecutionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            if self.fail {
                return Err(ExecutionError::with_usage(
                    WardenError::ResourceViolation {
                        resource: "fuel".to_string(),
                    },
                    Usage {
                        fuel_used: 10_000,
                        ..Usage::empty()
                    },
                ));
            }
            Ok(ExecutionOutcome {
                result: Some(serde_json::json!(5)),
                usage: Usage {
                    fuel_used: 1_000,
                    mem_pages: 1,
                    syscalls: 1,
                    elapsed_ms: 2,
                },
                syscalls: vec![warden_core::traits::SyscallRecord {
                    kind: "emit".to_string(),
                    ok: true,
                }],
                replies: vec![],
            })
        }
    }

    struct Harness {
        service: Arc<IngressService>,
        executor: Arc<StubExecutor>,
        _dir: tempfile::TempDir,
        locator: String,
        checksum: String,
    }

    fn harness(mutate: impl FnOnce(&mut WardenConfig), executor: StubExecutor) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let module_path = dir.path().join("m.wasm");
        let bytes = b"\0asm\x01\0\0\0";
        std::fs::write(&module_path, bytes).unwrap();

        let mut config = WardenConfig {
            allow_modules: vec!["wasm/*".to_string()],
            allow_caps: vec!["emit".to_string()],
            ..WardenConfig::default()
        };
        config.fetch.cache_dir = dir.path().join("cache").to_string_lossy().into_owned();
        mutate(&mut config);

        let metrics = Arc::new(WardenMetrics::new());
        let policy = PolicyEngine::from_config(&config, Arc::clone(&metrics));
        let resolver = Resolver::new(config.fetch.clone(), Arc::clone(&metrics));
        let executor = Arc::new(executor);
        let sink = Arc::new(NullSink);
        let service = Arc::new(IngressService::new(
            config,
            policy,
            resolver,
            Arc::clone(&executor) as Arc<dyn RunExecutor>,
            sink,
            metrics,
        ));
        Harness {
            service,
            executor,
            locator: format!("file://{}", module_path.display()),
            checksum: sha256_hex(bytes),
            _dir: dir,
        }
    }

    struct NullSink;

    #[async_trait]
    impl EventSink for NullSink {
        async fn publish(&self, _event: serde_json::Value) -> Result<(), WardenError> {
            Ok(())
        }
    }

    fn request(h: &Harness) -> RunRequest {
        RunRequest {
            locator: h.locator.clone(),
            checksum: h.checksum.clone(),
            module: "wasm/demo".to_string(),
            entry: "_start".to_string(),
            args: vec![serde_json::json!(2), serde_json::json!(3)],
            capabilities: vec!["emit".to_string()],
            labels: vec![],
            idempotency_key: None,
            caller: Some("tester".to_string()),
            limits: LimitHints::none(),
            signature_url: None,
        }
    }

    async fn wait_terminal(service: &Arc<IngressService>, run_id: RunId) -> RunState {
        for _ in 0..200 {
            if let Some(state) = service.get_status(run_id) {
                if state.status.is_terminal() {
                    return state;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("run {run_id} never reached a terminal state");
    }

    #[tokio::test]
    async fn test_live_run_finishes_with_result() {
        let h = harness(|_| {}, StubExecutor::new());
        let response = h.service.submit(request(&h)).await.unwrap();
        assert!(response.accepted);
        assert_eq!(response.mode, RunMode::Live);

        let state = wait_terminal(&h.service, response.run_id).await;
        assert_eq!(state.status, RunStatus::Finished);
        assert_eq!(state.result, Some(serde_json::json!(5)));
        assert_eq!(state.usage.syscalls, 1);
        assert_eq!(h.executor.calls(), 1);
    }

    #[tokio::test]
    async fn test_idempotent_retry_returns_cached() {
        let h = harness(|_| {}, StubExecutor::new());
        let first = h.service.submit(request(&h)).await.unwrap();
        let first_state = wait_terminal(&h.service, first.run_id).await;

        let second = h.service.submit(request(&h)).await.unwrap();
        assert!(second.accepted);
        assert_eq!(second.mode, RunMode::Cached);
        assert_eq!(second.run_id, first.run_id);
        assert_eq!(
            h.service.get_status(second.run_id).unwrap().result,
            first_state.result
        );
        // no re-execution
        assert_eq!(h.executor.calls(), 1);
    }

    #[tokio::test]
    async fn test_policy_deny_never_reaches_executor() {
        let h = harness(|_| {}, StubExecutor::new());
        let mut req = request(&h);
        req.module = "unlisted/tool".to_string();
        let response = h.service.submit(req).await.unwrap();
        let state = wait_terminal(&h.service, response.run_id).await;

        assert_eq!(state.status, RunStatus::Error);
        let err = state.error.unwrap();
        assert_eq!(err.kind, ErrorKind::PolicyDenied);
        assert_eq!(err.reason, "module_allowlist");
        assert!(state.usage.is_empty());
        assert_eq!(h.executor.calls(), 0);
    }

    #[tokio::test]
    async fn test_canary_zero_always_dry_run() {
        let h = harness(|c| c.canary_fraction = 0.0, StubExecutor::new());
        let mut events = h.service.event_stream();

        let response = h.service.submit(request(&h)).await.unwrap();
        assert_eq!(response.mode, RunMode::DryRun);

        let state = wait_terminal(&h.service, response.run_id).await;
        assert_eq!(state.status, RunStatus::Finished);
        assert!(state.usage.is_empty());
        assert!(state.result.is_none());
        assert_eq!(h.executor.calls(), 0);

        // stream carries accepted and started, nothing further
        let first = events.recv().await.unwrap();
        assert_eq!(first.kind, RunEventKind::Accepted);
        let second = events.recv().await.unwrap();
        assert_eq!(second.kind, RunEventKind::Started);
        assert!(
            tokio::time::timeout(Duration::from_millis(50), events.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_frozen_accepted_never_executed() {
        let h = harness(|c| c.frozen = true, StubExecutor::new());
        let response = h.service.submit(request(&h)).await.unwrap();
        assert!(response.accepted);
        assert_eq!(response.mode, RunMode::Frozen);

        let state = wait_terminal(&h.service, response.run_id).await;
        assert_eq!(state.status, RunStatus::Finished);
        assert!(state.usage.is_empty());
        assert_eq!(h.executor.calls(), 0);

        // frozen results are not cached: a retry is a fresh frozen run
        let retry = h.service.submit(request(&h)).await.unwrap();
        assert_eq!(retry.mode, RunMode::Frozen);
        assert_ne!(retry.run_id, response.run_id);
    }

    #[tokio::test]
    async fn test_disabled_rejects_without_run() {
        let h = harness(|c| c.enabled = false, StubExecutor::new());
        let response = h.service.submit(request(&h)).await.unwrap();
        assert!(!response.accepted);
        assert_eq!(response.reason.as_deref(), Some("disabled"));
        assert!(h.service.get_status(response.run_id).is_none());
    }

    #[tokio::test]
    async fn test_validation_error_creates_no_run() {
        let h = harness(|_| {}, StubExecutor::new());
        let mut req = request(&h);
        req.checksum = "nope".to_string();
        let err = h.service.submit(req).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_missing_artifact_is_artifact_error() {
        let h = harness(|_| {}, StubExecutor::new());
        let mut req = request(&h);
        req.locator = "file:///nonexistent/m.wasm".to_string();
        let response = h.service.submit(req).await.unwrap();
        let state = wait_terminal(&h.service, response.run_id).await;
        assert_eq!(state.error.unwrap().kind, ErrorKind::Artifact);
        assert_eq!(h.executor.calls(), 0);
    }

    #[tokio::test]
    async fn test_execution_error_carries_partial_usage() {
        let h = harness(|_| {}, StubExecutor::failing());
        let response = h.service.submit(request(&h)).await.unwrap();
        let state = wait_terminal(&h.service, response.run_id).await;
        let err = state.error.unwrap();
        assert_eq!(err.kind, ErrorKind::ResourceViolation);
        assert_eq!(state.usage.fuel_used, 10_000);
    }

    #[tokio::test]
    async fn test_backpressure_rejects_when_saturated() {
        let h = harness(
            |c| {
                c.ingress.max_concurrent = 1;
                c.ingress.queue_depth = 0;
            },
            StubExecutor::slow(500),
        );
        let first = h.service.submit(request(&h)).await.unwrap();
        assert!(first.accepted);

        // give the first task time to claim the permit
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut req = request(&h);
        req.idempotency_key = Some("different".to_string());
        let second = h.service.submit(req).await.unwrap();
        assert!(!second.accepted);
        assert_eq!(second.reason.as_deref(), Some("backpressure"));
        assert_eq!(h.service.metrics().backpressure_rejects.get(), 1);
    }

    #[tokio::test]
    async fn test_lifecycle_event_order_for_live_run() {
        let h = harness(|_| {}, StubExecutor::new());
        let mut events = h.service.event_stream();
        let response = h.service.submit(request(&h)).await.unwrap();
        wait_terminal(&h.service, response.run_id).await;

        let mut kinds = Vec::new();
        while let Ok(Ok(event)) =
            tokio::time::timeout(Duration::from_millis(100), events.recv()).await
        {
            if event.run_id == response.run_id {
                kinds.push(event.kind);
            }
            if event.kind == RunEventKind::Finished || event.kind == RunEventKind::Error {
                break;
            }
        }
        assert_eq!(
            kinds,
            vec![
                RunEventKind::Accepted,
                RunEventKind::Started,
                RunEventKind::Syscall,
                RunEventKind::Finished,
            ]
        );
    }
}
