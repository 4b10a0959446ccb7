//! The resource-limited runtime.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use warden_core::capability::CapabilitySet;
use warden_core::limits::{ResourceLimits, Usage};
use warden_core::metrics::WardenMetrics;
use warden_core::traits::{ExecutionError, ExecutionOutcome, RunExecutor, SyscallRecord};
use warden_core::{RunState, WardenError};
use warden_gateway::SyscallGateway;
use warden_wasm::protocol::{GuestLine, Sysret};
use warden_wasm::sandbox::{Sandbox, SandboxOutcome, SandboxRun};

/// Executes live runs in one-shot sandboxes.
pub struct Runtime {
    gateway: Arc<SyscallGateway>,
    metrics: Arc<WardenMetrics>,
}

impl Runtime {
    /// Create a runtime over a gateway
    #[must_use]
    pub fn new(gateway: Arc<SyscallGateway>, metrics: Arc<WardenMetrics>) -> Self {
        Self { gateway, metrics }
    }

    /// Drain the sandbox's output channel: dispatch syscall envelopes,
    /// collect gateway replies, and pick up the terminal return marker.
    /// Lines after the return marker are ignored.
    async fn drain_output(
        &self,
        caps: &CapabilitySet,
        stdout: &[u8],
    ) -> (Option<serde_json::Value>, Vec<SyscallRecord>, Vec<String>) {
        let mut result = None;
        let mut records = Vec::new();
        let mut replies = Vec::new();

        let text = String::from_utf8_lossy(stdout);
        for raw in text.lines() {
            let Some(line) = GuestLine::parse(raw) else {
                continue;
            };
            match line {
                GuestLine::Syscall(envelope) => {
                    let kind = envelope.kind().to_string();
                    let reply = self.gateway.dispatch(caps, envelope).await;
                    let ok = reply_ok(&reply);
                    replies.push(reply.to_line());
                    records.push(SyscallRecord { kind, ok });
                }
                GuestLine::Return(value) => {
                    result = Some(value);
                    break;
                }
                GuestLine::Malformed(kind) => {
                    warn!(kind = %kind, "malformed syscall envelope dropped");
                    self.metrics.gateway_denied.inc(&format!("{kind}:malformed"));
                }
                GuestLine::Log(line) => {
                    debug!(line = %line, "module log");
                }
            }
        }
        (result, records, replies)
    }
}

fn reply_ok(reply: &Sysret) -> bool {
    match reply {
        Sysret::Emit { ok, .. }
        | Sysret::Http { ok, .. }
        | Sysret::KvGet { ok, .. }
        | Sysret::KvSet { ok, .. } => *ok,
    }
}

#[async_trait::async_trait]
impl RunExecutor for Runtime {
    async fn execute(
        &self,
        state: &RunState,
        module_bytes: &[u8],
        capabilities: &CapabilitySet,
        limits: &ResourceLimits,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let sandbox = Sandbox::new(module_bytes, *limits)
            .map_err(ExecutionError::before_execution)?;

        // the input channel carries the argument list, written once
        let mut input = serde_json::to_vec(&state.request.args).unwrap_or_else(|_| b"[]".to_vec());
        input.push(b'\n');

        let entry = state.request.entry.clone();
        self.metrics.active_runs.inc();
        let handle = tokio::task::spawn_blocking(move || sandbox.execute(&entry, &input));

        // epoch interruption enforces the wall budget inside the sandbox;
        // this outer deadline is the backstop for budget-model edge cases
        let backstop = Duration::from_millis(limits.wall_ms.saturating_mul(2).max(1_000));
        let run: SandboxRun = match tokio::time::timeout(backstop, handle).await {
            Ok(Ok(run)) => run,
            Ok(Err(join_err)) => {
                self.metrics.active_runs.dec();
                warn!(run_id = %state.run_id, error = %join_err, "sandbox task failed");
                return Err(ExecutionError::before_execution(WardenError::Runtime {
                    reason: "sandbox_task_failed".to_string(),
                }));
            }
            Err(_) => {
                self.metrics.active_runs.dec();
                self.metrics.resource_violations.inc();
                let usage = Usage {
                    elapsed_ms: backstop.as_millis() as u64,
                    ..Usage::empty()
                };
                return Err(ExecutionError::with_usage(
                    WardenError::ResourceViolation {
                        resource: "wall_clock".to_string(),
                    },
                    usage,
                ));
            }
        };
        self.metrics.active_runs.dec();

        let mut usage = Usage {
            fuel_used: run.fuel_used,
            mem_pages: run.mem_pages,
            syscalls: 0,
            elapsed_ms: run.elapsed_ms,
        };

        match run.outcome {
            SandboxOutcome::Completed => {
                let (result, syscalls, replies) =
                    self.drain_output(capabilities, &run.stdout).await;
                usage.syscalls = syscalls.len() as u64;
                if usage.exceeds(limits) {
                    self.metrics.resource_violations.inc();
                }
                Ok(ExecutionOutcome {
                    result,
                    usage,
                    syscalls,
                    replies,
                })
            }
            SandboxOutcome::FuelExhausted => {
                self.metrics.resource_violations.inc();
                Err(ExecutionError::with_usage(
                    WardenError::ResourceViolation {
                        resource: "fuel".to_string(),
                    },
                    usage,
                ))
            }
            SandboxOutcome::MemoryExceeded => {
                self.metrics.resource_violations.inc();
                Err(ExecutionError::with_usage(
                    WardenError::ResourceViolation {
                        resource: "memory".to_string(),
                    },
                    usage,
                ))
            }
            SandboxOutcome::WallTimeout => {
                self.metrics.resource_violations.inc();
                Err(ExecutionError::with_usage(
                    WardenError::ResourceViolation {
                        resource: "wall_clock".to_string(),
                    },
                    usage,
                ))
            }
            SandboxOutcome::BadEntry => Err(ExecutionError::with_usage(
                WardenError::Runtime {
                    reason: "bad_entry".to_string(),
                },
                usage,
            )),
            SandboxOutcome::Faulted(detail) => {
                // detail stays in logs; callers see a stable reason
                warn!(run_id = %state.run_id, detail = %detail, "sandbox faulted");
                Err(ExecutionError::with_usage(
                    WardenError::Runtime {
                        reason: "trap".to_string(),
                    },
                    usage,
                ))
            }
        }
    }
}
