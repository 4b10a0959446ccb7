//! Syscall dispatch.

use crate::kv::{KvStore, KvWriteOutcome};
use crate::ratelimit::TokenBucket;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use warden_core::capability::{Capability, CapabilityGrants, CapabilitySet};
use warden_core::config::GatewayConfig;
use warden_core::metrics::WardenMetrics;
use warden_core::EventSink;
use warden_wasm::protocol::{HttpRequestSpec, Sysret, SyscallEnvelope};

/// The syscall gateway.
///
/// Holds no per-run state; the run's resolved capability set is passed
/// into each dispatch. The KV store and rate limiter are process-wide by
/// design and injected at construction.
pub struct SyscallGateway {
    grants: CapabilityGrants,
    http_max_kb: u64,
    bucket: Arc<TokenBucket>,
    kv: Arc<KvStore>,
    sink: Arc<dyn EventSink>,
    metrics: Arc<WardenMetrics>,
    client: reqwest::Client,
}

impl SyscallGateway {
    /// Build a gateway from the deployment's gateway section
    #[must_use]
    pub fn new(
        config: &GatewayConfig,
        grants: CapabilityGrants,
        kv: Arc<KvStore>,
        sink: Arc<dyn EventSink>,
        metrics: Arc<WardenMetrics>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.http_timeout_ms))
            .connect_timeout(Duration::from_millis(config.http_timeout_ms.min(1_000)))
            .redirect(reqwest::redirect::Policy::limited(3))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            grants,
            http_max_kb: config.http_max_kb,
            bucket: Arc::new(TokenBucket::new(config.http_rps, config.http_burst)),
            kv,
            sink,
            metrics,
            client,
        }
    }

    /// Dispatch one syscall envelope under the run's resolved capability
    /// set. A deny is an error reply, never an exception.
    pub async fn dispatch(&self, caps: &CapabilitySet, envelope: SyscallEnvelope) -> Sysret {
        let kind = envelope.kind();
        let reply = match envelope {
            SyscallEnvelope::Emit { event, data } => self.sys_emit(caps, event, data).await,
            SyscallEnvelope::HttpFetch { id, req, limits } => {
                let max_kb = limits
                    .and_then(|l| l.max_kb)
                    .map_or(self.http_max_kb, |kb| kb.min(self.http_max_kb));
                self.sys_http_fetch(caps, id, req, max_kb).await
            }
            SyscallEnvelope::KvGet { namespace, key } => self.sys_kv_get(caps, &namespace, &key),
            SyscallEnvelope::KvSet { namespace, key, value } => {
                self.sys_kv_set(caps, &namespace, &key, value)
            }
        };
        self.count(kind, &reply);
        reply
    }

    /// Capability check for event emission
    #[must_use]
    pub fn can_emit(&self, caps: &CapabilitySet) -> bool {
        caps.has(Capability::Emit)
    }

    /// Capability + host-allowlist check for an HTTP fetch target
    #[must_use]
    pub fn can_http_fetch(&self, caps: &CapabilitySet, url: &str) -> Result<(), &'static str> {
        if !caps.has(Capability::Http) {
            return Err("capability");
        }
        let Ok(parsed) = url::Url::parse(url) else {
            return Err("bad_url");
        };
        let Some(host) = parsed.host_str() else {
            return Err("bad_url");
        };
        if !self.grants.http_host_allowed(host) {
            return Err("host_denied");
        }
        Ok(())
    }

    /// Capability + namespace check for KV access
    #[must_use]
    pub fn can_kv_access(&self, caps: &CapabilitySet, namespace: &str) -> Result<(), &'static str> {
        if !caps.has(Capability::Kv) {
            return Err("capability");
        }
        if !self.grants.kv_namespace_allowed(namespace) {
            return Err("namespace_denied");
        }
        Ok(())
    }

    async fn sys_emit(
        &self,
        caps: &CapabilitySet,
        event: String,
        data: Option<serde_json::Value>,
    ) -> Sysret {
        if !self.can_emit(caps) {
            self.record_deny("emit", "capability");
            return Sysret::Emit {
                ok: false,
                error: Some("capability".to_string()),
            };
        }
        let payload = serde_json::json!({ "event": event, "data": data });
        match self.sink.publish(payload).await {
            Ok(()) => {
                self.metrics.events_emitted.inc();
                Sysret::Emit { ok: true, error: None }
            }
            Err(err) => {
                // transient: logged, surfaced to the module, not fatal
                warn!(error = %err, "emit forwarding failed");
                Sysret::Emit {
                    ok: false,
                    error: Some(err.public_reason()),
                }
            }
        }
    }

    async fn sys_http_fetch(
        &self,
        caps: &CapabilitySet,
        id: Option<String>,
        req: HttpRequestSpec,
        max_kb: u64,
    ) -> Sysret {
        if let Err(reason) = self.can_http_fetch(caps, &req.url) {
            self.record_deny("http.fetch", reason);
            return http_deny(id, reason);
        }
        if !self.bucket.try_acquire() {
            self.record_deny("http.fetch", "rate_limited");
            return http_deny(id, "rate_limited");
        }

        let method = reqwest::Method::from_bytes(req.method.as_bytes())
            .unwrap_or(reqwest::Method::GET);
        let mut builder = self.client.request(method, &req.url);
        if let Some(headers) = &req.headers {
            for (name, value) in headers {
                builder = builder.header(name, value);
            }
        }
        if let Some(body) = req.body {
            builder = builder.body(body);
        }

        let mut response = match builder.send().await {
            Ok(response) => response,
            Err(err) => {
                debug!(error = %err, "module http fetch failed");
                return http_deny(id, "fetch_failed");
            }
        };
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        // capped read; excess is discarded, the body never leaves the host
        let cap_bytes = max_kb.saturating_mul(1024);
        let mut read: u64 = 0;
        while read < cap_bytes {
            match response.chunk().await {
                Ok(Some(chunk)) => read = (read + chunk.len() as u64).min(cap_bytes),
                Ok(None) => break,
                Err(_) => break,
            }
        }
        drop(response);

        Sysret::Http {
            id,
            ok: true,
            status: Some(status),
            kb: Some(read / 1024),
            content_type,
            error: None,
        }
    }

    fn sys_kv_get(&self, caps: &CapabilitySet, namespace: &str, key: &str) -> Sysret {
        if let Err(reason) = self.can_kv_access(caps, namespace) {
            self.record_deny("kv.get", reason);
            return Sysret::KvGet {
                ok: false,
                key: key.to_string(),
                value: None,
                error: Some(reason.to_string()),
            };
        }
        let value = self.kv.get(namespace, key);
        Sysret::KvGet {
            ok: value.is_some(),
            key: key.to_string(),
            value,
            error: None,
        }
    }

    fn sys_kv_set(
        &self,
        caps: &CapabilitySet,
        namespace: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Sysret {
        if let Err(reason) = self.can_kv_access(caps, namespace) {
            self.record_deny("kv.set", reason);
            return Sysret::KvSet {
                ok: false,
                key: key.to_string(),
                error: Some(reason.to_string()),
            };
        }
        match self.kv.set(
            namespace,
            key,
            value,
            self.grants.kv_max_keys,
            self.grants.kv_max_value_bytes,
        ) {
            KvWriteOutcome::Stored => Sysret::KvSet {
                ok: true,
                key: key.to_string(),
                error: None,
            },
            KvWriteOutcome::KeyQuotaExceeded => {
                self.record_deny("kv.set", "key_quota");
                Sysret::KvSet {
                    ok: false,
                    key: key.to_string(),
                    error: Some("key_quota".to_string()),
                }
            }
            KvWriteOutcome::ValueTooLarge => {
                self.record_deny("kv.set", "value_too_large");
                Sysret::KvSet {
                    ok: false,
                    key: key.to_string(),
                    error: Some("value_too_large".to_string()),
                }
            }
        }
    }

    fn record_deny(&self, kind: &str, reason: &str) {
        self.metrics.gateway_denied.inc(&format!("{kind}:{reason}"));
    }

    fn count(&self, kind: &str, reply: &Sysret) {
        let result = match reply {
            Sysret::Emit { ok, .. }
            | Sysret::Http { ok, .. }
            | Sysret::KvSet { ok, .. } => {
                if *ok {
                    "ok"
                } else {
                    "denied"
                }
            }
            // a kv.get miss is still a successful dispatch
            Sysret::KvGet { error, .. } => {
                if error.is_some() {
                    "denied"
                } else {
                    "ok"
                }
            }
        };
        self.metrics.syscalls_total.inc(&format!("{kind}:{result}"));
    }
}

fn http_deny(id: Option<String>, reason: &str) -> Sysret {
    Sysret::Http {
        id,
        ok: false,
        status: None,
        kb: None,
        content_type: None,
        error: Some(reason.to_string()),
    }
}
