//! The tagged guest line protocol.
//!
//! The module's output channel is newline-delimited JSON. Three line
//! classes exist: syscall envelopes (`type` starts with `syscall.`), the
//! terminal return marker (`type` = `return`), and everything else, which
//! is free-form logging and never becomes the result. Gateway replies are
//! `sysret.*` lines written to the module's input channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A syscall envelope emitted by the guest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyscallEnvelope {
    /// Forward an event to the bus
    #[serde(rename = "syscall.emit")]
    Emit {
        /// Event name
        event: String,
        /// Event payload
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    /// Outbound HTTP request through the gateway
    #[serde(rename = "syscall.http.fetch")]
    HttpFetch {
        /// Correlation id echoed back on the reply
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        /// The request itself
        req: HttpRequestSpec,
        /// Optional per-call limits
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limits: Option<HttpLimits>,
    },
    /// Read a value from the scratch KV store
    #[serde(rename = "syscall.kv.get")]
    KvGet {
        /// Namespace
        namespace: String,
        /// Key
        key: String,
    },
    /// Write a value to the scratch KV store
    #[serde(rename = "syscall.kv.set")]
    KvSet {
        /// Namespace
        namespace: String,
        /// Key
        key: String,
        /// Value
        value: Value,
    },
}

impl SyscallEnvelope {
    /// Stable kind label used in metrics
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Emit { .. } => "emit",
            Self::HttpFetch { .. } => "http.fetch",
            Self::KvGet { .. } => "kv.get",
            Self::KvSet { .. } => "kv.set",
        }
    }
}

/// HTTP request fields inside an `http.fetch` envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpRequestSpec {
    /// Method; defaults to GET
    #[serde(default = "default_method")]
    pub method: String,
    /// Absolute URL
    pub url: String,
    /// Request headers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<std::collections::BTreeMap<String, String>>,
    /// Request body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Per-call HTTP limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpLimits {
    /// Response read cap in KiB; clamped to the configured ceiling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_kb: Option<u64>,
}

/// One classified line from the guest's output channel
#[derive(Debug, Clone, PartialEq)]
pub enum GuestLine {
    /// A syscall envelope for the gateway
    Syscall(SyscallEnvelope),
    /// The terminal return marker; its value is the module result
    Return(Value),
    /// A line that claimed `syscall.*` but did not parse
    Malformed(String),
    /// Free-form module logging
    Log(String),
}

impl GuestLine {
    /// Classify one raw output line. Returns `None` for blank lines.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let line = raw.trim();
        if line.is_empty() {
            return None;
        }
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            return Some(Self::Log(line.to_string()));
        };
        let Some(kind) = value.get("type").and_then(Value::as_str).map(str::to_owned) else {
            return Some(Self::Log(line.to_string()));
        };
        if kind == "return" {
            let result = value.get("value").cloned().unwrap_or(Value::Null);
            return Some(Self::Return(result));
        }
        if kind.starts_with("syscall.") {
            return match serde_json::from_value::<SyscallEnvelope>(value) {
                Ok(envelope) => Some(Self::Syscall(envelope)),
                Err(_) => Some(Self::Malformed(kind.to_string())),
            };
        }
        Some(Self::Log(line.to_string()))
    }
}

/// A gateway reply written to the module's input channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Sysret {
    /// Reply to `syscall.emit`
    #[serde(rename = "sysret.emit")]
    Emit {
        /// Whether the event was forwarded
        ok: bool,
        /// Deny reason, when refused
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Reply to `syscall.http.fetch`; only status/size/content-type are
    /// surfaced, never the body
    #[serde(rename = "sysret.http")]
    Http {
        /// Echoed correlation id
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        /// Whether the fetch happened
        ok: bool,
        /// Response status code
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<u16>,
        /// KiB read (capped)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kb: Option<u64>,
        /// Response content type
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content_type: Option<String>,
        /// Deny reason, when refused
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Reply to `syscall.kv.get`
    #[serde(rename = "sysret.kv.get")]
    KvGet {
        /// Whether the key existed
        ok: bool,
        /// Echoed key
        key: String,
        /// The value, when present
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
        /// Deny reason, when refused
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Reply to `syscall.kv.set`
    #[serde(rename = "sysret.kv.set")]
    KvSet {
        /// Whether the write happened
        ok: bool,
        /// Echoed key
        key: String,
        /// Deny reason, when refused
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl Sysret {
    /// Serialize as one input-channel line
    #[must_use]
    pub fn to_line(&self) -> String {
        // serialization of these shapes cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_emit_envelope() {
        let line = r#"{"type":"syscall.emit","event":"ci.done","data":{"n":5}}"#;
        match GuestLine::parse(line).unwrap() {
            GuestLine::Syscall(SyscallEnvelope::Emit { event, data }) => {
                assert_eq!(event, "ci.done");
                assert_eq!(data.unwrap()["n"], 5);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_http_fetch_defaults_method() {
        let line = r#"{"type":"syscall.http.fetch","id":"r1","req":{"url":"https://x.example/"}}"#;
        match GuestLine::parse(line).unwrap() {
            GuestLine::Syscall(SyscallEnvelope::HttpFetch { id, req, limits }) => {
                assert_eq!(id.as_deref(), Some("r1"));
                assert_eq!(req.method, "GET");
                assert!(limits.is_none());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_kv_set() {
        let line = r#"{"type":"syscall.kv.set","namespace":"scratch","key":"a","value":1}"#;
        match GuestLine::parse(line).unwrap() {
            GuestLine::Syscall(SyscallEnvelope::KvSet { namespace, key, value }) => {
                assert_eq!(namespace, "scratch");
                assert_eq!(key, "a");
                assert_eq!(value, json!(1));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_return_marker() {
        let line = r#"{"type":"return","value":5}"#;
        assert_eq!(GuestLine::parse(line).unwrap(), GuestLine::Return(json!(5)));
    }

    #[test]
    fn test_parse_return_without_value_is_null() {
        let line = r#"{"type":"return"}"#;
        assert_eq!(
            GuestLine::parse(line).unwrap(),
            GuestLine::Return(Value::Null)
        );
    }

    #[test]
    fn test_free_form_lines_are_logs() {
        assert!(matches!(
            GuestLine::parse("plain text progress").unwrap(),
            GuestLine::Log(_)
        ));
        assert!(matches!(
            GuestLine::parse(r#"{"no_type":true}"#).unwrap(),
            GuestLine::Log(_)
        ));
        // JSON that looks like a result but has no return marker stays a log
        assert!(matches!(
            GuestLine::parse(r#"{"type":"result","value":9}"#).unwrap(),
            GuestLine::Log(_)
        ));
    }

    #[test]
    fn test_blank_lines_skipped() {
        assert!(GuestLine::parse("").is_none());
        assert!(GuestLine::parse("   ").is_none());
    }

    #[test]
    fn test_malformed_syscall_flagged() {
        // kv.set without a value does not fit the envelope
        let line = r#"{"type":"syscall.kv.set","namespace":"scratch","key":"a"}"#;
        assert_eq!(
            GuestLine::parse(line).unwrap(),
            GuestLine::Malformed("syscall.kv.set".to_string())
        );
    }

    #[test]
    fn test_sysret_line_shape() {
        let ret = Sysret::KvGet {
            ok: true,
            key: "a".to_string(),
            value: Some(json!({"msg": "hi"})),
            error: None,
        };
        let line = ret.to_line();
        assert!(line.contains(r#""type":"sysret.kv.get""#));
        assert!(!line.contains("error"));
    }

    #[test]
    fn test_sysret_roundtrip() {
        let ret = Sysret::Http {
            id: Some("r1".to_string()),
            ok: true,
            status: Some(200),
            kb: Some(3),
            content_type: Some("application/json".to_string()),
            error: None,
        };
        let back: Sysret = serde_json::from_str(&ret.to_line()).unwrap();
        assert_eq!(ret, back);
    }

    #[test]
    fn test_envelope_kind_labels() {
        let emit: SyscallEnvelope =
            serde_json::from_str(r#"{"type":"syscall.emit","event":"e"}"#).unwrap();
        assert_eq!(emit.kind(), "emit");
    }
}
