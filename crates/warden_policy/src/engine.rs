//! The ordered policy pipeline.

use crate::decision::{DecisionClient, DecisionInput};
use crate::labels::LabelRule;
use crate::signature::TrustedKeys;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use warden_core::capability::matches_module;
use warden_core::config::WardenConfig;
use warden_core::metrics::WardenMetrics;
use warden_core::{CapabilitySet, ResourceLimits, RunRequest};
use warden_fetch::ModuleArtifact;

/// The outcome of policy evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecision {
    /// Whether the run may proceed
    pub allowed: bool,
    /// Stable reason; `allowed` on success, the deny stage otherwise
    pub reason: String,
    /// Resolved capability set (the request's, once validated)
    pub capabilities: CapabilitySet,
    /// Resolved limits: global defaults tightened by request hints
    pub limits: ResourceLimits,
    /// Verified signer identity, when signature verification ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer: Option<String>,
}

impl PolicyDecision {
    fn allow(capabilities: CapabilitySet, limits: ResourceLimits) -> Self {
        Self {
            allowed: true,
            reason: "allowed".to_string(),
            capabilities,
            limits,
            signer: None,
        }
    }

    fn deny(reason: String, limits: ResourceLimits) -> Self {
        Self {
            allowed: false,
            reason,
            capabilities: CapabilitySet::new(),
            limits,
            signer: None,
        }
    }
}

enum StageOutcome {
    Allow,
    Deny(String),
}

/// Policy engine: ordered checks, each an early deny.
///
/// Request-time stages run before any fetch; artifact-time stages
/// (signature, decision service) run once verified bytes exist. Both
/// short-circuit on the first deny.
pub struct PolicyEngine {
    allow_modules: Vec<String>,
    granted: CapabilitySet,
    environment: String,
    label_rules: Vec<LabelRule>,
    default_limits: ResourceLimits,
    verify_signatures: bool,
    trusted_keys: TrustedKeys,
    decision: Option<DecisionClient>,
    metrics: Arc<WardenMetrics>,
}

impl PolicyEngine {
    /// Build the engine from deployment configuration
    #[must_use]
    pub fn from_config(config: &WardenConfig, metrics: Arc<WardenMetrics>) -> Self {
        let decision = config
            .policy
            .decision_service
            .clone()
            .map(|url| DecisionClient::new(url, config.policy.decision_timeout_ms));
        Self {
            allow_modules: config.allow_modules.clone(),
            granted: config.granted_capabilities(),
            environment: config.environment.clone(),
            label_rules: LabelRule::defaults(),
            default_limits: config.limits,
            verify_signatures: config.policy.verify_signatures,
            trusted_keys: TrustedKeys::from_hex_table(&config.policy.trusted_keys),
            decision,
            metrics,
        }
    }

    /// Replace the label rule set (rules are evaluated in order)
    #[must_use]
    pub fn with_label_rules(mut self, rules: Vec<LabelRule>) -> Self {
        self.label_rules = rules;
        self
    }

    /// Run the request-time stages: structural validation, module
    /// allowlist, capability subset, label rules.
    #[must_use]
    pub fn evaluate_request(&self, request: &RunRequest) -> PolicyDecision {
        let limits = self.default_limits.tighten(&request.limits);

        let stages: [(&str, StageOutcome); 4] = [
            ("structural", self.check_structural(request)),
            ("module_allowlist", self.check_module_allowlist(request)),
            ("capabilities", self.check_capabilities(request)),
            ("labels", self.check_labels(request)),
        ];
        for (stage, outcome) in stages {
            if let StageOutcome::Deny(reason) = outcome {
                self.record_deny(stage, &reason, request);
                return PolicyDecision::deny(reason, limits);
            }
        }

        // capabilities parsed successfully in check_capabilities
        let capabilities =
            CapabilitySet::from_names(&request.capabilities).unwrap_or_default();
        PolicyDecision::allow(capabilities, limits)
    }

    /// Run the artifact-time stages on verified bytes: signature
    /// verification (hard deny on failure), then the external decision
    /// service (fail-closed on unreachability).
    pub async fn evaluate_artifact(
        &self,
        request: &RunRequest,
        artifact: &ModuleArtifact,
    ) -> PolicyDecision {
        let limits = self.default_limits.tighten(&request.limits);

        let signer = if self.verify_signatures {
            let Some(sig) = artifact.signature.as_deref() else {
                self.record_deny("signature", "signature_missing", request);
                return PolicyDecision::deny("signature_missing".to_string(), limits);
            };
            match self.trusted_keys.verify(&artifact.bytes, sig) {
                Ok(signer) => {
                    debug!(module = %request.module, signer = %signer, "artifact signature verified");
                    Some(signer)
                }
                Err(err) => {
                    let reason = err.public_reason();
                    self.record_deny("signature", &reason, request);
                    return PolicyDecision::deny(reason, limits);
                }
            }
        } else {
            None
        };

        if let Some(client) = &self.decision {
            let input = DecisionInput {
                module: request.module.clone(),
                caps: request.capabilities.clone(),
                checksum: artifact.locator.checksum.clone(),
                signer: signer.clone(),
            };
            match client.decide(&input).await {
                Ok(true) => {}
                Ok(false) => {
                    self.record_deny("decision_service", "decision_denied", request);
                    return PolicyDecision::deny("decision_denied".to_string(), limits);
                }
                Err(_) => {
                    // fail-closed: an unreachable decision service denies
                    self.record_deny("decision_service", "decision_service_unavailable", request);
                    return PolicyDecision::deny(
                        "decision_service_unavailable".to_string(),
                        limits,
                    );
                }
            }
        }

        let capabilities =
            CapabilitySet::from_names(&request.capabilities).unwrap_or_default();
        let mut decision = PolicyDecision::allow(capabilities, limits);
        decision.signer = signer;
        decision
    }

    fn check_structural(&self, request: &RunRequest) -> StageOutcome {
        if request.module.trim().is_empty() {
            return StageOutcome::Deny("missing_module".to_string());
        }
        if request.entry.trim().is_empty() {
            return StageOutcome::Deny("missing_entry".to_string());
        }
        if request.locator.trim().is_empty() {
            return StageOutcome::Deny("missing_locator".to_string());
        }
        StageOutcome::Allow
    }

    fn check_module_allowlist(&self, request: &RunRequest) -> StageOutcome {
        if matches_module(&self.allow_modules, &request.module) {
            StageOutcome::Allow
        } else {
            StageOutcome::Deny("module_allowlist".to_string())
        }
    }

    fn check_capabilities(&self, request: &RunRequest) -> StageOutcome {
        let requested = match CapabilitySet::from_names(&request.capabilities) {
            Ok(set) => set,
            Err(_) => return StageOutcome::Deny("unknown_capability".to_string()),
        };
        if requested.is_subset(&self.granted) {
            StageOutcome::Allow
        } else {
            StageOutcome::Deny("capability_not_granted".to_string())
        }
    }

    fn check_labels(&self, request: &RunRequest) -> StageOutcome {
        for rule in &self.label_rules {
            if let Some(reason) = rule.check(&request.labels, &self.environment) {
                return StageOutcome::Deny(reason);
            }
        }
        StageOutcome::Allow
    }

    fn record_deny(&self, stage: &str, reason: &str, request: &RunRequest) {
        info!(module = %request.module, stage, reason, "policy denied");
        self.metrics.policy_denied.inc(reason);
    }
}
