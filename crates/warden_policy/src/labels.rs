//! Ordered label rules.
//!
//! Rules are evaluated in order; the first deny wins. Labels are opaque
//! caller-supplied strings; the environment comes from configuration.

use serde::{Deserialize, Serialize};

/// One label rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelRule {
    /// Deny runs carrying `label` when the deployment environment matches
    DenyLabelInEnv {
        /// Offending request label
        label: String,
        /// Environment the rule applies in
        environment: String,
    },
    /// Runs carrying `when` must also carry `require`
    RequireLabelWith {
        /// Trigger label
        when: String,
        /// Label that must accompany it
        require: String,
    },
}

impl LabelRule {
    /// The default rule set: no test modules in production, critical
    /// modules must be approved.
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::DenyLabelInEnv {
                label: "test".to_string(),
                environment: "production".to_string(),
            },
            Self::RequireLabelWith {
                when: "critical".to_string(),
                require: "approved".to_string(),
            },
        ]
    }

    /// Evaluate against a run's labels. Returns the deny reason if the
    /// rule rejects, `None` if it passes.
    #[must_use]
    pub fn check(&self, labels: &[String], environment: &str) -> Option<String> {
        match self {
            Self::DenyLabelInEnv { label, environment: env } => {
                if environment == env && labels.iter().any(|l| l == label) {
                    Some(format!("label_{label}_denied_in_{env}"))
                } else {
                    None
                }
            }
            Self::RequireLabelWith { when, require } => {
                if labels.iter().any(|l| l == when) && !labels.iter().any(|l| l == require) {
                    Some(format!("label_{when}_requires_{require}"))
                } else {
                    None
                }
            }
        }
    }
}
