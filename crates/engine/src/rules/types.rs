//! Rule document types.

use serde::{Deserialize, Serialize};

use crate::engine::plan::ActionSpec;

pub const API_VERSION: &str = "drip.io/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleKind {
    /// A triggered workflow.
    Rule,
    /// A named, reusable action sequence referenced by `flow` nodes.
    SharedFlow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleMetadata {
    #[serde(alias = "name")]
    pub workflow_id: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_version() -> String {
    "1".to_string()
}

/// Whether a repeat trigger may start another execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReentryPolicy {
    /// Once per (workflow, user, trigger type, trigger id).
    OnceOnly,
    /// Once per (workflow, user).
    #[default]
    OncePerUser,
    /// Once per (workflow, user, product).
    OncePerProduct,
    /// No policy check; only live-duplicate protection applies.
    Always,
}

impl std::fmt::Display for ReentryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OnceOnly => write!(f, "once_only"),
            Self::OncePerUser => write!(f, "once_per_user"),
            Self::OncePerProduct => write!(f, "once_per_product"),
            Self::Always => write!(f, "always"),
        }
    }
}

/// Trigger declaration of a rule. Field paths are dotted paths into the
/// trigger payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerSpec {
    #[serde(rename = "type")]
    pub trigger_type: String,

    #[serde(default)]
    pub reentry: ReentryPolicy,

    #[serde(default = "default_user_field")]
    pub user_field: String,

    #[serde(default = "default_id_field")]
    pub id_field: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_field: Option<String>,

    #[serde(default)]
    pub required_fields: Vec<String>,

    /// Only executions started within this window count for re-entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedup_window_secs: Option<u64>,
}

fn default_user_field() -> String {
    "user_id".to_string()
}

fn default_id_field() -> String {
    "id".to_string()
}

impl TriggerSpec {
    pub fn new(trigger_type: impl Into<String>) -> Self {
        Self {
            trigger_type: trigger_type.into(),
            reentry: ReentryPolicy::default(),
            user_field: default_user_field(),
            id_field: default_id_field(),
            product_field: None,
            required_fields: Vec::new(),
            dedup_window_secs: None,
        }
    }
}

/// One YAML document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    #[serde(rename = "apiVersion", alias = "api_version")]
    pub api_version: String,

    pub kind: RuleKind,

    pub metadata: RuleMetadata,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<TriggerSpec>,

    /// Raw rule tree (`Rule` only).
    #[serde(default)]
    pub flow: serde_json::Value,

    /// Action sequence (`SharedFlow` only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ActionSpec>,
}

impl RuleDefinition {
    pub fn workflow_id(&self) -> &str {
        &self.metadata.workflow_id
    }

    /// Build a `Rule` document in code.
    pub fn rule(workflow_id: &str, trigger: TriggerSpec, flow: serde_json::Value) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: RuleKind::Rule,
            metadata: RuleMetadata {
                workflow_id: workflow_id.to_string(),
                version: default_version(),
                description: None,
            },
            trigger: Some(trigger),
            flow,
            actions: Vec::new(),
        }
    }

    /// Build a `SharedFlow` document in code.
    pub fn shared_flow(name: &str, actions: Vec<ActionSpec>) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: RuleKind::SharedFlow,
            metadata: RuleMetadata {
                workflow_id: name.to_string(),
                version: default_version(),
                description: None,
            },
            trigger: None,
            flow: serde_json::Value::Null,
            actions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_spec_defaults() {
        let spec: TriggerSpec = serde_json::from_value(serde_json::json!({
            "type": "subscription_created"
        }))
        .unwrap();
        assert_eq!(spec, TriggerSpec::new("subscription_created"));
        assert_eq!(spec.reentry, ReentryPolicy::OncePerUser);
        assert_eq!(spec.user_field, "user_id");
    }

    #[test]
    fn test_reentry_display_matches_serde() {
        for policy in [
            ReentryPolicy::OnceOnly,
            ReentryPolicy::OncePerUser,
            ReentryPolicy::OncePerProduct,
            ReentryPolicy::Always,
        ] {
            let json = serde_json::to_value(policy).unwrap();
            assert_eq!(json, serde_json::json!(policy.to_string()));
        }
    }
}
