//! Rule YAML parser.
//!
//! A file may hold several `---` separated documents.

use serde::Deserialize;
use std::collections::HashSet;

use super::types::{ReentryPolicy, RuleDefinition, RuleKind, API_VERSION};
use crate::error::{AppError, AppResult};

/// Parse and validate every document in `yaml_content`.
pub fn parse_rules(yaml_content: &str) -> AppResult<Vec<RuleDefinition>> {
    let mut rules = Vec::new();
    for document in serde_yaml::Deserializer::from_str(yaml_content) {
        let value = serde_yaml::Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }
        let rule: RuleDefinition = serde_yaml::from_value(value)?;
        validate_rule(&rule)?;
        rules.push(rule);
    }
    Ok(rules)
}

/// Structural checks that do not need the compiler.
pub fn validate_rule(rule: &RuleDefinition) -> AppResult<()> {
    if rule.api_version != API_VERSION {
        return Err(AppError::Validation(format!(
            "Unsupported API version: {}. Expected {}",
            rule.api_version, API_VERSION
        )));
    }

    let id = rule.workflow_id();
    if id.trim().is_empty() {
        return Err(AppError::Validation(
            "metadata.workflow_id must not be empty".to_string(),
        ));
    }

    match rule.kind {
        RuleKind::Rule => {
            let trigger = rule.trigger.as_ref().ok_or_else(|| {
                AppError::Validation(format!("Rule '{}': missing trigger", id))
            })?;
            if trigger.trigger_type.trim().is_empty() {
                return Err(AppError::Validation(format!(
                    "Rule '{}': trigger.type must not be empty",
                    id
                )));
            }
            if trigger.reentry == ReentryPolicy::OncePerProduct && trigger.product_field.is_none()
            {
                return Err(AppError::Validation(format!(
                    "Rule '{}': once_per_product requires trigger.product_field",
                    id
                )));
            }
            if rule.flow.is_null() {
                return Err(AppError::Validation(format!("Rule '{}': missing flow", id)));
            }
            if !rule.actions.is_empty() {
                return Err(AppError::Validation(format!(
                    "Rule '{}': actions are only allowed on SharedFlow documents",
                    id
                )));
            }
        }
        RuleKind::SharedFlow => {
            if rule.actions.is_empty() {
                return Err(AppError::Validation(format!(
                    "SharedFlow '{}': must have at least one action",
                    id
                )));
            }
            if let Some(pos) = rule.actions.iter().position(|a| a.name.trim().is_empty()) {
                return Err(AppError::Validation(format!(
                    "SharedFlow '{}': actions[{}] has an empty name",
                    id, pos
                )));
            }
        }
    }

    Ok(())
}

/// Reject duplicate workflow ids and duplicate trigger types across a set.
pub fn validate_rule_set(rules: &[RuleDefinition]) -> AppResult<()> {
    let mut ids = HashSet::new();
    let mut trigger_types = HashSet::new();

    for rule in rules {
        if !ids.insert((rule.kind, rule.workflow_id())) {
            return Err(AppError::Validation(format!(
                "Duplicate {:?} id: {}",
                rule.kind,
                rule.workflow_id()
            )));
        }
        if let Some(ref trigger) = rule.trigger {
            if !trigger_types.insert(trigger.trigger_type.as_str()) {
                return Err(AppError::Validation(format!(
                    "Trigger type '{}' is claimed by more than one rule",
                    trigger.trigger_type
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const WELCOME: &str = r#"
apiVersion: drip.io/v1
kind: Rule
metadata:
  workflow_id: subscription_welcome
  version: "3"
trigger:
  type: subscription_created
  reentry: once_per_product
  product_field: product_id
  required_fields: [email]
flow:
  and:
    - action: { name: send_email, params: { to: "{{ trigger.email }}", subject: Hi, body: Welcome } }
    - delay: { days: 2 }
    - end: {}
---
apiVersion: drip.io/v1
kind: SharedFlow
metadata:
  name: notify_ops
actions:
  - name: webhook
    params: { url: "https://ops.local/hook" }
"#;

    #[test]
    fn test_parse_multi_document() {
        let rules = parse_rules(WELCOME).unwrap();
        assert_eq!(rules.len(), 2);

        let rule = &rules[0];
        assert_eq!(rule.kind, RuleKind::Rule);
        assert_eq!(rule.metadata.version, "3");
        let trigger = rule.trigger.as_ref().unwrap();
        assert_eq!(trigger.reentry, ReentryPolicy::OncePerProduct);
        assert_eq!(trigger.required_fields, vec!["email".to_string()]);
        assert!(rule.flow.get("and").is_some());

        let shared = &rules[1];
        assert_eq!(shared.kind, RuleKind::SharedFlow);
        assert_eq!(shared.workflow_id(), "notify_ops");
        assert_eq!(shared.actions[0].name, "webhook");

        validate_rule_set(&rules).unwrap();
    }

    #[test]
    fn test_rejects_wrong_api_version() {
        let yaml = WELCOME.replacen("drip.io/v1", "drip.io/v0", 1);
        let err = parse_rules(&yaml).unwrap_err();
        assert!(err.to_string().contains("Unsupported API version"));
    }

    #[test]
    fn test_once_per_product_needs_field() {
        let yaml = WELCOME.replacen("  product_field: product_id\n", "", 1);
        let err = parse_rules(&yaml).unwrap_err();
        assert!(err.to_string().contains("product_field"));
    }

    #[test]
    fn test_shared_flow_without_actions() {
        let yaml = r#"
apiVersion: drip.io/v1
kind: SharedFlow
metadata:
  name: empty
"#;
        assert!(matches!(parse_rules(yaml), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_duplicate_trigger_types() {
        let mut rules = parse_rules(WELCOME).unwrap();
        let mut copy = rules[0].clone();
        copy.metadata.workflow_id = "other".to_string();
        rules.push(copy);
        let err = validate_rule_set(&rules).unwrap_err();
        assert!(err.to_string().contains("more than one rule"));
    }

    #[test]
    fn test_malformed_yaml_is_parse_error() {
        assert!(matches!(parse_rules("kind: [unclosed"), Err(AppError::Parse(_))));
    }
}
