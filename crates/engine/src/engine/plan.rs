//! Compiled plan types.
//!
//! A [`Plan`] is the flat, ordered step list produced by the rule compiler.
//! Steps are immutable once compiled and every execution carries its own copy
//! of the plan it was admitted with.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::evaluator::Predicate;

/// Registry key for step executors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Action,
    Delay,
    Condition,
    End,
    SharedFlow,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Action => write!(f, "action"),
            Self::Delay => write!(f, "delay"),
            Self::Condition => write!(f, "condition"),
            Self::End => write!(f, "end"),
            Self::SharedFlow => write!(f, "shared_flow"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub name: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelaySpec {
    pub duration_secs: i64,
}

/// Where a branch continues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BranchBody {
    /// Continue at a step that lives in the enclosing step list.
    Jump { step_id: String },
    /// Splice these steps in at runtime.
    Inline { steps: Vec<Step> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub label: String,
    pub predicate: Predicate,
    pub body: BranchBody,
}

/// Branches are tried in order; the first match wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionSpec {
    pub branches: Vec<Branch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<BranchBody>,
    /// Qualified label of the default chain, as carried by its steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EndSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedFlowSpec {
    pub flow: String,
}

/// Per-kind step payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepPayload {
    Action(ActionSpec),
    Delay(DelaySpec),
    Condition(ConditionSpec),
    End(EndSpec),
    SharedFlow(SharedFlowSpec),
}

/// One unit of work in a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    /// Label of the branch chain that produced this step; `None` on the trunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub payload: StepPayload,
}

impl Step {
    pub fn kind(&self) -> StepKind {
        match self.payload {
            StepPayload::Action(_) => StepKind::Action,
            StepPayload::Delay(_) => StepKind::Delay,
            StepPayload::Condition(_) => StepKind::Condition,
            StepPayload::End(_) => StepKind::End,
            StepPayload::SharedFlow(_) => StepKind::SharedFlow,
        }
    }

    pub fn is_suspending(&self) -> bool {
        self.kind() == StepKind::Delay
    }
}

/// The step that follows `id` in `steps`, if any.
pub fn next_in(steps: &[Step], id: &str) -> Option<String> {
    let index = steps.iter().position(|s| s.id == id)?;
    steps.get(index + 1).map(|s| s.id.clone())
}

/// Compiled form of one workflow version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub workflow_id: String,
    pub version: String,
    /// sha-256 of the canonical rule flow.
    pub source_hash: String,
    pub compiled_at: DateTime<Utc>,
    pub steps: Vec<Step>,
}

impl Plan {
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == id)
    }

    pub fn first_step(&self) -> Option<&Step> {
        self.steps.first()
    }

    /// Every step, including those nested in inline branch bodies.
    pub fn all_steps(&self) -> Vec<&Step> {
        let mut out = Vec::new();
        collect(&self.steps, &mut out);
        out
    }
}

fn collect<'a>(steps: &'a [Step], out: &mut Vec<&'a Step>) {
    for step in steps {
        out.push(step);
        if let StepPayload::Condition(ref cond) = step.payload {
            let bodies = cond
                .branches
                .iter()
                .map(|b| &b.body)
                .chain(cond.default.iter());
            for body in bodies {
                if let BranchBody::Inline { steps } = body {
                    collect(steps, out);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn action(id: &str, name: &str) -> Step {
        Step {
            id: id.to_string(),
            branch: None,
            payload: StepPayload::Action(ActionSpec {
                name: name.to_string(),
                params: json!({}),
            }),
        }
    }

    #[test]
    fn test_payload_is_tagged_by_kind() {
        let step = Step {
            id: "s002".into(),
            branch: Some("A".into()),
            payload: StepPayload::Delay(DelaySpec { duration_secs: 60 }),
        };
        let value = serde_json::to_value(&step).unwrap();
        assert_eq!(value["payload"]["kind"], "delay");
        assert_eq!(value["payload"]["duration_secs"], 60);
        assert_eq!(step.kind(), StepKind::Delay);
        assert!(step.is_suspending());

        let back: Step = serde_json::from_value(value).unwrap();
        assert_eq!(back, step);
    }

    #[test]
    fn test_next_in() {
        let steps = vec![action("s001", "a"), action("s002", "b")];
        assert_eq!(next_in(&steps, "s001").as_deref(), Some("s002"));
        assert_eq!(next_in(&steps, "s002"), None);
        assert_eq!(next_in(&steps, "zzz"), None);
    }

    #[test]
    fn test_all_steps_includes_inline_bodies() {
        let cond = Step {
            id: "s002".into(),
            branch: None,
            payload: StepPayload::Condition(ConditionSpec {
                branches: vec![Branch {
                    label: "A".into(),
                    predicate: Predicate::field_equals("package", json!("A")),
                    body: BranchBody::Inline {
                        steps: vec![action("s002.1.1", "x")],
                    },
                }],
                default: Some(BranchBody::Inline {
                    steps: vec![action("s002.2.1", "z")],
                }),
                default_label: Some("default".into()),
            }),
        };
        let plan = Plan {
            workflow_id: "wf".into(),
            version: "1".into(),
            source_hash: String::new(),
            compiled_at: Utc::now(),
            steps: vec![action("s001", "a"), cond],
        };
        let ids: Vec<&str> = plan.all_steps().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["s001", "s002", "s002.1.1", "s002.2.1"]);
        assert_eq!(plan.index_of("s002"), Some(1));
        assert!(plan.step("s002.1.1").is_none());
    }
}
