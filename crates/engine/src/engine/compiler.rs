//! Rule tree to plan compiler.
//!
//! The compiler walks the raw rule tree depth first, carrying the
//! continuation (everything that still has to run after the current node).
//! A branching node emits a condition step and then, for every arm, the arm
//! body followed by its own copy of the continuation, closed by an `end`.
//! Nothing is emitted after a branching node at its own level, so a chain in
//! the flat step list never runs into the next branch's chain.
//!
//! `if` arms become jumps into the enclosing step list. `switch` cases are
//! compiled into inline step lists carried by the condition step and spliced
//! into the execution when the case is chosen.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;

use super::evaluator::Predicate;
use super::plan::{
    ActionSpec, Branch, BranchBody, ConditionSpec, DelaySpec, EndSpec, Plan, SharedFlowSpec, Step,
    StepPayload,
};
use crate::error::{AppError, AppResult};
use crate::rules::RuleDefinition;

/// Upper bound on emitted steps; continuation copies grow with nesting.
const MAX_STEPS: usize = 5_000;

/// Compile a rule document into a plan.
pub fn compile(rule: &RuleDefinition, compiled_at: DateTime<Utc>) -> AppResult<Plan> {
    let steps = compile_flow(&rule.flow)?;

    tracing::debug!(
        workflow_id = %rule.workflow_id(),
        version = %rule.metadata.version,
        steps = steps.len(),
        "Rule compiled"
    );

    Ok(Plan {
        workflow_id: rule.workflow_id().to_string(),
        version: rule.metadata.version.clone(),
        source_hash: source_hash(rule)?,
        compiled_at,
        steps,
    })
}

/// Compile a bare rule tree.
pub fn compile_flow(flow: &serde_json::Value) -> AppResult<Vec<Step>> {
    let mut compiler = Compiler::default();
    let mut emitter = Emitter::root();
    let work = VecDeque::from([Work {
        node: flow,
        path: "root".to_string(),
    }]);
    compiler.emit_chain(&mut emitter, work, None)?;
    Ok(emitter.steps)
}

fn source_hash(rule: &RuleDefinition) -> AppResult<String> {
    let canonical = serde_json::to_vec(&serde_json::json!({
        "workflow_id": rule.workflow_id(),
        "version": rule.metadata.version,
        "trigger": rule.trigger,
        "flow": rule.flow,
    }))?;
    Ok(format!("{:x}", Sha256::digest(&canonical)))
}

#[derive(Clone)]
struct Work<'a> {
    node: &'a serde_json::Value,
    path: String,
}

/// Allocates ids and collects steps for one step list.
struct Emitter {
    prefix: Option<String>,
    counter: usize,
    steps: Vec<Step>,
}

impl Emitter {
    fn root() -> Self {
        Self {
            prefix: None,
            counter: 0,
            steps: Vec::new(),
        }
    }

    fn inline(prefix: String) -> Self {
        Self {
            prefix: Some(prefix),
            counter: 0,
            steps: Vec::new(),
        }
    }

    fn format_id(&self, n: usize) -> String {
        match self.prefix {
            None => format!("s{:03}", n),
            Some(ref p) => format!("{}.{}", p, n),
        }
    }

    /// Id the next pushed step will get.
    fn peek_id(&self) -> String {
        self.format_id(self.counter + 1)
    }

    fn alloc_id(&mut self) -> String {
        self.counter += 1;
        self.format_id(self.counter)
    }

    fn push(&mut self, branch: &Option<String>, payload: StepPayload) {
        let id = self.alloc_id();
        self.steps.push(Step {
            id,
            branch: branch.clone(),
            payload,
        });
    }
}

#[derive(Default)]
struct Compiler {
    emitted: usize,
}

impl Compiler {
    fn emit_chain<'a>(
        &mut self,
        em: &mut Emitter,
        mut work: VecDeque<Work<'a>>,
        label: Option<String>,
    ) -> AppResult<()> {
        while let Some(item) = work.pop_front() {
            self.emitted += 1;
            if self.emitted > MAX_STEPS {
                return Err(AppError::compile(
                    &item.path,
                    format!("plan exceeds {} steps", MAX_STEPS),
                ));
            }

            let (kind, body) = node_parts(item.node, &item.path)?;
            match kind {
                NodeKind::Sequence(children, seg) => {
                    for (i, child) in children.iter().enumerate().rev() {
                        work.push_front(Work {
                            node: child,
                            path: format!("{}{}[{}]", item.path, seg, i),
                        });
                    }
                }
                NodeKind::Named("action") => {
                    em.push(&label, StepPayload::Action(parse_action(body, &item.path)?));
                }
                NodeKind::Named("delay") => {
                    em.push(&label, StepPayload::Delay(parse_delay(body, &item.path)?));
                }
                NodeKind::Named("flow") => {
                    em.push(&label, StepPayload::SharedFlow(parse_flow(body, &item.path)?));
                }
                NodeKind::Named("end") => {
                    em.push(&label, StepPayload::End(parse_end(body, &item.path)?));
                    if let Some(dropped) = work.front() {
                        tracing::warn!(
                            path = %dropped.path,
                            count = work.len(),
                            "Unreachable nodes after end dropped"
                        );
                    }
                    return Ok(());
                }
                NodeKind::Named("if") => {
                    return self.emit_if(em, body, &item.path, work, label);
                }
                NodeKind::Named("switch") => {
                    return self.emit_switch(em, body, &item.path, work, label);
                }
                NodeKind::Named("trigger") => {
                    let first_of_root = item.path == "root.and[0]" || item.path == "root[0]";
                    if !first_of_root {
                        return Err(AppError::compile(
                            &item.path,
                            "trigger is only allowed as the first node of the root sequence",
                        ));
                    }
                }
                NodeKind::Named(other) => {
                    return Err(AppError::compile(
                        &item.path,
                        format!("unknown node kind '{}'", other),
                    ));
                }
            }
        }

        em.push(&label, StepPayload::End(EndSpec::default()));
        Ok(())
    }

    fn emit_if<'a>(
        &mut self,
        em: &mut Emitter,
        body: &'a serde_json::Value,
        path: &str,
        rest: VecDeque<Work<'a>>,
        label: Option<String>,
    ) -> AppResult<()> {
        let arms = body
            .as_array()
            .filter(|a| !a.is_empty())
            .ok_or_else(|| AppError::compile(path, "if expects a non-empty list of arms"))?;

        let cond_id = em.alloc_id();
        let cond_index = em.steps.len();
        em.steps.push(Step {
            id: cond_id,
            branch: label.clone(),
            payload: StepPayload::Condition(ConditionSpec {
                branches: Vec::new(),
                default: None,
                default_label: None,
            }),
        });

        let mut branches = Vec::new();
        let mut default = None;
        let mut default_label = None;

        for (i, arm) in arms.iter().enumerate() {
            let arm_path = format!("{}.if[{}]", path, i);
            let obj = arm
                .as_object()
                .ok_or_else(|| AppError::compile(&arm_path, "arm must be a mapping"))?;

            if let Some(else_node) = obj.get("else") {
                if i != arms.len() - 1 || obj.len() != 1 {
                    return Err(AppError::compile(
                        &arm_path,
                        "else must be the last arm and stand alone",
                    ));
                }
                if branches.is_empty() {
                    return Err(AppError::compile(
                        &arm_path,
                        "if needs at least one 'when' arm before else",
                    ));
                }
                let else_label = qualify(&label, "else");
                let target = em.peek_id();
                let mut chain = rest.clone();
                chain.push_front(Work {
                    node: else_node,
                    path: format!("{}.else", arm_path),
                });
                self.emit_chain(em, chain, Some(else_label.clone()))?;
                default = Some(BranchBody::Jump { step_id: target });
                default_label = Some(else_label);
                continue;
            }

            if let Some(key) = obj
                .keys()
                .find(|k| !matches!(k.as_str(), "when" | "then" | "label"))
            {
                return Err(AppError::compile(
                    &arm_path,
                    format!("unexpected key '{}' in if arm", key),
                ));
            }
            let when = obj
                .get("when")
                .ok_or_else(|| AppError::compile(&arm_path, "arm requires 'when'"))?;
            let then = obj
                .get("then")
                .ok_or_else(|| AppError::compile(&arm_path, "arm requires 'then'"))?;
            let predicate = Predicate::from_rule(when)
                .map_err(|m| AppError::compile(format!("{}.when", arm_path), m))?;

            let arm_label = obj
                .get("label")
                .and_then(|l| l.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| format!("branch_{}", i + 1));
            let qualified = qualify(&label, &arm_label);

            let target = em.peek_id();
            let mut chain = rest.clone();
            chain.push_front(Work {
                node: then,
                path: format!("{}.then", arm_path),
            });
            self.emit_chain(em, chain, Some(qualified.clone()))?;

            branches.push(Branch {
                label: qualified,
                predicate,
                body: BranchBody::Jump { step_id: target },
            });
        }

        em.steps[cond_index].payload = StepPayload::Condition(ConditionSpec {
            branches,
            default,
            default_label,
        });
        Ok(())
    }

    fn emit_switch<'a>(
        &mut self,
        em: &mut Emitter,
        body: &'a serde_json::Value,
        path: &str,
        rest: VecDeque<Work<'a>>,
        label: Option<String>,
    ) -> AppResult<()> {
        let switch_path = format!("{}.switch", path);
        let obj = body
            .as_object()
            .ok_or_else(|| AppError::compile(&switch_path, "switch must be a mapping"))?;

        let on = obj
            .get("on")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| {
                AppError::compile(format!("{}.on", switch_path), "switch requires a field name")
            })?;
        let cases = obj
            .get("cases")
            .and_then(|v| v.as_array())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                AppError::compile(
                    format!("{}.cases", switch_path),
                    "switch requires a non-empty list of cases",
                )
            })?;

        let cond_id = em.alloc_id();
        let mut branches = Vec::with_capacity(cases.len());

        for (j, case) in cases.iter().enumerate() {
            let case_path = format!("{}.cases[{}]", switch_path, j);
            let equals = case
                .get("equals")
                .ok_or_else(|| AppError::compile(&case_path, "case requires 'equals'"))?;
            let then = case
                .get("then")
                .ok_or_else(|| AppError::compile(&case_path, "case requires 'then'"))?;

            let case_label = case
                .get("label")
                .and_then(|l| l.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| value_label(equals));
            let qualified = qualify(&label, &case_label);

            let steps = self.emit_inline(
                format!("{}.{}", cond_id, j + 1),
                then,
                format!("{}.then", case_path),
                &rest,
                qualified.clone(),
            )?;

            branches.push(Branch {
                label: qualified,
                predicate: Predicate::field_equals(on, equals.clone()),
                body: BranchBody::Inline { steps },
            });
        }

        let (default, default_label) = match obj.get("default") {
            Some(node) => {
                let default_label = qualify(&label, "default");
                let steps = self.emit_inline(
                    format!("{}.{}", cond_id, cases.len() + 1),
                    node,
                    format!("{}.default", switch_path),
                    &rest,
                    default_label.clone(),
                )?;
                (Some(BranchBody::Inline { steps }), Some(default_label))
            }
            None => (None, None),
        };

        em.steps.push(Step {
            id: cond_id,
            branch: label,
            payload: StepPayload::Condition(ConditionSpec {
                branches,
                default,
                default_label,
            }),
        });
        Ok(())
    }

    fn emit_inline<'a>(
        &mut self,
        prefix: String,
        node: &'a serde_json::Value,
        path: String,
        rest: &VecDeque<Work<'a>>,
        label: String,
    ) -> AppResult<Vec<Step>> {
        let mut sub = Emitter::inline(prefix);
        let mut chain = rest.clone();
        chain.push_front(Work { node, path });
        self.emit_chain(&mut sub, chain, Some(label))?;
        Ok(sub.steps)
    }
}

enum NodeKind<'a> {
    /// Child list plus the path segment used for children.
    Sequence(&'a [serde_json::Value], &'static str),
    Named(&'a str),
}

fn node_parts<'a>(
    node: &'a serde_json::Value,
    path: &str,
) -> AppResult<(NodeKind<'a>, &'a serde_json::Value)> {
    const NULL: &serde_json::Value = &serde_json::Value::Null;

    match node {
        serde_json::Value::String(s) if s == "end" => Ok((NodeKind::Named("end"), NULL)),
        serde_json::Value::Array(items) => Ok((NodeKind::Sequence(items, ""), NULL)),
        serde_json::Value::Object(map) if map.len() == 1 => {
            let (key, body) = map
                .iter()
                .next()
                .ok_or_else(|| AppError::compile(path, "empty node"))?;
            if key == "and" {
                let children = body
                    .as_array()
                    .ok_or_else(|| AppError::compile(path, "and expects a list"))?;
                return Ok((NodeKind::Sequence(children, ".and"), body));
            }
            Ok((NodeKind::Named(key.as_str()), body))
        }
        serde_json::Value::Object(map) => Err(AppError::compile(
            path,
            format!("expected a single-key node, found {} keys", map.len()),
        )),
        other => Err(AppError::compile(
            path,
            format!("expected a node, found {}", type_name(other)),
        )),
    }
}

fn parse_action(body: &serde_json::Value, path: &str) -> AppResult<ActionSpec> {
    let (name, params) = match body {
        serde_json::Value::String(name) => (name.as_str(), serde_json::json!({})),
        serde_json::Value::Object(map) => {
            if let Some(key) = map.keys().find(|k| !matches!(k.as_str(), "name" | "params")) {
                return Err(AppError::compile(
                    path,
                    format!("unexpected key '{}' in action", key),
                ));
            }
            let name = map.get("name").and_then(|n| n.as_str()).unwrap_or_default();
            let params = match map.get("params") {
                None | Some(serde_json::Value::Null) => serde_json::json!({}),
                Some(p @ serde_json::Value::Object(_)) => p.clone(),
                Some(_) => {
                    return Err(AppError::compile(
                        format!("{}.params", path),
                        "params must be a mapping",
                    ))
                }
            };
            (name, params)
        }
        other => {
            return Err(AppError::compile(
                path,
                format!("action expects a name or mapping, found {}", type_name(other)),
            ))
        }
    };

    if name.trim().is_empty() {
        return Err(AppError::compile(path, "action requires a name"));
    }

    Ok(ActionSpec {
        name: name.to_string(),
        params,
    })
}

fn parse_delay(body: &serde_json::Value, path: &str) -> AppResult<DelaySpec> {
    let duration_secs = match body {
        serde_json::Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| AppError::compile(path, "delay must be a whole number of seconds"))?,
        serde_json::Value::Object(map) => {
            let mut total: i64 = 0;
            for (unit, amount) in map {
                let factor = match unit.as_str() {
                    "seconds" => 1,
                    "minutes" => 60,
                    "hours" => 3_600,
                    "days" => 86_400,
                    other => {
                        return Err(AppError::compile(
                            path,
                            format!("unknown delay unit '{}'", other),
                        ))
                    }
                };
                let amount = amount.as_i64().ok_or_else(|| {
                    AppError::compile(
                        format!("{}.{}", path, unit),
                        "delay amount must be an integer",
                    )
                })?;
                total = amount
                    .checked_mul(factor)
                    .and_then(|v| total.checked_add(v))
                    .ok_or_else(|| AppError::compile(path, "delay is too long"))?;
            }
            total
        }
        other => {
            return Err(AppError::compile(
                path,
                format!("delay expects seconds or a unit mapping, found {}", type_name(other)),
            ))
        }
    };

    if duration_secs <= 0 {
        return Err(AppError::compile(path, "delay must be positive"));
    }
    Ok(DelaySpec { duration_secs })
}

fn parse_flow(body: &serde_json::Value, path: &str) -> AppResult<SharedFlowSpec> {
    let name = match body {
        serde_json::Value::String(s) => s.as_str(),
        serde_json::Value::Object(map) => {
            map.get("name").and_then(|n| n.as_str()).unwrap_or_default()
        }
        _ => "",
    };
    if name.trim().is_empty() {
        return Err(AppError::compile(path, "flow requires a shared flow name"));
    }
    Ok(SharedFlowSpec {
        flow: name.to_string(),
    })
}

fn parse_end(body: &serde_json::Value, path: &str) -> AppResult<EndSpec> {
    match body {
        serde_json::Value::Null => Ok(EndSpec::default()),
        serde_json::Value::String(reason) => Ok(EndSpec {
            reason: Some(reason.clone()),
        }),
        serde_json::Value::Object(map) => Ok(EndSpec {
            reason: map
                .get("reason")
                .and_then(|r| r.as_str())
                .map(str::to_string),
        }),
        other => Err(AppError::compile(
            path,
            format!("end expects a mapping, found {}", type_name(other)),
        )),
    }
}

fn qualify(parent: &Option<String>, label: &str) -> String {
    match parent {
        Some(p) => format!("{}/{}", p, label),
        None => label.to_string(),
    }
}

fn value_label(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "a list",
        serde_json::Value::Object(_) => "a mapping",
    }
}
