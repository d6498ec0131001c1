//! Where rule documents come from.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use super::parser::{parse_rules, validate_rule, validate_rule_set};
use super::types::{RuleDefinition, RuleKind};
use crate::error::{AppError, AppResult};

#[async_trait]
pub trait RuleSource: Send + Sync {
    /// All documents, rules and shared flows.
    async fn load_all(&self) -> AppResult<Vec<RuleDefinition>>;

    async fn load_rule(&self, workflow_id: &str) -> AppResult<Option<RuleDefinition>> {
        Ok(self
            .load_all()
            .await?
            .into_iter()
            .find(|r| r.kind == RuleKind::Rule && r.workflow_id() == workflow_id))
    }

    async fn list_rules(&self) -> AppResult<Vec<RuleDefinition>> {
        Ok(self
            .load_all()
            .await?
            .into_iter()
            .filter(|r| r.kind == RuleKind::Rule)
            .collect())
    }

    async fn shared_flows(&self) -> AppResult<Vec<RuleDefinition>> {
        Ok(self
            .load_all()
            .await?
            .into_iter()
            .filter(|r| r.kind == RuleKind::SharedFlow)
            .collect())
    }
}

/// In-process rule set.
#[derive(Debug, Default)]
pub struct MemoryRuleSource {
    rules: RwLock<HashMap<(RuleKind, String), RuleDefinition>>,
}

impl MemoryRuleSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: Vec<RuleDefinition>) -> AppResult<Self> {
        validate_rule_set(&rules)?;
        let mut map = HashMap::new();
        for rule in rules {
            validate_rule(&rule)?;
            map.insert((rule.kind, rule.workflow_id().to_string()), rule);
        }
        Ok(Self {
            rules: RwLock::new(map),
        })
    }

    /// Insert or replace a document. New admissions see it immediately.
    pub async fn upsert(&self, rule: RuleDefinition) -> AppResult<()> {
        validate_rule(&rule)?;
        self.rules
            .write()
            .await
            .insert((rule.kind, rule.workflow_id().to_string()), rule);
        Ok(())
    }
}

#[async_trait]
impl RuleSource for MemoryRuleSource {
    async fn load_all(&self) -> AppResult<Vec<RuleDefinition>> {
        let mut rules: Vec<RuleDefinition> = self.rules.read().await.values().cloned().collect();
        rules.sort_by(|a, b| a.workflow_id().cmp(b.workflow_id()));
        Ok(rules)
    }
}

/// Directory of `*.yaml` / `*.yml` files, re-read on every call so edits
/// reach the next admission without a restart.
#[derive(Debug, Clone)]
pub struct FileRuleSource {
    dir: PathBuf,
}

impl FileRuleSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl RuleSource for FileRuleSource {
    async fn load_all(&self) -> AppResult<Vec<RuleDefinition>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(|e| {
            AppError::Config(format!("cannot read rules dir {}: {}", self.dir.display(), e))
        })?;

        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AppError::Internal(e.to_string()))?
        {
            let path = entry.path();
            let is_yaml = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext == "yaml" || ext == "yml");
            if is_yaml {
                paths.push(path);
            }
        }
        paths.sort();

        let mut rules = Vec::new();
        for path in paths {
            let content = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| AppError::Internal(format!("{}: {}", path.display(), e)))?;
            let parsed = parse_rules(&content).map_err(|e| match e {
                AppError::Parse(msg) => AppError::Parse(format!("{}: {}", path.display(), msg)),
                AppError::Validation(msg) => {
                    AppError::Validation(format!("{}: {}", path.display(), msg))
                }
                other => other,
            })?;
            rules.extend(parsed);
        }

        validate_rule_set(&rules)?;
        Ok(rules)
    }
}
