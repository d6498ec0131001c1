//! Rule documents: the declarative source of workflow plans.

pub mod parser;
pub mod source;
pub mod types;

pub use parser::{parse_rules, validate_rule, validate_rule_set};
pub use source::{FileRuleSource, MemoryRuleSource, RuleSource};
pub use types::{ReentryPolicy, RuleDefinition, RuleKind, RuleMetadata, TriggerSpec};
