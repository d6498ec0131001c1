//! Workflow execution engine.
//!
//! - **Compiler**: Lowers rule flows into flat, addressable plans
//! - **Evaluator**: Evaluates branch predicates against the execution context
//! - **Executors**: Runs one step of each kind
//! - **Machine**: Execution status transitions
//! - **Orchestrator**: Drives executions and resumes them from delays

pub mod compiler;
pub mod evaluator;
pub mod executors;
pub mod machine;
pub mod orchestrator;
pub mod plan;

#[cfg(test)]
mod scenarios;

pub use compiler::{compile, compile_flow};
pub use evaluator::{evaluate, Predicate};
pub use executors::{ExecutionContext, ExecutorRegistry, StepExecutor, StepResult};
pub use machine::{transition, ExecutionEvent, ExecutionStatus};
pub use orchestrator::{ResumeOutcome, WorkflowEngine};
pub use plan::{Plan, Step, StepKind};
