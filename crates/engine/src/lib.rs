//! Drip Engine Library
//!
//! Durable workflow orchestration for long-running customer journeys:
//!
//! - **Rule Compilation**: Lower YAML rule trees into flat, addressable plans
//! - **Step Execution**: Run actions, delays, branches and shared flows
//! - **Durable State**: Persist every step transition with its history
//! - **Delays**: Suspend for days and resume at exactly the next step
//! - **Admission**: Validate and deduplicate triggers before starting executions
//!
//! ## Architecture
//!
//! Executions are driven step by step by the [`engine::WorkflowEngine`]. After
//! each step the engine commits a single state change through the
//! [`store::ExecutionStore`]. Delays become pending delay rows that a coarse
//! [`poller::Poller`] resumes once they are due, so no timer is held in
//! memory between steps.
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading from environment variables
//! - [`db`]: Postgres pool, schema and queries
//! - [`engine`]: Compiler, executors, state machine and orchestrator
//! - [`error`]: Custom error types with Axum integration
//! - [`handlers`]: HTTP route handlers
//! - [`rules`]: Rule documents and where they come from
//! - [`store`]: Execution state persistence
//! - [`triggers`]: Trigger validation and admission

pub mod clock;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod poller;
pub mod result_ext;
pub mod rules;
pub mod state;
pub mod store;
pub mod template;
pub mod triggers;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{AppError, AppResult};
pub use result_ext::ResultExt;
