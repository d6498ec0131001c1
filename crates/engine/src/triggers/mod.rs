//! Trigger handling: mapping raw events to executions.
//!
//! - **Registry**: trigger type to handler lookup
//! - **Declarative**: handlers configured from a rule's `trigger` block
//! - **Admission**: validate, dedup and create executions

pub mod admission;
pub mod declarative;
pub mod registry;

pub use admission::{AdmissionController, AdmissionOutcome};
pub use declarative::DeclarativeTrigger;
pub use registry::{TriggerContext, TriggerHandler, TriggerRegistry};
