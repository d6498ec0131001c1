//! Row models for the `drip` schema.

pub mod delay;
pub mod execution;
pub mod trigger;

pub use delay::DelayRow;
pub use execution::ExecutionRow;
pub use trigger::TriggerEventRow;
