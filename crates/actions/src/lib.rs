//! Drip action senders.
//!
//! Action steps in a workflow plan name an action (`send_email`, `webhook`, ...)
//! and the engine dispatches it through an [`ActionRegistry`]. Senders perform
//! the outbound side effect and report back; they never panic or throw across
//! the registry boundary, a failure is just an unsuccessful [`ActionOutcome`].
//!
//! ## Senders
//!
//! - `webhook`: JSON POST to an arbitrary URL
//! - `send_email`: HTTP relay to an email provider
//! - `send_sms`: HTTP relay to an SMS provider
//! - `log`: writes the request to the tracing log (development fallback)

pub mod error;
pub mod registry;
pub mod result;
pub mod senders;

pub use error::ActionError;
pub use registry::{ActionRegistry, ActionRequest, ActionSender};
pub use result::{ActionOutcome, ActionReceipt, ActionStatus};
