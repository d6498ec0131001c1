//! Built-in action senders.

mod email;
mod log;
mod relay;
mod sms;
mod webhook;

pub use email::EmailSender;
pub use log::LogSender;
pub use relay::RelayConfig;
pub use sms::SmsSender;
pub use webhook::WebhookSender;
