//! Configuration loaded from environment variables with `envy`.

mod app;
mod database;
mod engine;
mod senders;

pub use app::{AppConfig, StoreBackend};
pub use database::DatabaseConfig;
pub use engine::EngineConfig;
pub use senders::SenderConfig;
