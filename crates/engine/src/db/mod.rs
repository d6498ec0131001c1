//! PostgreSQL persistence for the Drip engine.
//!
//! Row models mirror the `drip` schema and convert into the store's domain
//! types. Query functions take any `PgExecutor` so they run on the pool or
//! inside a transaction.

pub mod models;
pub mod pool;
pub mod queries;

pub use pool::{create_pool, health_check, init_schema, DbPool};
