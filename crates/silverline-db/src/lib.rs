//! Storage layer for the Silverline call-flow engine.
//!
//! Provides the pooled SQLite handle every other crate receives, plus the
//! embedded schema. Call sessions, transcripts, identity records and the
//! knowledge corpus all live in one database file created through versioned
//! migrations managed here.
//!
//! # Design decisions
//!
//! - **SQLite with WAL mode**: webhooks are short independent requests that
//!   mostly read, then append a few rows. WAL lets those readers proceed
//!   while one writer commits.
//! - **`r2d2` connection pool**: handlers borrow a connection inside
//!   `spawn_blocking` and return it when the request ends.
//! - **Embedded migrations**: SQL files are compiled into the binary via
//!   `include_str!`, so the schema ships with the server that reads it.

mod migrations;
mod pool;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
