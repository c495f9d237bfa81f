//! SQLite backend for the Anchor project metadata graph.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on one dedicated
//! thread. That thread is the single writer: every mutation runs there inside
//! its own transaction, and graph queries read a consistent snapshot.

mod encode;
mod queries;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;

#[cfg(test)]
mod tests;
