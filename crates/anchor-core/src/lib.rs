//! Core types and trait definitions for the Anchor project metadata graph.
//!
//! This crate is deliberately free of database dependencies. It owns the
//! entity model, the reservation lifecycle rules, the call-graph algorithms
//! and integrity planning; backends persist the results.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod audit;
pub mod callgraph;
pub mod checksum;
pub mod entity;
pub mod error;
pub mod integrity;
pub mod lifecycle;
pub mod store;

pub use error::{Error, Result};
