//! Request-scoped query cache for a notes server, backed by SQLite.

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;
pub mod util;
