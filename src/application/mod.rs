//! Application services built on the query cache.

pub mod error;
pub mod notes;
