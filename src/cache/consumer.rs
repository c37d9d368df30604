//! Driving synchronous passes over the cache to completion.
//!
//! A pass is any closure that reads through the cache and bails out with an
//! [`Interrupt`] as soon as a read is not ready. [`resolve`] awaits the
//! pending handle and re-runs the identical pass until it completes.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use super::error::CacheError;
use super::record::{ExecutionError, PendingHandle};

/// Why a pass stopped before producing its result.
#[derive(Debug)]
pub enum Interrupt<E> {
    Suspend(PendingHandle),
    Execution(Arc<ExecutionError<E>>),
    Cache(CacheError),
}

impl<E> From<CacheError> for Interrupt<E> {
    fn from(error: CacheError) -> Self {
        Self::Cache(error)
    }
}

#[derive(Debug, Error)]
pub enum ResolveError<E: std::error::Error + 'static> {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("query execution failed: {0}")]
    Execution(Arc<ExecutionError<E>>),
    #[error("pass still suspended after {passes} attempts")]
    TooManyPasses { passes: usize },
}

impl<E: std::error::Error + 'static> ResolveError<E> {
    /// The executor's own error, when that is what stopped the pass.
    pub fn failure(&self) -> Option<&E> {
        match self {
            Self::Execution(error) => error.failure(),
            _ => None,
        }
    }
}

/// Run `pass` until it completes, waiting on each suspension in between.
///
/// At most `max_passes` attempts are made; a pass that suspends on every
/// attempt is almost always varying its parameters between attempts.
pub async fn resolve<R, E, F>(mut pass: F, max_passes: usize) -> Result<R, ResolveError<E>>
where
    F: FnMut() -> Result<R, Interrupt<E>>,
    E: std::error::Error + 'static,
{
    for attempt in 1..=max_passes {
        match pass() {
            Ok(result) => return Ok(result),
            Err(Interrupt::Suspend(handle)) => {
                debug!(attempt, "pass suspended on pending query");
                handle.await;
            }
            Err(Interrupt::Execution(error)) => return Err(ResolveError::Execution(error)),
            Err(Interrupt::Cache(error)) => return Err(ResolveError::Cache(error)),
        }
    }
    Err(ResolveError::TooManyPasses {
        passes: max_passes,
    })
}
