//! Computation records: the lifecycle of one executor invocation.
//!
//! A record is created `Pending` before the executor's result is known and
//! moves exactly once to `Resolved` or `Rejected`. The only writer of that
//! transition is the settle future built in [`ComputationRecord::start`].

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use metrics::counter;
use thiserror::Error;

use super::lock::mutex_lock;

const SOURCE: &str = "cache::record";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    Pending,
    Resolved,
    Rejected,
}

/// Failure captured into a rejected record.
#[derive(Debug, Error)]
pub enum ExecutionError<E> {
    #[error(transparent)]
    Failed(E),
    #[error("query executor panicked: {message}")]
    Panicked { message: String },
}

impl<E> ExecutionError<E> {
    /// The executor's own error, if it returned one rather than panicking.
    pub fn failure(&self) -> Option<&E> {
        match self {
            Self::Failed(error) => Some(error),
            Self::Panicked { .. } => None,
        }
    }
}

/// Awaitable that completes once the record it was issued for has settled.
///
/// Every clone refers to the same underlying executor future, which runs at
/// most once no matter how many clones are awaited.
#[derive(Clone)]
pub struct PendingHandle {
    inner: Shared<BoxFuture<'static, ()>>,
}

impl PendingHandle {
    pub fn is_settled(&self) -> bool {
        self.inner.peek().is_some()
    }

    /// Whether both handles wait on the same executor invocation.
    pub fn same_as(&self, other: &PendingHandle) -> bool {
        self.inner.ptr_eq(&other.inner)
    }
}

impl Future for PendingHandle {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.inner.poll_unpin(cx)
    }
}

impl fmt::Debug for PendingHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingHandle")
            .field("settled", &self.is_settled())
            .finish()
    }
}

pub(crate) enum RecordState<T, E> {
    Pending(PendingHandle),
    Resolved(Arc<T>),
    Rejected(Arc<ExecutionError<E>>),
}

impl<T, E> Clone for RecordState<T, E> {
    fn clone(&self) -> Self {
        match self {
            Self::Pending(handle) => Self::Pending(handle.clone()),
            Self::Resolved(value) => Self::Resolved(Arc::clone(value)),
            Self::Rejected(error) => Self::Rejected(Arc::clone(error)),
        }
    }
}

/// Tracked result of one (operation, parameters) executor invocation.
pub struct ComputationRecord<T, E> {
    state: Mutex<RecordState<T, E>>,
}

impl<T, E> ComputationRecord<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Create a pending record whose handle drives `future` to completion.
    ///
    /// The settle future only holds a weak reference, so a record dropped with
    /// its domain is simply not written when the executor finishes.
    pub(crate) fn start(future: BoxFuture<'static, Result<T, E>>) -> Arc<Self> {
        Arc::new_cyclic(|record: &Weak<Self>| {
            let record = record.clone();
            let settle = async move {
                let settled = match AssertUnwindSafe(future).catch_unwind().await {
                    Ok(Ok(value)) => RecordState::Resolved(Arc::new(value)),
                    Ok(Err(error)) => {
                        RecordState::Rejected(Arc::new(ExecutionError::Failed(error)))
                    }
                    Err(payload) => RecordState::Rejected(Arc::new(ExecutionError::Panicked {
                        message: panic_message(payload.as_ref()),
                    })),
                };
                if let Some(record) = record.upgrade() {
                    record.settle(settled);
                }
            };

            let handle = PendingHandle {
                inner: settle.boxed().shared(),
            };
            Self {
                state: Mutex::new(RecordState::Pending(handle)),
            }
        })
    }
}

impl<T, E> ComputationRecord<T, E> {
    pub fn status(&self) -> RecordStatus {
        match &*mutex_lock(&self.state, SOURCE, "status") {
            RecordState::Pending(_) => RecordStatus::Pending,
            RecordState::Resolved(_) => RecordStatus::Resolved,
            RecordState::Rejected(_) => RecordStatus::Rejected,
        }
    }

    /// The handle to await while the record is pending.
    pub fn pending_handle(&self) -> Option<PendingHandle> {
        match &*mutex_lock(&self.state, SOURCE, "pending_handle") {
            RecordState::Pending(handle) => Some(handle.clone()),
            _ => None,
        }
    }

    pub(crate) fn snapshot(&self) -> RecordState<T, E> {
        mutex_lock(&self.state, SOURCE, "snapshot").clone()
    }

    /// Move a pending record to a terminal state. Returns `false`, leaving
    /// the record untouched, if it has already settled.
    pub(crate) fn settle(&self, next: RecordState<T, E>) -> bool {
        let mut state = mutex_lock(&self.state, SOURCE, "settle");
        if !matches!(*state, RecordState::Pending(_)) {
            return false;
        }
        match &next {
            RecordState::Resolved(_) => counter!("notes_cache_record_resolved_total").increment(1),
            RecordState::Rejected(_) => counter!("notes_cache_record_rejected_total").increment(1),
            RecordState::Pending(_) => return false,
        }
        *state = next;
        true
    }
}

impl<T, E> fmt::Debug for ComputationRecord<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputationRecord")
            .field("status", &self.status())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
