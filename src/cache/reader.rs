//! Suspending reads over computation records.

use std::fmt;
use std::sync::Arc;

use super::consumer::Interrupt;
use super::record::{ComputationRecord, ExecutionError, PendingHandle, RecordState};

/// What a read observed.
pub enum Outcome<T, E> {
    Value(Arc<T>),
    /// Not settled yet: await the handle, then repeat the identical call.
    Suspend(PendingHandle),
    /// The captured executor failure, identical on every read.
    Error(Arc<ExecutionError<E>>),
}

impl<T, E> Outcome<T, E> {
    pub fn is_suspended(&self) -> bool {
        matches!(self, Self::Suspend(_))
    }

    pub fn value(&self) -> Option<&Arc<T>> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Turn the outcome into a `?`-friendly result for render passes.
    pub fn into_ready(self) -> Result<Arc<T>, Interrupt<E>> {
        match self {
            Self::Value(value) => Ok(value),
            Self::Suspend(handle) => Err(Interrupt::Suspend(handle)),
            Self::Error(error) => Err(Interrupt::Execution(error)),
        }
    }
}

impl<T, E> Clone for Outcome<T, E> {
    fn clone(&self) -> Self {
        match self {
            Self::Value(value) => Self::Value(Arc::clone(value)),
            Self::Suspend(handle) => Self::Suspend(handle.clone()),
            Self::Error(error) => Self::Error(Arc::clone(error)),
        }
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for Outcome<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Suspend(handle) => f.debug_tuple("Suspend").field(handle).finish(),
            Self::Error(error) => f.debug_tuple("Error").field(error).finish(),
        }
    }
}

/// Return the record's value or error, or the pending handle to wait on.
///
/// Never blocks or polls; waking the caller is the scheduler's job.
pub fn read<T, E>(record: &ComputationRecord<T, E>) -> Outcome<T, E> {
    match record.snapshot() {
        RecordState::Resolved(value) => Outcome::Value(value),
        RecordState::Rejected(error) => Outcome::Error(error),
        RecordState::Pending(handle) => Outcome::Suspend(handle),
    }
}

#[cfg(test)]
mod tests {
    use futures::FutureExt;
    use futures::executor::block_on;
    use futures::future;
    use thiserror::Error;

    use super::*;

    #[derive(Debug, Error)]
    #[error("missing note")]
    struct Missing;

    #[test]
    fn pending_record_suspends_with_its_own_handle() {
        let record = ComputationRecord::<u8, Missing>::start(future::pending().boxed());
        let Outcome::Suspend(handle) = read(&record) else {
            panic!("pending record must suspend");
        };
        let expected = record.pending_handle().expect("pending");
        assert!(handle.same_as(&expected));
    }

    #[test]
    fn rejected_record_returns_the_same_error_every_time() {
        let record = ComputationRecord::<u8, Missing>::start(future::ready(Err(Missing)).boxed());
        block_on(record.pending_handle().expect("pending"));

        let (Outcome::Error(first), Outcome::Error(second)) = (read(&record), read(&record)) else {
            panic!("rejected record must report its error");
        };
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.to_string(), "missing note");
    }

    #[test]
    fn into_ready_maps_each_variant() {
        let record = ComputationRecord::<u8, Missing>::start(future::ready(Ok(9)).boxed());
        assert!(matches!(read(&record).into_ready(), Err(Interrupt::Suspend(_))));

        block_on(record.pending_handle().expect("pending"));
        let value = read(&record).into_ready().expect("resolved");
        assert_eq!(*value, 9);
    }
}
