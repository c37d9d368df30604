use std::sync::{Mutex, MutexGuard};

use tracing::warn;

/// Lock `lock`, continuing with the inner state if a previous holder panicked.
///
/// Trie and record mutations are single assignments, so a poisoned guard
/// never exposes a half-written node.
pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    target: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(
                op,
                target_module = target,
                lock_kind = "mutex.lock",
                result = "poisoned_recovered",
                "Recovered from poisoned query cache lock"
            );
            poisoned.into_inner()
        }
    }
}
