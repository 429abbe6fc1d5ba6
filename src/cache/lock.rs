use std::sync::{LockResult, PoisonError};

use tracing::warn;

/// Unwrap a lock result, taking the guard back from a poisoned lock.
///
/// A panic while holding a slot lock leaves at worst one stale entry behind,
/// which the next invalidation or reset clears.
pub(crate) fn recover<G>(result: LockResult<G>, slot: &'static str, op: &'static str) -> G {
    result.unwrap_or_else(|poisoned: PoisonError<G>| {
        warn!(
            slot,
            op,
            result = "poisoned_recovered",
            "Recovered from poisoned query cache lock"
        );
        poisoned.into_inner()
    })
}
