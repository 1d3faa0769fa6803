use crossbeam_utils::Backoff;
use tracing::debug;

use crate::error::Contended;

/// The outcome of one optimistic attempt at a write.
pub(crate) enum Attempt<S> {
    /// The attempt validated and committed (or found nothing to do).
    Done(bool),
    /// Validation failed. Any owned input is handed back for the next attempt.
    Retry(S),
}

/// Repeat `attempt` until it completes. There is no upper bound on the number
/// of attempts.
pub(crate) fn until_done<S>(mut state: S, mut attempt: impl FnMut(S) -> Attempt<S>) -> bool {
    let backoff = Backoff::new();
    loop {
        match attempt(state) {
            Attempt::Done(r) => return r,
            Attempt::Retry(s) => {
                state = s;
                backoff.snooze();
            }
        }
    }
}

/// Repeat `attempt` at most `limit` times.
pub(crate) fn bounded<S>(
    mut state: S,
    limit: usize,
    mut attempt: impl FnMut(S) -> Attempt<S>,
) -> Result<bool, Contended> {
    let backoff = Backoff::new();
    for _ in 0..limit {
        match attempt(state) {
            Attempt::Done(r) => return Ok(r),
            Attempt::Retry(s) => {
                state = s;
                backoff.snooze();
            }
        }
    }
    debug!(attempts = limit, "retry limit reached, giving up");
    Err(Contended { attempts: limit })
}
