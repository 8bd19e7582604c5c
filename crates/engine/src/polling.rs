//! Fixed-interval polling with a deadline.

use std::future::Future;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

/// Why [`poll_until`] gave up.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum PollError<E> {
    /// The deadline passed before the check reported readiness.
    Timeout,
    /// The check itself failed.
    Failed(E),
}

/// Run `check` immediately and then every `interval` until it yields a
/// value, fails, or `timeout` elapses.
///
/// `check` returns `Ok(None)` while the awaited condition does not hold yet.
/// A check still in flight when the deadline passes is abandoned.
pub(crate) async fn poll_until<T, E, F, Fut>(
    interval: Duration,
    timeout: Duration,
    mut check: F,
) -> Result<T, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = ticker.tick() => {}
            _ = &mut deadline => return Err(PollError::Timeout),
        }

        tokio::select! {
            biased;
            result = check() => {
                if let Some(value) = result.map_err(PollError::Failed)? {
                    return Ok(value);
                }
            }
            _ = &mut deadline => return Err(PollError::Timeout),
        }
    }
}
