use std::future::Future;
use tokio::time::{Duration, Instant};

/// Poll `check` every `interval` until it returns the same `Some` value for
/// `required_checks` consecutive polls. `None` from `check` resets the
/// streak. Gives up with `None` once `timeout` has elapsed.
pub async fn wait_until_stable<T, F, Fut>(
    mut check: F,
    interval: Duration,
    required_checks: u32,
    timeout: Duration,
) -> Option<T>
where
    T: PartialEq,
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = Instant::now() + timeout;
    let required_checks = required_checks.max(1);
    let mut last: Option<T> = None;
    let mut streak = 0u32;

    loop {
        match check().await {
            Some(value) => {
                if last.as_ref() == Some(&value) {
                    streak += 1;
                } else {
                    streak = 1;
                }
                last = Some(value);
            }
            None => {
                streak = 0;
                last = None;
            }
        }

        if streak >= required_checks {
            return last;
        }
        if Instant::now() + interval > deadline {
            return None;
        }
        tokio::time::sleep(interval).await;
    }
}
