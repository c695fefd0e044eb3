// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use lifetree::Context;
use parking_lot::Mutex;

use crate::{Backoff, Error, Result};

/// Runs `f`, retrying failures up to `retries` times with waits from the
/// shared backoff policy.
///
/// The outer `Err` means the context was cancelled mid-retry; the caller
/// must surface it without updating the cache. The inner `Result` is the
/// outcome to cache: either the first success or the last failure once the
/// retry budget is spent.
pub(crate) fn run_with_retries<T>(
    ctx: &Context,
    retries: u32,
    backoff: &Mutex<Backoff>,
    mut f: impl FnMut() -> Result<T>,
) -> std::result::Result<Result<T>, Error> {
    let mut result = f();

    let mut remaining = retries;
    while remaining > 0 && result.is_err() {
        if ctx.is_cancelled() {
            return Err(cancel_error(ctx));
        }
        remaining -= 1;

        let delay = backoff.lock().next();
        if ctx.wait_cancelled_timeout(delay) {
            return Err(cancel_error(ctx));
        }

        result = f();
        if result.is_ok() {
            backoff.lock().reset();
            break;
        }
    }

    Ok(result)
}

fn cancel_error(ctx: &Context) -> Error {
    Error::Cancelled {
        cause: ctx.cancel_cause(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use lifetree::testing::isolated_root;

    use super::*;

    #[test]
    fn success_on_first_try_does_not_retry() {
        let ctx = isolated_root("t").context();
        let backoff = Mutex::new(Backoff::zero());
        let calls = AtomicU32::new(0);

        let result = run_with_retries(&ctx, 5, &backoff, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(7)
        });

        assert_eq!(result.unwrap().unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn retries_until_success() {
        let ctx = isolated_root("t").context();
        let backoff = Mutex::new(Backoff::zero());
        let calls = AtomicU32::new(0);

        let result = run_with_retries(&ctx, 5, &backoff, || {
            if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                Err(Error::msg("flaky"))
            } else {
                Ok("done")
            }
        });

        assert_eq!(result.unwrap().unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn exhausted_retries_return_last_error() {
        let ctx = isolated_root("t").context();
        let backoff = Mutex::new(Backoff::zero());
        let calls = AtomicU32::new(0);

        let result: std::result::Result<Result<()>, Error> =
            run_with_retries(&ctx, 2, &backoff, || {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::msg("down"))
            });

        let cached = result.unwrap();
        assert_eq!(cached.unwrap_err().to_string(), "down");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn cancellation_aborts_retry_wait() {
        let root = isolated_root("t");
        let task = root.subtask("worker", false).unwrap();
        let ctx = task.context();
        let backoff = Mutex::new(Backoff::constant(Duration::from_secs(30)));
        let calls = AtomicU32::new(0);

        let waiter = std::thread::spawn({
            let task = task.clone();
            move || {
                std::thread::sleep(Duration::from_millis(50));
                task.finish("cancelled mid retry");
            }
        });

        let start = std::time::Instant::now();
        let result: std::result::Result<Result<()>, Error> =
            run_with_retries(&ctx, 3, &backoff, || {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::msg("down"))
            });
        waiter.join().unwrap();

        let err = result.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1, "no attempt after cancel");
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
