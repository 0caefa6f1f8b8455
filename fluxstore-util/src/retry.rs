// Copyright 2024 The Fluxstore Authors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Uniform exponential-backoff-with-jitter retry wrapper (C5), applied to
//! every object-store and meta-store call the coordinator issues.

use std::future::Future;
use std::time::Duration;

use fluxstore_error::{make_err, Code, Error};
use rand::Rng;

/// The outcome of a single attempt inside a retried operation.
pub enum RetryResult<T> {
    /// The attempt succeeded; stop retrying and return `T`.
    Ok(T),

    /// The attempt failed with a transient error; retry if attempts remain.
    Retry(Error),

    /// The attempt failed with a non-retryable error (user-fault or a
    /// "not found" signal); stop retrying and return the error immediately,
    /// without consuming another attempt.
    Err(Error),
}

/// Computes the backoff durations for up to `max_attempts - 1` retries
/// (the first attempt is always free), `base * 2^(n-1) + uniform(0, base)`.
fn backoff_schedule(max_attempts: usize, base: Duration) -> impl Iterator<Item = Duration> {
    (0..max_attempts.saturating_sub(1)).map(move |attempt| {
        let exp = base.saturating_mul(1u32 << attempt.min(20));
        let jitter_ms = rand::thread_rng().gen_range(0..=base.as_millis().max(1) as u64);
        exp + Duration::from_millis(jitter_ms)
    })
}

/// Calls `make_attempt` up to `max_attempts` times under `deadline`.
///
/// `make_attempt` is invoked once per attempt and must return a fresh
/// future each time (it typically clones an `Arc`-wrapped store handle).
pub async fn with_retry<T, F, Fut>(
    max_attempts: usize,
    base_backoff: Duration,
    mut make_attempt: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RetryResult<T>>,
{
    let mut backoffs = backoff_schedule(max_attempts, base_backoff);
    let mut last_err: Option<Error> = None;
    let mut attempt = 0usize;

    loop {
        attempt += 1;
        match make_attempt().await {
            RetryResult::Ok(value) => return Ok(value),
            RetryResult::Err(err) => return Err(err),
            RetryResult::Retry(err) => {
                last_err = Some(err);
                match backoffs.next() {
                    Some(wait) => {
                        tokio::time::sleep(wait).await;
                    }
                    None => {
                        return Err(make_err!(
                            Code::Internal,
                            "Exhausted {attempt} attempts, last error: {}",
                            last_err.expect("set above")
                        ));
                    }
                }
            }
        }
    }
}

/// Same as [`with_retry`] but races each backoff wait against a cancellation
/// signal (the operation deadline). If the deadline fires first, returns a
/// `Cancelled` error without attempting further work.
pub async fn with_retry_cancellable<T, F, Fut, C>(
    max_attempts: usize,
    base_backoff: Duration,
    mut make_attempt: F,
    mut cancelled: C,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RetryResult<T>>,
    C: Future<Output = ()> + Unpin,
{
    use std::pin::Pin;

    let mut backoffs = backoff_schedule(max_attempts, base_backoff);
    let mut last_err: Option<Error> = None;
    let mut attempt = 0usize;

    loop {
        attempt += 1;
        let attempt_fut = make_attempt();
        tokio::pin!(attempt_fut);
        let result = tokio::select! {
            biased;
            _ = &mut cancelled => {
                return Err(make_err!(Code::Cancelled, "Operation deadline exceeded during attempt {attempt}"));
            }
            result = &mut attempt_fut => result,
        };

        match result {
            RetryResult::Ok(value) => return Ok(value),
            RetryResult::Err(err) => return Err(err),
            RetryResult::Retry(err) => {
                last_err = Some(err);
                match backoffs.next() {
                    Some(wait) => {
                        let sleep = Box::pin(tokio::time::sleep(wait));
                        let raced: Pin<Box<dyn Future<Output = ()> + Send>> = sleep;
                        tokio::select! {
                            biased;
                            _ = &mut cancelled => {
                                return Err(make_err!(Code::Cancelled, "Operation deadline exceeded during backoff"));
                            }
                            _ = raced => {}
                        }
                    }
                    None => {
                        return Err(make_err!(
                            Code::Internal,
                            "Exhausted {attempt} attempts, last error: {}",
                            last_err.expect("set above")
                        ));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let run_count = Arc::new(AtomicI32::new(0));
        let rc = run_count.clone();
        let result = with_retry(3, Duration::from_millis(1), || {
            let rc = rc.clone();
            async move {
                rc.fetch_add(1, Ordering::Relaxed);
                RetryResult::Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(run_count.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let run_count = Arc::new(AtomicI32::new(0));
        let rc = run_count.clone();
        let result = with_retry(5, Duration::from_millis(1), || {
            let rc = rc.clone();
            async move {
                let n = rc.fetch_add(1, Ordering::Relaxed) + 1;
                if n < 3 {
                    RetryResult::Retry(make_err!(Code::Unavailable, "transient"))
                } else {
                    RetryResult::Ok(true)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), true);
        assert_eq!(run_count.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn exhausts_attempts_and_reports_count() {
        let run_count = Arc::new(AtomicI32::new(0));
        let rc = run_count.clone();
        let result: Result<(), Error> = with_retry(3, Duration::from_millis(1), || {
            let rc = rc.clone();
            async move {
                rc.fetch_add(1, Ordering::Relaxed);
                RetryResult::Retry(make_err!(Code::Unavailable, "still down"))
            }
        })
        .await;
        assert_eq!(run_count.load(Ordering::Relaxed), 3);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn non_retryable_error_stops_immediately() {
        let run_count = Arc::new(AtomicI32::new(0));
        let rc = run_count.clone();
        let result: Result<(), Error> = with_retry(5, Duration::from_millis(1), || {
            let rc = rc.clone();
            async move {
                rc.fetch_add(1, Ordering::Relaxed);
                RetryResult::Err(make_err!(Code::NotFound, "no such object"))
            }
        })
        .await;
        assert_eq!(run_count.load(Ordering::Relaxed), 1);
        assert_eq!(result.unwrap_err().code, Code::NotFound);
    }
}
