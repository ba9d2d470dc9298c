// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Retry utilities.
//!
//! A [`Retry`] runs an operation until it succeeds, fails fatally, or the
//! configured maximum duration elapses, sleeping with exponential backoff
//! between attempts.
//!
//! ```ignore
//! let result = Retry::default()
//!     .max_duration(Duration::from_secs(30))
//!     .retry_async(|state| async move {
//!         match probe().await {
//!             Ok(v) => RetryResult::Ok(v),
//!             Err(e) if e.is_transient() => RetryResult::RetryableErr(e),
//!             Err(e) => RetryResult::FatalErr(e),
//!         }
//!     })
//!     .await;
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::{self, Instant};

/// The outcome of a single attempt.
#[derive(Debug)]
pub enum RetryResult<T, E> {
    Ok(T),
    /// Try again after backing off.
    RetryableErr(E),
    /// Stop immediately.
    FatalErr(E),
}

impl<T, E> From<Result<T, E>> for RetryResult<T, E> {
    fn from(res: Result<T, E>) -> Self {
        match res {
            Ok(t) => RetryResult::Ok(t),
            Err(e) => RetryResult::RetryableErr(e),
        }
    }
}

/// The state of a retry operation, passed to each attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    /// The zero-based number of the current attempt.
    pub i: usize,
    /// How long the operation will sleep before the next attempt, or `None`
    /// if this is the last attempt.
    pub next_backoff: Option<Duration>,
}

/// Configures a retry operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retry {
    initial_backoff: Duration,
    factor: u32,
    clamp_backoff: Duration,
    max_duration: Duration,
}

impl Default for Retry {
    /// Starts at 125ms, doubles each attempt, never sleeps longer than 1s at
    /// a time, and never gives up.
    fn default() -> Self {
        Retry {
            initial_backoff: Duration::from_millis(125),
            factor: 2,
            clamp_backoff: Duration::from_secs(1),
            max_duration: Duration::MAX,
        }
    }
}

impl Retry {
    pub fn initial_backoff(mut self, initial_backoff: Duration) -> Self {
        self.initial_backoff = initial_backoff;
        self
    }

    pub fn factor(mut self, factor: u32) -> Self {
        self.factor = factor;
        self
    }

    pub fn clamp_backoff(mut self, clamp_backoff: Duration) -> Self {
        self.clamp_backoff = clamp_backoff;
        self
    }

    /// Bounds the total time spent across all attempts and sleeps.
    ///
    /// The last attempt is made no later than `max_duration` after the first.
    pub fn max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = max_duration;
        self
    }

    /// Retries `f` until it returns [`RetryResult::Ok`] or
    /// [`RetryResult::FatalErr`], or until the maximum duration elapses, in
    /// which case the last retryable error is returned.
    pub async fn retry_async<F, U, T, E>(self, mut f: F) -> Result<T, E>
    where
        F: FnMut(RetryState) -> U,
        U: Future<Output = RetryResult<T, E>>,
    {
        let start = Instant::now();
        let mut backoff = self.initial_backoff;
        let mut i = 0;
        loop {
            let elapsed = start.elapsed();
            let remaining = self.max_duration.saturating_sub(elapsed);
            let next_backoff = if remaining.is_zero() {
                None
            } else {
                Some(backoff.min(self.clamp_backoff).min(remaining))
            };
            match f(RetryState { i, next_backoff }).await {
                RetryResult::Ok(t) => return Ok(t),
                RetryResult::FatalErr(e) => return Err(e),
                RetryResult::RetryableErr(e) => match next_backoff {
                    None => return Err(e),
                    Some(sleep) => {
                        time::sleep(sleep).await;
                        backoff = backoff.saturating_mul(self.factor);
                        i += 1;
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_retries() {
        let attempts = Cell::new(0);
        let res: Result<usize, &str> = Retry::default()
            .max_duration(Duration::from_secs(10))
            .retry_async(|state| {
                attempts.set(attempts.get() + 1);
                async move {
                    if state.i < 3 {
                        RetryResult::RetryableErr("not yet")
                    } else {
                        RetryResult::Ok(state.i)
                    }
                }
            })
            .await;
        assert_eq!(res, Ok(3));
        assert_eq!(attempts.get(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_errors_stop_immediately() {
        let start = Instant::now();
        let res: Result<(), &str> = Retry::default()
            .retry_async(|_| async { RetryResult::FatalErr("boom") })
            .await;
        assert_eq!(res, Err("boom"));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_duration() {
        let start = Instant::now();
        let mut last_state = None;
        let res: Result<(), usize> = Retry::default()
            .initial_backoff(Duration::from_millis(100))
            .clamp_backoff(Duration::from_millis(400))
            .max_duration(Duration::from_secs(2))
            .retry_async(|state| {
                last_state = Some(state);
                async move { RetryResult::RetryableErr(state.i) }
            })
            .await;
        // Sleeps of 100, 200, 400, 400, 400, 400, 100 reach the 2s bound.
        assert_eq!(res, Err(7));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(2), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(2100), "{elapsed:?}");
        assert_eq!(last_state.map(|s| s.next_backoff), Some(None));
    }

    #[test]
    fn results_convert_to_retryable() {
        let res: RetryResult<(), &str> = Err("transient").into();
        assert!(matches!(res, RetryResult::RetryableErr("transient")));
    }
}
