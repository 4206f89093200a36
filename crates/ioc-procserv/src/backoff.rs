//! Bounded polling with exponential backoff.

use std::thread;
use std::time::{Duration, Instant};

/// A wait gave up after `waited`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("timed out after {waited:?}")]
pub struct TimedOut {
    pub waited: Duration,
}

/// Every attempt failed before the deadline.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub last: E,
    pub attempts: u32,
    pub waited: Duration,
}

impl<E> Exhausted<E> {
    pub fn timed_out(&self) -> TimedOut {
        TimedOut {
            waited: self.waited,
        }
    }
}

/// Delay schedule doubling from `initial` up to `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    pub fn initial(&self) -> Duration {
        self.initial
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(50), Duration::from_millis(500))
    }
}

/// Call `attempt` until it succeeds or `timeout` has elapsed.
///
/// The first attempt always runs. Sleeps never overshoot the deadline.
pub fn retry_with_backoff<T, E>(
    timeout: Duration,
    mut backoff: Backoff,
    mut attempt: impl FnMut() -> Result<T, E>,
) -> Result<T, Exhausted<E>> {
    let started = Instant::now();
    let mut attempts = 0;
    loop {
        attempts += 1;
        let last = match attempt() {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let waited = started.elapsed();
        if waited >= timeout {
            return Err(Exhausted {
                last,
                attempts,
                waited,
            });
        }
        thread::sleep(backoff.next_delay().min(timeout - waited));
    }
}

/// Poll `ready` until it reports true or `timeout` has elapsed.
pub fn wait_until(
    timeout: Duration,
    backoff: Backoff,
    mut ready: impl FnMut() -> bool,
) -> Result<(), TimedOut> {
    retry_with_backoff(timeout, backoff, || if ready() { Ok(()) } else { Err(()) })
        .map_err(|exhausted| exhausted.timed_out())
}
