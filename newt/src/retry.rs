use core::ops::{RangeInclusive, Sub};

use embedded_time::duration::Milliseconds;
use embedded_time::Instant;
use rand::{Rng, SeedableRng};

use crate::time::{since, Clock};

/// A non-blocking timer that drives fixed-delay or exponential-backoff
/// retransmission, living alongside the message to retry.
///
/// It does not _contain_ the work to be done (e.g. `Box<fn()>`) because
/// we don't have the luxury of a memory allocator :)
///
/// On top of the per-attempt schedule, the timer enforces a maximum
/// transmission span: once `max_span` has elapsed since the first
/// attempt the timer reports exhaustion even if attempts remain.
#[derive(Debug, Clone, Copy)]
pub struct RetryTimer<C: Clock> {
  start: Instant<C>,
  init: Milliseconds<u64>,
  strategy: Strategy,
  attempts: Attempts,
  max_attempts: Attempts,
  max_span: Milliseconds<u64>,
}

/// A number of attempts
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Attempts(pub u16);

impl Sub for Attempts {
  type Output = Attempts;

  fn sub(self, rhs: Self) -> Self {
    Attempts(self.0.saturating_sub(rhs.0))
  }
}

/// Result of [`RetryTimer::what_should_i_do`].
///
/// This tells you if a retry should be attempted or not.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum YouShould {
  /// Attempts (or the transmission span) have been exhausted and the
  /// work being retried should be considered poisoned.
  Cry,
  /// A retry should be performed
  Retry,
}

impl<C: Clock> RetryTimer<C> {
  /// Create a new retrier
  pub fn new(start: Instant<C>,
             strategy: Strategy,
             max_attempts: Attempts,
             max_span: Milliseconds<u64>)
             -> Self {
    Self { start,
           strategy,
           init: if strategy.has_jitter() {
             let seed = since(Instant::new(0), start).0;
             let mut rand = rand_chacha::ChaCha8Rng::seed_from_u64(seed);
             Milliseconds(rand.gen_range(strategy.range()))
           } else {
             Milliseconds(*strategy.range().start())
           },
           max_attempts,
           attempts: Attempts(1),
           max_span }
  }

  /// When the thing we keep trying fails, invoke this to
  /// tell the retrytimer "it failed again! what do I do??"
  ///
  /// Returns `nb::Error::WouldBlock` when we have not yet
  /// waited the appropriate amount of time to retry.
  pub fn what_should_i_do(&mut self,
                          now: Instant<C>)
                          -> nb::Result<YouShould, core::convert::Infallible> {
    let elapsed = since(self.start, now);

    if self.attempts >= self.max_attempts || elapsed >= self.max_span {
      Ok(YouShould::Cry)
    } else if self.is_ready(elapsed, self.attempts.0) {
      self.attempts.0 += 1;
      Ok(YouShould::Retry)
    } else {
      Err(nb::Error::WouldBlock)
    }
  }

  /// Has `max_span` elapsed since the first attempt?
  pub fn span_exhausted(&self, now: Instant<C>) -> bool {
    since(self.start, now) >= self.max_span
  }

  /// Check if the strategy says an appropriate time has passed
  fn is_ready(&self, Milliseconds(time_passed): Milliseconds<u64>, attempts: u16) -> bool {
    if attempts == 0 {
      return true;
    }

    match self.strategy {
      | Strategy::Delay { .. } => time_passed >= (self.init.0 * attempts as u64),
      | Strategy::Exponential { .. } => {
        time_passed >= Strategy::total_delay_exp(self.init, attempts)
      },
    }
  }
}

/// Strategy to employ when retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Strategy {
  /// Generate a random delay between `init_min` and `init_max`,
  /// and wait until this delay has passed between attempts.
  ///
  /// After each failed attempt, double the delay before retrying again.
  Exponential {
    /// Minimum (inclusive) delay for second attempt
    init_min: Milliseconds<u64>,
    /// Maximum (inclusive) delay for second attempt
    init_max: Milliseconds<u64>,
  },
  /// Generate a random delay between `min` and `max`,
  /// and wait until this delay has passed between attempts.
  Delay {
    /// Minimum (inclusive) delay for attempts
    min: Milliseconds<u64>,
    /// Maximum (inclusive) delay for attempts
    max: Milliseconds<u64>,
  },
}

impl Strategy {
  /// Are min & max delays the same? if so, we should probably skip the random number generation.
  pub fn has_jitter(&self) -> bool {
    let rng = self.range();
    rng.start() != rng.end()
  }

  /// Get the min & max durations as an inclusive range
  pub fn range(&self) -> RangeInclusive<u64> {
    match self {
      | &Self::Delay { min: Milliseconds(min),
                       max: Milliseconds(max), } => (min..=max),

      | &Self::Exponential { init_min: Milliseconds(min),
                             init_max: Milliseconds(max), } => (min..=max),
    }
  }

  /// Get the amount of time this strategy will take if all attempts fail
  pub fn max_time(&self, max_attempts: Attempts) -> Milliseconds<u64> {
    Milliseconds(match self {
                   | Self::Exponential { init_max, .. } => {
                     Self::total_delay_exp(*init_max, max_attempts.0)
                   },
                   | Self::Delay { max: Milliseconds(max), .. } => {
                     max * max_attempts.0 as u64
                   },
                 })
  }

  /// Given the initial delay and number of attempts that have been performed,
  /// yields the delay until the next retry should be attempted.
  const fn total_delay_exp(Milliseconds(init): Milliseconds<u64>, attempt: u16) -> u64 {
    // | attempt | total delay      |
    // | 1       | init             |
    // | 2       | init * 2         |
    // | 3       | init * 4         |
    // | ...     | ...              |
    // | n       | init * 2^n       |
    init * 2u64.pow((attempt - 1) as u32)
  }
}
