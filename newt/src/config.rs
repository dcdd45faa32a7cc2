use embedded_time::duration::Milliseconds;

use crate::retry::{Attempts, Strategy};
use crate::time::Millis;

/// Configuration options related to outbound CON messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Con {
  /// Retry strategy for CON messages that
  /// have not yet been ACKed.
  ///
  /// The jitter range corresponds to RFC7252's
  /// `ACK_TIMEOUT * ACK_RANDOM_FACTOR`: the initial delay is drawn
  /// uniformly from it, then doubled after every retransmission.
  ///
  /// Defaults to an exponential retry strategy:
  /// ```
  /// use newt::config::Con;
  /// use newt::retry::Strategy;
  /// use embedded_time::duration::Milliseconds;
  ///
  /// assert_eq!(Con::default().retry_strategy,
  ///            Strategy::Exponential { init_min: Milliseconds(2_000),
  ///                                    init_max: Milliseconds(3_000) });
  /// ```
  pub retry_strategy: Strategy,

  /// Number of times we are allowed to resend a CON message
  /// before erroring.
  ///
  /// Defaults to 4 attempts.
  /// ```
  /// use newt::config::Con;
  /// use newt::retry::Attempts;
  ///
  /// assert_eq!(Con::default().max_attempts, Attempts(4));
  /// ```
  pub max_attempts: Attempts,
}

impl Default for Con {
  fn default() -> Self {
    Con { retry_strategy: Strategy::Exponential { init_min: Milliseconds(2_000),
                                                  init_max: Milliseconds(3_000) },
          max_attempts: Attempts(4) }
  }
}

/// Runtime config
///
/// Capacities (table sizes, payload limits) are compile-time constants
/// on the crate root; everything tunable at runtime lives here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Config {
  /// See [`Con`]
  pub con: Con,

  /// Upper bound on the total time spent transmitting and
  /// retransmitting any one message, regardless of how many attempts
  /// remain (RFC7252 `MAX_TRANSMIT_SPAN`).
  ///
  /// NON messages, which are never retransmitted, time out when this
  /// span elapses without a response.
  ///
  /// Defaults to 45 seconds.
  /// ```
  /// use newt::config::Config;
  /// use embedded_time::duration::Milliseconds;
  ///
  /// assert_eq!(Config::default().max_transmit_span, Milliseconds(45_000u64));
  /// ```
  pub max_transmit_span: Millis,

  /// How long an answered request is remembered so that a
  /// retransmitted duplicate replays the stored response
  /// instead of re-running the handler.
  ///
  /// Defaults to 32 seconds.
  /// ```
  /// use newt::config::Config;
  /// use embedded_time::duration::Milliseconds;
  ///
  /// assert_eq!(Config::default().dedup_window, Milliseconds(32_000u64));
  /// ```
  pub dedup_window: Millis,

  /// Maximum number of path segments a registered resource may have.
  ///
  /// Checked at registration time; must not exceed what the tree can
  /// physically hold.
  ///
  /// Defaults to 4.
  /// ```
  /// use newt::config::Config;
  ///
  /// assert_eq!(Config::default().max_depth, 4);
  /// ```
  pub max_depth: u8,

  /// Maximum length of one path segment, in bytes.
  ///
  /// Checked at registration time; capped by
  /// [`SEG_CAP`](crate::SEG_CAP).
  ///
  /// Defaults to 32.
  /// ```
  /// use newt::config::Config;
  ///
  /// assert_eq!(Config::default().max_segment_len, 32);
  /// ```
  pub max_segment_len: u8,

  /// Block size used when fragmenting payloads that don't fit in one
  /// datagram, and offered to peers pushing large payloads to us.
  ///
  /// Must be a power of two in `16..=1024`.
  ///
  /// Defaults to 256 bytes.
  /// ```
  /// use newt::config::Config;
  ///
  /// assert_eq!(Config::default().block_size, 256);
  /// ```
  pub block_size: u16,

  /// Seed used to generate message [`Token`](newt_msg::Token)s,
  /// customizable to allow for your application to generate tokens
  /// less guessably.
  ///
  /// The default value is 0, although it is
  /// best practice to set this to something else.
  /// (random integer, machine identifier)
  pub token_seed: u16,
}

impl Default for Config {
  fn default() -> Self {
    Config { con: Con::default(),
             max_transmit_span: Milliseconds(45_000),
             dedup_window: Milliseconds(32_000),
             max_depth: 4,
             max_segment_len: 32,
             block_size: 256,
             token_seed: 0 }
  }
}
