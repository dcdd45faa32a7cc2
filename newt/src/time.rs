use embedded_time::duration::Milliseconds;
use embedded_time::Instant;

/// A duration, in milliseconds
pub type Millis = embedded_time::duration::Milliseconds<u64>;

/// Supertrait of [`embedded_time::Clock`] pinning the
/// type of "ticks" to u64
pub trait Clock: embedded_time::Clock<T = u64> {}
impl<C: embedded_time::Clock<T = u64>> Clock for C {}

/// Milliseconds elapsed between two instants.
///
/// Instants that cannot be expressed in milliseconds (clock overflow)
/// saturate to `u64::MAX`, which reads as "longer than any timeout."
pub fn since<C: Clock>(earlier: Instant<C>, now: Instant<C>) -> Millis {
  Millis::try_from(now - earlier).unwrap_or(Milliseconds(u64::MAX))
}
