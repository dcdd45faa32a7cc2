use crate::net::Transport;
use crate::time::Clock;

/// Type glue binding a [`Core`](crate::core::Core) to its platform:
/// where time comes from and how datagrams leave the device.
///
/// ```
/// use newt::core::Core;
/// use newt::platform::Std;
///
/// let sock = std::net::UdpSocket::bind("0.0.0.0:0").unwrap();
/// let core = Core::<Std, newt::resource::Noop>::new(newt::std::Clock::new(),
///                                                   sock,
///                                                   Default::default());
/// ```
pub trait Platform {
  /// Source of timing for retransmission and expiry.
  ///
  /// See [`time::Clock`](crate::time::Clock)
  type Clock: Clock;

  /// How datagrams are sent.
  ///
  /// See [`net::Transport`](crate::net::Transport)
  type Transport: Transport;
}

/// [`Platform`] implementor for targets that support `std`:
/// [`crate::std::Clock`] over `std::time::Instant` and a plain
/// `std::net::UdpSocket`.
#[cfg(feature = "std")]
#[derive(Debug, Clone, Copy)]
pub struct Std;

#[cfg(feature = "std")]
impl Platform for Std {
  type Clock = crate::std::Clock;
  type Transport = ::std::net::UdpSocket;
}
