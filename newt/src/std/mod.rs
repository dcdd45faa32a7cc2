use ::std::io;
use ::std::net::UdpSocket;

use embedded_time::rate::Fraction;

use crate::net::{Addrd, Transport};

/// Implement [`embedded_time::Clock`] using [`std::time`] primitives
#[derive(Debug, Clone, Copy)]
pub struct Clock(::std::time::Instant);

impl Default for Clock {
  fn default() -> Self {
    Self::new()
  }
}

impl Clock {
  /// Create a new clock
  pub fn new() -> Self {
    Self(::std::time::Instant::now())
  }
}

impl embedded_time::Clock for Clock {
  type T = u64;

  // microseconds
  const SCALING_FACTOR: Fraction = Fraction::new(1, 1_000_000);

  fn try_now(&self) -> Result<embedded_time::Instant<Self>, embedded_time::clock::Error> {
    let elapsed = ::std::time::Instant::now().duration_since(self.0);
    Ok(embedded_time::Instant::new(elapsed.as_micros() as u64))
  }
}

/// Convert an engine address into its `std::net` equivalent.
pub fn to_std_addr(addr: no_std_net::SocketAddr) -> ::std::net::SocketAddr {
  use ::std::net as std_net;

  match addr {
    | no_std_net::SocketAddr::V4(v4) => {
      let [a, b, c, d] = v4.ip().octets();
      std_net::SocketAddr::V4(std_net::SocketAddrV4::new(std_net::Ipv4Addr::new(a, b, c, d),
                                                         v4.port()))
    },
    | no_std_net::SocketAddr::V6(v6) => {
      let [a, b, c, d, e, f, g, h] = v6.ip().segments();
      std_net::SocketAddr::V6(std_net::SocketAddrV6::new(std_net::Ipv6Addr::new(a, b, c, d, e,
                                                                                f, g, h),
                                                         v6.port(),
                                                         v6.flowinfo(),
                                                         v6.scope_id()))
    },
  }
}

/// Convert a `std::net` address into the engine's representation,
/// e.g. the source address `UdpSocket::recv_from` reported for a
/// datagram about to be fed to
/// [`Core::on_datagram`](crate::core::Core::on_datagram).
pub fn to_no_std_addr(addr: ::std::net::SocketAddr) -> no_std_net::SocketAddr {
  use ::std::net as std_net;

  match addr {
    | std_net::SocketAddr::V4(v4) => {
      let [a, b, c, d] = v4.ip().octets();
      no_std_net::SocketAddr::V4(no_std_net::SocketAddrV4::new(no_std_net::Ipv4Addr::new(a, b,
                                                                                         c, d),
                                                               v4.port()))
    },
    | std_net::SocketAddr::V6(v6) => {
      let [a, b, c, d, e, f, g, h] = v6.ip().segments();
      no_std_net::SocketAddr::V6(no_std_net::SocketAddrV6::new(no_std_net::Ipv6Addr::new(a, b, c,
                                                                                         d, e, f,
                                                                                         g, h),
                                                               v6.port(),
                                                               v6.flowinfo(),
                                                               v6.scope_id()))
    },
  }
}

impl Transport for UdpSocket {
  type Error = io::Error;

  fn send(&mut self, dgram: Addrd<&[u8]>) -> Result<(), Self::Error> {
    self.send_to(dgram.data(), to_std_addr(dgram.addr()))
        .map(|_| ())
  }
}
