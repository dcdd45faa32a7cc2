use no_std_net::SocketAddr;

/// Data that came from (or is bound for) a network address
#[derive(PartialEq, PartialOrd, Eq, Ord, Hash, Debug, Clone, Copy)]
pub struct Addrd<T>(pub T, pub SocketAddr);

impl<T> Addrd<T> {
  /// Borrow the contents of this Addressed
  pub fn as_ref(&self) -> Addrd<&T> {
    Addrd(self.data(), self.addr())
  }

  /// Discard the address and get the data in this Addressed
  pub fn unwrap(self) -> T {
    self.0
  }

  /// Map the data contained in this Addressed
  pub fn map<R>(self, f: impl FnOnce(T) -> R) -> Addrd<R> {
    Addrd(f(self.0), self.1)
  }

  /// Borrow the contents of the addressed item
  pub fn data(&self) -> &T {
    &self.0
  }

  /// Mutably borrow the contents of the addressed item
  pub fn data_mut(&mut self) -> &mut T {
    &mut self.0
  }

  /// Copy the address for the data
  pub fn addr(&self) -> SocketAddr {
    self.1
  }
}

/// The outbound half of a datagram socket.
///
/// The engine never reads from the network itself; the application
/// pulls datagrams however its platform provides them and feeds them
/// to [`Core::on_datagram`](crate::core::Core::on_datagram). Sending
/// is the only direction the engine needs to own, so this is the
/// entire transport boundary.
///
/// The `std` feature implements this for `std::net::UdpSocket`.
pub trait Transport {
  /// The error yielded by failed sends
  type Error: core::fmt::Debug;

  /// Send one datagram to a remote address
  fn send(&mut self, dgram: Addrd<&[u8]>) -> Result<(), Self::Error>;
}
