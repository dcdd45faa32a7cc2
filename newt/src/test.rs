#![allow(dead_code)]

use ::core::cell::Cell;
use ::std::cell::RefCell;
use ::std::rc::Rc;
use embedded_time::rate::Fraction;
use embedded_time::Instant;
use no_std_net::SocketAddr;

use crate::net::{Addrd, Transport};
use crate::platform::Platform;

/// Platform implementor using mocks for clock and transport
#[derive(Debug, Clone, Copy)]
pub struct Mocks;

impl Platform for Mocks {
  type Clock = ClockMock;
  type Transport = TransportMock;
}

/// A clock that only moves when [`ClockMock::set`] is called.
///
/// Ticks are milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ClockMock(pub Cell<u64>);

impl ClockMock {
  pub fn new() -> Self {
    Self(Cell::new(0))
  }

  pub fn set(&self, millis: u64) {
    self.0.set(millis);
  }
}

impl embedded_time::Clock for ClockMock {
  type T = u64;

  const SCALING_FACTOR: Fraction = Fraction::new(1, 1_000);

  fn try_now(&self) -> Result<Instant<Self>, embedded_time::clock::Error> {
    Ok(Instant::new(self.0.get()))
  }
}

/// A transport that records everything sent through it.
///
/// Clone the [`TransportMock::tx`] handle before handing the mock to a
/// [`Core`](crate::core::Core) to inspect outbound traffic afterwards.
#[derive(Debug, Default)]
pub struct TransportMock {
  /// Outbound bytes. Address represents the destination
  pub tx: Rc<RefCell<Vec<Addrd<Vec<u8>>>>>,
}

impl TransportMock {
  pub fn new() -> Self {
    Default::default()
  }
}

impl Transport for TransportMock {
  type Error = ::std::convert::Infallible;

  fn send(&mut self, dgram: Addrd<&[u8]>) -> Result<(), Self::Error> {
    self.tx.borrow_mut().push(dgram.map(Vec::from));
    Ok(())
  }
}

pub fn addr_a() -> SocketAddr {
  use no_std_net::*;
  SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(192, 168, 0, 1), 5683))
}

pub fn addr_b() -> SocketAddr {
  use no_std_net::*;
  SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(192, 168, 0, 2), 5683))
}
