//! Observing resources
//! ([RFC7641](https://datatracker.ietf.org/doc/html/rfc7641)).
//!
//! Two registries, one per direction:
//!  - [`Observers`] remembers remote endpoints that registered
//!    interest in our resources, so [`Core::notify`](crate::core::Core::notify)
//!    can fan a state change out to them.
//!  - [`Observables`] remembers remote resources we registered
//!    interest in, so stale notifications can be discarded by
//!    sequence number.

use newt_msg::observe::seq_is_newer;
use newt_msg::{Id, Token};
use no_std_net::SocketAddr;

use crate::error::{Table, What};
use crate::platform::Platform;
use crate::{buffer_insert, Buffer, N_OBSERVABLES, N_OBSERVERS};

/// A remote endpoint observing one of our resources
#[derive(Debug)]
pub(crate) struct Observer {
  /// Index of the resource node being observed
  pub(crate) resource: u8,
  pub(crate) addr: SocketAddr,
  /// Token the registration arrived with; every notification echoes it
  pub(crate) token: Token,
  /// Sequence number of the last notification sent (24-bit)
  pub(crate) seq: u32,
  /// Message id of the last CON notification, so a Reset can be
  /// traced back to us
  pub(crate) last_id: Option<Id>,
  /// Deferred removal: set during iteration, collected by [`Observers::sweep`]
  marked: bool,
}

/// Registry of remote endpoints observing our resources.
#[derive(Debug, Default)]
pub(crate) struct Observers {
  slots: Buffer<Observer, N_OBSERVERS>,
}

impl Observers {
  /// Register `(addr, token)` as an observer of `resource`.
  ///
  /// Re-registration by the same endpoint with the same token is
  /// idempotent; the existing entry (and its sequence number) is kept.
  pub(crate) fn register<P: Platform>(&mut self,
                                      resource: u8,
                                      addr: SocketAddr,
                                      token: Token)
                                      -> Result<(), What<P>> {
    if self.find_mut(addr, token).is_some() {
      return Ok(());
    }

    buffer_insert(&mut self.slots,
                  Observer { resource,
                             addr,
                             token,
                             seq: 0,
                             last_id: None,
                             marked: false }).map(|_| ())
                                             .map_err(|_| What::Capacity(Table::Observers))
  }

  pub(crate) fn deregister(&mut self, addr: SocketAddr, token: Token) {
    self.slots.iter_mut().for_each(|o| {
                           if matches!(o, Some(ob) if ob.addr == addr && ob.token == token) {
                             *o = None;
                           }
                         });
  }

  /// A Reset arrived from `addr` in reply to message `id`: if it
  /// matches a notification we sent, the observer is gone.
  ///
  /// Returns whether an observer was removed.
  pub(crate) fn on_rst(&mut self, addr: SocketAddr, id: Id) -> bool {
    let mut removed = false;
    self.slots.iter_mut().for_each(|o| {
                           if matches!(o, Some(ob) if ob.addr == addr && ob.last_id == Some(id)) {
                             *o = None;
                             removed = true;
                           }
                         });
    removed
  }

  pub(crate) fn find_mut(&mut self, addr: SocketAddr, token: Token) -> Option<&mut Observer> {
    self.slots
        .iter_mut()
        .filter_map(Option::as_mut)
        .find(|ob| ob.addr == addr && ob.token == token)
  }

  /// Iterate the observers of one resource node, mutably.
  pub(crate) fn of_resource(&mut self, resource: u8) -> impl Iterator<Item = &mut Observer> {
    self.slots
        .iter_mut()
        .filter_map(Option::as_mut)
        .filter(move |ob| ob.resource == resource)
  }

  /// Mark an observer for removal without disturbing iteration order.
  pub(crate) fn mark(ob: &mut Observer) {
    ob.marked = true;
  }

  /// Drop every observer marked since the last sweep.
  pub(crate) fn sweep(&mut self) {
    self.slots.iter_mut().for_each(|o| {
                           if matches!(o, Some(ob) if ob.marked) {
                             *o = None;
                           }
                         });
  }

  /// Drop every observer whose entry matches `gone` (used when
  /// resource nodes are unregistered out from under their observers).
  pub(crate) fn drop_if(&mut self, gone: impl Fn(&Observer) -> bool) {
    self.slots.iter_mut().for_each(|o| {
                           if matches!(o, Some(ob) if gone(ob)) {
                             *o = None;
                           }
                         });
  }

  #[cfg(test)]
  pub(crate) fn len(&self) -> usize {
    self.slots.iter().filter(|o| o.is_some()).count()
  }
}

impl Observer {
  /// Advance and return the sequence number for the next
  /// notification (24-bit, wrapping)
  pub(crate) fn next_seq(&mut self) -> u32 {
    self.seq = (self.seq + 1) & 0xFF_FFFF;
    self.seq
  }
}

/// A remote resource we are observing
#[derive(Debug)]
pub(crate) struct Observable {
  pub(crate) addr: SocketAddr,
  pub(crate) token: Token,
  /// Sequence number of the freshest notification seen, `None` until
  /// the first one arrives
  last_seq: Option<u32>,
}

/// Registry of remote resources we observe.
#[derive(Debug, Default)]
pub(crate) struct Observables {
  slots: Buffer<Observable, N_OBSERVABLES>,
}

impl Observables {
  pub(crate) fn register<P: Platform>(&mut self,
                                      addr: SocketAddr,
                                      token: Token)
                                      -> Result<(), What<P>> {
    if self.find_mut(addr, token).is_some() {
      return Ok(());
    }

    buffer_insert(&mut self.slots,
                  Observable { addr,
                               token,
                               last_seq: None }).map(|_| ())
                                                .map_err(|_| What::Capacity(Table::Observables))
  }

  pub(crate) fn deregister(&mut self, addr: SocketAddr, token: Token) {
    self.slots.iter_mut().for_each(|o| {
                           if matches!(o, Some(ob) if ob.addr == addr && ob.token == token) {
                             *o = None;
                           }
                         });
  }

  pub(crate) fn find_mut(&mut self, addr: SocketAddr, token: Token) -> Option<&mut Observable> {
    self.slots
        .iter_mut()
        .filter_map(Option::as_mut)
        .find(|ob| ob.addr == addr && ob.token == token)
  }

  pub(crate) fn contains(&self, addr: SocketAddr, token: Token) -> bool {
    self.slots
        .iter()
        .filter_map(Option::as_ref)
        .any(|ob| ob.addr == addr && ob.token == token)
  }
}

impl Observable {
  /// Is a notification carrying sequence number `seq` fresher than
  /// everything seen so far? Fresh notifications advance the high
  /// water mark; stale ones should be discarded.
  pub(crate) fn fresh(&mut self, seq: u32) -> bool {
    match self.last_seq {
      | None => {
        self.last_seq = Some(seq);
        true
      },
      | Some(last) if seq_is_newer(seq, last) => {
        self.last_seq = Some(seq);
        true
      },
      | Some(_) => false,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test::{addr_a, addr_b, Mocks};

  fn tok(n: u8) -> Token {
    Token(tinyvec::array_vec!([u8; 8] => n))
  }

  #[test]
  fn register_is_idempotent_per_endpoint_and_token() {
    let mut obs = Observers::default();

    obs.register::<Mocks>(0, addr_a(), tok(1)).unwrap();
    obs.register::<Mocks>(0, addr_a(), tok(1)).unwrap();
    obs.register::<Mocks>(0, addr_b(), tok(1)).unwrap();

    assert_eq!(obs.len(), 2);
  }

  #[test]
  fn rst_against_last_notification_removes_observer() {
    let mut obs = Observers::default();
    obs.register::<Mocks>(0, addr_a(), tok(1)).unwrap();
    obs.find_mut(addr_a(), tok(1)).unwrap().last_id = Some(Id(7));

    assert!(!obs.on_rst(addr_a(), Id(8)));
    assert!(obs.on_rst(addr_a(), Id(7)));
    assert_eq!(obs.len(), 0);
  }

  #[test]
  fn mark_and_sweep_defers_removal() {
    let mut obs = Observers::default();
    obs.register::<Mocks>(0, addr_a(), tok(1)).unwrap();
    obs.register::<Mocks>(0, addr_a(), tok(2)).unwrap();

    for ob in obs.of_resource(0) {
      if ob.token == tok(1) {
        Observers::mark(ob);
      }
    }

    assert_eq!(obs.len(), 2);
    obs.sweep();
    assert_eq!(obs.len(), 1);
  }

  #[test]
  fn seq_freshness_tracks_high_water_mark() {
    let mut ob = Observable { addr: addr_a(),
                              token: tok(1),
                              last_seq: None };

    assert!(ob.fresh(5));
    assert!(!ob.fresh(5));
    assert!(!ob.fresh(4));
    assert!(ob.fresh(6));

    // wraparound near 2^24 still counts as newer
    ob.last_seq = Some(0xFF_FFFE);
    assert!(ob.fresh(1));
    assert!(!ob.fresh(0xFF_FFFE));
  }
}
