//! The transaction table: every message we sent and still care about
//! lives in a fixed arena slot until it is acknowledged, answered,
//! failed, or cancelled.
//!
//! Slots keep their index for the lifetime of the entry, so an index
//! can be handed to the caller as an opaque [`ExchangeHandle`] and
//! stays valid while unrelated entries come and go.

use embedded_time::Instant;
use newt_msg::{DgramBytes, Id, Message, Token, Type};
use no_std_net::SocketAddr;

use crate::error::Table;
use crate::net::Addrd;
use crate::retry::RetryTimer;
use crate::time::{since, Clock, Millis};
use crate::{buffer_insert, Buffer, N_DEDUP, N_EXCHANGES};

/// Opaque handle to an in-flight exchange, returned by
/// [`Core::send_req`](crate::core::Core::send_req) and friends and
/// redeemed with [`Core::poll_resp`](crate::core::Core::poll_resp).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExchangeHandle(pub(crate) u8);

/// What an exchange exists for.
///
/// Determines how ACK, RST and timeout are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Kind {
  /// A request we sent; a response is expected
  Request,
  /// An empty CON we sent; a Reset is the expected answer
  Ping,
  /// An observe notification we sent; RST means "deregister me"
  Notification,
}

/// Terminal failure of an exchange, held until polled once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fail {
  /// Retransmission or response wait exhausted
  Timeout,
  /// The peer sent Reset
  Reset,
}

/// Where an exchange is in its lifecycle.
#[derive(Debug)]
pub(crate) enum Status {
  /// Sent; awaiting ACK and/or response
  Sent,
  /// Separately ACKed; the response is still on its way
  /// (retransmission stops, the span timeout keeps running)
  Acked,
  /// A response arrived and waits to be polled
  Rcvd(Addrd<Message>),
  /// Terminal failure, surfaced exactly once by the next poll
  Failed(Fail),
}

#[derive(Debug)]
pub(crate) struct Exchange<C: Clock> {
  pub(crate) addr: SocketAddr,
  pub(crate) id: Id,
  pub(crate) token: Token,
  pub(crate) ty: Type,
  pub(crate) kind: Kind,
  /// The encoded datagram, retained so retransmission doesn't
  /// re-serialize
  pub(crate) dgram: DgramBytes,
  pub(crate) timer: RetryTimer<C>,
  pub(crate) status: Status,
}

/// Fixed arena of in-flight exchanges plus the message id allocator.
#[derive(Debug)]
pub(crate) struct Exchanges<C: Clock> {
  slots: Buffer<Exchange<C>, N_EXCHANGES>,
  next_id: u16,
}

impl<C: Clock> Default for Exchanges<C> {
  fn default() -> Self {
    Self { slots: Default::default(),
           next_id: 0 }
  }
}

impl<C: Clock> Exchanges<C> {
  pub(crate) fn insert(&mut self, ex: Exchange<C>) -> Result<ExchangeHandle, Table> {
    buffer_insert(&mut self.slots, ex).map(|ix| ExchangeHandle(ix as u8))
                                      .map_err(|_| Table::Exchanges)
  }

  pub(crate) fn get_mut(&mut self, h: ExchangeHandle) -> Option<&mut Exchange<C>> {
    self.slots.get_mut(h.0 as usize).and_then(Option::as_mut)
  }

  /// Free the slot, yielding its entry
  pub(crate) fn take(&mut self, h: ExchangeHandle) -> Option<Exchange<C>> {
    self.slots.get_mut(h.0 as usize).and_then(Option::take)
  }

  pub(crate) fn find_by_token(&mut self,
                              addr: SocketAddr,
                              token: Token)
                              -> Option<(ExchangeHandle, &mut Exchange<C>)> {
    self.iter_mut()
        .find(|(_, ex)| ex.addr == addr && ex.token == token)
  }

  pub(crate) fn find_by_mid(&mut self,
                            addr: SocketAddr,
                            id: Id)
                            -> Option<(ExchangeHandle, &mut Exchange<C>)> {
    self.iter_mut().find(|(_, ex)| ex.addr == addr && ex.id == id)
  }

  pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (ExchangeHandle, &mut Exchange<C>)> {
    self.slots
        .iter_mut()
        .enumerate()
        .filter_map(|(ix, o)| o.as_mut().map(|ex| (ExchangeHandle(ix as u8), ex)))
  }

  /// Next message id not currently occupied by an in-flight exchange.
  ///
  /// 16-bit monotonic counter; ids of live entries are skipped so a
  /// late ACK can never be matched against the wrong message.
  pub(crate) fn alloc_id(&mut self) -> Id {
    loop {
      self.next_id = self.next_id.wrapping_add(1);
      let id = Id(self.next_id);

      let in_use = self.slots
                       .iter()
                       .filter_map(Option::as_ref)
                       .any(|ex| ex.id == id);
      if !in_use {
        break id;
      }
    }
  }
}

#[derive(Debug)]
struct DedupEntry<C: Clock> {
  addr: SocketAddr,
  id: Id,
  reply: DgramBytes,
  at: Instant<C>,
}

/// Recently-answered requests, remembered so a retransmitted duplicate
/// replays the stored reply instead of re-running the handler.
#[derive(Debug)]
pub(crate) struct Dedup<C: Clock> {
  slots: Buffer<DedupEntry<C>, N_DEDUP>,
}

impl<C: Clock> Default for Dedup<C> {
  fn default() -> Self {
    Self { slots: Default::default() }
  }
}

impl<C: Clock> Dedup<C> {
  pub(crate) fn remember(&mut self,
                         addr: SocketAddr,
                         id: Id,
                         reply: DgramBytes,
                         now: Instant<C>) {
    let entry = DedupEntry { addr, id, reply, at: now };

    if let Some(slot) = self.slots
                            .iter_mut()
                            .filter_map(Option::as_mut)
                            .find(|e| e.addr == addr && e.id == id)
    {
      *slot = entry;
      return;
    }

    if let Err(entry) = buffer_insert(&mut self.slots, entry) {
      // full: evict the oldest entry
      if let Some(oldest) = self.slots
                                .iter_mut()
                                .min_by_key(|o| o.as_ref().map(|e| e.at))
      {
        *oldest = Some(entry);
      }
    }
  }

  pub(crate) fn replay(&self, addr: SocketAddr, id: Id) -> Option<&DgramBytes> {
    self.slots
        .iter()
        .filter_map(Option::as_ref)
        .find(|e| e.addr == addr && e.id == id)
        .map(|e| &e.reply)
  }

  pub(crate) fn expire(&mut self, now: Instant<C>, window: Millis) {
    self.slots.iter_mut().for_each(|o| {
                           if let Some(e) = o {
                             if since(e.at, now) >= window {
                               *o = None;
                             }
                           }
                         });
  }
}

#[cfg(test)]
mod tests {
  use embedded_time::duration::Milliseconds;
  use embedded_time::Instant;
  use newt_msg::{DgramBytes, Id, Token, Type};

  use super::*;
  use crate::config::Config;
  use crate::retry::Attempts;
  use crate::test::{addr_a, addr_b, ClockMock};

  fn exchange(addr: no_std_net::SocketAddr, id: u16) -> Exchange<ClockMock> {
    let cfg = Config::default();
    Exchange { addr,
               id: Id(id),
               token: Token(Default::default()),
               ty: Type::Con,
               kind: Kind::Request,
               dgram: DgramBytes::new(),
               timer: RetryTimer::new(Instant::new(0),
                                      cfg.con.retry_strategy,
                                      cfg.con.max_attempts,
                                      cfg.max_transmit_span),
               status: Status::Sent }
  }

  #[test]
  fn handles_stay_stable_across_removal() {
    let mut exs = Exchanges::<ClockMock>::default();

    let a = exs.insert(exchange(addr_a(), 1)).unwrap();
    let b = exs.insert(exchange(addr_a(), 2)).unwrap();
    let c = exs.insert(exchange(addr_a(), 3)).unwrap();

    exs.take(b).unwrap();
    assert_eq!(exs.get_mut(a).unwrap().id, Id(1));
    assert_eq!(exs.get_mut(c).unwrap().id, Id(3));

    // freed slot is reused without disturbing the others
    let d = exs.insert(exchange(addr_a(), 4)).unwrap();
    assert_eq!(d, b);
  }

  #[test]
  fn insert_full_is_typed_error() {
    let mut exs = Exchanges::<ClockMock>::default();
    for i in 0..crate::N_EXCHANGES {
      exs.insert(exchange(addr_a(), i as u16)).unwrap();
    }

    assert_eq!(exs.insert(exchange(addr_a(), 999)).unwrap_err(),
               Table::Exchanges);
  }

  #[test]
  fn alloc_id_skips_live_ids() {
    let mut exs = Exchanges::<ClockMock>::default();
    exs.insert(exchange(addr_a(), 1)).unwrap();
    exs.insert(exchange(addr_a(), 2)).unwrap();

    assert_eq!(exs.alloc_id(), Id(3));
  }

  #[test]
  fn matching_is_scoped_to_remote() {
    let mut exs = Exchanges::<ClockMock>::default();
    exs.insert(exchange(addr_a(), 7)).unwrap();

    assert!(exs.find_by_mid(addr_a(), Id(7)).is_some());
    assert!(exs.find_by_mid(addr_b(), Id(7)).is_none());
  }

  #[test]
  fn dedup_replays_then_expires() {
    let mut dedup = Dedup::<ClockMock>::default();
    let reply: DgramBytes = [1u8, 2, 3].into_iter().collect();

    dedup.remember(addr_a(), Id(9), reply.clone(), Instant::new(0));
    assert_eq!(dedup.replay(addr_a(), Id(9)), Some(&reply));
    assert_eq!(dedup.replay(addr_b(), Id(9)), None);

    dedup.expire(Instant::new(31_999), Milliseconds(32_000));
    assert!(dedup.replay(addr_a(), Id(9)).is_some());

    dedup.expire(Instant::new(32_000), Milliseconds(32_000));
    assert!(dedup.replay(addr_a(), Id(9)).is_none());
  }
}
