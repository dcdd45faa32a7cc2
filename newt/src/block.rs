//! Block-wise transfer state
//! ([RFC7959](https://datatracker.ietf.org/doc/html/rfc7959)).
//!
//! One [`BlockCtx`] tracks one body crossing the wire in pieces,
//! keyed by (remote, token). Inbound contexts accumulate; outbound
//! contexts hold the full body and serve slices. Transfers are
//! strictly sequential: the only block we will absorb or serve next
//! is the one that continues where the last left off.

use embedded_time::Instant;
use newt_msg::block::Block;
use newt_msg::{PayloadBytes, Token};
use no_std_net::SocketAddr;

use crate::error::{Table, What};
use crate::platform::Platform;
use crate::time::{since, Clock, Millis};
use crate::{buffer_insert, Buffer, N_BLOCK_CTXS};

/// Which way the body is moving
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
  /// We are reassembling a body a peer sends us piecewise
  In,
  /// We are serving a body to a peer piecewise
  Out,
}

#[derive(Debug)]
pub(crate) struct BlockCtx<C: Clock> {
  pub(crate) addr: SocketAddr,
  pub(crate) token: Token,
  pub(crate) dir: Direction,
  buf: PayloadBytes,
  /// Bytes absorbed (In) or served and acknowledged (Out) so far
  cursor: usize,
  /// Last time a block moved on this transfer
  at: Instant<C>,
}

impl<C: Clock> BlockCtx<C> {
  pub(crate) fn inbound(addr: SocketAddr, token: Token, now: Instant<C>) -> Self {
    BlockCtx { addr,
               token,
               dir: Direction::In,
               buf: PayloadBytes::new(),
               cursor: 0,
               at: now }
  }

  pub(crate) fn outbound(addr: SocketAddr,
                         token: Token,
                         body: &[u8],
                         now: Instant<C>)
                         -> Self {
    BlockCtx { addr,
               token,
               dir: Direction::Out,
               buf: body.iter().copied().collect(),
               cursor: 0,
               at: now }
  }

  /// Absorb one inbound block.
  ///
  /// The transfer position is tracked in bytes, so a peer
  /// renegotiating to a smaller block size mid-transfer just has to
  /// continue from the same byte boundary with its block number
  /// scaled to the new size; numbering does not restart at zero.
  pub(crate) fn absorb<P: Platform>(&mut self,
                                    block: Block,
                                    payload: &[u8],
                                    now: Instant<C>)
                                    -> Result<(), What<P>> {
    let offset = block.num() as usize * block.size() as usize;

    if offset != self.cursor {
      return Err(What::BlockOutOfOrder { expected: (self.cursor / block.size() as usize) as u32,
                                         actual: block.num() });
    }

    if self.cursor + payload.len() > self.buf.capacity() {
      return Err(What::EntityTooLarge);
    }

    self.buf.extend(payload.iter().copied());
    self.cursor += payload.len();
    self.at = now;
    Ok(())
  }

  /// The fully reassembled body (meaningful once the final block,
  /// `more = false`, has been absorbed)
  pub(crate) fn body(&self) -> &[u8] {
    &self.buf
  }

  /// The slice of an outbound body described by `block`, validated
  /// against the transfer position, plus whether more will follow.
  pub(crate) fn serve<P: Platform>(&mut self,
                                   block: Block,
                                   now: Instant<C>)
                                   -> Result<(&[u8], bool), What<P>> {
    let size = block.size() as usize;
    let offset = block.num() as usize * size;

    if offset != self.cursor {
      return Err(What::BlockOutOfOrder { expected: (self.cursor / size) as u32,
                                         actual: block.num() });
    }

    let end = (offset + size).min(self.buf.len());
    self.cursor = end;
    self.at = now;
    Ok((&self.buf[offset..end], end < self.buf.len()))
  }

  /// Has the whole outbound body been served?
  pub(crate) fn done(&self) -> bool {
    self.cursor >= self.buf.len()
  }
}

/// Fixed pool of concurrent block transfers.
#[derive(Debug)]
pub(crate) struct BlockCtxs<C: Clock> {
  slots: Buffer<BlockCtx<C>, N_BLOCK_CTXS>,
}

impl<C: Clock> Default for BlockCtxs<C> {
  fn default() -> Self {
    Self { slots: Default::default() }
  }
}

impl<C: Clock> BlockCtxs<C> {
  pub(crate) fn find_mut(&mut self,
                         addr: SocketAddr,
                         token: Token,
                         dir: Direction)
                         -> Option<&mut BlockCtx<C>> {
    self.slots
        .iter_mut()
        .filter_map(Option::as_mut)
        .find(|c| c.addr == addr && c.token == token && c.dir == dir)
  }

  pub(crate) fn insert<P: Platform>(&mut self,
                                    ctx: BlockCtx<C>)
                                    -> Result<&mut BlockCtx<C>, What<P>> {
    buffer_insert(&mut self.slots, ctx).map(move |ix| {
                                         self.slots[ix].as_mut().unwrap()
                                       })
                                       .map_err(|_| What::Capacity(Table::BlockContexts))
  }

  pub(crate) fn remove(&mut self, addr: SocketAddr, token: Token, dir: Direction) {
    self.slots.iter_mut().for_each(|o| {
                           if let Some(c) = o {
                             if c.addr == addr && c.token == token && c.dir == dir {
                               *o = None;
                             }
                           }
                         });
  }

  /// Free transfers that have not moved within `window`: the peer
  /// abandoned them, and a finite pool cannot wait forever.
  pub(crate) fn expire(&mut self, now: Instant<C>, window: Millis) {
    self.slots.iter_mut().for_each(|o| {
                           if let Some(c) = o {
                             if since(c.at, now) >= window {
                               *o = None;
                             }
                           }
                         });
  }
}

#[cfg(test)]
mod tests {
  use embedded_time::duration::Milliseconds;

  use super::*;
  use crate::test::{addr_a, ClockMock, Mocks};

  fn tok() -> Token {
    Token(tinyvec::array_vec!([u8; 8] => 1))
  }

  fn at(millis: u64) -> Instant<ClockMock> {
    Instant::new(millis)
  }

  #[test]
  fn sequential_blocks_reassemble() {
    let mut ctx = BlockCtx::inbound(addr_a(), tok(), at(0));

    ctx.absorb::<Mocks>(Block::new(16, 0, true), &[0u8; 16], at(0))
       .unwrap();
    ctx.absorb::<Mocks>(Block::new(16, 1, true), &[1u8; 16], at(0))
       .unwrap();
    ctx.absorb::<Mocks>(Block::new(16, 2, false), &[2u8; 4], at(0))
       .unwrap();

    assert_eq!(ctx.body().len(), 36);
    assert_eq!(&ctx.body()[16..32], &[1u8; 16]);
  }

  #[test]
  fn gap_aborts_with_out_of_order() {
    let mut ctx = BlockCtx::inbound(addr_a(), tok(), at(0));

    ctx.absorb::<Mocks>(Block::new(16, 0, true), &[0u8; 16], at(0))
       .unwrap();
    let err = ctx.absorb::<Mocks>(Block::new(16, 2, true), &[2u8; 16], at(0))
                 .unwrap_err();

    assert!(matches!(err,
                     What::BlockOutOfOrder { expected: 1,
                                             actual: 2 }));
  }

  #[test]
  fn renegotiated_size_continues_from_byte_boundary() {
    let mut ctx = BlockCtx::inbound(addr_a(), tok(), at(0));

    ctx.absorb::<Mocks>(Block::new(64, 0, true), &[0u8; 64], at(0))
       .unwrap();

    // peer drops to 16-byte blocks: the next block is number 4, not 1
    assert!(matches!(ctx.absorb::<Mocks>(Block::new(16, 1, true), &[1u8; 16], at(0)),
                     Err(What::BlockOutOfOrder { expected: 4,
                                                 actual: 1 })));
    ctx.absorb::<Mocks>(Block::new(16, 4, false), &[1u8; 16], at(0))
       .unwrap();
    assert_eq!(ctx.body().len(), 80);
  }

  #[test]
  fn oversized_body_rejected() {
    let mut ctx = BlockCtx::inbound(addr_a(), tok(), at(0));
    let cap = newt_msg::PAYLOAD_CAP;

    for num in 0..(cap / 1024) {
      ctx.absorb::<Mocks>(Block::new(1024, num as u32, true), &[0u8; 1024], at(0))
         .unwrap();
    }

    assert!(matches!(ctx.absorb::<Mocks>(Block::new(1024, (cap / 1024) as u32, true),
                                         &[0u8; 1024],
                                         at(0)),
                     Err(What::EntityTooLarge)));
  }

  #[test]
  fn outbound_serves_strictly_in_order() {
    let body: Vec<u8> = (0..100u8).collect();
    let mut ctx = BlockCtx::outbound(addr_a(), tok(), &body, at(0));

    let (slice, more) = ctx.serve::<Mocks>(Block::new(64, 0, false), at(0))
                           .unwrap();
    assert_eq!(slice, &body[..64]);
    assert!(more);

    // skipping ahead is refused
    assert!(ctx.serve::<Mocks>(Block::new(64, 2, false), at(0)).is_err());

    let (slice, more) = ctx.serve::<Mocks>(Block::new(64, 1, false), at(0))
                           .unwrap();
    assert_eq!(slice, &body[64..]);
    assert!(!more);
    assert!(ctx.done());
  }

  #[test]
  fn idle_transfers_expire_but_active_ones_survive() {
    let mut ctxs = BlockCtxs::<ClockMock>::default();
    let idle = Token(tinyvec::array_vec!([u8; 8] => 1));
    let active = Token(tinyvec::array_vec!([u8; 8] => 2));

    ctxs.insert::<Mocks>(BlockCtx::inbound(addr_a(), idle, at(0)))
        .unwrap();
    ctxs.insert::<Mocks>(BlockCtx::inbound(addr_a(), active, at(0)))
        .unwrap();
    ctxs.find_mut(addr_a(), active, Direction::In)
        .unwrap()
        .absorb::<Mocks>(Block::new(16, 0, true), &[0u8; 16], at(40_000))
        .unwrap();

    ctxs.expire(at(45_000), Milliseconds(45_000));

    assert!(ctxs.find_mut(addr_a(), idle, Direction::In).is_none());
    assert!(ctxs.find_mut(addr_a(), active, Direction::In).is_some());
  }
}
