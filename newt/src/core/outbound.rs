//! Core methods that manage outbound messages.
//!
//! For core methods that manage inbound messages, see [`super::inbound`].

use newt_msg::block::Block;
use newt_msg::observe::Action;
use newt_msg::opt::known::{BLOCK1, SIZE1};
use newt_msg::Code;

use super::*;
use crate::block::BlockCtx;

impl<P: Platform, H: Handler> Core<P, H> {
  /// Send a request.
  ///
  /// A fresh message id is always allocated; an empty token is
  /// replaced with a generated opaque one. Bodies larger than
  /// [`Config.block_size`](crate::config::Config) are sent block-wise
  /// (the first block goes out now, the rest as the peer Continues).
  ///
  /// The returned handle is redeemed with
  /// [`poll_resp`](Core::poll_resp). Requests carrying Observe
  /// register/deregister also update the subscription registry so
  /// later notifications can be freshness-checked.
  pub fn send_req(&mut self, req: Addrd<Message>) -> Result<ExchangeHandle, Error<P>> {
    let Addrd(mut msg, addr) = req;

    msg.id = self.exchanges.alloc_id();
    if msg.token.0.is_empty() {
      msg.token = self.next_token(msg.id);
    }

    let when = When::SendingMessage(Some(addr), msg.id, msg.token);
    let now = self.try_now(when)?;

    match msg.get_uint(OBSERVE).and_then(Action::from_uint) {
      | Some(Action::Register) => self.observables
                                      .register::<P>(addr, msg.token)
                                      .map_err(|what| when.what(what))?,
      | Some(Action::Deregister) => self.observables.deregister(addr, msg.token),
      | None => (),
    }

    if msg.payload.0.len() > self.config.block_size as usize {
      let total = msg.payload.0.len();
      let mut ctx = BlockCtx::outbound(addr, msg.token, &msg.payload.0, now);

      let (slice, more) = ctx.serve::<P>(Block::new(self.config.block_size, 0, false), now)
                             .map_err(|what| when.what(what))?;
      msg.set_payload(slice);
      msg.set_uint(BLOCK1,
                   Block::new(self.config.block_size, 0, more).into())
         .map_err(|e| when.what(What::Options(e)))?;
      msg.set_uint(SIZE1, total as u32)
         .map_err(|e| when.what(What::Options(e)))?;

      self.blocks
          .insert::<P>(ctx)
          .map(|_| ())
          .map_err(|what| when.what(what))?;
    }

    let dgram = msg.try_into_bytes()
                   .map_err(|e| when.what(What::ToBytes(e)))?;

    let handle = self.exchanges
                     .insert(Exchange { addr,
                                        id: msg.id,
                                        token: msg.token,
                                        ty: msg.ty,
                                        kind: Kind::Request,
                                        dgram,
                                        timer: con_timer(&self.config, now),
                                        status: Status::Sent })
                     .map_err(|table| when.what(What::Capacity(table)))?;

    log::trace!("-> {:?} {:?} {}B", addr, msg.id, dgram.len());
    Self::transmit_lossy(&mut self.transport, Addrd(dgram.as_slice(), addr));
    Ok(handle)
  }

  /// Send a CoAP ping (an empty confirmable message) to a remote
  /// endpoint. The peer answers with a Reset, surfaced through
  /// [`poll_ping`](Core::poll_ping).
  ///
  /// ```text
  /// Client    Server
  ///  |        |
  ///  +------->|     Header: EMPTY (T=CON, Code=0.00, MID=0x0001)
  ///  |        |
  ///  |<-------+     Header: RESET (T=RST, Code=0.00, MID=0x0001)
  ///  |        |
  /// ```
  pub fn ping(&mut self, addr: SocketAddr) -> Result<ExchangeHandle, Error<P>> {
    let id = self.exchanges.alloc_id();
    let token = Token(Default::default());
    let when = When::SendingMessage(Some(addr), id, token);
    let now = self.try_now(when)?;

    let msg = Message::new(Type::Con, Code::new(0, 0), id, token);
    let dgram = msg.try_into_bytes()
                   .map_err(|e| when.what(What::ToBytes(e)))?;

    let handle = self.exchanges
                     .insert(Exchange { addr,
                                        id,
                                        token,
                                        ty: Type::Con,
                                        kind: Kind::Ping,
                                        dgram,
                                        timer: con_timer(&self.config, now),
                                        status: Status::Sent })
                     .map_err(|table| when.what(What::Capacity(table)))?;

    Self::transmit_lossy(&mut self.transport, Addrd(dgram.as_slice(), addr));
    Ok(handle)
  }

  /// Generate an opaque token for a request sent without one, unique
  /// per (seed, message id).
  fn next_token(&self, id: Id) -> Token {
    let [s0, s1] = self.config.token_seed.to_be_bytes();
    let [i0, i1] = id.0.to_be_bytes();
    Token::opaque(&[s0, s1, i0, i1])
  }

  /// Send bytes, treating transport failure like a lost datagram: the
  /// retransmission schedule (or the peer's) recovers, not the caller.
  pub(super) fn transmit_lossy(transport: &mut P::Transport, dgram: Addrd<&[u8]>) {
    if let Err(e) = transport.send(dgram) {
      log::warn!("send to {:?} failed: {:?}; treating as lost", dgram.addr(), e);
    }
  }
}
