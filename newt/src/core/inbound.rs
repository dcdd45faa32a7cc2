//! Core methods that manage inbound messages.
//!
//! For core methods that manage outbound messages, see [`super::outbound`].

use newt_msg::block::Block;
use newt_msg::observe::Action;
use newt_msg::opt::known::{BLOCK1, BLOCK2, CONTENT_FORMAT, SIZE1, SIZE2, URI_PATH};
use newt_msg::{Code, CodeKind, MessageParseError, TryFromBytes};
use tinyvec::ArrayVec;

use super::*;
use crate::block::BlockCtx;

impl<P: Platform, H: Handler> Core<P, H> {
  /// Feed one received datagram to the engine.
  ///
  /// Unparseable datagrams are dropped (logged, never answered, never
  /// a panic), with one exception: a confirmable message in a protocol
  /// version we don't speak is Reset, since the fixed header is
  /// version-independent.
  ///
  /// Everything else is dispatched by code class: empty messages
  /// resolve or Reset exchanges, responses land on the pending request
  /// matching their token, and requests run the server path (dedup,
  /// block reassembly, resource dispatch, observe bookkeeping).
  pub fn on_datagram(&mut self, dgram: Addrd<&[u8]>) -> Result<(), Error<P>> {
    let Addrd(raw, addr) = dgram;
    let when = When::Receiving(addr);

    let msg = match Message::try_from_bytes(raw) {
      | Ok(msg) => msg,
      | Err(MessageParseError::InvalidVersion(v)) => {
        log::debug!("{:?}: unsupported protocol version {}", addr, v);
        self.rst_foreign_version(addr, raw);
        return Ok(());
      },
      | Err(e) => {
        log::debug!("{:?}: dropping unparseable datagram: {:?}", addr, e);
        return Ok(());
      },
    };

    log::trace!("<- {:?} {:?} {}B", addr, msg.id, raw.len());

    match msg.code.kind() {
      | CodeKind::Empty => self.on_empty(when, Addrd(msg, addr)),
      | CodeKind::Response => self.on_response(when, Addrd(msg, addr)),
      | CodeKind::Request => self.on_request(when, Addrd(msg, addr)),
    }
  }

  /// The fixed header is version-independent, so a confirmable
  /// datagram in a foreign version still gets a Reset with the right
  /// message id. Anything else is silently dropped.
  fn rst_foreign_version(&mut self, addr: SocketAddr, raw: &[u8]) {
    if raw.len() < 4 || (raw[0] >> 4) & 0b11 != 0 {
      return;
    }

    let id = Id(u16::from_be_bytes([raw[2], raw[3]]));
    let rst = Message::new(Type::Reset, Code::new(0, 0), id, Token(Default::default()));
    if let Ok(bytes) = rst.try_into_bytes() {
      Self::transmit_lossy(&mut self.transport, Addrd(bytes.as_slice(), addr));
    }
  }

  fn on_empty(&mut self, when: When, msg: Addrd<Message>) -> Result<(), Error<P>> {
    let addr = msg.addr();

    match msg.data().ty {
      | Type::Con => {
        // CoAP ping; the pong is a Reset
        log::debug!("ping from {:?}", addr);
        let bytes = msg.data()
                       .rst()
                       .try_into_bytes()
                       .map_err(|e| when.what(What::ToBytes(e)))?;
        Self::transmit_lossy(&mut self.transport, Addrd(bytes.as_slice(), addr));
        Ok(())
      },
      | Type::Ack => {
        if let Some((_, ex)) = self.exchanges.find_by_mid(addr, msg.data().id) {
          if matches!(ex.status, Status::Sent) {
            // retransmission stops; the span keeps running until the
            // response shows up
            ex.status = Status::Acked;
          }
        }
        Ok(())
      },
      | Type::Reset => {
        self.on_reset(msg);
        Ok(())
      },
      | Type::Non => Ok(()),
    }
  }

  fn on_reset(&mut self, msg: Addrd<Message>) {
    let (addr, id) = (msg.addr(), msg.data().id);

    let found = self.exchanges
                    .find_by_mid(addr, id)
                    .map(|(handle, ex)| (handle, ex.kind));

    match found {
      // the Reset *is* the pong
      | Some((handle, Kind::Ping)) => {
        if let Some(ex) = self.exchanges.get_mut(handle) {
          ex.status = Status::Rcvd(msg);
        }
      },
      | Some((handle, Kind::Notification)) => {
        if let Some(ex) = self.exchanges.take(handle) {
          log::info!("{:?} rejected a notification; deregistering", addr);
          self.observers
              .drop_if(|ob| ob.addr == ex.addr && ob.token == ex.token);
        }
      },
      | Some((handle, Kind::Request)) => {
        if let Some(ex) = self.exchanges.get_mut(handle) {
          ex.status = Status::Failed(Fail::Reset);
        }
      },
      // a Reset to a notification whose exchange already completed
      | None => {
        if self.observers.on_rst(addr, id) {
          log::info!("{:?} rejected a notification; deregistering", addr);
        }
      },
    }
  }

  fn on_response(&mut self, when: When, msg: Addrd<Message>) -> Result<(), Error<P>> {
    let addr = msg.addr();
    let token = msg.data().token;

    let handle = match self.exchanges.find_by_token(addr, token) {
      | Some((handle, _)) => handle,
      | None => {
        // nothing pending wants this; Reset confirmables so the peer
        // stops retransmitting
        if msg.data().ty == Type::Con {
          let bytes = msg.data()
                         .rst()
                         .try_into_bytes()
                         .map_err(|e| when.what(What::ToBytes(e)))?;
          Self::transmit_lossy(&mut self.transport, Addrd(bytes.as_slice(), addr));
        }
        return Ok(());
      },
    };

    // separate confirmable responses get their own ACK
    if msg.data().ty == Type::Con {
      let bytes = msg.data()
                     .ack()
                     .try_into_bytes()
                     .map_err(|e| when.what(What::ToBytes(e)))?;
      Self::transmit_lossy(&mut self.transport, Addrd(bytes.as_slice(), addr));
    }

    // notification freshness gate
    if let Some(seq) = msg.data().get_uint(OBSERVE) {
      if let Some(sub) = self.observables.find_mut(addr, token) {
        if !sub.fresh(seq) {
          log::debug!("{:?}: stale notification ({}) discarded", addr, seq);
          return Ok(());
        }
      }
    }

    // a Continue means the peer wants the next request block
    if msg.data().code == code::CONTINUE {
      if let Some(raw) = msg.data().get_uint(BLOCK1) {
        return self.continue_block1(when, handle, raw);
      }
    }

    // fragmented response bodies are reassembled before delivery
    if let Some(raw) = msg.data().get_uint(BLOCK2) {
      return self.absorb_block2(when, handle, msg, raw);
    }

    if let Some(ex) = self.exchanges.get_mut(handle) {
      ex.status = Status::Rcvd(msg);
    }
    Ok(())
  }

  /// The peer Continued our block-wise upload: send the next block
  /// through the same exchange (same token, fresh message id).
  fn continue_block1(&mut self,
                     when: When,
                     handle: ExchangeHandle,
                     raw: u32)
                     -> Result<(), Error<P>> {
    let now = self.try_now(when)?;

    let block = match Block::parse(raw) {
      | Ok(block) => block,
      | Err(e) => {
        log::debug!("dropping Continue with malformed Block1: {:?}", e);
        return Ok(());
      },
    };

    let (addr, token) = match self.exchanges.get_mut(handle) {
      | Some(ex) => (ex.addr, ex.token),
      | None => return Ok(()),
    };
    let id = self.exchanges.alloc_id();

    let ctx = match self.blocks.find_mut(addr, token, Direction::Out) {
      | Some(ctx) => ctx,
      | None => return Ok(()),
    };

    let next = Block::new(block.size(), block.num() + 1, false);
    let (slice, more) = match ctx.serve::<P>(next, now) {
      | Ok(out) => out,
      | Err(what) => {
        self.blocks.remove(addr, token, Direction::Out);
        self.exchanges.take(handle);
        return Err(when.what(what));
      },
    };

    let ex = match self.exchanges.get_mut(handle) {
      | Some(ex) => ex,
      | None => return Ok(()),
    };

    // rebuild the retained request around the next block
    let mut req = Message::try_from_bytes(ex.dgram.as_slice())
                          .map_err(|e| when.what(What::FromBytes(e)))?;
    req.id = id;
    req.set_payload(slice);
    req.set_uint(BLOCK1,
                 Block::new(block.size(), block.num() + 1, more).into())
       .map_err(|e| when.what(What::Options(e)))?;

    ex.id = id;
    ex.dgram = req.try_into_bytes()
                  .map_err(|e| when.what(What::ToBytes(e)))?;
    ex.status = Status::Sent;
    ex.timer = con_timer(&self.config, now);
    Self::transmit_lossy(&mut self.transport, Addrd(ex.dgram.as_slice(), addr));

    if !more {
      self.blocks.remove(addr, token, Direction::Out);
    }
    Ok(())
  }

  /// One block of a fragmented response arrived: absorb it and either
  /// request the next block or deliver the reassembled body.
  fn absorb_block2(&mut self,
                   when: When,
                   handle: ExchangeHandle,
                   msg: Addrd<Message>,
                   raw: u32)
                   -> Result<(), Error<P>> {
    let now = self.try_now(when)?;
    let addr = msg.addr();
    let token = msg.data().token;

    let block = match Block::parse(raw) {
      | Ok(block) => block,
      | Err(e) => {
        log::debug!("dropping response with malformed Block2: {:?}", e);
        return Ok(());
      },
    };

    if self.blocks.find_mut(addr, token, Direction::In).is_none() {
      self.blocks
          .insert::<P>(BlockCtx::inbound(addr, token, now))
          .map(|_| ())
          .map_err(|what| when.what(what))?;
    }
    let ctx = match self.blocks.find_mut(addr, token, Direction::In) {
      | Some(ctx) => ctx,
      | None => return Ok(()),
    };

    if let Err(what) = ctx.absorb::<P>(block, &msg.data().payload.0, now) {
      // broken transfer poisons the whole exchange
      self.blocks.remove(addr, token, Direction::In);
      self.exchanges.take(handle);
      return Err(when.what(what));
    }

    if block.more() {
      // ask for the next block through the original request
      let id = self.exchanges.alloc_id();
      let ex = match self.exchanges.get_mut(handle) {
        | Some(ex) => ex,
        | None => return Ok(()),
      };

      let mut req = Message::try_from_bytes(ex.dgram.as_slice())
                            .map_err(|e| when.what(What::FromBytes(e)))?;
      req.id = id;
      req.set_uint(BLOCK2,
                   Block::new(block.size(), block.num() + 1, false).into())
         .map_err(|e| when.what(What::Options(e)))?;

      ex.id = id;
      ex.dgram = req.try_into_bytes()
                    .map_err(|e| when.what(What::ToBytes(e)))?;
      ex.status = Status::Sent;
      ex.timer = con_timer(&self.config, now);
      Self::transmit_lossy(&mut self.transport, Addrd(ex.dgram.as_slice(), addr));
      return Ok(());
    }

    // final block: deliver the whole body as one response
    let mut full = msg;
    full.data_mut().set_payload(ctx.body());
    full.data_mut()
        .remove(BLOCK2)
        .map_err(|e| when.what(What::FromBytes(MessageParseError::OptParseError(e))))?;
    self.blocks.remove(addr, token, Direction::In);

    if let Some(ex) = self.exchanges.get_mut(handle) {
      ex.status = Status::Rcvd(full);
    }
    Ok(())
  }

  fn on_request(&mut self, when: When, req: Addrd<Message>) -> Result<(), Error<P>> {
    let addr = req.addr();
    let (id, ty) = (req.data().id, req.data().ty);

    // retransmitted confirmables replay the remembered reply instead
    // of re-running the handler
    if ty == Type::Con {
      if let Some(reply) = self.dedup.replay(addr, id) {
        log::debug!("{:?} from {:?} is a duplicate; replaying reply", id, addr);
        let reply = *reply;
        Self::transmit_lossy(&mut self.transport, Addrd(reply.as_slice(), addr));
        return Ok(());
      }
    }

    let mut req = req;
    let now = self.try_now(when)?;

    if let Some(raw) = req.data().get_uint(BLOCK1) {
      if let Some(rep) = self.absorb_block1(when, now, &mut req, raw)? {
        return self.reply(when, Addrd(rep, addr), id, ty);
      }
      // body complete; the reassembled request falls through to dispatch
    }

    let rep = self.dispatch(when, now, &req)?;
    self.reply(when, Addrd(rep, addr), id, ty)
  }

  /// Absorb one block of a fragmented request body.
  ///
  /// `Some(reply)` short-circuits dispatch (2.31 Continue, or an error
  /// response); `None` means the body is complete and has replaced the
  /// request's payload.
  fn absorb_block1(&mut self,
                   when: When,
                   now: Instant<P::Clock>,
                   req: &mut Addrd<Message>,
                   raw: u32)
                   -> Result<Option<Message>, Error<P>> {
    let addr = req.addr();
    let token = req.data().token;

    let block = match Block::parse(raw) {
      | Ok(block) => block,
      | Err(_) => return Ok(Some(req.data().response_to(code::BAD_OPTION))),
    };

    if self.blocks.find_mut(addr, token, Direction::In).is_none()
       && self.blocks
              .insert::<P>(BlockCtx::inbound(addr, token, now))
              .is_err()
    {
      log::warn!("block context pool full; refusing upload from {:?}", addr);
      return Ok(Some(req.data().response_to(code::SERVICE_UNAVAILABLE)));
    }
    let ctx = match self.blocks.find_mut(addr, token, Direction::In) {
      | Some(ctx) => ctx,
      | None => return Ok(Some(req.data().response_to(code::SERVICE_UNAVAILABLE))),
    };

    match ctx.absorb::<P>(block, &req.data().payload.0, now) {
      | Err(What::EntityTooLarge) => {
        self.blocks.remove(addr, token, Direction::In);
        let mut rep = req.data().response_to(code::REQUEST_ENTITY_TOO_LARGE);
        rep.set_uint(SIZE1, newt_msg::PAYLOAD_CAP as u32)
           .map_err(|e| when.what(What::Options(e)))?;
        Ok(Some(rep))
      },
      | Err(_) => {
        // out of order: the transfer is broken, the peer must restart
        self.blocks.remove(addr, token, Direction::In);
        Ok(Some(req.data().response_to(code::REQUEST_ENTITY_INCOMPLETE)))
      },
      | Ok(()) if block.more() => {
        let mut rep = req.data().response_to(code::CONTINUE);
        rep.set_uint(BLOCK1, raw)
           .map_err(|e| when.what(What::Options(e)))?;
        Ok(Some(rep))
      },
      | Ok(()) => {
        req.data_mut().set_payload(ctx.body());
        req.data_mut()
           .remove(BLOCK1)
           .map_err(|e| when.what(What::FromBytes(MessageParseError::OptParseError(e))))?;
        self.blocks.remove(addr, token, Direction::In);
        Ok(None)
      },
    }
  }

  /// Resolve a request to a response: path walk, permission check,
  /// observe bookkeeping, handler invocation, and block-wise
  /// fragmentation of oversized bodies.
  fn dispatch(&mut self,
              when: When,
              now: Instant<P::Clock>,
              req: &Addrd<Message>)
              -> Result<Message, Error<P>> {
    let addr = req.addr();
    let m = req.data();

    let mut path = ArrayVec::<[&str; 8]>::new();
    for v in m.get_all(URI_PATH) {
      match core::str::from_utf8(&v.0) {
        | Ok(seg) if path.len() < path.capacity() => path.push(seg),
        | Ok(_) => return Ok(m.response_to(code::NOT_FOUND)),
        | Err(_) => return Ok(m.response_to(code::BAD_REQUEST)),
      }
    }

    if path.as_slice() == [".well-known", "core"] {
      if m.code != code::GET {
        return Ok(m.response_to(code::METHOD_NOT_ALLOWED));
      }
      let mut rep = m.response_to(code::CONTENT);
      rep.set_uint(CONTENT_FORMAT, 40) // application/link-format
         .map_err(|e| when.what(What::Options(e)))?;
      let links = self.resources.well_known_core();
      rep.set_payload(&links);
      return Ok(rep);
    }

    let ix = match self.resources.lookup(path.iter().copied()) {
      | Some(ix) => ix,
      | None => return Ok(m.response_to(code::NOT_FOUND)),
    };

    if let Some(raw) = m.get_uint(BLOCK2) {
      let block = match Block::parse(raw) {
        | Ok(block) => block,
        | Err(_) => return Ok(m.response_to(code::BAD_OPTION)),
      };

      if block.num() > 0 {
        // continuation of an in-flight fragmented response: served
        // from the stored body, the handler does not run again
        return self.serve_block2(when, now, m, addr, block);
      }

      // block 0 restarts the transfer (e.g. size renegotiation)
      self.blocks.remove(addr, m.token, Direction::Out);
    }

    if self.resources.handler_mut(ix).is_none() {
      // intermediate path segment; nothing served here
      return Ok(m.response_to(code::NOT_FOUND));
    }

    let permissions = self.resources.permissions(ix);
    if !permissions.allows(m.code) {
      return Ok(m.response_to(code::METHOD_NOT_ALLOWED));
    }

    // subscription changes happen before the handler runs
    let mut subscribed = false;
    if m.code == code::GET && permissions.contains(Permissions::OBSERVE) {
      match m.get_uint(OBSERVE).and_then(Action::from_uint) {
        | Some(Action::Register) => match self.observers.register::<P>(ix, addr, m.token) {
          | Ok(()) => subscribed = true,
          // registry full is not an error: answer normally, without
          // the Observe option, and the peer knows it isn't subscribed
          | Err(_) => log::warn!("observer registry full; {:?} not subscribed", addr),
        },
        // an explicit deregister, or a plain GET from a registered
        // observer, both cancel the subscription
        | Some(Action::Deregister) | None => self.observers.deregister(addr, m.token),
      }
    }

    let mut rep = m.response_to(code::CONTENT);
    if let Some(handler) = self.resources.handler_mut(ix) {
      handler.handle(req, &mut rep);
    }

    if subscribed {
      let seq = self.observers
                    .find_mut(addr, m.token)
                    .map(|ob| ob.seq)
                    .unwrap_or(0);
      rep.set_uint(OBSERVE, seq)
         .map_err(|e| when.what(What::Options(e)))?;
    }

    if rep.payload.0.len() > self.config.block_size as usize {
      rep = self.fragment_response(when, now, addr, rep)?;
    }

    Ok(rep)
  }

  /// Serve a continuation block of a stored fragmented response.
  fn serve_block2(&mut self,
                  when: When,
                  now: Instant<P::Clock>,
                  m: &Message,
                  addr: SocketAddr,
                  block: Block)
                  -> Result<Message, Error<P>> {
    let ctx = match self.blocks.find_mut(addr, m.token, Direction::Out) {
      | Some(ctx) => ctx,
      | None => return Ok(m.response_to(code::REQUEST_ENTITY_INCOMPLETE)),
    };

    match ctx.serve::<P>(block, now) {
      | Err(_) => {
        self.blocks.remove(addr, m.token, Direction::Out);
        Ok(m.response_to(code::REQUEST_ENTITY_INCOMPLETE))
      },
      | Ok((slice, more)) => {
        let mut rep = m.response_to(code::CONTENT);
        rep.set_payload(slice);
        let done = ctx.done();
        rep.set_uint(BLOCK2,
                     Block::new(block.size(), block.num(), more).into())
           .map_err(|e| when.what(What::Options(e)))?;
        if done {
          self.blocks.remove(addr, m.token, Direction::Out);
        }
        Ok(rep)
      },
    }
  }

  /// Split an oversized response body into a block transfer, sending
  /// block 0 now and storing the rest for continuation requests.
  fn fragment_response(&mut self,
                       when: When,
                       now: Instant<P::Clock>,
                       addr: SocketAddr,
                       rep: Message)
                       -> Result<Message, Error<P>> {
    let total = rep.payload.0.len();
    let mut ctx = BlockCtx::outbound(addr, rep.token, &rep.payload.0, now);
    let mut first = rep;

    let (slice, more) = ctx.serve::<P>(Block::new(self.config.block_size, 0, false), now)
                           .map_err(|what| when.what(what))?;
    first.set_payload(slice);
    first.set_uint(BLOCK2,
                   Block::new(self.config.block_size, 0, more).into())
         .map_err(|e| when.what(What::Options(e)))?;
    first.set_uint(SIZE2, total as u32)
         .map_err(|e| when.what(What::Options(e)))?;

    if self.blocks.insert::<P>(ctx).is_err() {
      log::warn!("block context pool full; cannot fragment response to {:?}", addr);
      return Ok(Message::new(first.ty, code::SERVICE_UNAVAILABLE, first.id, first.token));
    }
    Ok(first)
  }

  /// Encode and send a reply, remembering it for deduplication when it
  /// answers a confirmable request. NON replies are standalone
  /// messages and get their own fresh id.
  fn reply(&mut self,
           when: When,
           mut rep: Addrd<Message>,
           req_id: Id,
           req_ty: Type)
           -> Result<(), Error<P>> {
    if rep.data().ty == Type::Non {
      rep.data_mut().id = self.exchanges.alloc_id();
    }

    let addr = rep.addr();
    let bytes = rep.unwrap()
                   .try_into_bytes()
                   .map_err(|e| when.what(What::ToBytes(e)))?;

    // remembered before sending, so even a failed send leaves the
    // reply replayable when the peer retransmits
    if req_ty == Type::Con {
      let now = self.try_now(when)?;
      self.dedup.remember(addr, req_id, bytes, now);
    }

    log::trace!("-> {:?} {}B", addr, bytes.len());
    self.transport
        .send(Addrd(bytes.as_slice(), addr))
        .map_err(|e| when.what(What::Transport(e)))
  }
}
