use embedded_time::Clock as _;
use embedded_time::Instant;
use newt_msg::opt::known::OBSERVE;
use newt_msg::{Id, Message, Token, TryIntoBytes, Type};
use no_std_net::SocketAddr;

/// Core methods that manage inbound messages.
///
/// For core methods that manage outbound messages, see [`outbound`].
mod inbound;
/// Core methods that manage outbound messages.
///
/// For core methods that manage inbound messages, see [`inbound`].
mod outbound;

use crate::block::{BlockCtxs, Direction};
use crate::code;
use crate::config::Config;
use crate::error::{Error, What, When};
use crate::exchange::{Exchange, ExchangeHandle, Exchanges, Fail, Kind, Status};
use crate::exchange::Dedup;
use crate::net::{Addrd, Transport};
use crate::observe::{Observables, Observers};
use crate::platform::Platform;
use crate::resource::{self, Handler, Permissions, ResourceTree};
use crate::retry::{RetryTimer, YouShould};
use crate::time::Clock;

/// A CoAP engine driving client- and server-side behavior over any
/// datagram transport.
///
/// One `Core` owns every table the protocol needs (in-flight
/// exchanges, dedup history, resources, observers, block transfer
/// contexts), all fixed-capacity, so its memory footprint is known at
/// compile time. Multiple independent cores can coexist; nothing here
/// is global.
///
/// The application owns the event loop and calls in from exactly two
/// places, which must not race each other:
///  - [`Core::on_datagram`] whenever the transport delivers bytes
///  - [`Core::on_tick`] periodically, to drive retransmission and expiry
///
/// Requests are correlated by handle:
/// [`send_req`](Core::send_req) returns an [`ExchangeHandle`] which is
/// redeemed against [`poll_resp`](Core::poll_resp) until it yields the
/// response or a terminal error.
#[allow(missing_debug_implementations)]
pub struct Core<P: Platform, H: Handler> {
  /// Where time comes from
  clock: P::Clock,
  /// How datagrams leave the device
  transport: P::Transport,
  config: Config,
  exchanges: Exchanges<P::Clock>,
  dedup: Dedup<P::Clock>,
  resources: ResourceTree<H>,
  observers: Observers,
  observables: Observables,
  blocks: BlockCtxs<P::Clock>,
}

/// Retransmission timer for a fresh confirmable exchange
fn con_timer<C: Clock>(cfg: &Config, now: Instant<C>) -> RetryTimer<C> {
  RetryTimer::new(now,
                  cfg.con.retry_strategy,
                  cfg.con.max_attempts,
                  cfg.max_transmit_span)
}

impl<P: Platform, H: Handler> Core<P, H> {
  /// Create a new engine from a clock, a transport and a [`Config`].
  ///
  /// ```
  /// use std::net::UdpSocket;
  ///
  /// use newt::core::Core;
  /// use newt::platform::Std;
  /// use newt::resource::Noop;
  /// use newt::std::Clock;
  ///
  /// let sock = UdpSocket::bind("0.0.0.0:0").unwrap();
  /// let core = Core::<Std, Noop>::new(Clock::new(), sock, Default::default());
  /// ```
  pub fn new(clock: P::Clock, transport: P::Transport, config: Config) -> Self {
    Self { clock,
           transport,
           config,
           exchanges: Default::default(),
           dedup: Default::default(),
           resources: Default::default(),
           observers: Default::default(),
           observables: Default::default(),
           blocks: Default::default() }
  }

  fn try_now(&self, when: When) -> Result<Instant<P::Clock>, Error<P>> {
    self.clock.try_now().map_err(|_| when.what(What::Clock))
  }

  /// Serve `handler` at `path`, synthesizing intermediate nodes as
  /// needed. Fails (leaving the tree unchanged) when the path is too
  /// deep, a segment is too long, the path is already occupied, or the
  /// tree is full.
  pub fn resource_register(&mut self,
                           path: &str,
                           permissions: Permissions,
                           handler: H)
                           -> Result<(), Error<P>> {
    self.resources
        .register::<P>(&self.config, path, permissions, handler)
        .map_err(|what| When::Registering.what(what))
  }

  /// Remove the resource at `path` and everything beneath it, along
  /// with any observers subscribed to the removed nodes.
  pub fn resource_unregister(&mut self, path: &str) -> Result<(), Error<P>> {
    self.resources
        .unregister::<P>(path)
        .map_err(|what| When::Registering.what(what))?;

    let resources = &self.resources;
    self.observers.drop_if(|ob| !resources.is_live(ob.resource));
    Ok(())
  }

  /// The resource at `path` changed: send every observer a confirmable
  /// notification carrying `payload`, its registration token, and the
  /// next Observe sequence number.
  ///
  /// Notifications ride the transaction table like any other
  /// confirmable message; a Reset (or retransmission exhaustion)
  /// deregisters the observer it was bound for. When the table is too
  /// full to track a notification, the observer is dropped rather than
  /// left believing it is subscribed.
  pub fn notify(&mut self, path: &str, payload: &[u8]) -> Result<(), Error<P>> {
    let ix = self.resources
                 .lookup(resource::segments(path))
                 .ok_or_else(|| When::Notifying.what(What::NotFound))?;
    let now = self.try_now(When::Notifying)?;

    for ob in self.observers.of_resource(ix) {
      let seq = ob.next_seq();
      let id = self.exchanges.alloc_id();
      let when = When::SendingMessage(Some(ob.addr), id, ob.token);

      let mut msg = Message::new(Type::Con, code::CONTENT, id, ob.token);
      msg.set_uint(OBSERVE, seq)
         .map_err(|e| when.what(What::Options(e)))?;
      msg.set_payload(payload);

      let dgram = msg.try_into_bytes()
                     .map_err(|e| when.what(What::ToBytes(e)))?;

      let ex = Exchange { addr: ob.addr,
                          id,
                          token: ob.token,
                          ty: Type::Con,
                          kind: Kind::Notification,
                          dgram,
                          timer: con_timer(&self.config, now),
                          status: Status::Sent };

      match self.exchanges.insert(ex) {
        | Ok(_) => {
          ob.last_id = Some(id);
          Self::transmit_lossy(&mut self.transport, Addrd(dgram.as_slice(), ob.addr));
        },
        | Err(table) => {
          log::warn!("{:?} full; dropping observer {:?}", table, ob.addr);
          Observers::mark(ob);
        },
      }
    }

    self.observers.sweep();
    Ok(())
  }

  /// Poll for the outcome of an exchange started with
  /// [`send_req`](Core::send_req).
  ///
  /// `WouldBlock` until a response lands; then the response, consuming
  /// the handle — unless the request was an observe registration, in
  /// which case the exchange stays alive and later notifications are
  /// delivered through the same handle. Terminal failures (timeout,
  /// peer reset) are surfaced exactly once; polling a dead handle
  /// yields [`What::NotFound`].
  pub fn poll_resp(&mut self, handle: ExchangeHandle) -> nb::Result<Addrd<Message>, Error<P>> {
    let when = When::Polling;

    let status = match self.exchanges.get_mut(handle) {
      | None => return Err(nb::Error::Other(when.what(What::NotFound))),
      | Some(ex) => core::mem::replace(&mut ex.status, Status::Acked),
    };

    match status {
      | Status::Sent => {
        if let Some(ex) = self.exchanges.get_mut(handle) {
          ex.status = Status::Sent;
        }
        Err(nb::Error::WouldBlock)
      },
      | Status::Acked => Err(nb::Error::WouldBlock),
      | Status::Rcvd(resp) => {
        // subscriptions outlive their first response
        if !self.observables.contains(resp.addr(), resp.data().token) {
          self.exchanges.take(handle);
        }
        Ok(resp)
      },
      | Status::Failed(fail) => {
        // a dead exchange takes its block transfer and subscription
        // state with it, like cancel does
        if let Some(ex) = self.exchanges.take(handle) {
          self.blocks.remove(ex.addr, ex.token, Direction::In);
          self.blocks.remove(ex.addr, ex.token, Direction::Out);
          self.observables.deregister(ex.addr, ex.token);
        }
        let what = match fail {
          | Fail::Timeout => What::Timeout,
          | Fail::Reset => What::ResetByPeer,
        };
        Err(nb::Error::Other(when.what(what)))
      },
    }
  }

  /// Poll for the pong (a Reset) answering a [`ping`](Core::ping).
  pub fn poll_ping(&mut self, handle: ExchangeHandle) -> nb::Result<(), Error<P>> {
    self.poll_resp(handle).map(|_| ())
  }

  /// Abort an in-flight exchange, freeing its table slot and any block
  /// transfer or subscription state riding on it.
  pub fn cancel(&mut self, handle: ExchangeHandle) {
    if let Some(ex) = self.exchanges.take(handle) {
      self.blocks.remove(ex.addr, ex.token, Direction::In);
      self.blocks.remove(ex.addr, ex.token, Direction::Out);
      self.observables.deregister(ex.addr, ex.token);
    }
  }

  /// Drive timers: retransmit confirmable messages whose backoff
  /// elapsed, fail exchanges that exhausted their retransmission
  /// budget or transmission span, and expire dedup history and
  /// abandoned block transfers.
  ///
  /// Failures land on the exchange and surface on its next poll;
  /// failed notifications deregister their observer here, since nobody
  /// polls for them.
  pub fn on_tick(&mut self) -> Result<(), Error<P>> {
    let now = self.try_now(When::Ticking)?;
    let mut dead_notifications = tinyvec::ArrayVec::<[u8; crate::N_EXCHANGES]>::new();

    for (handle, ex) in self.exchanges.iter_mut() {
      match ex.status {
        | Status::Sent if ex.ty == Type::Con => match ex.timer.what_should_i_do(now) {
          | Ok(YouShould::Retry) => {
            log::debug!("retransmitting {:?} to {:?}", ex.id, ex.addr);
            Self::transmit_lossy(&mut self.transport, Addrd(ex.dgram.as_slice(), ex.addr));
          },
          | Ok(YouShould::Cry) => {
            log::info!("{:?} to {:?} timed out", ex.id, ex.addr);
            ex.status = Status::Failed(Fail::Timeout);
          },
          | Err(nb::Error::WouldBlock) => (),
          | Err(nb::Error::Other(never)) => match never {},
        },
        // NON requests are never retransmitted; the span is their
        // whole budget. Acked exchanges still await the response.
        | Status::Sent | Status::Acked
          if ex.timer.span_exhausted(now) && !self.observables.contains(ex.addr, ex.token) =>
        {
          log::info!("{:?} to {:?} timed out", ex.id, ex.addr);
          ex.status = Status::Failed(Fail::Timeout);
        },
        | _ => (),
      }

      if ex.kind == Kind::Notification && matches!(ex.status, Status::Failed(_)) {
        dead_notifications.push(handle.0);
      }
    }

    for h in dead_notifications {
      if let Some(ex) = self.exchanges.take(ExchangeHandle(h)) {
        log::info!("dropping unreachable observer {:?}", ex.addr);
        self.observers
            .drop_if(|ob| ob.addr == ex.addr && ob.token == ex.token);
      }
    }

    self.dedup.expire(now, self.config.dedup_window);
    // transfers the peer walked away from would otherwise pin their
    // pool slot forever
    self.blocks.expire(now, self.config.max_transmit_span);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use ::std::cell::{Cell, RefCell};
  use ::std::rc::Rc;
  use ::std::vec::Vec;

  use embedded_time::duration::Milliseconds;
  use newt_msg::block::Block;
  use newt_msg::opt::known::{BLOCK1, BLOCK2, CONTENT_FORMAT, URI_PATH};
  use newt_msg::{Code, TryFromBytes};

  use super::*;
  use crate::config::Con;
  use crate::resource::Noop;
  use crate::retry::{Attempts, Strategy};
  use crate::test::{addr_a, addr_b, ClockMock, Mocks, TransportMock};

  type Sent = Rc<RefCell<Vec<Addrd<Vec<u8>>>>>;

  /// Deterministic retransmission: first retry after exactly 1s,
  /// doubling, 4 attempts total.
  fn config() -> Config {
    Config { con: Con { retry_strategy:
                          Strategy::Exponential { init_min: Milliseconds(1_000),
                                                  init_max: Milliseconds(1_000) },
                        max_attempts: Attempts(4) },
             ..Default::default() }
  }

  fn new_core<H: Handler>() -> (Core<Mocks, H>, Sent) {
    let transport = TransportMock::new();
    let tx = Rc::clone(&transport.tx);
    (Core::new(ClockMock::new(), transport, config()), tx)
  }

  fn feed<H: Handler>(core: &mut Core<Mocks, H>, addr: SocketAddr, msg: Message) {
    let bytes = msg.try_into_bytes().unwrap();
    core.on_datagram(Addrd(bytes.as_slice(), addr)).unwrap();
  }

  fn sent(tx: &Sent, ix: usize) -> Message {
    Message::try_from_bytes(&tx.borrow()[ix].0).unwrap()
  }

  fn token(n: u8) -> Token {
    Token(::core::iter::once(n).collect())
  }

  fn get(path: &str, id: u16, tok: Token) -> Message {
    let mut msg = Message::new(Type::Con, code::GET, Id(id), tok);
    for seg in path.split('/') {
      msg.add(URI_PATH, seg.bytes().collect()).unwrap();
    }
    msg
  }

  struct Temp;
  impl Handler for Temp {
    fn handle(&mut self, _: &Addrd<Message>, rep: &mut Message) {
      rep.set_payload(b"20C");
    }
  }

  struct Counting(Rc<Cell<usize>>);
  impl Handler for Counting {
    fn handle(&mut self, _: &Addrd<Message>, rep: &mut Message) {
      self.0.set(self.0.get() + 1);
      rep.set_payload(b"ok");
    }
  }

  struct CaptureBody(Rc<RefCell<Vec<u8>>>);
  impl Handler for CaptureBody {
    fn handle(&mut self, req: &Addrd<Message>, rep: &mut Message) {
      *self.0.borrow_mut() = req.data().payload.0.to_vec();
      rep.code = code::CHANGED;
    }
  }

  struct Wall;
  impl Handler for Wall {
    fn handle(&mut self, _: &Addrd<Message>, rep: &mut Message) {
      rep.set_payload(&[b'x'; 300]);
    }
  }

  #[test]
  fn con_request_backs_off_then_fails_exactly_once() {
    let (mut core, tx) = new_core::<Noop>();
    let handle = core.send_req(Addrd(get("a", 0, token(1)), addr_b()))
                     .unwrap();
    assert_eq!(tx.borrow().len(), 1);
    assert!(matches!(core.poll_resp(handle), Err(nb::Error::WouldBlock)));

    // nothing due yet
    core.clock.set(999);
    core.on_tick().unwrap();
    assert_eq!(tx.borrow().len(), 1);

    // retransmits at 1s, 2s, 4s, doubling each time
    for (at, n) in [(1_000, 2), (2_000, 3), (4_000, 4)] {
      core.clock.set(at);
      core.on_tick().unwrap();
      assert_eq!(tx.borrow().len(), n);
      assert_eq!(tx.borrow()[n - 1].0, tx.borrow()[0].0);
    }

    // attempts exhausted
    core.clock.set(8_000);
    core.on_tick().unwrap();
    assert_eq!(tx.borrow().len(), 4);

    assert!(matches!(core.poll_resp(handle),
                     Err(nb::Error::Other(Error { what: What::Timeout, .. }))));
    assert!(matches!(core.poll_resp(handle),
                     Err(nb::Error::Other(Error { what: What::NotFound, .. }))));
  }

  #[test]
  fn ack_stops_retransmission_then_response_delivers() {
    let (mut core, tx) = new_core::<Noop>();
    let handle = core.send_req(Addrd(get("a", 0, token(1)), addr_b()))
                     .unwrap();
    let req = sent(&tx, 0);

    feed(&mut core, addr_b(), Message::new(Type::Ack, Code::new(0, 0), req.id, Token(Default::default())));
    core.clock.set(10_000);
    core.on_tick().unwrap();
    assert_eq!(tx.borrow().len(), 1);
    assert!(matches!(core.poll_resp(handle), Err(nb::Error::WouldBlock)));

    // separate confirmable response gets ACKed and delivered
    let mut resp = Message::new(Type::Con, code::CONTENT, Id(99), req.token);
    resp.set_payload(b"20C");
    feed(&mut core, addr_b(), resp);

    let ack = sent(&tx, 1);
    assert_eq!(ack.ty, Type::Ack);
    assert_eq!(ack.id, Id(99));

    let rcvd = core.poll_resp(handle).unwrap();
    assert_eq!(&rcvd.data().payload.0[..], b"20C");
    assert!(matches!(core.poll_resp(handle),
                     Err(nb::Error::Other(Error { what: What::NotFound, .. }))));
  }

  #[test]
  fn reset_by_peer_fails_the_exchange() {
    let (mut core, _) = new_core::<Noop>();
    let handle = core.send_req(Addrd(get("a", 0, token(1)), addr_b()))
                     .unwrap();
    let id = core.exchanges.get_mut(handle).unwrap().id;

    feed(&mut core, addr_b(), Message::new(Type::Reset, Code::new(0, 0), id, Token(Default::default())));
    assert!(matches!(core.poll_resp(handle),
                     Err(nb::Error::Other(Error { what: What::ResetByPeer, .. }))));
  }

  #[test]
  fn duplicate_con_request_replays_reply_without_rerunning_handler() {
    let (mut core, tx) = new_core::<Counting>();
    let count = Rc::new(Cell::new(0));
    core.resource_register("count", Permissions::GET, Counting(Rc::clone(&count)))
        .unwrap();

    let req = get("count", 7, token(2));
    feed(&mut core, addr_a(), req);
    assert_eq!(count.get(), 1);
    assert_eq!(tx.borrow().len(), 1);
    assert_eq!(sent(&tx, 0).ty, Type::Ack);

    // retransmission of the same mid replays the stored reply
    feed(&mut core, addr_a(), req);
    assert_eq!(count.get(), 1);
    assert_eq!(tx.borrow().len(), 2);
    assert_eq!(tx.borrow()[1].0, tx.borrow()[0].0);

    // once the dedup window lapses the handler runs again
    core.clock.set(33_000);
    core.on_tick().unwrap();
    feed(&mut core, addr_a(), req);
    assert_eq!(count.get(), 2);
  }

  #[test]
  fn request_body_reassembled_from_blocks() {
    let (mut core, tx) = new_core::<CaptureBody>();
    let body = Rc::new(RefCell::new(Vec::new()));
    core.resource_register("data", Permissions::POST, CaptureBody(Rc::clone(&body)))
        .unwrap();

    let post = |id: u16, num: u32, more: bool, fill: u8, len: usize| {
      let mut msg = Message::new(Type::Con, code::POST, Id(id), token(3));
      msg.add(URI_PATH, "data".bytes().collect()).unwrap();
      msg.set_uint(BLOCK1, Block::new(16, num, more).into()).unwrap();
      msg.set_payload(&::std::vec![fill; len]);
      msg
    };

    feed(&mut core, addr_a(), post(1, 0, true, b'a', 16));
    assert_eq!(sent(&tx, 0).code, code::CONTINUE);
    feed(&mut core, addr_a(), post(2, 1, true, b'b', 16));
    assert_eq!(sent(&tx, 1).code, code::CONTINUE);
    assert!(body.borrow().is_empty());

    feed(&mut core, addr_a(), post(3, 2, false, b'c', 8));
    let rep = sent(&tx, 2);
    assert_eq!(rep.code, code::CHANGED);
    assert!(rep.get(BLOCK1).is_none());

    let mut expected = ::std::vec![b'a'; 16];
    expected.extend_from_slice(&[b'b'; 16]);
    expected.extend_from_slice(&[b'c'; 8]);
    assert_eq!(*body.borrow(), expected);
  }

  #[test]
  fn out_of_order_request_block_rejected() {
    let (mut core, tx) = new_core::<CaptureBody>();
    let body = Rc::new(RefCell::new(Vec::new()));
    core.resource_register("data", Permissions::POST, CaptureBody(Rc::clone(&body)))
        .unwrap();

    let mut b0 = Message::new(Type::Con, code::POST, Id(10), token(4));
    b0.add(URI_PATH, "data".bytes().collect()).unwrap();
    b0.set_uint(BLOCK1, Block::new(16, 0, true).into()).unwrap();
    b0.set_payload(&[b'a'; 16]);
    feed(&mut core, addr_a(), b0);
    assert_eq!(sent(&tx, 0).code, code::CONTINUE);

    // block 2 arrives where block 1 was expected
    let mut b2 = Message::new(Type::Con, code::POST, Id(11), token(4));
    b2.add(URI_PATH, "data".bytes().collect()).unwrap();
    b2.set_uint(BLOCK1, Block::new(16, 2, false).into()).unwrap();
    b2.set_payload(&[b'c'; 16]);
    feed(&mut core, addr_a(), b2);

    assert_eq!(sent(&tx, 1).code, code::REQUEST_ENTITY_INCOMPLETE);
    assert!(body.borrow().is_empty());
  }

  #[test]
  fn oversized_response_served_blockwise() {
    let (mut core, tx) = new_core::<Wall>();
    core.resource_register("wall", Permissions::GET, Wall).unwrap();

    feed(&mut core, addr_a(), get("wall", 20, token(5)));
    let b0 = sent(&tx, 0);
    assert_eq!(b0.code, code::CONTENT);
    assert_eq!(b0.payload.0.len(), 256);
    let block = Block::parse(b0.get_uint(BLOCK2).unwrap()).unwrap();
    assert_eq!((block.num(), block.more()), (0, true));

    let mut cont = get("wall", 21, token(5));
    cont.set_uint(BLOCK2, Block::new(256, 1, false).into()).unwrap();
    feed(&mut core, addr_a(), cont);

    let b1 = sent(&tx, 1);
    assert_eq!(b1.payload.0.len(), 300 - 256);
    assert!(b1.payload.0.iter().all(|&b| b == b'x'));
    let block = Block::parse(b1.get_uint(BLOCK2).unwrap()).unwrap();
    assert_eq!((block.num(), block.more()), (1, false));
  }

  #[test]
  fn timed_out_upload_frees_its_block_context() {
    let (mut core, _) = new_core::<Noop>();

    // one more transfer than the pool holds: every slot has to come
    // back when its exchange dies
    for i in 0..=crate::N_BLOCK_CTXS {
      let base = i as u64 * 10_000;
      core.clock.set(base);

      let mut req = Message::new(Type::Con, code::POST, Id(0), token(i as u8 + 1));
      req.add(URI_PATH, "up".bytes().collect()).unwrap();
      req.set_payload(&[b'z'; 300]);
      let handle = core.send_req(Addrd(req, addr_b())).unwrap();

      // retransmit to exhaustion, never hearing back
      for dt in [1_000, 2_000, 4_000, 8_000] {
        core.clock.set(base + dt);
        core.on_tick().unwrap();
      }
      assert!(matches!(core.poll_resp(handle),
                       Err(nb::Error::Other(Error { what: What::Timeout, .. }))));
    }
  }

  #[test]
  fn abandoned_upload_contexts_expire_on_tick() {
    let (mut core, tx) = new_core::<CaptureBody>();
    let body = Rc::new(RefCell::new(Vec::new()));
    core.resource_register("data", Permissions::POST, CaptureBody(Rc::clone(&body)))
        .unwrap();

    let upload = |id: u16, tok: Token| {
      let mut msg = Message::new(Type::Con, code::POST, Id(id), tok);
      msg.add(URI_PATH, "data".bytes().collect()).unwrap();
      msg.set_uint(BLOCK1, Block::new(16, 0, true).into()).unwrap();
      msg.set_payload(&[b'a'; 16]);
      msg
    };

    for i in 0..crate::N_BLOCK_CTXS {
      feed(&mut core, addr_a(), upload(600 + i as u16, token(60 + i as u8)));
      assert_eq!(sent(&tx, i).code, code::CONTINUE);
    }

    // pool full: another transfer is refused
    feed(&mut core, addr_a(), upload(700, token(70)));
    assert_eq!(sent(&tx, crate::N_BLOCK_CTXS).code, code::SERVICE_UNAVAILABLE);

    // the stalled transfers never finish; ticking past the
    // transmission span reclaims their slots
    core.clock.set(50_000);
    core.on_tick().unwrap();

    feed(&mut core, addr_a(), upload(701, token(70)));
    assert_eq!(sent(&tx, crate::N_BLOCK_CTXS + 1).code, code::CONTINUE);
  }

  #[test]
  fn response_body_reassembled_from_blocks() {
    let (mut core, tx) = new_core::<Noop>();
    let handle = core.send_req(Addrd(get("big", 0, token(6)), addr_b()))
                     .unwrap();

    let mut b0 = Message::new(Type::Ack, code::CONTENT, sent(&tx, 0).id, token(6));
    b0.set_uint(BLOCK2, Block::new(16, 0, true).into()).unwrap();
    b0.set_payload(&[b'a'; 16]);
    feed(&mut core, addr_b(), b0);

    // the engine asks for the next block through the same exchange
    assert_eq!(tx.borrow().len(), 2);
    let follow = sent(&tx, 1);
    assert_eq!(follow.token, token(6));
    let block = Block::parse(follow.get_uint(BLOCK2).unwrap()).unwrap();
    assert_eq!(block.num(), 1);
    assert!(matches!(core.poll_resp(handle), Err(nb::Error::WouldBlock)));

    let mut b1 = Message::new(Type::Ack, code::CONTENT, follow.id, token(6));
    b1.set_uint(BLOCK2, Block::new(16, 1, false).into()).unwrap();
    b1.set_payload(&[b'b'; 8]);
    feed(&mut core, addr_b(), b1);

    let rcvd = core.poll_resp(handle).unwrap();
    assert_eq!(rcvd.data().payload.0.len(), 24);
    assert!(rcvd.data().get(BLOCK2).is_none());
  }

  #[test]
  fn observe_register_notify_and_reset_deregisters() {
    let (mut core, tx) = new_core::<Temp>();
    core.resource_register("temp", Permissions::GET.and(Permissions::OBSERVE), Temp)
        .unwrap();

    let mut reg = get("temp", 30, token(7));
    reg.set_uint(OBSERVE, 0).unwrap();
    feed(&mut core, addr_a(), reg);

    let rep = sent(&tx, 0);
    assert_eq!(rep.get_uint(OBSERVE), Some(0));
    assert_eq!(&rep.payload.0[..], b"20C");
    assert_eq!(core.observers.len(), 1);

    core.notify("temp", b"21C").unwrap();
    let note = sent(&tx, 1);
    assert_eq!(note.ty, Type::Con);
    assert_eq!(note.token, token(7));
    assert_eq!(note.get_uint(OBSERVE), Some(1));
    assert_eq!(&note.payload.0[..], b"21C");

    // the peer rejects the notification
    feed(&mut core, addr_a(), Message::new(Type::Reset, Code::new(0, 0), note.id, Token(Default::default())));
    assert_eq!(core.observers.len(), 0);
  }

  #[test]
  fn full_observer_registry_answers_without_observe_option() {
    let (mut core, tx) = new_core::<Temp>();
    core.resource_register("temp", Permissions::GET.and(Permissions::OBSERVE), Temp)
        .unwrap();

    for i in 0..crate::N_OBSERVERS {
      let mut reg = get("temp", 100 + i as u16, token(i as u8));
      reg.set_uint(OBSERVE, 0).unwrap();
      feed(&mut core, addr_a(), reg);
      assert_eq!(sent(&tx, i).get_uint(OBSERVE), Some(0));
    }

    // one too many: served normally, but not subscribed
    let mut reg = get("temp", 200, token(200));
    reg.set_uint(OBSERVE, 0).unwrap();
    feed(&mut core, addr_a(), reg);

    let rep = sent(&tx, crate::N_OBSERVERS);
    assert_eq!(&rep.payload.0[..], b"20C");
    assert!(rep.get(OBSERVE).is_none());
    assert_eq!(core.observers.len(), crate::N_OBSERVERS);
  }

  #[test]
  fn plain_get_from_observer_deregisters() {
    let (mut core, _) = new_core::<Temp>();
    core.resource_register("temp", Permissions::GET.and(Permissions::OBSERVE), Temp)
        .unwrap();

    let mut reg = get("temp", 40, token(8));
    reg.set_uint(OBSERVE, 0).unwrap();
    feed(&mut core, addr_a(), reg);
    assert_eq!(core.observers.len(), 1);

    feed(&mut core, addr_a(), get("temp", 41, token(8)));
    assert_eq!(core.observers.len(), 0);
  }

  #[test]
  fn stale_notification_discarded() {
    let (mut core, _) = new_core::<Noop>();
    let mut req = get("temp", 0, token(9));
    req.set_uint(OBSERVE, 0).unwrap();
    let handle = core.send_req(Addrd(req, addr_b())).unwrap();

    let note = |seq: u32, payload: &[u8]| {
      let mut msg = Message::new(Type::Non, code::CONTENT, Id(500 + seq as u16), token(9));
      msg.set_uint(OBSERVE, seq).unwrap();
      msg.set_payload(payload);
      msg
    };

    feed(&mut core, addr_b(), note(7, b"new"));
    assert_eq!(&core.poll_resp(handle).unwrap().data().payload.0[..], b"new");
    // subscription outlives delivery
    assert!(matches!(core.poll_resp(handle), Err(nb::Error::WouldBlock)));

    // reordered: an older state arrives after a newer one
    feed(&mut core, addr_b(), note(5, b"old"));
    assert!(matches!(core.poll_resp(handle), Err(nb::Error::WouldBlock)));

    feed(&mut core, addr_b(), note(8, b"newer"));
    assert_eq!(&core.poll_resp(handle).unwrap().data().payload.0[..], b"newer");
  }

  #[test]
  fn ping_resolves_on_reset() {
    let (mut core, tx) = new_core::<Noop>();
    let handle = core.ping(addr_b()).unwrap();

    let ping = sent(&tx, 0);
    assert_eq!(ping.ty, Type::Con);
    assert_eq!(ping.code, Code::new(0, 0));
    assert!(matches!(core.poll_ping(handle), Err(nb::Error::WouldBlock)));

    feed(&mut core, addr_b(), Message::new(Type::Reset, Code::new(0, 0), ping.id, Token(Default::default())));
    assert!(matches!(core.poll_ping(handle), Ok(())));
  }

  #[test]
  fn inbound_ping_answered_with_reset() {
    let (mut core, tx) = new_core::<Noop>();
    feed(&mut core, addr_a(), Message::new(Type::Con, Code::new(0, 0), Id(77), Token(Default::default())));

    let pong = sent(&tx, 0);
    assert_eq!(pong.ty, Type::Reset);
    assert_eq!(pong.id, Id(77));
  }

  #[test]
  fn well_known_core_lists_resources() {
    let (mut core, tx) = new_core::<Temp>();
    core.resource_register("sensors/temp", Permissions::GET, Temp)
        .unwrap();

    feed(&mut core, addr_a(), get(".well-known/core", 50, token(10)));
    let rep = sent(&tx, 0);
    assert_eq!(rep.code, code::CONTENT);
    assert_eq!(rep.get_uint(CONTENT_FORMAT), Some(40));
    assert!(::std::str::from_utf8(&rep.payload.0).unwrap()
                                                 .contains("</sensors/temp>"));
  }

  #[test]
  fn unknown_path_and_bad_method() {
    let (mut core, tx) = new_core::<Temp>();
    core.resource_register("temp", Permissions::GET, Temp).unwrap();

    feed(&mut core, addr_a(), get("nope", 60, token(11)));
    assert_eq!(sent(&tx, 0).code, code::NOT_FOUND);

    let mut del = get("temp", 61, token(11));
    del.code = code::DELETE;
    feed(&mut core, addr_a(), del);
    assert_eq!(sent(&tx, 1).code, code::METHOD_NOT_ALLOWED);
  }
}
