//! A small CoAP server over plain UDP: `/hello` answers GETs, and
//! `/uptime` is observable, notified every 500ms.
//!
//! Run standalone (`cargo run --example server`) or spawned in the
//! background by the client example.

use std::net::UdpSocket;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::OnceLock;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use newt::config::Config;
use newt::core::Core;
use newt::net::Addrd;
use newt::platform::Std;
use newt::resource::{Handler, Permissions};
use newt::std::{to_no_std_addr, Clock};
use newt_msg::Message;

static SHUTDOWN: OnceLock<Sender<()>> = OnceLock::new();

pub fn shutdown() {
  if let Some(tx) = SHUTDOWN.get() {
    tx.send(()).ok();
  }
}

pub fn spawn() -> JoinHandle<()> {
  let (tx, rx) = channel();
  SHUTDOWN.set(tx).ok();
  std::thread::spawn(move || server_main(rx))
}

enum Route {
  Hello,
  Uptime(Instant),
}

impl Handler for Route {
  fn handle(&mut self, _req: &Addrd<Message>, rep: &mut Message) {
    match self {
      | Route::Hello => rep.set_payload(b"hello, world!"),
      | Route::Uptime(since) => rep.set_payload(uptime(*since).as_bytes()),
    }
  }
}

fn uptime(since: Instant) -> String {
  format!("{}s", since.elapsed().as_secs())
}

fn server_main(shutdown: Receiver<()>) {
  let sock = UdpSocket::bind("127.0.0.1:5683").unwrap();
  sock.set_read_timeout(Some(Duration::from_millis(50))).unwrap();
  let rx = sock.try_clone().unwrap();

  let mut core = Core::<Std, Route>::new(Clock::new(), sock, Config::default());
  let started = Instant::now();

  core.resource_register("hello", Permissions::GET, Route::Hello)
      .unwrap();
  core.resource_register("uptime",
                         Permissions::GET.and(Permissions::OBSERVE),
                         Route::Uptime(started))
      .unwrap();

  log::info!("server: up on 127.0.0.1:5683");

  let mut buf = [0u8; 1152];
  let mut last_notify = Instant::now();

  loop {
    if shutdown.try_recv().is_ok() {
      log::info!("server: shutting down");
      break;
    }

    if let Ok((n, addr)) = rx.recv_from(&mut buf) {
      core.on_datagram(Addrd(&buf[..n], to_no_std_addr(addr))).ok();
    }

    if last_notify.elapsed() >= Duration::from_millis(500) {
      last_notify = Instant::now();
      core.notify("uptime", uptime(started).as_bytes()).unwrap();
    }

    core.on_tick().unwrap();
  }
}

fn main() {
  simple_logger::init_with_level(log::Level::Debug).unwrap();
  spawn().join().unwrap();
}
