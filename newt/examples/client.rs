//! Client half of the example pair: spawns the server in-process,
//! pings it, GETs `/hello`, then observes `/uptime` for a few
//! notifications.

use std::net::UdpSocket;
use std::time::{Duration, Instant};

use newt::code;
use newt::config::Config;
use newt::core::Core;
use newt::error::Error;
use newt::net::Addrd;
use newt::platform::Std;
use newt::resource::Noop;
use newt::std::{to_no_std_addr, Clock};
use newt_msg::opt::known::{OBSERVE, URI_PATH};
use newt_msg::{Id, Message, Token, Type};

#[allow(dead_code)]
#[path = "./server.rs"]
mod server;

/// Pump received datagrams and timers into the core until `f`
/// resolves.
fn block_on<T>(core: &mut Core<Std, Noop>,
               rx: &UdpSocket,
               mut f: impl FnMut(&mut Core<Std, Noop>) -> nb::Result<T, Error<Std>>)
               -> Result<T, Error<Std>> {
  let mut buf = [0u8; 1152];
  loop {
    if let Ok((n, addr)) = rx.recv_from(&mut buf) {
      core.on_datagram(Addrd(&buf[..n], to_no_std_addr(addr))).ok();
    }
    core.on_tick().unwrap();

    match f(core) {
      | Ok(t) => break Ok(t),
      | Err(nb::Error::Other(e)) => break Err(e),
      | Err(nb::Error::WouldBlock) => (),
    }
  }
}

fn get(path: &str) -> Message {
  let mut req = Message::new(Type::Con, code::GET, Id(0), Token(Default::default()));
  req.add(URI_PATH, path.bytes().collect()).unwrap();
  req
}

fn main() {
  simple_logger::init_with_level(log::Level::Info).unwrap();
  server::spawn();
  std::thread::sleep(Duration::from_millis(100));

  let sock = UdpSocket::bind("127.0.0.1:4870").unwrap();
  sock.set_read_timeout(Some(Duration::from_millis(10))).unwrap();
  let rx = sock.try_clone().unwrap();

  let mut core = Core::<Std, Noop>::new(Clock::new(), sock, Config::default());
  let server_addr = to_no_std_addr("127.0.0.1:5683".parse().unwrap());

  let t0 = Instant::now();
  let handle = core.ping(server_addr).unwrap();
  block_on(&mut core, &rx, |core| core.poll_ping(handle)).unwrap();
  log::info!("ping ok, took {}ms", t0.elapsed().as_millis());

  let handle = core.send_req(Addrd(get("hello"), server_addr)).unwrap();
  let rep = block_on(&mut core, &rx, |core| core.poll_resp(handle)).unwrap();
  log::info!("GET /hello -> {}",
             String::from_utf8_lossy(&rep.data().payload.0));

  let mut reg = get("uptime");
  reg.set_uint(OBSERVE, 0).unwrap();
  let handle = core.send_req(Addrd(reg, server_addr)).unwrap();

  for _ in 0..3 {
    let note = block_on(&mut core, &rx, |core| core.poll_resp(handle)).unwrap();
    log::info!("uptime: {}",
               String::from_utf8_lossy(&note.data().payload.0));
  }

  core.cancel(handle);
  server::shutdown();
}
