//! `newt-msg` is the wire-format half of the `newt` CoAP engine:
//! parsing and serializing [RFC7252](https://datatracker.ietf.org/doc/html/rfc7252)
//! messages without a heap.
//!
//! Every buffer in a [`Message`] is a [`tinyvec::ArrayVec`] with a fixed
//! capacity chosen for a single UDP datagram, so decoding a message can
//! never allocate and encoding one can never grow past what the transport
//! will accept.
//!
//! ```
//! use newt_msg::{Code, Id, Message, Token, TryFromBytes, TryIntoBytes, Type};
//!
//! let mut msg = Message::new(Type::Con, Code::new(0, 1), Id(1), Token::default());
//! msg.set_payload(b"hello");
//!
//! let bytes = msg.clone().try_into_bytes().unwrap();
//! assert_eq!(Message::try_from_bytes(&bytes).unwrap(), msg);
//! ```

// style
#![allow(clippy::unused_unit)]
// deny
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![deny(missing_copy_implementations)]
#![cfg_attr(not(test), deny(unsafe_code))]
// warnings
#![cfg_attr(not(test), warn(unreachable_pub))]
// features
#![cfg_attr(not(feature = "std"), no_std)]

mod cursor;
mod from_bytes;
mod to_bytes;

mod msg;

pub use cursor::Cursor;
pub use from_bytes::TryFromBytes;
pub use msg::*;
pub use to_bytes::{MessageToBytesError, TryIntoBytes};

/// Capacity of a datagram buffer, in bytes.
///
/// 1152 is the maximum message size recommended by
/// [RFC7252 section 4.6](https://datatracker.ietf.org/doc/html/rfc7252#section-4.6)
/// for constrained networks.
pub const DGRAM_CAP: usize = 1152;

/// Capacity of a message payload, in bytes.
pub const PAYLOAD_CAP: usize = 1024;

/// Capacity of a single option value, in bytes.
pub const OPT_VALUE_CAP: usize = 128;

/// Maximum number of options in one message.
pub const N_OPTS: usize = 16;

/// Byte buffer sized for one encoded datagram.
pub type DgramBytes = tinyvec::ArrayVec<[u8; DGRAM_CAP]>;

/// Byte buffer backing a message payload.
pub type PayloadBytes = tinyvec::ArrayVec<[u8; PAYLOAD_CAP]>;

/// Byte buffer backing a single option value.
pub type OptBytes = tinyvec::ArrayVec<[u8; OPT_VALUE_CAP]>;

/// Collection of options in a message.
pub type Opts = tinyvec::ArrayVec<[Opt; N_OPTS]>;

#[cfg(test)]
pub(crate) fn test_msg() -> (Message, std::vec::Vec<u8>) {
  let header: [u8; 4] = 0b01_00_0001_01000101_0000000000000001u32.to_be_bytes();
  let token: [u8; 1] = [254u8];
  let content_format: &[u8] = b"application/json";
  let options: [&[u8]; 2] = [&[0b_1100_1101u8, 0b00000011u8], content_format];
  let payload: [&[u8]; 2] = [&[0b_11111111u8], b"hello, world!"];
  let bytes = [header.as_ref(),
               token.as_ref(),
               options.concat().as_ref(),
               payload.concat().as_ref()].concat();

  let mut opts = Opts::new();
  opts.push(Opt { delta: OptDelta(12),
                  value: OptValue(content_format.iter().copied().collect()) });

  let msg = Message { id: Id(1),
                      ty: Type::Con,
                      ver: Version(1),
                      token: Token(tinyvec::array_vec!([u8; 8] => 254)),
                      opts,
                      code: Code { class: 2, detail: 5 },
                      payload: Payload(b"hello, world!".iter().copied().collect()) };
  (msg, bytes)
}
