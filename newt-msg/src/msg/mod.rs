/// Message Code
pub mod code;

/// Message parsing errors
pub mod parse_error;

/// Message ID
pub mod id;

/// Message Options
pub mod opt;

/// Message Type
pub mod ty;

/// Message Token
pub mod token;

/// Message Version
pub mod ver;

pub use code::*;
pub use id::*;
pub use opt::*;
pub use parse_error::*;
pub use token::*;
pub use ty::*;
pub use ver::*;

use crate::cursor::Cursor;
use crate::from_bytes::TryConsumeBytes;
use crate::to_bytes::{MessageToBytesError, TryIntoBytes};
use crate::{DgramBytes, OptBytes, Opts, PayloadBytes, TryFromBytes, PAYLOAD_CAP};

/// Message payload, preceded on the wire by the `0xFF`
/// payload marker whenever non-empty.
///
/// See [RFC7252 section 5.5](https://datatracker.ietf.org/doc/html/rfc7252#section-5.5)
#[derive(Copy, Clone, Debug, Default, PartialEq, PartialOrd)]
pub struct Payload(pub PayloadBytes);

/// Struct representing the first byte of a message.
///
/// ```text
/// CoAP version
/// |
/// |  Message type (request, response, empty)
/// |  |
/// |  |  Length of token, in bytes. (4-bit integer)
/// |  |  |
/// vv vv vvvv
/// 01 00 0000
/// ```
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub(crate) struct Byte1 {
  pub(crate) ver: Version,
  pub(crate) ty: Type,
  pub(crate) tkl: u8,
}

impl TryFrom<u8> for Byte1 {
  type Error = MessageParseError;

  fn try_from(b: u8) -> Result<Self, Self::Error> {
    let ver = b >> 6; // bits 0 & 1
    let ty = b >> 4 & 0b11; // bits 2 & 3
    let tkl = b & 0b1111u8; // last 4 bits

    Ok(Byte1 { ver: Version(ver),
               ty: Type::try_from(ty)?,
               tkl })
  }
}

impl From<Byte1> for u8 {
  fn from(b: Byte1) -> u8 {
    (b.ver.0 << 6) | (u8::from(b.ty) << 4) | (b.tkl & 0b1111)
  }
}

/// Low-level representation of a CoAP message, generic over nothing:
/// every buffer is a fixed-capacity [`tinyvec::ArrayVec`] so a `Message`
/// is a plain value that never touches the heap.
///
/// See [RFC7252 section 3](https://datatracker.ietf.org/doc/html/rfc7252#section-3)
/// for the binary format.
#[derive(Copy, Clone, Debug, PartialEq, PartialOrd)]
pub struct Message {
  /// see [`Id`] for details
  pub id: Id,
  /// see [`Type`] for details
  pub ty: Type,
  /// see [`Version`] for details
  pub ver: Version,
  /// see [`Token`] for details
  pub token: Token,
  /// see [`Code`] for details
  pub code: Code,
  /// see [`opt::Opt`] for details
  pub opts: Opts,
  /// see [`Payload`]
  pub payload: Payload,
}

impl Message {
  /// Create a new message with no options and an empty payload.
  pub fn new(ty: Type, code: Code, id: Id, token: Token) -> Self {
    Self { id,
           ty,
           token,
           code,
           ver: Default::default(),
           opts: Default::default(),
           payload: Payload(Default::default()) }
  }

  /// Create a new message that ACKs this one.
  ///
  /// An ACK of a Confirmable message is Empty (code 0.00),
  /// carries no token, and echoes the message id being acknowledged.
  pub fn ack(&self) -> Self {
    Self::new(Type::Ack, Code::new(0, 0), self.id, Token(Default::default()))
  }

  /// Create a new message that Resets this one.
  pub fn rst(&self) -> Self {
    Self::new(Type::Reset, Code::new(0, 0), self.id, Token(Default::default()))
  }

  /// Create a response skeleton for this request.
  ///
  /// Confirmable requests are answered with a piggy-backed
  /// ACK reusing the request's message id; everything else
  /// mirrors the request type. The token is always echoed.
  pub fn response_to(&self, code: Code) -> Self {
    let ty = match self.ty {
      | Type::Con => Type::Ack,
      | other => other,
    };

    Self::new(ty, code, self.id, self.token)
  }

  /// Replace the payload with a copy of `bytes`.
  ///
  /// Silently keeps the first [`PAYLOAD_CAP`](crate::PAYLOAD_CAP) bytes if
  /// `bytes` is longer; encoding bounds are enforced by [`TryIntoBytes`].
  pub fn set_payload(&mut self, bytes: &[u8]) {
    self.payload.0.clear();
    self.payload
        .0
        .extend(bytes.iter().copied().take(PAYLOAD_CAP));
  }

  /// The size of this message when encoded, in bytes
  pub fn encoded_size(&self) -> usize {
    let header_size = 4;
    let token_size = self.token.0.len();
    let opts_size: usize = self.opts.iter().map(|o| o.encoded_size()).sum();
    let payload_size = if self.payload.0.is_empty() {
      0
    } else {
      1 + self.payload.0.len()
    };

    header_size + token_size + opts_size + payload_size
  }

  /// Look up an option's value by number.
  pub fn get(&self, number: OptNumber) -> Option<&OptValue> {
    self.opts
        .iter()
        .enumerate_option_numbers()
        .find(|(num, _)| *num == number)
        .map(|(_, opt)| &opt.value)
  }

  /// Set an option, replacing any existing value for the same number.
  ///
  /// Options are kept sorted ascending by number and deltas recomputed,
  /// preserving the wire-order invariant.
  pub fn set(&mut self, number: OptNumber, value: OptBytes) -> Result<(), OptionsFull> {
    let mut numbered: tinyvec::ArrayVec<[(u32, OptValue); crate::N_OPTS]> = Default::default();

    for (num, opt) in self.opts.iter().enumerate_option_numbers() {
      if num != number {
        numbered.push((num.0, opt.value.clone()));
      }
    }

    if numbered.len() == numbered.capacity() {
      return Err(OptionsFull);
    }

    numbered.push((number.0, OptValue(value)));
    numbered.sort_unstable_by_key(|(num, _)| *num);

    self.opts.clear();
    let mut prev = 0u32;
    for (num, value) in numbered {
      self.opts.push(Opt { delta: OptDelta((num - prev) as u16),
                           value });
      prev = num;
    }

    Ok(())
  }

  /// Add one occurrence of a repeatable option (Uri-Path and friends
  /// carry one option per occurrence), keeping any existing values for
  /// the same number and their relative order.
  pub fn add(&mut self, number: OptNumber, value: OptBytes) -> Result<(), OptionsFull> {
    let mut numbered: tinyvec::ArrayVec<[(u32, usize, OptValue); crate::N_OPTS]> = Default::default();

    for (ix, (num, opt)) in self.opts.iter().enumerate_option_numbers().enumerate() {
      numbered.push((num.0, ix, opt.value));
    }

    if numbered.len() == numbered.capacity() {
      return Err(OptionsFull);
    }

    numbered.push((number.0, numbered.len(), OptValue(value)));
    // key includes insertion order so the unstable sort keeps
    // same-numbered occurrences in wire order
    numbered.sort_unstable_by_key(|(num, ix, _)| (*num, *ix));

    self.opts.clear();
    let mut prev = 0u32;
    for (num, _, value) in numbered {
      self.opts.push(Opt { delta: OptDelta((num - prev) as u16),
                           value });
      prev = num;
    }

    Ok(())
  }

  /// Every value of a repeatable option, in wire order.
  pub fn get_all(&self, number: OptNumber) -> impl Iterator<Item = &OptValue> {
    self.opts
        .iter()
        .enumerate_option_numbers()
        .filter(move |(num, _)| *num == number)
        .map(|(_, opt)| &opt.value)
  }

  /// Remove an option by number, if present.
  ///
  /// Removing an option folds its delta into the successor's. Two
  /// wire-legal deltas can sum past what one delta can hold, in which
  /// case the message is left untouched and the unrepresentable merge
  /// reported as [`OptParseError::OptionDeltaTooLarge`].
  pub fn remove(&mut self, number: OptNumber) -> Result<(), OptParseError> {
    let ix = self.opts
                 .iter()
                 .enumerate_option_numbers()
                 .enumerate()
                 .find(|(_, (num, _))| *num == number)
                 .map(|(ix, _)| ix);

    if let Some(ix) = ix {
      if let Some(next) = self.opts.get(ix + 1) {
        let merged = u32::from(self.opts[ix].delta.0) + u32::from(next.delta.0);
        if u16::try_from(merged).is_err() {
          return Err(OptParseError::OptionDeltaTooLarge(merged));
        }
      }

      let removed = self.opts.remove(ix);
      if let Some(next) = self.opts.get_mut(ix) {
        next.delta.0 += removed.delta.0;
      }
    }

    Ok(())
  }

  /// Look up an option and decode its value as a big-endian unsigned integer.
  ///
  /// Returns `None` when the option is absent or wider than 4 bytes.
  pub fn get_uint(&self, number: OptNumber) -> Option<u32> {
    self.get(number).and_then(|v| opt_uint_decode(&v.0))
  }

  /// Set an option to a minimally-encoded big-endian unsigned integer value.
  pub fn set_uint(&mut self, number: OptNumber, value: u32) -> Result<(), OptionsFull> {
    self.set(number, opt_uint_encode(value))
  }
}

impl<Bytes: AsRef<[u8]>> TryFromBytes<Bytes> for Message {
  type Error = MessageParseError;

  fn try_from_bytes(bytes: Bytes) -> Result<Self, Self::Error> {
    let mut bytes = Cursor::new(bytes);

    let Byte1 { tkl, ty, ver } = bytes.next()
                                      .ok_or_else(MessageParseError::eof)?
                                      .try_into()?;

    if ver != Version(1) {
      return Err(Self::Error::InvalidVersion(ver.0));
    }

    if tkl > 8 {
      return Err(Self::Error::InvalidTokenLength(tkl));
    }

    let code: Code = bytes.next().ok_or_else(MessageParseError::eof)?.into();
    let id: Id = Id::try_consume_bytes(&mut bytes)?;

    let token = bytes.take_exact(tkl as usize)
                     .ok_or_else(MessageParseError::eof)?;
    let token = Token(token.iter().copied().collect());

    let opts = Opts::try_consume_bytes(&mut bytes).map_err(Self::Error::OptParseError)?;

    let payload_bytes = bytes.take_until_end();
    if payload_bytes.len() > PAYLOAD_CAP {
      return Err(Self::Error::PayloadTooLong(payload_bytes.len()));
    }

    let payload = Payload(payload_bytes.iter().copied().collect::<PayloadBytes>());

    Ok(Message { id,
                 ty,
                 ver,
                 code,
                 token,
                 opts,
                 payload })
  }
}

impl TryIntoBytes for Message {
  type Error = MessageToBytesError;

  fn try_into_bytes(self) -> Result<DgramBytes, Self::Error> {
    let mut bytes = DgramBytes::new();
    let size = self.encoded_size();

    if size > bytes.capacity() {
      return Err(Self::Error::TooLong { capacity: bytes.capacity(),
                                        size });
    }

    let byte1: u8 = Byte1 { tkl: self.token.0.len() as u8,
                            ver: self.ver,
                            ty: self.ty }.into();

    bytes.push(byte1);
    bytes.push(self.code.into());
    bytes.extend(<[u8; 2]>::from(self.id));
    bytes.extend(self.token.0);

    for opt in self.opts {
      opt.extend_bytes(&mut bytes);
    }

    if !self.payload.0.is_empty() {
      bytes.push(0b11111111);
      bytes.extend(self.payload.0);
    }

    Ok(bytes)
  }
}

pub(crate) fn opt_uint_decode(bytes: &[u8]) -> Option<u32> {
  if bytes.len() > 4 {
    return None;
  }

  Some(bytes.iter().fold(0u32, |n, b| (n << 8) | u32::from(*b)))
}

pub(crate) fn opt_uint_encode(value: u32) -> OptBytes {
  value.to_be_bytes()
       .iter()
       .copied()
       .skip_while(|b| *b == 0)
       .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_msg() {
    let (expect, bytes) = crate::test_msg();
    assert_eq!(Message::try_from_bytes(&bytes).unwrap(), expect)
  }

  #[test]
  fn parse_byte1() {
    let byte = 0b_01_10_0011u8;
    let byte = Byte1::try_from(byte).unwrap();
    assert_eq!(byte,
               Byte1 { ver: Version(1),
                       ty: Type::Ack,
                       tkl: 3 })
  }

  #[test]
  fn msg_round_trips() {
    let (msg, _) = crate::test_msg();
    let bytes = msg.clone().try_into_bytes().unwrap();
    assert_eq!(Message::try_from_bytes(&bytes).unwrap(), msg);
  }

  #[test]
  fn repeatable_options_keep_wire_order() {
    let mut msg = Message::new(Type::Con, Code::new(0, 1), Id(1), Token(Default::default()));

    msg.add(URI_PATH, "sensors".bytes().collect())
       .unwrap();
    msg.add(URI_PATH, "temp".bytes().collect())
       .unwrap();
    msg.set(CONTENT_FORMAT, Default::default())
       .unwrap();

    let paths = msg.get_all(URI_PATH)
                   .map(|v| core::str::from_utf8(&v.0).unwrap())
                   .collect::<std::vec::Vec<_>>();
    assert_eq!(paths, std::vec!["sensors", "temp"]);

    // still round-trips with the interleaved single-occurrence option
    let bytes = msg.try_into_bytes().unwrap();
    assert_eq!(Message::try_from_bytes(&bytes).unwrap(), msg);
  }

  #[test]
  fn bad_version_rejected() {
    let (_, mut bytes) = crate::test_msg();
    bytes[0] = (bytes[0] & 0b00111111) | 0b10_000000;
    assert_eq!(Message::try_from_bytes(&bytes),
               Err(MessageParseError::InvalidVersion(2)));
  }

  #[test]
  fn bad_token_length_rejected() {
    let mut bytes = std::vec![0b01_00_1111u8, 0x45, 0, 1];
    bytes.extend([0u8; 15]);
    assert_eq!(Message::try_from_bytes(&bytes),
               Err(MessageParseError::InvalidTokenLength(15)));
  }

  #[test]
  fn truncated_header_rejected() {
    assert_eq!(Message::try_from_bytes(&[0b01_000000u8, 0x45]),
               Err(MessageParseError::UnexpectedEndOfStream));
  }

  #[test]
  fn every_truncation_parses_or_errors() {
    let (_, bytes) = crate::test_msg();
    for n in 0..bytes.len() {
      // any outcome is fine as long as it's an outcome
      let _ = Message::try_from_bytes(&bytes[..n]);
    }
  }

  #[test]
  fn set_keeps_options_sorted() {
    let (mut msg, _) = crate::test_msg();
    msg.set_uint(OptNumber(6), 0).unwrap();
    msg.set_uint(OptNumber(60), 1024).unwrap();

    let numbers: std::vec::Vec<u32> = msg.opts
                                         .iter()
                                         .enumerate_option_numbers()
                                         .map(|(n, _)| n.0)
                                         .collect();
    assert_eq!(numbers, std::vec![6, 12, 60]);
  }

  #[test]
  fn remove_rewrites_deltas() {
    let (mut msg, _) = crate::test_msg();
    msg.set_uint(OptNumber(6), 0).unwrap();
    msg.remove(OptNumber(6)).unwrap();

    assert_eq!(msg.get(OptNumber(6)), None);
    assert!(msg.get(OptNumber(12)).is_some());
  }

  #[test]
  fn remove_rejects_unrepresentable_delta_merge() {
    // two options whose deltas each fit on the wire but whose sum
    // does not fit in one delta
    let mut msg = Message::new(Type::Con, Code::new(0, 1), Id(1), Token(Default::default()));
    msg.opts.push(Opt { delta: OptDelta(60_000),
                        value: OptValue(Default::default()) });
    msg.opts.push(Opt { delta: OptDelta(60_000),
                        value: OptValue(Default::default()) });

    // wire-legal: it round-trips through the codec
    let bytes = msg.try_into_bytes().unwrap();
    let mut msg = Message::try_from_bytes(&bytes).unwrap();

    assert_eq!(msg.remove(OptNumber(60_000)),
               Err(OptParseError::OptionDeltaTooLarge(120_000)));
    // the failed remove must not half-apply
    assert!(msg.get(OptNumber(60_000)).is_some());
    assert!(msg.get(OptNumber(120_000)).is_some());

    // removing the last option has nothing to merge into
    msg.remove(OptNumber(120_000)).unwrap();
    assert_eq!(msg.get(OptNumber(120_000)), None);
  }

  #[test]
  fn response_to_piggybacks_on_con() {
    let (mut req, _) = crate::test_msg();
    req.ty = Type::Con;
    let rep = req.response_to(Code::new(2, 5));

    assert_eq!(rep.ty, Type::Ack);
    assert_eq!(rep.id, req.id);
    assert_eq!(rep.token, req.token);

    req.ty = Type::Non;
    assert_eq!(req.response_to(Code::new(2, 5)).ty, Type::Non);
  }

  #[test]
  fn uint_options_minimally_encoded() {
    assert_eq!(opt_uint_encode(0).as_ref(), &[] as &[u8]);
    assert_eq!(opt_uint_encode(7).as_ref(), &[7]);
    assert_eq!(opt_uint_encode(256).as_ref(), &[1, 0]);
    assert_eq!(opt_uint_decode(&[]), Some(0));
    assert_eq!(opt_uint_decode(&[1, 0]), Some(256));
    assert_eq!(opt_uint_decode(&[1, 0, 0, 0, 0]), None);
  }
}
