use crate::cursor::Cursor;
use crate::from_bytes::TryConsumeBytes;
use crate::{DgramBytes, OptBytes, Opts, OPT_VALUE_CAP};

/// Errors encounterable while parsing options
pub mod parse_error;
pub use parse_error::*;

/// Well-known option numbers
pub mod known;
pub use known::*;

// widened to u32: the 2-byte extended form can declare up to
// 65535 + 269, which does not fit the nibble's natural u16
pub(crate) fn parse_opt_len_or_delta<A: AsRef<[u8]>>(head: u8,
                                                     bytes: &mut Cursor<A>,
                                                     reserved_err: OptParseError)
                                                     -> Result<u32, OptParseError> {
  match head {
    | 13 => {
      let n = bytes.next().ok_or_else(OptParseError::eof)?;
      Ok((n as u32) + 13)
    },
    | 14 => match bytes.take_exact(2) {
      | Some(&[a, b]) => Ok(u32::from(u16::from_be_bytes([a, b])) + 269),
      | _ => Err(OptParseError::eof()),
    },
    | 15 => Err(reserved_err),
    | _ => Ok(head as u32),
  }
}

/// Low-level representation of a freshly parsed CoAP Option.
///
/// This struct stores data parsed directly from the message on the wire
/// and does not compute or store the Option Number; to get
/// [`OptNumber`]s, use the iterator extension [`EnumerateOptNumbers`]
/// on a collection of `Opt`s.
///
/// See [RFC7252 section 3.1](https://datatracker.ietf.org/doc/html/rfc7252#section-3.1)
/// for the binary format.
#[derive(Copy, Clone, PartialEq, PartialOrd, Debug, Default)]
pub struct Opt {
  /// See [`OptDelta`]
  pub delta: OptDelta,
  /// See [`OptValue`]
  pub value: OptValue,
}

impl Opt {
  /// The size of this option when encoded, in bytes
  pub fn encoded_size(&self) -> usize {
    let ext_size = |n: usize| match n {
      | n if n >= 269 => 2,
      | n if n >= 13 => 1,
      | _ => 0,
    };

    1 + ext_size(self.delta.0 as usize) + ext_size(self.value.0.len()) + self.value.0.len()
  }

  /// Append this option's wire representation to a datagram buffer.
  ///
  /// The caller is responsible for having checked capacity
  /// (see [`Message::encoded_size`](crate::Message::encoded_size)).
  pub fn extend_bytes(self, bytes: &mut DgramBytes) {
    let (del, del_bytes) = crate::to_bytes::opt_len_or_delta(self.delta.0);
    let (len, len_bytes) = crate::to_bytes::opt_len_or_delta(self.value.0.len() as u16);

    bytes.push((del << 4) | len);

    if let Some(bs) = del_bytes {
      bytes.extend(bs);
    }

    if let Some(bs) = len_bytes {
      bytes.extend(bs);
    }

    bytes.extend(self.value.0);
  }
}

/// The "Option Delta" is the difference between this Option's Number
/// and the previous Option's number.
///
/// Options are encoded in strictly ascending number order, so deltas
/// are always non-negative and the running sum of deltas is the
/// current Option Number.
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct OptDelta(pub u16);

/// An Option Number identifying which option is being set
/// (e.g. Uri-Path has a Number of 11).
///
/// Because numbers are delta-encoded they can only be computed in the
/// context of the preceding options; see [`EnumerateOptNumbers`].
///
/// See [RFC7252 section 12.2](https://datatracker.ietf.org/doc/html/rfc7252#section-12.2)
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct OptNumber(pub u32);

/// Option Value
///
/// See [RFC7252 section 3.2](https://datatracker.ietf.org/doc/html/rfc7252#section-3.2)
#[derive(Copy, Clone, Hash, PartialEq, PartialOrd, Debug, Default)]
pub struct OptValue(pub OptBytes);

/// Error returned by option insertion when the fixed option
/// collection is at capacity.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct OptionsFull;

impl<Bytes: AsRef<[u8]>> TryConsumeBytes<Bytes> for Opts {
  type Error = OptParseError;

  fn try_consume_bytes(bytes: &mut Cursor<Bytes>) -> Result<Self, Self::Error> {
    let mut opts = Opts::default();

    loop {
      match Opt::try_consume_bytes(bytes) {
        | Ok(opt) => {
          if opts.len() == opts.capacity() {
            break Err(Self::Error::TooManyOptions(opts.len() + 1));
          }

          opts.push(opt);
        },
        | Err(OptParseError::OptionsExhausted) => break Ok(opts),
        | Err(e) => break Err(e),
      }
    }
  }
}

impl<Bytes: AsRef<[u8]>> TryConsumeBytes<Bytes> for Opt {
  type Error = OptParseError;

  fn try_consume_bytes(bytes: &mut Cursor<Bytes>) -> Result<Self, Self::Error> {
    let byte1 = bytes.next()
                     .ok_or(OptParseError::OptionsExhausted)
                     .and_then(|b| {
                       if b == 0b11111111 {
                         Err(OptParseError::OptionsExhausted)
                       } else {
                         Ok(b)
                       }
                     })?;

    // NOTE: Delta **MUST** be consumed before Value.
    let delta = parse_opt_len_or_delta(byte1 >> 4,
                                       bytes,
                                       OptParseError::OptionDeltaReservedValue(15))?;
    let delta = match u16::try_from(delta) {
      | Ok(d) => OptDelta(d),
      | Err(_) => return Err(OptParseError::OptionDeltaTooLarge(delta)),
    };

    let len = parse_opt_len_or_delta(byte1 & 0b00001111,
                                     bytes,
                                     OptParseError::ValueLengthReservedValue(15))?
              as usize;

    if len > OPT_VALUE_CAP {
      return Err(OptParseError::OptionValueTooLong { capacity: OPT_VALUE_CAP,
                                                     actual: len });
    }

    let taken = bytes.take(len);
    if taken.len() < len {
      return Err(OptParseError::UnexpectedEndOfStream);
    }

    let value = OptValue(taken.iter().copied().collect());

    Ok(Opt { delta, value })
  }
}

/// Creates an iterator which gives the current opt's number as well as the option.
///
/// The iterator returned yields pairs `(i, val)`, where `i` is the [`OptNumber`] and `val` is the Opt returned by the iterator.
pub trait EnumerateOptNumbers<T>
  where Self: Sized + Iterator<Item = T>
{
  /// Creates an iterator which gives the current Opt along with its Number.
  ///
  /// ```
  /// use newt_msg::{EnumerateOptNumbers, Opt, OptDelta, OptNumber, OptValue};
  ///
  /// let opt_a = Opt { delta: OptDelta(12),
  ///                   value: OptValue(Default::default()) };
  /// let opt_b = Opt { delta: OptDelta(2),
  ///                   value: OptValue(Default::default()) };
  ///
  /// let opt_ns: Vec<_> = [opt_a.clone(), opt_b.clone()].into_iter()
  ///                                                    .enumerate_option_numbers()
  ///                                                    .collect();
  ///
  /// assert_eq!(opt_ns, vec![(OptNumber(12), opt_a), (OptNumber(14), opt_b)])
  /// ```
  fn enumerate_option_numbers(self) -> EnumerateOptNumbersIter<T, Self>;
}

impl<I: Iterator<Item = Opt>> EnumerateOptNumbers<Opt> for I {
  fn enumerate_option_numbers(self) -> EnumerateOptNumbersIter<Opt, Self> {
    EnumerateOptNumbersIter { number: 0,
                              iter: self }
  }
}

impl<'a, I: Iterator<Item = &'a Opt>> EnumerateOptNumbers<&'a Opt> for I {
  fn enumerate_option_numbers(self) -> EnumerateOptNumbersIter<&'a Opt, Self> {
    EnumerateOptNumbersIter { number: 0,
                              iter: self }
  }
}

/// Iterator yielded by [`EnumerateOptNumbers`], wrapping an Iterator
/// over [`Opt`]s.
///
/// Invoking [`Iterator::next`] on this struct will advance the
/// inner iterator, and add the delta of the new opt to its running sum of deltas.
///
/// This running sum is the Number of the newly iterated Opt.
#[derive(Clone, Debug)]
pub struct EnumerateOptNumbersIter<T, I: Iterator<Item = T>> {
  number: u32,
  iter: I,
}

impl<I: Iterator<Item = Opt>> Iterator for EnumerateOptNumbersIter<Opt, I> {
  type Item = (OptNumber, Opt);

  fn next(&mut self) -> Option<Self::Item> {
    self.iter.next().map(|opt| {
                      self.number += opt.delta.0 as u32;
                      (OptNumber(self.number), opt)
                    })
  }
}

impl<'a, I: Iterator<Item = &'a Opt>> Iterator for EnumerateOptNumbersIter<&'a Opt, I> {
  type Item = (OptNumber, &'a Opt);

  fn next(&mut self) -> Option<Self::Item> {
    self.iter.next().map(|opt| {
                      self.number += opt.delta.0 as u32;
                      (OptNumber(self.number), opt)
                    })
  }
}
