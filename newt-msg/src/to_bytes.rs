use tinyvec::ArrayVec;

use crate::DgramBytes;

/// Trait allowing fallible conversion into bytes
pub trait TryIntoBytes {
  /// Error type yielded if conversion fails
  type Error;

  /// Try to serialize into a datagram-sized byte buffer
  fn try_into_bytes(self) -> Result<DgramBytes, Self::Error>;
}

/// Errors encounterable serializing to bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MessageToBytesError {
  /// Encoded message would not fit in a datagram buffer.
  ///
  /// The message is not truncated; nothing is written.
  TooLong {
    /// Capacity of the buffer the message was being written to
    capacity: usize,
    /// Encoded size of the message
    size: usize,
  },
}

pub(crate) fn opt_len_or_delta(val: u16) -> (u8, Option<ArrayVec<[u8; 2]>>) {
  match val {
    | n if n >= 269 => {
      let mut bytes = ArrayVec::new();
      bytes.extend((n - 269).to_be_bytes());
      (14, Some(bytes))
    },
    | n if n >= 13 => {
      let mut bytes = ArrayVec::new();
      bytes.push((n - 13) as u8);
      (13, Some(bytes))
    },
    | n => (n as u8, None),
  }
}
