/// Errors encountered when parsing the option list of a message
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum OptParseError {
  /// Ran out of bytes mid-option
  UnexpectedEndOfStream,

  /// An option value's declared length exceeds the fixed value
  /// capacity this crate is built with
  OptionValueTooLong {
    /// Fixed capacity of an option value buffer
    capacity: usize,
    /// Length the option on the wire declared
    actual: usize,
  },

  /// The message carries more options than the fixed option
  /// collection can hold
  TooManyOptions(usize),

  /// The delta nibble was the reserved value 15 in a byte that is not
  /// the payload marker
  OptionDeltaReservedValue(u8),

  /// The value-length nibble was the reserved value 15
  ValueLengthReservedValue(u8),

  /// The delta's 2-byte extended form declared a value past what an
  /// option delta can hold
  OptionDeltaTooLarge(u32),

  /// Hit the payload marker (or end of message); not an error, just
  /// means we're done parsing options
  OptionsExhausted,
}

impl OptParseError {
  pub(crate) fn eof() -> Self {
    Self::UnexpectedEndOfStream
  }
}
