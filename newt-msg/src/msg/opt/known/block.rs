/// Three items of information are packed into a Block1 or Block2
/// option value:
/// * the size of the block ([`Block::size`])
/// * whether more blocks are following ([`Block::more`])
/// * the relative number of the block ([`Block::num`]) within a sequence of blocks with the given size.
///
/// ```text
/// 0..19    3     0..2
/// vvvvv    v     vvv
/// [num] [more] [szx]
/// ```
///
/// See [RFC7959 section 2.2](https://datatracker.ietf.org/doc/html/rfc7959#section-2.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Block(u32);

/// Reasons a Block option value read off the wire is malformed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InvalidBlock {
  /// SZX was the reserved value 7
  SzxReserved,
  /// The block number does not fit in 20 bits
  NumTooLarge(u32),
}

impl Block {
  /// Pack a block descriptor.
  ///
  /// `size` is rounded down to the nearest power of two and clamped
  /// to the representable range 16..=1024.
  pub fn new(size: u16, num: u32, more: bool) -> Self {
    let size = u32::from(size.clamp(16, 1024));
    let szx = (31 - size.leading_zeros()) - 4;

    Self((num << 4) | (u32::from(more) << 3) | szx)
  }

  /// Validate a raw option value as a Block.
  ///
  /// SZX 7 is reserved and MUST NOT be sent, and block numbers wider
  /// than 20 bits cannot appear in a valid 3-byte option value.
  pub fn parse(raw: u32) -> Result<Self, InvalidBlock> {
    if raw & 0b111 == 7 {
      return Err(InvalidBlock::SzxReserved);
    }

    let num = raw >> 4;
    if num > 0xFFFFF {
      return Err(InvalidBlock::NumTooLarge(num));
    }

    Ok(Self(raw))
  }

  /// Block size in bytes (`2^(szx + 4)`)
  pub fn size(&self) -> u16 {
    let szx = (self.0 & 0b111).min(6);
    2u16.pow(szx + 4)
  }

  #[allow(missing_docs)]
  pub fn more(&self) -> bool {
    (self.0 & 0b1000) >> 3 == 1
  }

  #[allow(missing_docs)]
  pub fn num(&self) -> u32 {
    self.0 >> 4
  }
}

impl From<Block> for u32 {
  fn from(b: Block) -> Self {
    b.0
  }
}
