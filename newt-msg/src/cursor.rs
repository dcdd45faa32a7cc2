/// A cursor over a byte buffer, tracking how much of the
/// buffer has been consumed by the parser.
#[derive(Debug, Clone, Copy)]
pub struct Cursor<A> {
  bytes: A,
  pos: usize,
}

impl<A: AsRef<[u8]>> Cursor<A> {
  /// Create a new Cursor at the start of a buffer
  pub fn new(bytes: A) -> Self {
    Self { bytes, pos: 0 }
  }

  /// Consume and yield the next byte, if there is one
  pub fn next(&mut self) -> Option<u8> {
    let b = self.bytes.as_ref().get(self.pos).copied();
    if b.is_some() {
      self.pos += 1;
    }
    b
  }

  /// Consume and yield exactly `n` bytes, or `None`
  /// (consuming nothing) when fewer than `n` remain.
  pub fn take_exact(&mut self, n: usize) -> Option<&[u8]> {
    if self.remaining() < n {
      return None;
    }

    let slice = &self.bytes.as_ref()[self.pos..self.pos + n];
    self.pos += n;
    Some(slice)
  }

  /// Consume and yield up to `n` bytes.
  pub fn take(&mut self, n: usize) -> &[u8] {
    let n = n.min(self.remaining());
    let slice = &self.bytes.as_ref()[self.pos..self.pos + n];
    self.pos += n;
    slice
  }

  /// Consume and yield everything left in the buffer.
  pub fn take_until_end(&mut self) -> &[u8] {
    let slice = &self.bytes.as_ref()[self.pos..];
    self.pos = self.bytes.as_ref().len();
    slice
  }

  /// Number of bytes not yet consumed
  pub fn remaining(&self) -> usize {
    self.bytes.as_ref().len() - self.pos
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cursor_consumes_in_order() {
    let mut cur = Cursor::new([1u8, 2, 3, 4, 5]);
    assert_eq!(cur.next(), Some(1));
    assert_eq!(cur.take_exact(2), Some(&[2u8, 3][..]));
    assert_eq!(cur.remaining(), 2);
    assert_eq!(cur.take_until_end(), &[4, 5]);
    assert_eq!(cur.next(), None);
  }

  #[test]
  fn take_exact_past_end_consumes_nothing() {
    let mut cur = Cursor::new([1u8]);
    assert_eq!(cur.take_exact(2), None);
    assert_eq!(cur.remaining(), 1);
    assert_eq!(cur.take(2), &[1]);
  }
}
