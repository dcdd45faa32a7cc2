use tinyvec::ArrayVec;

/// Opaque correlator between a request and its eventual response(s).
///
/// Unlike [`Id`](super::Id), which matches an Acknowledgement to the
/// Confirmable message it acknowledges, the token ties a response
/// back to the request that caused it across any number of exchanges
/// (including Observe notifications, which reuse the registration token
/// indefinitely).
///
/// See [RFC7252 section 5.3.1](https://datatracker.ietf.org/doc/html/rfc7252#section-5.3.1)
#[derive(Copy, Clone, Default, Hash, Eq, Ord, PartialEq, PartialOrd, Debug)]
pub struct Token(pub ArrayVec<[u8; 8]>);

impl Token {
  /// Take an arbitrary-length sequence of bytes and turn it into an opaque message token
  ///
  /// Currently uses the BLAKE2 hashing algorithm, but this may change in the future.
  ///
  /// ```
  /// use newt_msg::Token;
  ///
  /// let my_token = Token::opaque(&[0, 1, 2]);
  /// ```
  pub fn opaque(data: &[u8]) -> Token {
    use blake2::digest::consts::U8;
    use blake2::{Blake2b, Digest};

    let mut digest = Blake2b::<U8>::new();
    digest.update(data);
    Token(Into::<[u8; 8]>::into(digest.finalize()).into())
  }
}
