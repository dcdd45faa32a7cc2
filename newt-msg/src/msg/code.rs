/// # Message Code
///
/// 8-bit field split into a 3-bit class and 5-bit detail, written
/// `c.dd` (e.g. `2.05` Content, `4.04` Not Found, `0.01` GET).
///
/// See [RFC7252 section 12.1](https://datatracker.ietf.org/doc/html/rfc7252#section-12.1)
///
/// ```
/// use newt_msg::Code;
///
/// assert_eq!(Code { class: 2, detail: 5 }.to_human(),
///            ['2', '.', '0', '5']);
/// ```
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct Code {
  /// The "class" of message codes identify it as a request or response, and provides the class of response status:
  ///
  /// |class|meaning|
  /// |---|---|
  /// |`0`|Message is a request (or Empty)|
  /// |`2`|Message is a success response|
  /// |`4`|Message is a client error response|
  /// |`5`|Message is a server error response|
  pub class: u8,

  /// 2-digit integer (range `[0, 32)`) that provides granular information about the response status.
  ///
  /// Will always be `0` for requests.
  pub detail: u8,
}

/// Whether a code identifies a request, a response, or an Empty message.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum CodeKind {
  /// A request method (0.01 - 0.31)
  Request,
  /// A response status (2.00 - 5.31)
  Response,
  /// Code 0.00; carries no request or response (ACK, RST, ping)
  Empty,
}

impl Code {
  /// Create a new Code
  ///
  /// ```
  /// use newt_msg::Code;
  ///
  /// let content = Code::new(2, 05);
  /// ```
  pub const fn new(class: u8, detail: u8) -> Self {
    Self { class, detail }
  }

  /// Classify this code as [`Request`](CodeKind::Request),
  /// [`Response`](CodeKind::Response) or [`Empty`](CodeKind::Empty).
  pub fn kind(&self) -> CodeKind {
    match u8::from(*self) {
      | 0 => CodeKind::Empty,
      | 1..=31 => CodeKind::Request,
      | 64..=191 => CodeKind::Response,
      // 1.xx, 6.xx, 7.xx are reserved; treat like responses so they
      // match pending exchanges rather than hitting the resource tree.
      | _ => CodeKind::Response,
    }
  }

  /// Get the human string representation of a message code
  ///
  /// ```
  /// use newt_msg::Code;
  ///
  /// let code = Code { class: 2, detail: 5 };
  /// assert_eq!(String::from_iter(code.to_human()), "2.05");
  /// ```
  pub fn to_human(&self) -> [char; 4] {
    let to_char = |d: u8| char::from_digit(d.into(), 10).unwrap_or('?');
    [to_char(self.class),
     '.',
     to_char(self.detail / 10),
     to_char(self.detail % 10)]
  }
}

impl From<u8> for Code {
  fn from(b: u8) -> Self {
    let class = b >> 5;
    let detail = b & 0b00011111;

    Code { class, detail }
  }
}

impl From<Code> for u8 {
  fn from(code: Code) -> u8 {
    (code.class << 5) | (code.detail & 0b00011111)
  }
}
