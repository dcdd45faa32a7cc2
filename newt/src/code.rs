//! Named constants for the request methods and response codes the
//! engine deals in.
//!
//! See [RFC7252 section 12.1](https://datatracker.ietf.org/doc/html/rfc7252#section-12.1)

pub use newt_msg::Code;

macro_rules! code {
  ($(#[$doc:meta])+ $name:ident = $c:literal . $d:literal) => {
    $(#[$doc])+
    #[allow(clippy::zero_prefixed_literal)]
    pub const $name: Code = Code::new($c, $d);
  };
}

// 0.xx methods
code!(/// GET retrieves a representation of a resource
      GET    = 0 . 01);
code!(/// POST requests processing of the payload by a resource
      POST   = 0 . 02);
code!(/// PUT updates or creates the resource with the payload
      PUT    = 0 . 03);
code!(/// DELETE requests deletion of a resource
      DELETE = 0 . 04);

// 2.xx
code!(/// 2.01 Created
      CREATED  = 2 . 01);
code!(/// 2.02 Deleted
      DELETED  = 2 . 02);
code!(/// 2.03 Valid
      VALID    = 2 . 03);
code!(/// 2.04 Changed
      CHANGED  = 2 . 04);
code!(/// 2.05 Content
      CONTENT  = 2 . 05);
code!(/// 2.31 Continue (blockwise transfer may proceed, RFC7959)
      CONTINUE = 2 . 31);

// 4.xx
code!(/// 4.00 Bad Request
      BAD_REQUEST                = 4 . 00);
code!(/// 4.02 Bad Option
      BAD_OPTION                 = 4 . 02);
code!(/// 4.04 Not Found
      NOT_FOUND                  = 4 . 04);
code!(/// 4.05 Method Not Allowed
      METHOD_NOT_ALLOWED         = 4 . 05);
code!(/// 4.08 Request Entity Incomplete (a block was missed, RFC7959)
      REQUEST_ENTITY_INCOMPLETE  = 4 . 08);
code!(/// 4.13 Request Entity Too Large
      REQUEST_ENTITY_TOO_LARGE   = 4 . 13);
code!(/// 4.15 Unsupported Content-Format
      UNSUPPORTED_CONTENT_FORMAT = 4 . 15);

// 5.xx
code!(/// 5.00 Internal Server Error
      INTERNAL_SERVER_ERROR = 5 . 00);
code!(/// 5.01 Not Implemented
      NOT_IMPLEMENTED       = 5 . 01);
code!(/// 5.03 Service Unavailable
      SERVICE_UNAVAILABLE   = 5 . 03);
