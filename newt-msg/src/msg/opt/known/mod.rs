use super::OptNumber;

/// Block-wise transfer (RFC7959)
pub mod block;

/// Observing resources (RFC7641)
pub mod observe;

/// Uri-Host option number
pub const URI_HOST: OptNumber = OptNumber(3);

/// Observe option number
pub const OBSERVE: OptNumber = OptNumber(6);

/// Uri-Port option number
pub const URI_PORT: OptNumber = OptNumber(7);

/// Uri-Path option number (repeatable; one option per path segment)
pub const URI_PATH: OptNumber = OptNumber(11);

/// Content-Format option number
pub const CONTENT_FORMAT: OptNumber = OptNumber(12);

/// Max-Age option number
pub const MAX_AGE: OptNumber = OptNumber(14);

/// Uri-Query option number
pub const URI_QUERY: OptNumber = OptNumber(15);

/// Accept option number
pub const ACCEPT: OptNumber = OptNumber(17);

/// Block2 option number (block-wise responses)
pub const BLOCK2: OptNumber = OptNumber(23);

/// Block1 option number (block-wise requests)
pub const BLOCK1: OptNumber = OptNumber(27);

/// Size2 option number
pub const SIZE2: OptNumber = OptNumber(28);

/// Size1 option number
pub const SIZE1: OptNumber = OptNumber(60);
