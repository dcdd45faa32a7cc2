use newt_msg::{Id, MessageParseError, MessageToBytesError, Token};
use no_std_net::SocketAddr;

use crate::net::Transport;
use crate::platform::Platform;

/// The context that an error occurred in
#[derive(Debug, Clone, Copy)]
pub enum When {
  /// We were processing a received datagram
  Receiving(SocketAddr),
  /// We were sending a message
  SendingMessage(Option<SocketAddr>, Id, Token),
  /// We were polling for a response
  Polling,
  /// We were driving timers
  Ticking,
  /// We were changing the resource tree
  Registering,
  /// We were notifying observers of a state change
  Notifying,
}

impl When {
  /// Construct a specific error from the context the error occurred in
  pub fn what<P: Platform>(self, what: What<P>) -> Error<P> {
    Error { when: self, what }
  }
}

/// An error encounterable from within [`Core`](crate::core::Core)
pub struct Error<P: Platform> {
  /// What happened?
  pub what: What<P>,
  /// What were we doing when it happened?
  pub when: When,
}

// Derived Debug would demand `P: Debug`, but `P` is type glue that is
// never stored; only the transport error (already `Debug` by the
// `Transport` trait) appears in a field.
impl<P: Platform> core::fmt::Debug for Error<P> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("Error")
     .field("what", &self.what)
     .field("when", &self.when)
     .finish()
  }
}

/// A contextless error with some additional debug data attached.
///
/// Every "table is full" condition is a recoverable [`What::Capacity`];
/// nothing in the engine panics or aborts under load.
pub enum What<P: Platform> {
  /// The transport failed to send
  Transport(<P::Transport as Transport>::Error),
  /// Parsing a message from bytes failed
  FromBytes(MessageParseError),
  /// Serializing a message to bytes failed
  ToBytes(MessageToBytesError),
  /// A message ran out of room for options while being built
  Options(newt_msg::OptionsFull),
  /// The clock failed to provide timing.
  ///
  /// See [`embedded_time::clock::Error`]
  Clock,
  /// A fixed-capacity table is full
  Capacity(Table),
  /// A CONfirmable message was retransmitted to exhaustion without an
  /// ACKnowledgement, or no response arrived within the transmission
  /// span.
  Timeout,
  /// The peer rejected our message with a Reset
  ResetByPeer,
  /// A block arrived that does not continue where the transfer left
  /// off
  BlockOutOfOrder {
    /// The block number that would continue the transfer
    expected: u32,
    /// The block number that arrived
    actual: u32,
  },
  /// A blockwise body outgrew the reassembly buffer
  EntityTooLarge,
  /// Resource path has more segments than `Config.max_depth` allows
  PathTooDeep,
  /// A path segment is longer than `Config.max_segment_len` allows
  NameTooLong,
  /// A resource is already registered at this path
  AlreadyExists,
  /// No resource or exchange matches the path or handle given
  NotFound,
}

impl<P: Platform> core::fmt::Debug for What<P> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    match self {
      | Self::Transport(e) => f.debug_tuple("Transport").field(e).finish(),
      | Self::FromBytes(e) => f.debug_tuple("FromBytes").field(e).finish(),
      | Self::ToBytes(e) => f.debug_tuple("ToBytes").field(e).finish(),
      | Self::Options(e) => f.debug_tuple("Options").field(e).finish(),
      | Self::Clock => f.write_str("Clock"),
      | Self::Capacity(t) => f.debug_tuple("Capacity").field(t).finish(),
      | Self::Timeout => f.write_str("Timeout"),
      | Self::ResetByPeer => f.write_str("ResetByPeer"),
      | Self::BlockOutOfOrder { expected, actual } => {
        f.debug_struct("BlockOutOfOrder")
         .field("expected", expected)
         .field("actual", actual)
         .finish()
      },
      | Self::EntityTooLarge => f.write_str("EntityTooLarge"),
      | Self::PathTooDeep => f.write_str("PathTooDeep"),
      | Self::NameTooLong => f.write_str("NameTooLong"),
      | Self::AlreadyExists => f.write_str("AlreadyExists"),
      | Self::NotFound => f.write_str("NotFound"),
    }
  }
}

/// The fixed-capacity tables that can reject work when full
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Table {
  /// The transaction table ([`N_EXCHANGES`](crate::N_EXCHANGES))
  Exchanges,
  /// Block transfer contexts ([`N_BLOCK_CTXS`](crate::N_BLOCK_CTXS))
  BlockContexts,
  /// Remote observers of our resources ([`N_OBSERVERS`](crate::N_OBSERVERS))
  Observers,
  /// Remote resources we observe ([`N_OBSERVABLES`](crate::N_OBSERVABLES))
  Observables,
  /// The resource tree ([`N_RESOURCES`](crate::N_RESOURCES))
  Resources,
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test::{ClockMock, TransportMock};

  // Deliberately does not implement Debug.
  struct OpaquePlatform;

  impl Platform for OpaquePlatform {
    type Clock = ClockMock;
    type Transport = TransportMock;
  }

  #[test]
  fn errors_are_debuggable_for_any_platform() {
    let err: Error<OpaquePlatform> = When::Polling.what(What::Timeout);
    let rendered = ::std::format!("{:?}", err);
    assert!(rendered.contains("Timeout"));
    assert!(rendered.contains("Polling"));
  }
}
