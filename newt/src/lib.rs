//! `newt` is a CoAP ([RFC7252](https://datatracker.ietf.org/doc/html/rfc7252))
//! engine for constrained environments: a [`Core`](core::Core) owns a set of
//! fixed-capacity tables (transactions, resources, observers, block-transfer
//! contexts) and drives client and server behavior over any datagram
//! transport, without allocating.
//!
//! The application owns the event loop: it feeds received datagrams to
//! [`Core::on_datagram`](core::Core::on_datagram), drives retransmission with
//! [`Core::on_tick`](core::Core::on_tick), and polls for responses with
//! [`Core::poll_resp`](core::Core::poll_resp).
//!
//! Wire-format concerns live in the sibling crate [`newt_msg`].

// style
#![allow(clippy::unused_unit)]
// deny
#![deny(missing_docs)]
#![cfg_attr(not(test), deny(unsafe_code))]
// warnings
#![cfg_attr(not(test), warn(unreachable_pub))]
// features
#![cfg_attr(not(feature = "std"), no_std)]

use tinyvec::ArrayVec;

/// Block-wise transfers (RFC7959)
pub mod block;

/// Request & response code constants
pub mod code;

/// Runtime configuration
pub mod config;

/// The engine itself
pub mod core;

/// Errors
pub mod error;

/// The transaction table
pub mod exchange;

/// Addresses & the transport boundary
pub mod net;

/// Observing resources (RFC7641)
pub mod observe;

/// Clock & transport type glue
pub mod platform;

/// The resource tree
pub mod resource;

/// Retryable operations
pub mod retry;

/// Timing
pub mod time;

/// `std` implementations of the clock and transport boundaries
#[cfg(feature = "std")]
pub mod std;

#[cfg(test)]
pub(crate) mod test;

/// Number of in-flight exchanges the transaction table can hold.
pub const N_EXCHANGES: usize = 16;

/// Number of recently-answered requests remembered for deduplication.
pub const N_DEDUP: usize = 16;

/// Number of nodes in the resource tree (including intermediate path
/// segments).
pub const N_RESOURCES: usize = 16;

/// Number of remote endpoints that may observe our resources at once.
pub const N_OBSERVERS: usize = 8;

/// Number of remote resources we may observe at once.
pub const N_OBSERVABLES: usize = 8;

/// Number of concurrent block-wise transfers.
pub const N_BLOCK_CTXS: usize = 4;

/// Capacity of one resource path segment, in bytes.
pub const SEG_CAP: usize = 32;

// Option for these collections provides a Default implementation,
// which is required by ArrayVec.
//
// It also gives every entry a stable index for the lifetime of the
// entry, so indices can be handed out as opaque handles.
pub(crate) type Buffer<T, const N: usize> = ArrayVec<[Option<T>; N]>;

pub(crate) fn buffer_insert<T, const N: usize>(buf: &mut Buffer<T, N>, t: T) -> Result<usize, T> {
  match buf.iter().position(Option::is_none) {
    | Some(ix) => {
      buf[ix] = Some(t);
      Ok(ix)
    },
    | None if buf.len() < buf.capacity() => {
      buf.push(Some(t));
      Ok(buf.len() - 1)
    },
    | None => Err(t),
  }
}
