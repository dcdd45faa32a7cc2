/// When included in a GET request, the Observe Option extends the GET
/// method so it does not only retrieve a current representation of the
/// target resource, but also requests the server to add or remove an
/// entry in the list of observers of the resource depending on the
/// option value.  The list entry consists of the client endpoint and the
/// token specified by the client in the request.  Possible values are:
///
///    `0` (register) adds the entry to the list, if not present;
///
///    `1` (deregister) removes the entry from the list, if present
#[derive(Hash, Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum Action {
  /// Tells the resource owner we would like to observe updates to
  /// the resource we've issued a GET request for.
  Register,
  /// Tells the resource owner we would no longer like to observe updates to
  /// the resource we've issued a GET request for.
  Deregister,
}

impl Action {
  /// Try to parse from an option value
  pub fn from_uint(n: u32) -> Option<Self> {
    match n {
      | 0 => Some(Action::Register),
      | 1 => Some(Action::Deregister),
      | _ => None,
    }
  }
}

impl From<Action> for u32 {
  fn from(a: Action) -> Self {
    match a {
      | Action::Register => 0,
      | Action::Deregister => 1,
    }
  }
}

/// Is a notification with sequence number `incoming` newer than the
/// one we last accepted?
///
/// Sequence numbers are 24-bit and wrap, so "newer" means the gap
/// from `last` to `incoming` is less than half the sequence space.
///
/// See [RFC7641 section 3.4](https://datatracker.ietf.org/doc/html/rfc7641#section-3.4)
pub fn seq_is_newer(incoming: u32, last: u32) -> bool {
  const HALF: u32 = 1 << 23;
  const MASK: u32 = (1 << 24) - 1;

  incoming.wrapping_sub(last) & MASK < HALF && incoming & MASK != last & MASK
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn seq_freshness_wraps() {
    assert!(seq_is_newer(2, 1));
    assert!(!seq_is_newer(1, 2));
    assert!(!seq_is_newer(5, 5));

    // close to the wrap point, small positive steps are still newer
    assert!(seq_is_newer(3, 0xFFFFFE));
    assert!(!seq_is_newer(0xFFFFFE, 3));
  }
}
