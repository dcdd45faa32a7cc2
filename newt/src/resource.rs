//! The resource tree: what the server side of a [`Core`](crate::core::Core)
//! serves.
//!
//! Nodes live in a fixed arena and link to each other by index
//! (first-child / next-sibling), so registering `a/b/c` creates three
//! nodes with no allocation. Intermediate nodes synthesized on the way
//! to a leaf carry no handler and answer nothing themselves.

use core::fmt::Write;

use newt_msg::{Code, Message, PayloadBytes};
use tinyvec::ArrayVec;

use crate::config::Config;
use crate::error::{Table, What};
use crate::net::Addrd;
use crate::platform::Platform;
use crate::{buffer_insert, code, Buffer, N_RESOURCES, SEG_CAP};

/// A resource's one entry point: inspect the request, fill in the
/// response.
///
/// The response arrives pre-built as a success skeleton (type, id and
/// token already correct); the handler sets the code, payload and any
/// options. Handlers only ever get borrowed views, so they cannot
/// re-enter the engine.
pub trait Handler {
  /// Serve one request
  fn handle(&mut self, req: &Addrd<Message>, rep: &mut Message);
}

/// [`Handler`] for cores that only act as clients.
#[derive(Debug, Clone, Copy, Default)]
pub struct Noop;

impl Handler for Noop {
  fn handle(&mut self, _: &Addrd<Message>, _: &mut Message) {}
}

/// Methods (and observability) a resource supports.
///
/// A request for anything not granted here is answered with 4.05
/// Method Not Allowed before the handler is consulted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Permissions(u8);

impl Permissions {
  /// GET allowed
  pub const GET: Permissions = Permissions(1);
  /// POST allowed
  pub const POST: Permissions = Permissions(1 << 1);
  /// PUT allowed
  pub const PUT: Permissions = Permissions(1 << 2);
  /// DELETE allowed
  pub const DELETE: Permissions = Permissions(1 << 3);
  /// Remote endpoints may observe this resource
  pub const OBSERVE: Permissions = Permissions(1 << 4);

  /// Combine permissions
  pub const fn and(self, other: Permissions) -> Permissions {
    Permissions(self.0 | other.0)
  }

  /// Does `self` include all of `other`?
  pub fn contains(&self, other: Permissions) -> bool {
    self.0 & other.0 == other.0
  }

  /// Does `self` permit a request with this method code?
  pub fn allows(&self, method: Code) -> bool {
    let needed = match method {
      | code::GET => Self::GET,
      | code::POST => Self::POST,
      | code::PUT => Self::PUT,
      | code::DELETE => Self::DELETE,
      | _ => return false,
    };

    self.contains(needed)
  }
}

type Seg = ArrayVec<[u8; SEG_CAP]>;

#[derive(Debug)]
struct Node<H> {
  name: Seg,
  permissions: Permissions,
  handler: Option<H>,
  child: Option<u8>,
  sibling: Option<u8>,
}

impl<H> Node<H> {
  fn stub(name: &str) -> Self {
    Node { name: name.bytes().collect(),
           permissions: Permissions::default(),
           handler: None,
           child: None,
           sibling: None }
  }

  fn name(&self) -> &str {
    // names only enter the tree as &str
    core::str::from_utf8(&self.name).unwrap_or("")
  }
}

/// First-child / next-sibling resource tree over a fixed arena.
#[derive(Debug)]
pub(crate) struct ResourceTree<H> {
  nodes: Buffer<Node<H>, N_RESOURCES>,
  root: Option<u8>,
}

impl<H> Default for ResourceTree<H> {
  fn default() -> Self {
    Self { nodes: Default::default(),
           root: None }
  }
}

pub(crate) fn segments(path: &str) -> impl Iterator<Item = &str> {
  path.split('/').filter(|s| !s.is_empty())
}

impl<H> ResourceTree<H> {
  /// Number of live nodes (leaves and synthesized intermediates)
  pub(crate) fn len(&self) -> usize {
    self.nodes.iter().filter(|o| o.is_some()).count()
  }

  fn node(&self, ix: u8) -> &Node<H> {
    // links only ever point at live slots
    self.nodes[ix as usize].as_ref().unwrap()
  }

  fn node_mut(&mut self, ix: u8) -> &mut Node<H> {
    self.nodes[ix as usize].as_mut().unwrap()
  }

  /// Find the child of `parent` (or root when `None`) named `name`
  fn find_child(&self, parent: Option<u8>, name: &str) -> Option<u8> {
    let mut cur = match parent {
      | Some(ix) => self.node(ix).child,
      | None => self.root,
    };

    while let Some(ix) = cur {
      if self.node(ix).name() == name {
        return Some(ix);
      }
      cur = self.node(ix).sibling;
    }

    None
  }

  fn add_child<P: Platform>(&mut self,
                            parent: Option<u8>,
                            name: &str)
                            -> Result<u8, What<P>> {
    let ix = buffer_insert(&mut self.nodes, Node::stub(name)).map_err(|_| {
                                                       What::Capacity(Table::Resources)
                                                     })? as u8;

    let head = match parent {
      | Some(p) => self.node_mut(p).child.replace(ix),
      | None => self.root.replace(ix),
    };
    self.node_mut(ix).sibling = head;

    Ok(ix)
  }

  /// Register a handler at `path`, synthesizing intermediate nodes as
  /// needed.
  ///
  /// Validation happens before any mutation, so a failed registration
  /// leaves the tree exactly as it was.
  pub(crate) fn register<P: Platform>(&mut self,
                                      cfg: &Config,
                                      path: &str,
                                      permissions: Permissions,
                                      handler: H)
                                      -> Result<(), What<P>> {
    let depth = segments(path).count();
    if depth == 0 || depth > cfg.max_depth as usize {
      return Err(What::PathTooDeep);
    }

    let seg_cap = SEG_CAP.min(cfg.max_segment_len as usize);
    if segments(path).any(|s| s.len() > seg_cap) {
      return Err(What::NameTooLong);
    }

    // walk the existing prefix
    let mut parent: Option<u8> = None;
    let mut missing = 0usize;
    for seg in segments(path) {
      match self.find_child(parent, seg) {
        | Some(ix) if missing == 0 => parent = Some(ix),
        | _ => missing += 1,
      }
    }

    if missing == 0 {
      // full path exists; occupied leaves can't be replaced
      let leaf = parent.map(|ix| self.node(ix));
      if leaf.map(|n| n.handler.is_some()).unwrap_or(false) {
        return Err(What::AlreadyExists);
      }
    } else if self.len() + missing > N_RESOURCES {
      return Err(What::Capacity(Table::Resources));
    }

    // now infallible: create what's missing and fill in the leaf
    let mut parent: Option<u8> = None;
    for seg in segments(path) {
      parent = Some(match self.find_child(parent, seg) {
                      | Some(ix) => ix,
                      | None => self.add_child::<P>(parent, seg)?,
                    });
    }

    let leaf = self.node_mut(parent.unwrap_or(0));
    leaf.permissions = permissions;
    leaf.handler = Some(handler);
    Ok(())
  }

  /// Remove the resource at `path` along with any nodes beneath it.
  pub(crate) fn unregister<P: Platform>(&mut self, path: &str) -> Result<(), What<P>> {
    let mut parent: Option<u8> = None;
    let mut found: Option<u8> = None;

    for seg in segments(path) {
      parent = found;
      found = self.find_child(parent, seg);
      if found.is_none() {
        return Err(What::NotFound);
      }
    }

    let ix = found.ok_or(What::NotFound)?;

    // unlink from the sibling chain
    let sibling = self.node(ix).sibling;
    let mut cur = match parent {
      | Some(p) => self.node_mut(p).child,
      | None => self.root,
    };
    if cur == Some(ix) {
      match parent {
        | Some(p) => self.node_mut(p).child = sibling,
        | None => self.root = sibling,
      }
    } else {
      while let Some(c) = cur {
        if self.node(c).sibling == Some(ix) {
          self.node_mut(c).sibling = sibling;
          break;
        }
        cur = self.node(c).sibling;
      }
    }

    self.drop_subtree(ix);
    Ok(())
  }

  fn drop_subtree(&mut self, ix: u8) {
    let mut child = self.node(ix).child;
    while let Some(c) = child {
      child = self.node(c).sibling;
      self.drop_subtree(c);
    }
    self.nodes[ix as usize] = None;
  }

  /// Walk one segment per level; `None` when any segment misses.
  pub(crate) fn lookup<'a>(&self, path: impl Iterator<Item = &'a str>) -> Option<u8> {
    let mut cur: Option<u8> = None;
    for seg in path {
      cur = Some(self.find_child(cur, seg)?);
    }
    cur
  }

  /// Is `ix` still a live node? (Observer entries hold node indices
  /// and must be dropped when their node goes away.)
  pub(crate) fn is_live(&self, ix: u8) -> bool {
    self.nodes
        .get(ix as usize)
        .map(Option::is_some)
        .unwrap_or(false)
  }

  pub(crate) fn handler_mut(&mut self, ix: u8) -> Option<&mut H> {
    self.node_mut(ix).handler.as_mut()
  }

  pub(crate) fn permissions(&self, ix: u8) -> Permissions {
    self.node(ix).permissions
  }

  /// Render the tree as an RFC6690 link-format document
  /// (`</a/b>;obs,</c>`), synthesized on demand for
  /// `GET /.well-known/core` and never stored.
  pub(crate) fn well_known_core(&self) -> PayloadBytes {
    let mut out = PayloadWriter(PayloadBytes::new());
    let mut first = true;
    self.write_links(self.root, &mut scratch::Path::default(), &mut out, &mut first);
    out.0
  }

  fn write_links(&self,
                 head: Option<u8>,
                 path: &mut scratch::Path,
                 out: &mut PayloadWriter,
                 first: &mut bool) {
    let mut cur = head;
    while let Some(ix) = cur {
      let node = self.node(ix);
      path.push(node.name());

      if node.handler.is_some() {
        if !*first {
          write!(out, ",").ok();
        }
        *first = false;

        write!(out, "<{}>", path.as_str()).ok();
        if node.permissions.contains(Permissions::OBSERVE) {
          write!(out, ";obs").ok();
        }
      }

      self.write_links(node.child, path, out, first);
      path.pop();
      cur = node.sibling;
    }
  }
}

/// `core::fmt::Write` over a fixed byte buffer; output past capacity
/// is dropped rather than erroring, matching how a constrained
/// link-format document is best-effort anyway.
pub(crate) struct PayloadWriter(pub(crate) PayloadBytes);

impl Write for PayloadWriter {
  fn write_str(&mut self, s: &str) -> core::fmt::Result {
    self.0
        .extend(s.bytes().take(self.0.capacity() - self.0.len()));
    Ok(())
  }
}

mod scratch {
  use super::{Seg, SEG_CAP};
  use tinyvec::ArrayVec;

  /// Scratch space for rendering absolute paths during tree iteration
  #[derive(Default)]
  pub(crate) struct Path {
    segs: ArrayVec<[Seg; 8]>,
    rendered: ArrayVec<[u8; (SEG_CAP + 1) * 8]>,
  }

  impl Path {
    pub(crate) fn push(&mut self, seg: &str) {
      self.segs.push(seg.bytes().collect());
      self.render();
    }

    pub(crate) fn pop(&mut self) {
      self.segs.pop();
      self.render();
    }

    pub(crate) fn as_str(&self) -> &str {
      core::str::from_utf8(&self.rendered).unwrap_or("")
    }

    fn render(&mut self) {
      self.rendered.clear();
      for seg in &self.segs {
        self.rendered.push(b'/');
        self.rendered.extend(seg.iter().copied());
      }
    }
  }
}
