//! The seams to the host UI: building view nodes and hearing back about
//! layout and reveal progress.

use md_stream::{Element, TocEntry};

use crate::scheduler::RevealToken;

/// Estimated layout size, in host units.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

/// How much of a node is currently shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reveal {
    Hidden,

    /// The first `n` chars of the node's text
    Partial(usize),

    Full,
}

/// Outcome of starting a block reveal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStart {
    /// The block is shown; the next task can start
    Done,

    /// The block is rendering asynchronously. The host reports back with
    /// the token once it is ready.
    Pending,
}

/// Builds and mutates the host's view nodes.
///
/// Nodes are opaque to the reconciler. Containers receive their children
/// through [`ViewFactory::place`].
pub trait ViewFactory {
    type Node;

    fn build(&mut self, element: &Element) -> Self::Node;

    /// Mutate `node`, which currently shows `old`, to show `new`. Returning
    /// false makes the reconciler build a fresh node instead.
    fn try_update(&mut self, node: &mut Self::Node, old: &Element, new: &Element) -> bool;

    fn measure(&self, element: &Element, width: f32) -> Size;

    /// Put `node` at `index` of its parent's child slot, or of the root
    /// when `parent` is `None`.
    fn place(&mut self, _node: &Self::Node, _parent: Option<&Self::Node>, _slot: usize, _index: usize) {}

    fn destroy(&mut self, _node: Self::Node) {}

    fn apply_reveal(&mut self, node: &mut Self::Node, reveal: Reveal);

    fn reveal_block(&mut self, _node: &mut Self::Node, _token: RevealToken) -> BlockStart {
        BlockStart::Done
    }
}

/// Notifications from the session to the host.
pub trait HostNotifier {
    fn size_changed(&mut self, _size: Size) {}

    /// The reveal queue ran empty.
    fn reveal_drained(&mut self) {}

    /// A heading's node exists, so its anchor can be scrolled to.
    fn heading_resolved(&mut self, _heading: &TocEntry) {}
}

impl HostNotifier for () {}
