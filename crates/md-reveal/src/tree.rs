//! The displayed tree: one node per displayed element.

use md_stream::Element;

use crate::view::Reveal;

/// Stable identity of a displayed node across reconciliations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey(pub u64);

/// A view node together with the element it shows.
pub struct DisplayNode<N> {
    pub key: NodeKey,
    pub element: Element,
    pub handle: N,

    /// One list per child slot of a container element
    pub children: Vec<Vec<DisplayNode<N>>>,

    pub reveal: Reveal,
}

impl<N> DisplayNode<N> {
    /// Chars of text currently shown, for nodes with revealable text.
    pub fn visible_chars(&self) -> usize {
        let len = self
            .element
            .revealable_text()
            .map(|text| text.len)
            .unwrap_or(0);
        match self.reveal {
            Reveal::Hidden => 0,
            Reveal::Partial(n) => n.min(len),
            Reveal::Full => len,
        }
    }

    /// Total number of nodes in this subtree.
    pub fn count(&self) -> usize {
        1 + self
            .children
            .iter()
            .flatten()
            .map(DisplayNode::count)
            .sum::<usize>()
    }
}

/// The ordered top-level nodes, 1:1 with the displayed elements.
pub struct DisplayTree<N> {
    nodes: Vec<DisplayNode<N>>,
}

impl<N> Default for DisplayTree<N> {
    fn default() -> Self {
        Self { nodes: Vec::new() }
    }
}

impl<N> DisplayTree<N> {
    pub fn new(nodes: Vec<DisplayNode<N>>) -> Self {
        Self { nodes }
    }

    pub fn nodes(&self) -> &[DisplayNode<N>] {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut [DisplayNode<N>] {
        &mut self.nodes
    }

    pub fn into_nodes(self) -> Vec<DisplayNode<N>> {
        self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn keys(&self) -> Vec<NodeKey> {
        self.nodes.iter().map(|n| n.key).collect()
    }

    pub fn find(&self, key: NodeKey) -> Option<&DisplayNode<N>> {
        self.nodes.iter().find(|n| n.key == key)
    }

    pub fn find_mut(&mut self, key: NodeKey) -> Option<&mut DisplayNode<N>> {
        self.nodes.iter_mut().find(|n| n.key == key)
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.nodes.iter().map(|n| &n.element)
    }
}
