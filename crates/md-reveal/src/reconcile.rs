//! Diffing a new element list against the displayed tree.

use std::ops::Range;
use std::time::Instant;

use md_stream::Element;
use tracing::{debug, trace};

use crate::config::ReconcileConfig;
use crate::tree::{DisplayNode, DisplayTree, NodeKey};
use crate::view::{Reveal, ViewFactory};

/// What a reconciliation pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub built: usize,
    pub reused: usize,
    pub mutated: usize,
    pub moved: usize,
    pub destroyed: usize,

    /// Top-level nodes built in this pass, in document order
    pub built_keys: Vec<NodeKey>,

    /// Top-level text nodes whose content changed, with the number of
    /// chars that were visible before the change
    pub mutated_text: Vec<(NodeKey, usize)>,

    /// Every node destroyed in this pass, nested ones included
    pub destroyed_keys: Vec<NodeKey>,
}

/// Keeps the displayed tree in step with the parser, rebuilding as little
/// as possible.
///
/// For each new element the old nodes from the cursor onwards (up to
/// `window` of them) are searched: an equal element is reused untouched,
/// otherwise the first compatible node the factory manages to update is
/// taken, skipping nodes that equal one of the next few new elements.
/// Anything left over is destroyed.
pub struct Reconciler {
    config: ReconcileConfig,
    next_key: u64,
    collapsible_until: Option<Instant>,
}

impl Reconciler {
    pub fn new(config: ReconcileConfig) -> Self {
        Self {
            config,
            next_key: 0,
            collapsible_until: None,
        }
    }

    /// The user is interacting with a collapsible; leave collapsibles alone
    /// for a moment so the interaction isn't clobbered.
    pub fn mark_collapsible_interaction(&mut self, now: Instant) {
        self.collapsible_until = Some(now + self.config.collapsible_hold());
    }

    pub fn collapsibles_held(&self, now: Instant) -> bool {
        self.collapsible_until.is_some_and(|until| now < until)
    }

    /// When the current collapsible hold ends, if one was set since the
    /// last pass that ran without it.
    pub fn hold_expires(&self) -> Option<Instant> {
        self.collapsible_until
    }

    #[profiling::function]
    pub fn reconcile<F: ViewFactory>(
        &mut self,
        old: DisplayTree<F::Node>,
        new: &[Element],
        factory: &mut F,
        now: Instant,
    ) -> (DisplayTree<F::Node>, ReconcileReport) {
        let hold_collapsibles = self.collapsibles_held(now);
        if !hold_collapsibles {
            self.collapsible_until = None;
        }

        let mut pass = Pass {
            factory,
            window: self.config.window.max(1),
            hold_collapsibles,
            next_key: &mut self.next_key,
            report: ReconcileReport::default(),
        };
        let nodes = pass.list(old.into_nodes(), new, None, 0, 0);
        let report = pass.report;

        debug!(
            "reconciled {} elements: {} built, {} reused, {} mutated, {} moved, {} destroyed",
            new.len(),
            report.built,
            report.reused,
            report.mutated,
            report.moved,
            report.destroyed
        );

        (DisplayTree::new(nodes), report)
    }
}

/// Can a node showing `old` be updated in place to show `new`?
pub fn reuse_compatible(old: &Element, new: &Element) -> bool {
    match (old, new) {
        (Element::Quote { level: a, .. }, Element::Quote { level: b, .. }) => a == b,
        (Element::List { level: a, .. }, Element::List { level: b, .. }) => a == b,
        (Element::Custom { kind: a, .. }, Element::Custom { kind: b, .. }) => a == b,
        (Element::Text(_), Element::Text(_))
        | (Element::Heading { .. }, Element::Heading { .. })
        | (Element::CodeBlock { .. }, Element::CodeBlock { .. })
        | (Element::Formula { .. }, Element::Formula { .. })
        | (Element::Collapsible { .. }, Element::Collapsible { .. })
        | (Element::Table { .. }, Element::Table { .. })
        | (Element::Image { .. }, Element::Image { .. })
        | (Element::Rule, Element::Rule)
        | (Element::RawBlock { .. }, Element::RawBlock { .. }) => true,
        _ => false,
    }
}

enum Placement {
    New,
    Moved,
    Stay,
}

struct Pass<'a, F: ViewFactory> {
    factory: &'a mut F,
    window: usize,
    hold_collapsibles: bool,
    next_key: &'a mut u64,
    report: ReconcileReport,
}

impl<F: ViewFactory> Pass<'_, F> {
    fn list(
        &mut self,
        old: Vec<DisplayNode<F::Node>>,
        new: &[Element],
        parent: Option<&F::Node>,
        slot: usize,
        depth: usize,
    ) -> Vec<DisplayNode<F::Node>> {
        let mut old: Vec<Option<DisplayNode<F::Node>>> = old.into_iter().map(Some).collect();
        let mut search_start = 0;
        let mut furthest_old: Option<usize> = None;
        let mut placed = Vec::with_capacity(new.len());

        for (i, element) in new.iter().enumerate() {
            let window = search_start..(search_start + self.window).min(old.len());
            let upcoming = &new[i + 1..(i + 1 + self.window).min(new.len())];

            let found = match self.take_equal(&mut old, window.clone(), element) {
                Some(found) => Some(found),
                None => self.take_updated(&mut old, window, element, upcoming, depth),
            };

            let entry = match found {
                Some((index, node)) => {
                    // Reused nodes keep their relative order unless one
                    // comes from before a node we already took
                    let moved = furthest_old.is_some_and(|furthest| index < furthest);
                    if !moved {
                        furthest_old = Some(index);
                    }
                    (node, if moved { Placement::Moved } else { Placement::Stay })
                }
                None => (self.build(element, depth), Placement::New),
            };
            placed.push(entry);

            while search_start < old.len() && old[search_start].is_none() {
                search_start += 1;
            }
        }

        for leftover in old.into_iter().flatten() {
            self.destroy(leftover);
        }

        let mut out = Vec::with_capacity(placed.len());
        for (index, (node, placement)) in placed.into_iter().enumerate() {
            match placement {
                Placement::New => self.factory.place(&node.handle, parent, slot, index),
                Placement::Moved => {
                    self.report.moved += 1;
                    self.factory.place(&node.handle, parent, slot, index);
                }
                Placement::Stay => {}
            }
            out.push(node);
        }
        out
    }

    fn take_equal(
        &mut self,
        old: &mut [Option<DisplayNode<F::Node>>],
        window: Range<usize>,
        element: &Element,
    ) -> Option<(usize, DisplayNode<F::Node>)> {
        let index = window
            .into_iter()
            .find(|&j| old[j].as_ref().is_some_and(|n| n.element == *element))?;
        let node = old[index].take()?;
        self.report.reused += 1;
        Some((index, node))
    }

    fn take_updated(
        &mut self,
        old: &mut [Option<DisplayNode<F::Node>>],
        window: Range<usize>,
        element: &Element,
        upcoming: &[Element],
        depth: usize,
    ) -> Option<(usize, DisplayNode<F::Node>)> {
        for index in window {
            let Some(candidate) = old[index].as_mut() else {
                continue;
            };
            if !reuse_compatible(&candidate.element, element) {
                continue;
            }
            // Leave nodes that an upcoming element will reuse as-is
            if upcoming.contains(&candidate.element) {
                continue;
            }
            if self.update(candidate, element, depth) {
                let node = old[index].take()?;
                return Some((index, node));
            }
        }
        None
    }

    fn update(&mut self, node: &mut DisplayNode<F::Node>, element: &Element, depth: usize) -> bool {
        if self.hold_collapsibles && matches!(element, Element::Collapsible { .. }) {
            trace!("collapsible {:?} held during interaction", node.key);
            self.report.reused += 1;
            return true;
        }

        let previous_visible = node.visible_chars();
        if !self
            .factory
            .try_update(&mut node.handle, &node.element, element)
        {
            trace!("{} node {:?} refused update", element.kind_name(), node.key);
            return false;
        }

        if element.is_container() {
            let mut old_slots = std::mem::take(&mut node.children).into_iter();
            let mut children = Vec::new();
            for (slot, new_children) in element.child_slots().into_iter().enumerate() {
                let old_children = old_slots.next().unwrap_or_default();
                children.push(self.list(
                    old_children,
                    new_children,
                    Some(&node.handle),
                    slot,
                    depth + 1,
                ));
            }
            for leftover in old_slots.flatten() {
                self.destroy(leftover);
            }
            node.children = children;
        }

        if depth == 0 && element.revealable_text().is_some() {
            self.report.mutated_text.push((node.key, previous_visible));
        }

        node.element = element.clone();
        self.report.mutated += 1;
        true
    }

    fn build(&mut self, element: &Element, depth: usize) -> DisplayNode<F::Node> {
        let handle = self.factory.build(element);
        *self.next_key += 1;
        let key = NodeKey(*self.next_key);

        self.report.built += 1;
        if depth == 0 {
            self.report.built_keys.push(key);
        }

        let mut children = Vec::new();
        for (slot, slot_elements) in element.child_slots().into_iter().enumerate() {
            let mut nodes = Vec::with_capacity(slot_elements.len());
            for (index, child) in slot_elements.iter().enumerate() {
                let node = self.build(child, depth + 1);
                self.factory.place(&node.handle, Some(&handle), slot, index);
                nodes.push(node);
            }
            children.push(nodes);
        }

        DisplayNode {
            key,
            element: element.clone(),
            handle,
            children,
            reveal: Reveal::Full,
        }
    }

    fn destroy(&mut self, node: DisplayNode<F::Node>) {
        for child in node.children.into_iter().flatten() {
            self.destroy(child);
        }
        self.report.destroyed += 1;
        self.report.destroyed_keys.push(node.key);
        self.factory.destroy(node.handle);
    }
}
