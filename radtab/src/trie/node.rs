use std::fmt::{Display, Formatter};

use tracing::debug;

use crate::error::{try_copy, try_reserve, Error, Result};
use crate::utils::bits::{bit_at, Span};

/// Stable identifier for an interned byte string.
///
/// Indices are never reused: nodes are only ever added, and a split keeps the original node's
/// index for the part of its span that moves below the new node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeIndex(u32);

impl NodeIndex {
    pub const MAX: usize = u32::MAX as usize;

    #[inline]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub(crate) fn from_usize(index: usize) -> Self {
        debug_assert!(index <= Self::MAX);
        Self(index as u32)
    }
}

impl Display for NodeIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub(crate) struct Node {
    pub(crate) buffer: usize,
    // Exactly one node owns each buffer; everything else pointing at it is a view.
    pub(crate) owns_buffer: bool,
    pub(crate) start_bit: usize,
    pub(crate) bit_len: usize,
    pub(crate) children: [Option<NodeIndex>; 2],
    pub(crate) parent: Option<NodeIndex>,
}

/// Where a walk stopped and what needs to change to finish the insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Plan {
    /// Nothing is stored yet.
    Root,
    /// `parent`'s span is fully matched and it has no child on `branch`.
    Append { parent: NodeIndex, branch: bool, from_bit: usize },
    /// The input ends `at` bits into `node`'s span.
    SplitPrefix { node: NodeIndex, at: usize },
    /// The input disagrees with `node`'s span `at` bits in; the remainder starts at input bit
    /// `from_bit`.
    SplitDiverge { node: NodeIndex, at: usize, from_bit: usize },
}

/// Node and buffer storage for a [`RadixTrie`](crate::RadixTrie). Only ever touched under its lock.
#[derive(Default)]
pub(crate) struct Nodes {
    pub(crate) nodes: Vec<Node>,
    pub(crate) buffers: Vec<Box<[u8]>>,
    pub(crate) root: Option<NodeIndex>,
}

impl Nodes {
    #[inline]
    pub(crate) fn node(&self, index: NodeIndex) -> &Node {
        &self.nodes[index.as_usize()]
    }

    #[inline]
    fn node_mut(&mut self, index: NodeIndex) -> &mut Node {
        &mut self.nodes[index.as_usize()]
    }

    pub(crate) fn get(&self, index: NodeIndex) -> Option<&Node> {
        self.nodes.get(index.as_usize())
    }

    #[inline]
    pub(crate) fn span(&self, index: NodeIndex) -> Span<'_> {
        let node = self.node(index);
        Span::new(&self.buffers[node.buffer], node.start_bit, node.bit_len)
    }

    /// Walk from the root matching `input`, stopping at the node that represents it or at the
    /// point where the structure has to change.
    pub(crate) fn walk(&self, input: &[u8]) -> std::result::Result<NodeIndex, Plan> {
        let Some(mut current) = self.root else {
            return Err(Plan::Root);
        };
        let total = input.len() * 8;
        let mut consumed = 0;
        loop {
            let span = self.span(current);
            let remaining = total - consumed;
            let common = span.common_prefix(&Span::new(input, consumed, remaining));
            if common < span.len().min(remaining) {
                return Err(Plan::SplitDiverge {
                    node: current,
                    at: common,
                    from_bit: consumed + common,
                });
            }
            if remaining == span.len() {
                return Ok(current);
            }
            if remaining < span.len() {
                return Err(Plan::SplitPrefix {
                    node: current,
                    at: remaining,
                });
            }
            consumed += span.len();
            let branch = bit_at(input, consumed);
            match self.node(current).children[branch as usize] {
                Some(child) => current = child,
                None => {
                    return Err(Plan::Append {
                        parent: current,
                        branch,
                        from_bit: consumed,
                    })
                }
            }
        }
    }

    /// Carry out `plan` for `input`. Only valid against the exact state `plan` was computed on.
    pub(crate) fn apply(&mut self, plan: Plan, input: &[u8]) -> Result<NodeIndex> {
        // Reserve everything first so a failed allocation leaves the structure untouched.
        let (new_nodes, copies) = match plan {
            Plan::Root | Plan::Append { .. } => (1, true),
            Plan::SplitPrefix { .. } => (1, false),
            Plan::SplitDiverge { .. } => (2, true),
        };
        if self.nodes.len() + new_nodes > NodeIndex::MAX {
            return Err(Error::CapacityExceeded {
                capacity: NodeIndex::MAX,
            });
        }
        try_reserve(&mut self.nodes, new_nodes)?;
        if copies {
            try_reserve(&mut self.buffers, 1)?;
        }

        match plan {
            Plan::Root => {
                let index = self.push_owner(input, 0, None)?;
                self.root = Some(index);
                debug!(%index, len = input.len(), "interned first string");
                Ok(index)
            }
            Plan::Append {
                parent,
                branch,
                from_bit,
            } => {
                let index = self.push_owner(input, from_bit, Some(parent))?;
                self.node_mut(parent).children[branch as usize] = Some(index);
                Ok(index)
            }
            Plan::SplitPrefix { node, at } => {
                let prefix = self.split_off_prefix(node, at);
                debug!(%node, %prefix, at, "input is a prefix; split span");
                Ok(prefix)
            }
            Plan::SplitDiverge { node, at, from_bit } => {
                let leaf = self.push_owner(input, from_bit, None)?;
                let pivot = self.split_off_prefix(node, at);
                let branch = bit_at(input, from_bit);
                self.node_mut(pivot).children[branch as usize] = Some(leaf);
                self.node_mut(leaf).parent = Some(pivot);
                debug!(%node, %pivot, %leaf, at, "spans diverged; split on common prefix");
                Ok(leaf)
            }
        }
    }

    /// New node owning a copy of `input` from bit `from_bit` to the end.
    fn push_owner(
        &mut self,
        input: &[u8],
        from_bit: usize,
        parent: Option<NodeIndex>,
    ) -> Result<NodeIndex> {
        let buffer = try_copy(&input[from_bit >> 3..])?;
        let index = NodeIndex::from_usize(self.nodes.len());
        self.nodes.push(Node {
            buffer: self.buffers.len(),
            owns_buffer: true,
            start_bit: from_bit & 7,
            bit_len: input.len() * 8 - from_bit,
            children: [None, None],
            parent,
        });
        self.buffers.push(buffer);
        Ok(index)
    }

    /// Cut the first `at` bits of `node`'s span into a new view node that takes `node`'s place
    /// in the tree, with `node` as its only child. No bytes move.
    fn split_off_prefix(&mut self, node: NodeIndex, at: usize) -> NodeIndex {
        let prefix = NodeIndex::from_usize(self.nodes.len());
        let (buffer, start_bit, parent) = {
            let n = self.node(node);
            debug_assert!(at < n.bit_len);
            (n.buffer, n.start_bit, n.parent)
        };
        let branch = bit_at(&self.buffers[buffer], start_bit + at);
        let mut children = [None, None];
        children[branch as usize] = Some(node);
        self.nodes.push(Node {
            buffer,
            owns_buffer: false,
            start_bit,
            bit_len: at,
            children,
            parent,
        });

        let n = self.node_mut(node);
        n.start_bit += at;
        n.bit_len -= at;
        n.parent = Some(prefix);

        match parent {
            None => self.root = Some(prefix),
            Some(parent) => {
                let slot = self
                    .node_mut(parent)
                    .children
                    .iter_mut()
                    .find(|child| **child == Some(node));
                debug_assert!(slot.is_some(), "parent does not link back to child");
                if let Some(slot) = slot {
                    *slot = Some(prefix);
                }
            }
        }
        prefix
    }

    /// Number of nodes between the root and `index`, inclusive of both.
    pub(crate) fn depth(&self, index: NodeIndex) -> usize {
        let mut depth = 1;
        let mut current = index;
        while let Some(parent) = self.node(current).parent {
            depth += 1;
            current = parent;
        }
        depth
    }
}
