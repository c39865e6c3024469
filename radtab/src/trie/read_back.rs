use crate::trie::node::{NodeIndex, Nodes};

/// Forward, single-pass reader over the bytes an index stands for.
///
/// A node only stores its own slice of the key; the rest lives in its ancestors, possibly in
/// buffers owned by other nodes. Construction climbs parent links to record which way the
/// path turns at each branch, and iteration replays those turns from the root down,
/// splicing the spans together bit by bit.
///
/// If the total length is not a whole number of bytes (only possible for internal branch
/// nodes) the final byte is zero-padded.
pub struct ReadBack<'a> {
    nodes: &'a Nodes,
    current: NodeIndex,
    // Turns from the node up to the root; popping from the back replays them root-first.
    turns: Vec<bool>,
    offset: usize,
    remaining: usize,
}

impl<'a> ReadBack<'a> {
    pub(crate) fn new(nodes: &'a Nodes, index: NodeIndex) -> Self {
        let mut turns = Vec::new();
        let mut remaining = nodes.node(index).bit_len;
        let mut current = index;
        while let Some(parent) = nodes.node(current).parent {
            let parent_node = nodes.node(parent);
            turns.push(parent_node.children[1] == Some(current));
            remaining += parent_node.bit_len;
            current = parent;
        }
        Self {
            nodes,
            current,
            turns,
            offset: 0,
            remaining,
        }
    }

    /// Bits still to be produced.
    pub fn bits_remaining(&self) -> usize {
        self.remaining
    }

    fn descend(&mut self) -> Option<()> {
        let turn = self.turns.pop()?;
        self.current = self.nodes.node(self.current).children[turn as usize]?;
        self.offset = 0;
        Some(())
    }
}

impl Iterator for ReadBack<'_> {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        if self.remaining == 0 {
            return None;
        }
        let mut byte = 0u8;
        let mut filled = 0;
        while filled < 8 && self.remaining > 0 {
            let span = self.nodes.span(self.current);
            if self.offset == span.len() {
                self.descend()?;
                continue;
            }
            if filled == 0 {
                if let Some(whole) = span.aligned_byte(self.offset) {
                    self.offset += 8;
                    self.remaining -= 8;
                    return Some(whole);
                }
            }
            if span.bit(self.offset) {
                byte |= 0x80 >> filled;
            }
            self.offset += 1;
            self.remaining -= 1;
            filled += 1;
        }
        Some(byte)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let bytes = self.remaining.div_ceil(8);
        (bytes, Some(bytes))
    }
}

impl ExactSizeIterator for ReadBack<'_> {}
