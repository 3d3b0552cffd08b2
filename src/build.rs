//! Bulk tree construction.

use crate::file::ShiftableFile;
use crate::layout::{data_blocks, DUMMY};

impl ShiftableFile {
    /// Decides whether a bulk edit of `diff_nodes` nodes should rebuild
    /// the whole tree (O(N)) instead of editing node by node
    /// (O(n log N)).
    ///
    /// Rebuild wins when `final_size / n > log2(average_size)`; the
    /// comparison is done with a shift to stay in integer arithmetic.
    pub(crate) fn worth_rebuild(&self, diff_nodes: u32, erase: bool) -> bool {
        let n = diff_nodes;
        let header = self.header();
        let total = data_blocks(header.map_size, header.meta_data_size) - header.free_count;

        if n <= 1 {
            return false;
        }

        let (average_size, final_size) = if erase {
            debug_assert!(total >= n);
            (total - n / 2, total - n)
        } else {
            (total + n / 2, total + n)
        };

        let ratio = (final_size + n / 2) / n;

        if ratio >= u32::BITS {
            false // the shift below would overflow; incremental wins anyway
        } else {
            average_size > 1 << ratio
        }
    }

    /// Builds a perfectly balanced tree out of `num` initialised nodes
    /// taken from the `next`-linked list starting at `first`, linking them
    /// under the sentinel. O(num) time, O(log num) space.
    ///
    /// The in-order traversal of the tree under construction is simulated
    /// with two fixed-depth stacks: per level, how many nodes the open
    /// subtree still needs, and the completed subtree awaiting its parent.
    /// The walk descends left halving the count, consumes a list node at
    /// the leaf, then either descends right with the remainder or ascends
    /// linking completed subtrees as right children.
    pub(crate) fn build_tree(&mut self, first: u32, num: u32) {
        const MAX_DEPTH: usize = u32::BITS as usize;

        self.node_mut(DUMMY).init(0);
        self.node_mut(DUMMY).next = DUMMY;
        self.node_mut(DUMMY).prev = DUMMY;

        if num == 0 {
            return;
        }

        let mut counts = [0u32; MAX_DEPTH];
        let mut nodes = [0u32; MAX_DEPTH];

        counts[0] = num;
        let mut depth = 0;

        let mut last = DUMMY;
        let mut next = first;

        loop {
            while counts[depth] > 1 && nodes[depth + 1] == 0 {
                // First visit: go down-left, halving the remaining count.
                depth += 1;
                counts[depth] = counts[depth - 1] >> 1;
                counts[depth - 1] -= counts[depth];
            }

            debug_assert!(next > DUMMY);

            let cur = next;
            next = self.node(cur).next;

            let bytes = self.node(cur).bytes;
            self.node_mut(cur).init(bytes);

            // Append to the circular sequence.
            let after = self.node(last).next;
            self.node_mut(cur).prev = last;
            self.node_mut(cur).next = after;
            self.node_mut(last).next = cur;
            self.node_mut(after).prev = cur;
            last = cur;

            nodes[depth] = cur;
            counts[depth] -= 1;

            if nodes[depth + 1] != 0 {
                // A completed subtree was waiting for this node: it is the
                // left child.
                let left = nodes[depth + 1];
                let left_height = self.node(left).height;
                let left_bytes = self.node(left).bytes_subtree;

                self.node_mut(left).parent = cur;
                self.node_mut(cur).set_left(left);
                self.node_mut(cur).height += left_height;
                self.node_mut(cur).bytes_subtree += left_bytes;

                nodes[depth + 1] = 0;
            }

            if counts[depth] > 0 {
                // The rest of this subtree goes to the right.
                depth += 1;
                counts[depth] = counts[depth - 1];
                counts[depth - 1] = 0;
            } else {
                while counts[depth] == 0 {
                    let done = nodes[depth];

                    if depth == 0 {
                        let height = self.node(done).height;
                        let bytes_subtree = self.node(done).bytes_subtree;

                        self.node_mut(done).parent = DUMMY;
                        self.node_mut(DUMMY).set_left(done);
                        self.node_mut(DUMMY).height = height + 1;
                        self.node_mut(DUMMY).bytes_subtree = bytes_subtree;

                        return;
                    }

                    depth -= 1;

                    if nodes[depth] != 0 {
                        // The subtree just completed hangs as the right
                        // child; the left subtree is always at least as
                        // tall, so the parent's height is already right.
                        nodes[depth + 1] = 0;

                        let parent = nodes[depth];
                        let bytes_subtree = self.node(done).bytes_subtree;

                        self.node_mut(done).parent = parent;
                        self.node_mut(parent).bytes_subtree += bytes_subtree;
                        self.node_mut(parent).set_right(done);
                    }
                }
            }
        }
    }
}
