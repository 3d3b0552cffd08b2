//! Free-list management.
//!
//! Free nodes are threaded in a doubly-linked list through their children
//! slots, with head, tail and count kept in the header. A node is free iff
//! both sequence links are zero, so nodes never need an explicit tag.

use crate::file::ShiftableFile;
use crate::layout::DUMMY;

impl ShiftableFile {
    /// Takes `num` nodes off the free list and returns the first, with the
    /// extracted run single-chained through `next` so the caller can
    /// initialise it as an in-order sequence.
    ///
    /// Requires `num <= free_count`.
    pub(crate) fn alloc_nodes(&mut self, num: u32) -> u32 {
        if num == 0 {
            return 0;
        }

        debug_assert!(num <= self.header().free_count);
        debug_assert!(self.header().free_list_first > DUMMY);

        let first = self.header().free_list_first;
        let mut cur = first;

        for _ in 0..num - 1 {
            debug_assert!(self.node(cur).is_free());
            debug_assert!(self.node(cur).next_free() > DUMMY);

            let next = self.node(cur).next_free();
            self.node_mut(cur).next = next;
            cur = next;
        }

        debug_assert!(self.node(cur).is_free());

        let remaining = self.node(cur).next_free();
        self.node_mut(cur).next = 0;

        if remaining != 0 {
            debug_assert!(remaining > DUMMY);
            debug_assert!(self.header().free_count > num);

            self.node_mut(remaining).set_prev_free(0);
        } else {
            debug_assert!(self.header().free_count == num);

            self.header_mut().free_list_last = 0;
        }

        let header = self.header_mut();
        header.free_list_first = remaining;
        header.free_count -= num;

        first
    }

    pub(crate) fn alloc_node(&mut self) -> u32 {
        self.alloc_nodes(1)
    }

    /// Head-inserts the contiguous index range `[first, first + num)` into
    /// the free list.
    pub(crate) fn free_nodes_contiguous(&mut self, first: u32, num: u32) {
        if num == 0 {
            return;
        }

        debug_assert!(first > DUMMY);

        let last = first + num - 1;

        self.node_mut(first).mark_free();
        self.node_mut(first).set_prev_free(0);

        for i in first..last {
            self.node_mut(i).set_next_free(i + 1);
            self.node_mut(i + 1).mark_free();
            self.node_mut(i + 1).set_prev_free(i);
        }

        let old_first = self.header().free_list_first;
        self.node_mut(last).set_next_free(old_first);

        if old_first != 0 {
            debug_assert!(self.header().free_count > 0 && self.header().free_list_last != 0);
            debug_assert!(self.node(old_first).prev_free() == 0);

            self.node_mut(old_first).set_prev_free(last);
        } else {
            debug_assert!(self.header().free_count == 0 && self.header().free_list_last == 0);

            self.header_mut().free_list_last = last;
        }

        let header = self.header_mut();
        header.free_list_first = first;
        header.free_count += num;
    }

    /// Head-inserts `num` nodes, starting at `first` and following the
    /// `next` chain, into the free list.
    pub(crate) fn free_nodes_list(&mut self, first: u32, num: u32) {
        if num == 0 {
            return;
        }

        debug_assert!(first > DUMMY);

        let mut prev;
        let last;

        if num == 1 {
            prev = 0;
            last = first;
        } else {
            let mut next = self.node(first).next;
            let node = self.node_mut(first);
            node.mark_free();
            node.set_prev_free(0);
            node.set_next_free(next);

            let mut cur = first;

            for _ in 1..num - 1 {
                prev = cur;
                cur = next;

                debug_assert!(cur > DUMMY);

                next = self.node(cur).next;
                let node = self.node_mut(cur);
                node.mark_free();
                node.set_prev_free(prev);
                node.set_next_free(next);
            }

            prev = cur;
            last = next;
        }

        debug_assert!(last > DUMMY);

        let old_first = self.header().free_list_first;
        let node = self.node_mut(last);
        node.mark_free();
        node.set_prev_free(prev);
        node.set_next_free(old_first);

        if old_first != 0 {
            debug_assert!(self.header().free_count > 0 && self.header().free_list_last != 0);
            debug_assert!(self.node(old_first).prev_free() == 0);

            self.node_mut(old_first).set_prev_free(last);
        } else {
            debug_assert!(self.header().free_count == 0 && self.header().free_list_last == 0);

            self.header_mut().free_list_last = last;
        }

        let header = self.header_mut();
        header.free_list_first = first;
        header.free_count += num;
    }

    pub(crate) fn free_node(&mut self, index: u32) {
        self.free_nodes_contiguous(index, 1);
    }

    /// Unlinks a specific node from the free list. Used by grow and shrink
    /// when the index they need happens to be free already.
    pub(crate) fn unfree_node(&mut self, index: u32) {
        debug_assert!(self.node(index).is_free());
        debug_assert!(
            self.header().free_list_first != 0
                && self.header().free_list_last != 0
                && self.header().free_count != 0
        );

        let prev = self.node(index).prev_free();
        let next = self.node(index).next_free();

        debug_assert!((prev == 0) == (self.header().free_list_first == index));
        debug_assert!((next == 0) == (self.header().free_list_last == index));

        if prev != 0 {
            self.node_mut(prev).set_next_free(next);
            self.node_mut(index).set_prev_free(0);
        } else {
            self.header_mut().free_list_first = next;
        }

        if next != 0 {
            self.node_mut(next).set_prev_free(prev);
            self.node_mut(index).set_next_free(0);
        } else {
            self.header_mut().free_list_last = prev;
        }

        self.header_mut().free_count -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn free_list_len(file: &ShiftableFile) -> u32 {
        let mut count = 0;
        let mut cur = file.header().free_list_first;
        while cur != 0 {
            count += 1;
            cur = file.node(cur).next_free();
        }
        count
    }

    #[test]
    fn test_alloc_and_free_roundtrip() {
        let mut file = ShiftableFile::create_in_memory().unwrap();
        file.write(&[1u8; 32 << 10]);

        let before = file.header().free_count;
        assert!(before >= 3);
        assert_eq!(free_list_len(&file), before);

        let first = file.alloc_nodes(3);
        assert!(first > DUMMY);
        assert_eq!(file.header().free_count, before - 3);
        assert_eq!(free_list_len(&file), before - 3);

        // The run is chained through `next`.
        let second = file.node(first).next;
        let third = file.node(second).next;
        assert!(second > DUMMY && third > DUMMY);
        assert_eq!(file.node(third).next, 0);

        file.free_nodes_list(first, 3);
        assert_eq!(file.header().free_count, before);
        assert_eq!(free_list_len(&file), before);
    }

    #[test]
    fn test_unfree_node_middle_and_ends() {
        let mut file = ShiftableFile::create_in_memory().unwrap();
        file.write(&[1u8; 32 << 10]);

        let before = file.header().free_count;
        assert!(before >= 3);

        let head = file.header().free_list_first;
        let middle = file.node(head).next_free();
        let tail = file.header().free_list_last;

        file.unfree_node(middle);
        assert_eq!(file.header().free_count, before - 1);

        file.unfree_node(head);
        file.unfree_node(tail);
        assert_eq!(file.header().free_count, before - 3);
        assert_eq!(free_list_len(&file), before - 3);

        // Hand them back so the container closes with consistent counts.
        for index in [middle, head, tail] {
            file.free_node(index);
        }
        assert_eq!(file.header().free_count, before);
        assert_eq!(free_list_len(&file), before);
    }
}
