//! Self-checking of the persistent invariants.
//!
//! Compiled into tests and debug builds, where every mutating operation
//! verifies the whole structure on entry and exit. Release builds compile
//! the checks out entirely; they make the container very slow.

#[cfg(any(test, debug_assertions))]
mod enabled {
    use crate::file::ShiftableFile;
    use crate::layout::{data_blocks, BLOCK_SIZE, DUMMY, LOG2_BLOCK_SIZE, MAX_BLOCKS};

    impl ShiftableFile {
        /// Asserts every structural invariant: header geometry, the
        /// free/occupied partition, AVL balance and height consistency,
        /// subtree byte sums, agreement between tree order and the
        /// sequence links, and (optionally) the cached cursor.
        pub(crate) fn check_integrity(&self, check_pos: bool) {
            if !self.is_open() || self.region.is_none() {
                return;
            }

            let header = self.header();

            assert!(header.has_magic(), "signature lost");
            assert!(header.is_compatible(), "format fields changed");

            let map_size = header.map_size;
            let meta_data_size = header.meta_data_size;

            assert_eq!(map_size % BLOCK_SIZE, 0, "unaligned map size");
            assert_eq!(meta_data_size % BLOCK_SIZE, 0, "unaligned metadata size");
            assert!(map_size > meta_data_size, "inverted layout");

            let total_blocks = data_blocks(map_size, meta_data_size);
            assert!(total_blocks > 0 && total_blocks <= MAX_BLOCKS, "bad block count");

            let first_node = meta_data_size >> LOG2_BLOCK_SIZE;
            assert!(first_node > DUMMY);

            // Partition: every usable node is either free or occupied with
            // a sane byte count.
            let mut free_count = 0;
            for i in first_node..first_node + total_blocks {
                let node = self.node(i);
                if node.is_free() {
                    free_count += 1;
                } else {
                    assert!(node.bytes >= 1, "occupied block with no bytes");
                    assert!(node.bytes <= BLOCK_SIZE, "occupied block overflows");
                }
            }
            assert_eq!(free_count, header.free_count, "free count drifted");

            // The free list visits exactly the free nodes.
            let mut walked = 0;
            let mut prev = 0;
            let mut cur = header.free_list_first;
            while cur != 0 {
                assert!(self.node(cur).is_free(), "occupied node on the free list");
                assert_eq!(self.node(cur).prev_free(), prev, "broken free list");
                prev = cur;
                cur = self.node(cur).next_free();
                walked += 1;
                assert!(walked <= free_count, "free list cycles");
            }
            assert_eq!(walked, free_count, "free list too short");
            assert_eq!(header.free_list_last, prev, "free list tail drifted");

            // Tree shape, counters, and in-order sequence.
            fn walk(
                file: &ShiftableFile,
                n: u32,
                parent: u32,
                order: &mut Vec<u32>,
            ) -> (u32, u32) {
                if n == 0 {
                    return (0, 0);
                }

                let node = file.node(n);
                assert_eq!(node.parent, parent, "parent link drifted");
                assert!(!node.is_free(), "free node reachable from the root");

                let (left_height, left_bytes) = walk(file, node.left(), n, order);
                order.push(n);
                let (right_height, right_bytes) = walk(file, node.right(), n, order);

                assert!(left_height.abs_diff(right_height) <= 1, "AVL rule broken");
                assert_eq!(node.height, left_height.max(right_height) + 1, "stale height");
                assert_eq!(
                    node.bytes_subtree,
                    left_bytes + right_bytes + node.bytes,
                    "stale subtree sum"
                );

                (node.height, node.bytes_subtree)
            }

            let mut order = Vec::new();
            let root = self.dummy().left();
            let (_, total_bytes) = walk(self, root, DUMMY, &mut order);

            assert_eq!(self.dummy().right(), 0, "sentinel grew a right child");
            assert_eq!(self.dummy().bytes_subtree, total_bytes, "sentinel sum drifted");
            assert_eq!(
                order.len() as u32,
                total_blocks - free_count,
                "tree size disagrees with the partition"
            );

            let mut cur = self.dummy().next;
            for &n in &order {
                assert_eq!(cur, n, "sequence order disagrees with in-order");
                assert_eq!(self.next(self.prev(cur)), n, "broken sequence link");
                cur = self.next(cur);
            }
            assert_eq!(cur, DUMMY, "sequence does not close at the sentinel");

            if check_pos && self.cur_node != DUMMY {
                assert!(
                    self.rel_pos <= self.node(self.cur_node).bytes,
                    "cursor past its block"
                );

                let (found, rel) = self.find_pos(self.abs_pos);
                let exact = found == self.cur_node && rel == self.rel_pos;
                // End of block X and start of next(X) are the same
                // logical position.
                let boundary = self.rel_pos == self.node(self.cur_node).bytes
                    && found == self.next(self.cur_node)
                    && rel == 0;

                assert!(exact || boundary, "cursor cache diverged from the tree");
            }
        }
    }
}

#[cfg(not(any(test, debug_assertions)))]
mod disabled {
    use crate::file::ShiftableFile;

    impl ShiftableFile {
        #[inline(always)]
        pub(crate) fn check_integrity(&self, _check_pos: bool) {}
    }
}
