//! Shifting edits: insert and remove of arbitrary byte ranges.

use crate::file::{block_offset, ShiftableFile};
use crate::header::CurrentOp;
use crate::layout::{
    data_blocks, round_to_block, BLOCK_SIZE, COMPACTION_STEPS, DUMMY, LOG2_BLOCK_SIZE, MAX_SIZE,
};
use crate::node::Side;

impl ShiftableFile {
    /// Inserts `buf` at the cursor, shifting everything that follows.
    ///
    /// Three strategies, in escalating order of cost: absorb the bytes in
    /// the current block (moving to the emptier neighbour when sitting on
    /// a boundary), redistribute neighbour contents with
    /// [`Self::make_room`], and finally link in freshly allocated blocks,
    /// growing the backing store if the free list cannot cover them.
    /// Returns the bytes inserted; 0 on overflow.
    pub fn insert(&mut self, buf: &[u8]) -> u32 {
        if !self.is_open() {
            return 0;
        }

        let bytes = u32::try_from(buf.len()).unwrap_or(u32::MAX);
        let total = self.dummy().bytes_subtree;
        let (end, overflowed) = total.overflowing_add(bytes);

        if overflowed || end > MAX_SIZE {
            return 0;
        }

        if self.abs_pos >= total {
            // Inserting at the end is plain writing.
            return self.write(buf);
        }

        self.check_integrity(true);
        debug_assert!(self.cur_node > DUMMY);

        if bytes < BLOCK_SIZE {
            let cur_bytes = self.node(self.cur_node).bytes;
            let next = self.next(self.cur_node);
            let prev = self.prev(self.cur_node);

            // On a block boundary, prefer whichever side has more room.
            if self.rel_pos == cur_bytes && next != DUMMY && self.node(next).bytes < cur_bytes {
                self.cur_node = next;
                self.rel_pos = 0;
            } else if self.rel_pos == 0 && prev != DUMMY && self.node(prev).bytes < cur_bytes {
                self.cur_node = prev;
                self.rel_pos = self.node(prev).bytes;
            }

            let cur_bytes = self.node(self.cur_node).bytes;

            if bytes <= BLOCK_SIZE - cur_bytes {
                let offset = block_offset(self.cur_node);

                if self.rel_pos != cur_bytes {
                    self.region_copy(
                        offset + self.rel_pos as usize,
                        offset + (self.rel_pos + bytes) as usize,
                        (cur_bytes - self.rel_pos) as usize,
                    );
                }

                let at = self.rel_pos as usize;
                self.block_mut(self.cur_node)[at..at + bytes as usize]
                    .copy_from_slice(&buf[..bytes as usize]);

                self.node_mut(self.cur_node).bytes += bytes;
                let cur = self.cur_node;
                self.update_counters(cur);

                self.rel_pos += bytes;
                self.abs_pos += bytes;

                self.check_integrity(true);
                return bytes;
            }
        }

        // Second strategy: shuffle neighbour contents aside and fill the
        // freed space, block by block.
        let (mut cur_node, mut rel_pos) = (self.cur_node, self.rel_pos);
        let mut room = self.make_room(&mut cur_node, &mut rel_pos);
        self.cur_node = cur_node;
        self.rel_pos = rel_pos;

        let mut taken = 0usize;
        let mut pending = bytes;

        if room > 0 {
            loop {
                debug_assert!(self.cur_node > DUMMY);
                debug_assert!(self.node(self.cur_node).bytes < BLOCK_SIZE);

                let cur_bytes = self.node(self.cur_node).bytes;
                let size = (BLOCK_SIZE - cur_bytes).min(pending);
                let offset = block_offset(self.cur_node);

                if self.rel_pos != cur_bytes {
                    self.region_copy(
                        offset + self.rel_pos as usize,
                        offset + (self.rel_pos + size) as usize,
                        (cur_bytes - self.rel_pos) as usize,
                    );
                }

                let at = self.rel_pos as usize;
                self.block_mut(self.cur_node)[at..at + size as usize]
                    .copy_from_slice(&buf[taken..taken + size as usize]);

                self.node_mut(self.cur_node).bytes += size;
                let cur = self.cur_node;
                self.update_counters(cur);

                self.rel_pos += size;
                self.abs_pos += size;
                taken += size as usize;
                room -= size;
                pending -= size;

                if pending == 0 || room == 0 || self.rel_pos != self.node(self.cur_node).bytes
                {
                    break;
                }

                self.cur_node = self.next(self.cur_node);
                self.rel_pos = 0;
            }

            if room >= BLOCK_SIZE {
                // make_room freed more than was needed; reap the blocks
                // that ended up empty.
                let mut next = self.next(self.cur_node);

                while next > DUMMY && self.node(next).bytes == 0 {
                    let empty = next;
                    next = self.next(empty);

                    let branch = self.extract_node(empty);
                    self.update_counters_and_rebalance(branch);
                    self.free_node(empty);
                }
            }
        }

        self.check_integrity(true);

        if pending == 0 {
            return bytes;
        }

        // Third strategy: new blocks.
        debug_assert!(self.node(self.cur_node).bytes == BLOCK_SIZE);
        tracing::trace!(pending, "inserting through new blocks");

        let num_new_blocks = round_to_block(pending) >> LOG2_BLOCK_SIZE;

        let header = self.header();
        let mut used_blocks =
            data_blocks(header.map_size, header.meta_data_size) - header.free_count;

        if num_new_blocks > self.header().free_count {
            let (start, requested, done) = (self.abs_pos, bytes, bytes - pending);
            self.header_mut()
                .set_current_op(CurrentOp::InsertGrow, start, requested, done);

            if self.grow(used_blocks + num_new_blocks).is_err() {
                return bytes - pending;
            }

            self.header_mut().set_current_op(CurrentOp::None, 0, 0, 0);
            self.refresh_cursor();

            let header = self.header();
            used_blocks =
                data_blocks(header.map_size, header.meta_data_size) - header.free_count;
        }

        debug_assert!(num_new_blocks <= self.header().free_count);

        let first = self.alloc_nodes(num_new_blocks);
        let mut prev = self.cur_node;
        let mut cur = first;
        let mut full = 0;

        while full < num_new_blocks - 1 {
            self.node_mut(cur).bytes = BLOCK_SIZE;
            prev = cur;
            cur = self.next(cur);
            full += 1;
        }

        let last = cur;
        self.node_mut(last).prev = prev;
        self.node_mut(last).bytes = pending - (full << LOG2_BLOCK_SIZE);

        // The insertion position splits the current block: its tail moves
        // to the end of the new run (spilling into the previous block when
        // the last one is too small for it).
        if self.rel_pos != BLOCK_SIZE {
            let tail = self.node(self.cur_node).bytes - self.rel_pos;
            let last_bytes = self.node(last).bytes;

            if last_bytes >= tail {
                self.region_copy(
                    block_offset(self.cur_node) + self.rel_pos as usize,
                    block_offset(last) + (last_bytes - tail) as usize,
                    tail as usize,
                );
            } else {
                self.region_copy(
                    block_offset(self.cur_node) + (BLOCK_SIZE - last_bytes) as usize,
                    block_offset(last),
                    last_bytes as usize,
                );

                let spill = tail - last_bytes;
                let before_last = self.prev(last);
                self.region_copy(
                    block_offset(self.cur_node) + self.rel_pos as usize,
                    block_offset(before_last) + (BLOCK_SIZE - spill) as usize,
                    spill as usize,
                );
            }
        }

        if self.worth_rebuild(num_new_blocks, false) {
            let after = self.next(self.cur_node);
            self.node_mut(last).next = after;
            self.node_mut(self.cur_node).next = first;

            let head = self.dummy().next;
            self.build_tree(head, used_blocks + num_new_blocks);
        } else {
            self.node_mut(last).next = 0;

            let mut prev = self.cur_node;
            let mut pending_nodes = first;

            while pending_nodes != 0 {
                let cur = pending_nodes;
                pending_nodes = self.next(cur);

                let size = self.node(cur).bytes;
                self.node_mut(cur).init(size);

                // If the predecessor has a right subtree, the new node
                // becomes the left child of its in-order successor (the
                // leftmost node there); otherwise it hangs right off the
                // predecessor itself.
                let (parent, side) = if self.node(prev).right() != 0 {
                    (self.next(prev), Side::Left)
                } else {
                    (prev, Side::Right)
                };

                let after = self.next(prev);
                self.node_mut(cur).next = after;
                self.node_mut(after).prev = cur;
                self.node_mut(cur).prev = prev;
                self.node_mut(prev).next = cur;

                self.node_mut(parent).set_child(side, cur);
                self.node_mut(cur).parent = parent;

                self.update_counters_and_rebalance(cur);

                prev = cur;
            }
        }

        let written = self.write(&buf[taken..taken + pending as usize]);
        debug_assert!(written == pending);

        self.check_integrity(true);
        bytes
    }

    /// Removes `bytes` bytes at the cursor (clamped to the payload end),
    /// collapsing the gap. Merges underfull neighbours afterwards and
    /// gives surplus space back to the store when worthwhile. Returns the
    /// bytes removed.
    pub fn remove(&mut self, bytes: u32) -> u32 {
        if !self.is_open() || bytes == 0 || self.cur_node == DUMMY {
            return 0;
        }

        self.check_integrity(true);

        let total = self.dummy().bytes_subtree;
        let bytes = bytes.min(total - self.abs_pos);

        if bytes == 0 {
            return 0;
        }

        // On a boundary, canonicalise to the start of the next block.
        if self.rel_pos == self.node(self.cur_node).bytes {
            self.cur_node = self.next(self.cur_node);
            self.rel_pos = 0;
        }

        let in_block = self.node(self.cur_node).bytes - self.rel_pos;

        if bytes <= in_block {
            let offset = block_offset(self.cur_node);

            if bytes < in_block {
                self.region_copy(
                    offset + (self.rel_pos + bytes) as usize,
                    offset + self.rel_pos as usize,
                    (in_block - bytes) as usize,
                );
            }

            self.node_mut(self.cur_node).bytes -= bytes;

            if self.node(self.cur_node).bytes != 0 {
                let cur = self.cur_node;
                self.update_counters(cur);
            } else {
                let empty = self.cur_node;
                self.cur_node = self.next(empty);
                self.rel_pos = 0;

                let branch = self.extract_node(empty);
                self.update_counters_and_rebalance(branch);
                self.free_node(empty);
            }
        } else {
            // The range spans several blocks: trim the first, unlink the
            // fully covered ones, trim the head of the last.
            self.node_mut(self.cur_node).bytes -= in_block;
            let cur = self.cur_node;
            self.update_counters(cur);

            let mut pending = bytes - in_block;

            // This time prefer the end of the previous block on a
            // boundary, so the cursor survives the deletions below.
            if self.rel_pos == 0 {
                self.cur_node = self.prev(self.cur_node);
                self.rel_pos = self.node(self.cur_node).bytes;
            }

            let header = self.header();
            let num_nodes = data_blocks(header.map_size, header.meta_data_size)
                - header.free_count;

            let before = self.cur_node;
            let mut cur = self.next(before);
            let mut num_del_nodes = 0;

            while pending > 0 && pending >= self.node(cur).bytes {
                num_del_nodes += 1;
                pending -= self.node(cur).bytes;
                cur = self.next(cur);
            }

            let after = cur;

            if pending > 0 {
                let offset = block_offset(cur);
                let cur_bytes = self.node(cur).bytes;

                self.region_copy(
                    offset + pending as usize,
                    offset,
                    (cur_bytes - pending) as usize,
                );
                self.node_mut(cur).bytes -= pending;
                self.update_counters(cur);
            }

            if self.worth_rebuild(num_del_nodes, true) {
                let first_del = self.next(before);
                self.free_nodes_list(first_del, num_del_nodes);

                self.node_mut(before).next = after;

                let head = self.dummy().next;
                self.build_tree(head, num_nodes - num_del_nodes);
            } else {
                let mut cur = self.next(before);

                while cur != after {
                    let next = self.next(cur);

                    let branch = self.extract_node(cur);
                    self.update_counters_and_rebalance(branch);
                    self.free_node(cur);

                    cur = next;
                }
            }

            self.refresh_cursor();
        }

        // The bytes are gone and the tree is consistent, but repeated
        // removals could dilute the blocks down to one used byte each.
        // Merge neighbours while pairs of them fit in a single block.
        self.check_integrity(true);

        let (mut cur_node, mut rel_pos) = (self.cur_node, self.rel_pos);
        let room = self.make_room(&mut cur_node, &mut rel_pos);
        self.cur_node = cur_node;
        self.rel_pos = rel_pos;

        if room >= BLOCK_SIZE {
            debug_assert!(self.cur_node != DUMMY);

            // Walk back to the run boundary, even across full blocks.
            while self.rel_pos == 0 && self.prev(self.cur_node) != DUMMY {
                self.cur_node = self.prev(self.cur_node);
                self.rel_pos = self.node(self.cur_node).bytes;
            }

            loop {
                let next = self.next(self.cur_node);

                if next == DUMMY
                    || self.node(self.cur_node).bytes + self.node(next).bytes > BLOCK_SIZE
                {
                    break;
                }

                let next_bytes = self.node(next).bytes;

                if next_bytes > 0 {
                    self.region_copy(
                        block_offset(next),
                        block_offset(self.cur_node) + self.node(self.cur_node).bytes as usize,
                        next_bytes as usize,
                    );
                    self.node_mut(self.cur_node).bytes += next_bytes;
                }

                let branch = self.extract_node(next);
                self.update_counters_and_rebalance(branch);
                self.free_node(next);
            }

            let cur = self.cur_node;
            self.update_counters(cur);
        }

        self.header_mut()
            .set_current_op(CurrentOp::NormalShrink, 0, 0, 0);

        if self.shrink(0).is_err() || !self.is_open() {
            return bytes;
        }

        self.header_mut().set_current_op(CurrentOp::None, 0, 0, 0);

        self.check_integrity(true);
        bytes
    }

    /// Opens as much contiguous free space as possible around the cursor
    /// by packing the contents of up to [`COMPACTION_STEPS`] sequence
    /// neighbours on each side outwards. The cursor is passed by reference
    /// and follows any bytes that move from under it; afterwards it is
    /// re-canonicalised onto a block with room where possible.
    ///
    /// Tree structure and byte order never change, only the distribution
    /// of bytes over the visited blocks. Returns the room now available in
    /// the cursor block and its visited neighbours.
    pub(crate) fn make_room(&mut self, cur_node: &mut u32, rel_pos: &mut u32) -> u32 {
        debug_assert!(*cur_node != 0);

        if *cur_node == DUMMY {
            debug_assert!(*rel_pos == 0);

            *cur_node = self.prev(*cur_node);
            *rel_pos = self.node(*cur_node).bytes;

            if *cur_node == DUMMY {
                debug_assert!(self.dummy().bytes_subtree == 0);
                return 0;
            }
        }

        let mut changed = false;
        let mut first = *cur_node;
        let mut last = *cur_node;

        let room_cur = BLOCK_SIZE - self.node(*cur_node).bytes;
        let mut room_prev = 0;
        let mut room_next = 0;

        debug_assert!(*rel_pos <= BLOCK_SIZE);

        let mut movable = *rel_pos;

        // Walk left counting movable bytes and room.
        {
            let mut steps = 0;
            let mut n = self.prev(*cur_node);

            while steps < COMPACTION_STEPS && n != DUMMY {
                first = n;
                movable += self.node(n).bytes;
                room_prev += BLOCK_SIZE - self.node(n).bytes;
                n = self.prev(n);
                steps += 1;
            }
        }

        if room_prev > 0 {
            // Walk back right, packing bytes towards the beginning.
            let mut n = first;
            movable -= self.node(n).bytes;

            while n != *cur_node && movable > 0 {
                if self.node(n).bytes < BLOCK_SIZE {
                    let mut m = self.next(n);

                    while m != *cur_node && self.node(m).bytes == 0 {
                        m = self.next(m);
                    }

                    debug_assert!(self.node(m).bytes > 0);

                    let count = movable
                        .min(self.node(m).bytes)
                        .min(BLOCK_SIZE - self.node(n).bytes);

                    self.region_copy(
                        block_offset(m),
                        block_offset(n) + self.node(n).bytes as usize,
                        count as usize,
                    );
                    self.node_mut(n).bytes += count;

                    if self.node(m).bytes > count {
                        self.region_copy(
                            block_offset(m) + count as usize,
                            block_offset(m),
                            (self.node(m).bytes - count) as usize,
                        );
                    }

                    if m == *cur_node {
                        *rel_pos -= count;
                    }

                    self.node_mut(m).bytes -= count;
                    movable -= count;
                    changed = true;
                } else {
                    n = self.next(n);
                    movable -= self.node(n).bytes;
                }
            }
        }

        movable = self.node(*cur_node).bytes - *rel_pos;

        // Walk right counting movable bytes and room.
        {
            let mut steps = 0;
            let mut n = self.next(*cur_node);

            while steps < COMPACTION_STEPS && n != DUMMY {
                last = n;
                movable += self.node(n).bytes;
                room_next += BLOCK_SIZE - self.node(n).bytes;
                n = self.next(n);
                steps += 1;
            }
        }

        if room_next > 0 {
            // Walk back left, packing bytes towards the end. Destination
            // contents first shift to the block tail, then fill the gap
            // backwards.
            let mut n = last;
            movable -= self.node(n).bytes;
            let mut offset: u32 = 0;

            while n != *cur_node && movable > 0 {
                if self.node(n).bytes < BLOCK_SIZE {
                    let mut m = self.prev(n);

                    while m != *cur_node && self.node(m).bytes == 0 {
                        m = self.prev(m);
                    }

                    debug_assert!(self.node(m).bytes > 0);

                    if offset == 0 {
                        offset = movable.min(BLOCK_SIZE - self.node(n).bytes);

                        debug_assert!(offset > 0);

                        if self.node(n).bytes > 0 {
                            self.region_copy(
                                block_offset(n),
                                block_offset(n) + offset as usize,
                                self.node(n).bytes as usize,
                            );
                        }
                    }

                    let count = offset.min(self.node(m).bytes);

                    debug_assert!(count <= movable && count > 0);

                    self.region_copy(
                        block_offset(m) + (self.node(m).bytes - count) as usize,
                        block_offset(n) + (offset - count) as usize,
                        count as usize,
                    );

                    self.node_mut(n).bytes += count;
                    self.node_mut(m).bytes -= count;
                    movable -= count;
                    offset -= count;
                    changed = true;
                } else {
                    debug_assert!(offset == 0);

                    n = self.prev(n);
                    movable -= self.node(n).bytes;
                }
            }
        }

        if changed {
            loop {
                self.update_counters(first);
                if first == last {
                    break;
                }
                first = self.next(first);
            }
        }

        // Re-canonicalise the cursor onto a block with room.
        if *rel_pos == BLOCK_SIZE && self.next(*cur_node) != DUMMY {
            *cur_node = self.next(*cur_node);
            *rel_pos = 0;
        } else {
            while *rel_pos == 0
                && self.prev(*cur_node) != DUMMY
                && self.node(self.prev(*cur_node)).bytes < BLOCK_SIZE
            {
                *cur_node = self.prev(*cur_node);
                *rel_pos = self.node(*cur_node).bytes;
            }
        }

        room_cur + room_prev + room_next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_in_block() {
        let mut file = ShiftableFile::create_in_memory().unwrap();
        file.write(b"hello world");

        file.seek_set(5);
        assert_eq!(file.insert(b","), 1);
        assert_eq!(file.size(), 12);

        file.seek_set(0);
        let mut all = vec![0u8; 12];
        file.read(&mut all);
        assert_eq!(&all, b"hello, world");
    }

    #[test]
    fn test_insert_larger_than_block() {
        let mut file = ShiftableFile::create_in_memory().unwrap();
        file.write(&[b'a'; 4000]);

        let wedge = vec![b'b'; 5000];
        file.seek_set(2000);
        assert_eq!(file.insert(&wedge), 5000);
        assert_eq!(file.size(), 9000);
        file.check_integrity(true);

        file.seek_set(0);
        let mut all = vec![0u8; 9000];
        file.read(&mut all);
        assert!(all[..2000].iter().all(|&b| b == b'a'));
        assert!(all[2000..7000].iter().all(|&b| b == b'b'));
        assert!(all[7000..].iter().all(|&b| b == b'a'));
    }

    #[test]
    fn test_insert_at_end_appends() {
        let mut file = ShiftableFile::create_in_memory().unwrap();
        file.write(b"abc");

        file.seek_end(0);
        assert_eq!(file.insert(b"def"), 3);
        assert_eq!(file.size(), 6);

        file.seek_set(0);
        let mut all = [0u8; 6];
        file.read(&mut all);
        assert_eq!(&all, b"abcdef");
    }

    #[test]
    fn test_insert_then_remove_restores() {
        let mut file = ShiftableFile::create_in_memory().unwrap();
        let data: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        file.write(&data);

        file.seek_set(7777);
        assert_eq!(file.insert(&[0xEE; 3000]), 3000);
        file.check_integrity(true);

        file.seek_set(7777);
        assert_eq!(file.remove(3000), 3000);
        file.check_integrity(true);
        assert_eq!(file.size(), 20_000);

        file.seek_set(0);
        let mut all = vec![0u8; 20_000];
        file.read(&mut all);
        assert_eq!(all, data);
    }

    #[test]
    fn test_remove_across_blocks() {
        let mut file = ShiftableFile::create_in_memory().unwrap();
        let data: Vec<u8> = (0..10_000u32).map(|i| i as u8).collect();
        file.write(&data);

        file.seek_set(500);
        assert_eq!(file.remove(6000), 6000);
        assert_eq!(file.size(), 4000);
        file.check_integrity(true);

        file.seek_set(0);
        let mut all = vec![0u8; 4000];
        file.read(&mut all);
        assert_eq!(&all[..500], &data[..500]);
        assert_eq!(&all[500..], &data[6500..]);
    }

    #[test]
    fn test_remove_clamps_to_end() {
        let mut file = ShiftableFile::create_in_memory().unwrap();
        file.write(b"0123456789");

        file.seek_set(6);
        assert_eq!(file.remove(1000), 4);
        assert_eq!(file.size(), 6);
    }

    #[test]
    fn test_remove_at_exact_block_boundary() {
        let mut file = ShiftableFile::create_in_memory().unwrap();
        file.write(&[b'x'; (3 * BLOCK_SIZE) as usize]);

        file.seek_set(BLOCK_SIZE);
        assert_eq!(file.remove(BLOCK_SIZE), BLOCK_SIZE);
        assert_eq!(file.size(), 2 * BLOCK_SIZE);
        file.check_integrity(true);
    }

    #[test]
    fn test_insert_at_position_zero() {
        let mut file = ShiftableFile::create_in_memory().unwrap();
        file.write(b"world");

        file.seek_set(0);
        assert_eq!(file.insert(b"hello "), 6);

        file.seek_set(0);
        let mut all = [0u8; 11];
        file.read(&mut all);
        assert_eq!(&all, b"hello world");
    }

    #[test]
    fn test_make_room_reports_window_room() {
        let mut file = ShiftableFile::create_in_memory().unwrap();
        file.write(&[1u8; (2 * BLOCK_SIZE) as usize]);

        file.seek_set(BLOCK_SIZE);
        let (mut cur, mut rel) = (file.cur_node, file.rel_pos);
        let room = file.make_room(&mut cur, &mut rel);

        // Both blocks are full; no room can appear without new blocks.
        assert_eq!(room, 0);

        file.seek_set(100);
        file.remove(50);
        let (mut cur, mut rel) = (file.cur_node, file.rel_pos);
        let room = file.make_room(&mut cur, &mut rel);
        assert!(room >= 50);
        file.check_integrity(false);
    }
}
