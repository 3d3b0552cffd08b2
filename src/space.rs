//! Backing-store size policy: zero-fill resize, amortised growth, and
//! space reclamation.

use crate::error::{Error, Result};
use crate::file::{block_offset, ShiftableFile};
use crate::header::CurrentOp;
use crate::layout::{
    data_blocks, defragmented_layout, expanded_size, extra_growth, round_to_block, worth_shrink,
    BLOCK_SIZE, DUMMY, LOG2_BLOCK_SIZE, MAX_BLOCKS, MAX_SIZE,
};

impl ShiftableFile {
    /// Sets the payload size, appending zero bytes or truncating.
    ///
    /// Truncation behaves exactly like a `remove` of the surplus at the
    /// new end; the cursor keeps its absolute position either way.
    pub fn resize(&mut self, new_size: u32) -> Result<()> {
        if !self.is_open() {
            return Err(Error::Closed);
        }

        if new_size > MAX_SIZE {
            return Err(Error::TooLarge);
        }

        self.check_integrity(true);

        let old_size = self.dummy().bytes_subtree;

        if new_size > old_size {
            let mut last = self.dummy().prev;

            if last != DUMMY {
                let bytes = new_size - old_size;
                let last_bytes = self.node(last).bytes;

                if bytes <= BLOCK_SIZE - last_bytes {
                    // The zeros fit in the last block.
                    self.block_mut(last)[last_bytes as usize..(last_bytes + bytes) as usize]
                        .fill(0);
                    self.node_mut(last).bytes += bytes;
                    self.update_counters(last);

                    if self.abs_pos >= old_size {
                        self.refresh_cursor();
                    }

                    self.check_integrity(true);
                    return Ok(());
                }

                // Try squeezing the tail neighbours before adding blocks.
                let mut cur_node = last;
                let mut rel_pos = last_bytes;
                let room = self.make_room(&mut cur_node, &mut rel_pos);
                let mut fill = bytes.min(room);

                if fill > 0 {
                    last = cur_node;

                    loop {
                        debug_assert!(last != DUMMY);

                        let last_bytes = self.node(last).bytes;
                        let step = fill.min(BLOCK_SIZE - last_bytes);

                        self.block_mut(last)[last_bytes as usize..(last_bytes + step) as usize]
                            .fill(0);
                        self.node_mut(last).bytes += step;
                        fill -= step;
                        self.update_counters(last);

                        last = self.next(last);

                        if fill == 0 {
                            break;
                        }
                    }

                    // Blocks make_room emptied beyond what was filled go
                    // back to the free list.
                    while last != DUMMY {
                        let next = self.next(last);

                        let branch = self.extract_node(last);
                        self.update_counters_and_rebalance(branch);
                        self.free_node(last);

                        last = next;
                    }

                    if self.dummy().bytes_subtree == new_size {
                        self.refresh_cursor();
                        self.check_integrity(true);
                        return Ok(());
                    }
                }
            }

            // Still short: allocate fresh blocks, growing if the free
            // list cannot cover them.
            let num_new_blocks = (new_size - self.dummy().bytes_subtree).div_ceil(BLOCK_SIZE);

            if num_new_blocks > self.header().free_count {
                let header = self.header();
                let total = data_blocks(header.map_size, header.meta_data_size) + num_new_blocks
                    - header.free_count;
                let done = self.dummy().bytes_subtree - old_size;

                self.header_mut().set_current_op(
                    CurrentOp::ResizeGrow,
                    old_size,
                    new_size - old_size,
                    done,
                );

                self.grow(total)?;

                self.header_mut().set_current_op(CurrentOp::None, 0, 0, 0);
            }

            let first = self.alloc_nodes(num_new_blocks);
            let mut bytes = new_size - self.dummy().bytes_subtree;
            let mut next = first;

            while bytes > BLOCK_SIZE {
                debug_assert!(next != 0);

                self.block_mut(next).fill(0);

                let after = self.next(next);
                self.node_mut(next).init(BLOCK_SIZE);
                self.node_mut(next).next = after;

                next = after;
                bytes -= BLOCK_SIZE;
            }

            debug_assert!(bytes > 0 && next != 0 && self.next(next) == 0);

            self.block_mut(next).fill(0);
            self.node_mut(next).init(bytes);

            if self.worth_rebuild(num_new_blocks, false) {
                let last = self.dummy().prev;
                let header = self.header();
                let num_blocks =
                    data_blocks(header.map_size, header.meta_data_size) - header.free_count;

                self.node_mut(last).next = first;

                let head = self.dummy().next;
                self.build_tree(head, num_blocks);
            } else {
                let mut first = first;

                loop {
                    let cur = first;
                    first = self.next(cur);

                    let tail = self.dummy().prev;

                    self.node_mut(cur).next = DUMMY;
                    self.node_mut(cur).prev = tail;
                    self.node_mut(cur).parent = tail;
                    self.node_mut(DUMMY).prev = cur;
                    self.node_mut(tail).next = cur;

                    if tail == DUMMY {
                        self.node_mut(DUMMY).set_left(cur);
                    } else {
                        self.node_mut(tail).set_right(cur);
                    }

                    self.update_counters_and_rebalance(cur);

                    if first == 0 {
                        break;
                    }
                }
            }

            self.refresh_cursor();
            self.check_integrity(true);
            Ok(())
        } else if new_size < old_size {
            // Shrink by simulating a removal at the new end.
            let abs_pos = self.abs_pos;

            self.abs_pos = new_size;
            self.refresh_cursor();

            let removed = self.remove(old_size - new_size);
            debug_assert!(removed == old_size - new_size);

            if !self.is_open() {
                return Err(Error::Closed);
            }

            self.abs_pos = abs_pos;
            self.refresh_cursor();

            self.check_integrity(true);
            Ok(())
        } else {
            Ok(())
        }
    }

    /// Enlarges the map to hold at least `num_blocks` data blocks, with
    /// [`extra_growth`] amortisation.
    ///
    /// Remapping may move the base address, which is harmless, and may
    /// enlarge the metadata area, which is not: nodes whose indices now
    /// fall inside it are relocated to free slots, or, when the whole
    /// payload fits in the newly added tail, the entire stream is
    /// evacuated there and the tree rebuilt from scratch.
    pub(crate) fn grow(&mut self, num_blocks: u32) -> Result<()> {
        self.check_integrity(false);

        if num_blocks > MAX_BLOCKS {
            self.force_close();
            return Err(Error::TooLarge);
        }

        let header = self.header();
        let cur_num_blocks = data_blocks(header.map_size, header.meta_data_size);
        let old_map_size = header.map_size;
        let old_meta_size = header.meta_data_size;

        if num_blocks <= cur_num_blocks {
            return Ok(());
        }

        let num_blocks = extra_growth(num_blocks).min(MAX_BLOCKS);
        let data_size = num_blocks << LOG2_BLOCK_SIZE;
        let (map_size, meta_data_size) = expanded_size(data_size);

        tracing::debug!(old_map_size, map_size, "growing");

        if let Err(err) = self.remap(map_size) {
            self.force_close();
            return Err(err);
        }

        // The header still carries the old geometry; everything below
        // reads it before committing the new one.
        let mut next_new = (old_map_size >> LOG2_BLOCK_SIZE) - 1;

        if next_new < meta_data_size >> LOG2_BLOCK_SIZE {
            next_new = meta_data_size >> LOG2_BLOCK_SIZE;
        }

        if meta_data_size > old_meta_size {
            let bytes = self.dummy().bytes_subtree;

            let start = old_meta_size >> LOG2_BLOCK_SIZE;
            let mut end = meta_data_size >> LOG2_BLOCK_SIZE;
            let old_last = (old_map_size >> LOG2_BLOCK_SIZE) - 1;

            if end > old_last {
                end = old_last;
            }

            let mut truly_free_blocks = self.header().free_count;
            let mut min_blocks_move = 0;
            let mut min_bytes_move = 0;

            for i in start..end {
                if self.node(i).is_free() {
                    truly_free_blocks -= 1;
                } else {
                    min_blocks_move += 1;
                    min_bytes_move += self.node(i).bytes;
                }
            }

            let can_copy_all_data = map_size - old_map_size >= bytes;
            let can_move_conflicting_blocks =
                num_blocks - cur_num_blocks + truly_free_blocks >= min_blocks_move;

            debug_assert!(can_copy_all_data || can_move_conflicting_blocks);

            if !can_move_conflicting_blocks || (can_copy_all_data && min_bytes_move == bytes) {
                // Evacuate the whole stream to a contiguous tail run and
                // start the metadata over.
                let run_start = map_size - BLOCK_SIZE - round_to_block(bytes);
                self.evacuate_stream(run_start);

                let header = self.header_mut();
                header.meta_data_size = meta_data_size;
                header.map_size = map_size;

                let size = [bytes, 0];
                let pos = [run_start, 0];
                let first = run_start >> LOG2_BLOCK_SIZE;
                let num = self.make_list_of_nodes(size, pos);
                self.build_tree(first, num);

                let header = self.header_mut();
                header.free_list_first = 0;
                header.free_list_last = 0;
                header.free_count = 0;

                let free_start = meta_data_size >> LOG2_BLOCK_SIZE;
                self.free_nodes_contiguous(free_start, first - free_start);

                self.check_integrity(false);
                return Ok(());
            }

            // Gentle relocation: clear the free list of conflicting
            // entries first, then move the occupied ones into genuinely
            // free slots or brand new tail positions.
            for i in start..end {
                if self.node(i).is_free() {
                    self.unfree_node(i);
                }
            }

            for i in start..end {
                if !self.node(i).is_free() {
                    if self.header().free_count > 0 {
                        let slot = self.alloc_node();
                        self.move_node(i, slot, true, true);
                    } else {
                        self.region_copy(
                            block_offset(i),
                            block_offset(next_new),
                            BLOCK_SIZE as usize,
                        );
                        self.move_node(i, next_new, false, true);
                        self.node_mut(i).init(0);
                        next_new += 1;
                    }
                }
            }

            self.header_mut().meta_data_size = meta_data_size;
        }

        self.header_mut().map_size = map_size;

        let total = (map_size >> LOG2_BLOCK_SIZE) - 1;
        self.free_nodes_contiguous(next_new, total - next_new);

        self.check_integrity(false);
        Ok(())
    }

    /// Copies the payload stream, in order, to a contiguous run starting
    /// at `dest`. The caller guarantees the run does not overlap any
    /// occupied block.
    fn evacuate_stream(&mut self, dest: u32) {
        let mut offset = dest as usize;
        let mut n = self.dummy().next;

        while n != DUMMY {
            let bytes = self.node(n).bytes as usize;
            self.region_copy(block_offset(n), offset, bytes);
            offset += bytes;
            n = self.next(n);
        }
    }

    /// Gives surplus blocks back to the store.
    ///
    /// With `num_blocks == 0`, shrinks only when under a quarter of the
    /// blocks are used, down to the amortised size. Node indices above
    /// the new map end are relocated into free slots when enough exist;
    /// otherwise the region is defragmented and the metadata rebuilt.
    pub(crate) fn shrink(&mut self, num_blocks: u32) -> Result<()> {
        self.check_integrity(false);

        if self.shrink_disabled {
            return Ok(());
        }

        let header = self.header();
        let cur_num_blocks = data_blocks(header.map_size, header.meta_data_size);
        let num_used_blocks = cur_num_blocks - header.free_count;
        let old_map_size = header.map_size;
        let old_meta_size = header.meta_data_size;

        let mut num_blocks = num_blocks;

        if num_blocks == 0 {
            if !worth_shrink(num_used_blocks, cur_num_blocks) {
                return Ok(());
            }

            num_blocks = extra_growth(num_used_blocks);
        }

        if num_blocks > cur_num_blocks {
            return Ok(());
        }

        let num_blocks = num_blocks.min(MAX_BLOCKS);

        debug_assert!(num_blocks >= num_used_blocks);

        let data_size = num_blocks << LOG2_BLOCK_SIZE;
        let (map_size, meta_data_size) = expanded_size(data_size);

        tracing::debug!(old_map_size, map_size, "shrinking");

        // Blocks at these indices are about to disappear.
        let mut start_del = (map_size >> LOG2_BLOCK_SIZE) - 1;

        if start_del < old_meta_size >> LOG2_BLOCK_SIZE {
            start_del = old_meta_size >> LOG2_BLOCK_SIZE;
        }

        let end_del = (old_map_size >> LOG2_BLOCK_SIZE) - 1;

        let mut num_moving = 0;

        for i in start_del..end_del {
            if !self.node(i).is_free() {
                num_moving += 1;
            }
        }

        // Free entries inside the doomed range cannot serve as targets.
        let num_free = self.header().free_count - (end_del - start_del - num_moving);

        if num_moving <= num_free {
            for i in start_del..end_del {
                if self.node(i).is_free() {
                    self.unfree_node(i);
                }
            }

            for i in start_del..end_del {
                if !self.node(i).is_free() {
                    let slot = self.alloc_node();
                    self.move_node(i, slot, true, true);
                }
            }

            // Shrinking the metadata area uncovers block positions that
            // could not be used before.
            let start_new = meta_data_size >> LOG2_BLOCK_SIZE;
            let mut end_new = old_meta_size >> LOG2_BLOCK_SIZE;

            if end_new > (map_size >> LOG2_BLOCK_SIZE) - 1 {
                end_new = (map_size >> LOG2_BLOCK_SIZE) - 1;
            }

            let header = self.header_mut();
            header.map_size = map_size;
            header.meta_data_size = meta_data_size;

            if end_new > start_new {
                self.free_nodes_contiguous(start_new, end_new - start_new);
            }
        } else {
            // Not enough free slots: defragment and rebuild.
            self.defrag_region(false);

            let data_size = self.dummy().bytes_subtree;
            let (size, pos) = defragmented_layout(data_size, meta_data_size);

            if old_meta_size != meta_data_size {
                if old_meta_size < data_size {
                    // Two runs stay two runs; only the split point moves.
                    self.region_copy(
                        (meta_data_size + round_to_block(data_size)) as usize,
                        meta_data_size as usize,
                        (old_meta_size - meta_data_size) as usize,
                    );
                } else if meta_data_size >= data_size {
                    // One run to one run, possibly overlapping.
                    self.region_copy(
                        old_meta_size as usize,
                        meta_data_size as usize,
                        data_size as usize,
                    );
                } else {
                    // One run splits in two.
                    self.region_copy(
                        (old_meta_size + size[0]) as usize,
                        meta_data_size as usize,
                        size[1] as usize,
                    );

                    if pos[0] != old_meta_size {
                        self.region_copy(
                            old_meta_size as usize,
                            pos[0] as usize,
                            size[0] as usize,
                        );
                    }
                }
            }

            let header = self.header_mut();
            header.map_size = map_size;
            header.meta_data_size = meta_data_size;
            header.free_list_first = 0;
            header.free_list_last = 0;
            header.free_count = 0;

            let tail = round_to_block(meta_data_size + data_size);
            self.free_nodes_contiguous(
                tail >> LOG2_BLOCK_SIZE,
                ((map_size - tail) >> LOG2_BLOCK_SIZE) - 1,
            );

            let first = pos[0] >> LOG2_BLOCK_SIZE;
            let num = self.make_list_of_nodes(size, pos);
            self.build_tree(first, num);
        }

        self.refresh_cursor();

        let map_size = self.header().map_size;

        if let Err(err) = self.remap(map_size) {
            self.force_close();
            return Err(err);
        }

        self.check_integrity(true);
        Ok(())
    }
}
