//! Random access: absolute lookup and cursor-relative navigation.

use crate::file::ShiftableFile;
use crate::layout::{BLOCK_SIZE, DUMMY};

impl ShiftableFile {
    /// Translates an absolute byte offset into `(node, rel_pos)` with an
    /// order-statistic descent: in every subtree, the root's first byte
    /// sits after the byte sum of its left subtree.
    ///
    /// Positions at or past the end resolve to the sentinel, carrying the
    /// overshoot in `rel_pos`.
    pub(crate) fn find_pos(&self, mut pos: u32) -> (u32, u32) {
        if pos == 0 {
            return (self.dummy().next, 0);
        }

        let total = self.dummy().bytes_subtree;

        if pos >= total {
            return (DUMMY, pos - total);
        }

        let mut n = self.dummy().left();

        loop {
            if n == 0 {
                // Unreachable while the subtree sums hold.
                debug_assert!(false, "positional descent fell off the tree");
                return (DUMMY, 0);
            }

            let left = self.node(n).left();
            let left_bytes = if left != 0 {
                self.node(left).bytes_subtree
            } else {
                0
            };
            let right_bytes = left_bytes + self.node(n).bytes;

            if pos < left_bytes {
                n = left;
            } else if pos < right_bytes {
                return (n, pos - left_bytes);
            } else {
                pos -= right_bytes;
                n = self.node(n).right();
            }
        }
    }

    /// Moves the cursor to an absolute position.
    ///
    /// Jumps to the beginning or past the end are O(1). Everything else
    /// walks from the cached cursor, at every step picking whichever
    /// reachable link (sequence neighbour, child, parent) lands closest to
    /// the target in bytes, even when it overshoots: O(log Δ) for a jump
    /// of Δ bytes, independent of the container size.
    pub fn seek_set(&mut self, pos: u32) {
        if !self.is_open() {
            return;
        }

        let total = self.dummy().bytes_subtree;

        if pos >= total {
            let last = self.dummy().prev;

            if pos == total && self.node(last).bytes < BLOCK_SIZE {
                self.cur_node = last;
                self.rel_pos = self.node(last).bytes;
            } else {
                self.cur_node = DUMMY;
                self.rel_pos = pos - total;
            }

            self.abs_pos = pos;
            return;
        }

        let head = self.dummy().next;

        if pos <= self.node(head).bytes {
            self.cur_node = head;
            self.rel_pos = pos;
            self.abs_pos = pos;
            return;
        }

        loop {
            if pos < self.abs_pos {
                // Towards the beginning.
                if pos >= self.abs_pos - self.rel_pos {
                    self.rel_pos -= self.abs_pos - pos;
                    self.abs_pos = pos;
                    return;
                }

                self.abs_pos -= self.rel_pos;
                self.rel_pos = 0;

                // First candidate: the sequence predecessor.
                let mut best = self.prev(self.cur_node);
                let prev_bytes = self.node(best).bytes;

                if self.abs_pos - pos <= prev_bytes {
                    self.cur_node = best;
                    self.rel_pos = prev_bytes - (self.abs_pos - pos);
                    self.abs_pos = pos;
                    return;
                }

                let mut distmin = self.abs_pos - pos - prev_bytes;
                let mut offset = prev_bytes;

                // Second candidate: the left child, unless it is already
                // the predecessor (then it has a right subtree whose sum
                // locates its interval).
                let child = self.node(self.cur_node).left();

                if child != 0 && child != self.prev(self.cur_node) {
                    let end =
                        self.abs_pos - self.node(self.node(child).right()).bytes_subtree;
                    let start = end - self.node(child).bytes;

                    let dist = if pos < start {
                        start - pos
                    } else if pos > end {
                        pos - end
                    } else {
                        self.cur_node = child;
                        self.rel_pos = pos - start;
                        self.abs_pos = pos;
                        return;
                    };

                    if dist < distmin {
                        best = child;
                        distmin = dist;
                        offset = self.abs_pos - start;
                    }
                }

                // Third candidate: the parent, when this node hangs right.
                let parent = self.node(self.cur_node).parent;

                if self.node(parent).right() == self.cur_node
                    && parent != self.prev(self.cur_node)
                {
                    let end = self.abs_pos
                        - self.node(self.node(self.cur_node).left()).bytes_subtree;
                    let start = end - self.node(parent).bytes;

                    let dist = if pos < start {
                        start - pos
                    } else if pos > end {
                        pos - end
                    } else {
                        self.cur_node = parent;
                        self.rel_pos = pos - start;
                        self.abs_pos = pos;
                        return;
                    };

                    if dist < distmin {
                        best = parent;
                        offset = self.abs_pos - start;
                    }
                }

                self.cur_node = best;
                self.abs_pos -= offset;
            } else if pos > self.abs_pos {
                // Towards the end; mirror image of the branch above.
                if pos <= self.abs_pos - self.rel_pos + self.node(self.cur_node).bytes {
                    self.rel_pos += pos - self.abs_pos;
                    self.abs_pos = pos;
                    return;
                }

                self.abs_pos -= self.rel_pos;
                self.rel_pos = 0;

                let mut best = self.next(self.cur_node);
                let cur_bytes = self.node(self.cur_node).bytes;

                if pos - self.abs_pos <= self.node(best).bytes + cur_bytes {
                    self.rel_pos = pos - self.abs_pos - cur_bytes;
                    self.cur_node = best;
                    self.abs_pos = pos;
                    return;
                }

                let mut offset = cur_bytes;
                let mut distmin = pos - self.abs_pos - self.node(best).bytes - offset;

                let child = self.node(self.cur_node).right();

                if child != 0 && child != self.next(self.cur_node) {
                    let start = self.abs_pos
                        + cur_bytes
                        + self.node(self.node(child).left()).bytes_subtree;
                    let end = start + self.node(child).bytes;

                    let dist = if pos < start {
                        start - pos
                    } else if pos > end {
                        pos - end
                    } else {
                        self.cur_node = child;
                        self.rel_pos = pos - start;
                        self.abs_pos = pos;
                        return;
                    };

                    if dist < distmin {
                        best = child;
                        distmin = dist;
                        offset = start - self.abs_pos;
                    }
                }

                let parent = self.node(self.cur_node).parent;

                if self.node(parent).left() == self.cur_node
                    && parent != self.next(self.cur_node)
                {
                    let start = self.abs_pos
                        + cur_bytes
                        + self.node(self.node(self.cur_node).right()).bytes_subtree;
                    let end = start + self.node(parent).bytes;

                    let dist = if pos < start {
                        start - pos
                    } else if pos > end {
                        pos - end
                    } else {
                        self.cur_node = parent;
                        self.rel_pos = pos - start;
                        self.abs_pos = pos;
                        return;
                    };

                    if dist < distmin {
                        best = parent;
                        offset = start - self.abs_pos;
                    }
                }

                self.cur_node = best;
                self.abs_pos += offset;
            } else {
                return; // already there
            }
        }
    }

    /// Moves the cursor relative to its current position, clamping at 0.
    pub fn seek_cur(&mut self, delta: i64) {
        let target = (i64::from(self.abs_pos) + delta).clamp(0, i64::from(u32::MAX));
        self.seek_set(target as u32);
    }

    /// Moves the cursor relative to the end of the payload, clamping at 0.
    pub fn seek_end(&mut self, delta: i64) {
        let target = (i64::from(self.size()) + delta).clamp(0, i64::from(u32::MAX));
        self.seek_set(target as u32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seek_matches_find_pos() {
        let mut file = ShiftableFile::create_in_memory().unwrap();
        let data: Vec<u8> = (0..40_000u32).map(|i| i as u8).collect();
        file.write(&data);

        let mut rng = fastrand::Rng::with_seed(11);

        for _ in 0..500 {
            let pos = rng.u32(0..40_000);
            file.seek_set(pos);

            assert_eq!(file.tell(), pos);
            file.check_integrity(true);

            let mut byte = [0u8];
            assert_eq!(file.read(&mut byte), 1);
            assert_eq!(byte[0], pos as u8);
        }
    }

    #[test]
    fn test_seek_past_end() {
        let mut file = ShiftableFile::create_in_memory().unwrap();
        file.write(b"abc");

        file.seek_set(100);
        assert_eq!(file.tell(), 100);
        assert_eq!(file.cur_node, DUMMY);
        assert_eq!(file.rel_pos, 97);

        let mut buf = [0u8; 4];
        assert_eq!(file.read(&mut buf), 0);
    }

    #[test]
    fn test_relative_seeks_clamp() {
        let mut file = ShiftableFile::create_in_memory().unwrap();
        file.write(b"0123456789");

        file.seek_set(5);
        file.seek_cur(-100);
        assert_eq!(file.tell(), 0);

        file.seek_end(-3);
        assert_eq!(file.tell(), 7);

        file.seek_cur(2);
        assert_eq!(file.tell(), 9);

        file.seek_end(10);
        assert_eq!(file.tell(), 20);
    }
}
