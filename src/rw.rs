//! Sequential byte transfer at the cursor.

use crate::file::ShiftableFile;
use crate::layout::{DUMMY, MAX_SIZE};

impl ShiftableFile {
    /// Copies up to `buf.len()` bytes from the cursor onwards, advancing
    /// the cursor. Returns the bytes actually read; 0 at (or past) the end
    /// of the payload.
    pub fn read(&mut self, buf: &mut [u8]) -> u32 {
        if !self.is_open() || buf.is_empty() || self.cur_node == DUMMY {
            return 0;
        }

        self.check_integrity(true);

        let bytes = u32::try_from(buf.len()).unwrap_or(u32::MAX);

        // Fast path: everything inside the current block.
        if bytes < self.node(self.cur_node).bytes - self.rel_pos {
            let offset = self.rel_pos as usize;
            buf[..bytes as usize]
                .copy_from_slice(&self.block(self.cur_node)[offset..offset + bytes as usize]);

            self.rel_pos += bytes;
            self.abs_pos += bytes;
            return bytes;
        }

        let mut pending = bytes;
        let mut cur = self.cur_node;
        let mut size = self.node(cur).bytes - self.rel_pos;
        let mut filled = 0usize;

        if size > 0 {
            let offset = self.rel_pos as usize;
            buf[..size as usize]
                .copy_from_slice(&self.block(cur)[offset..offset + size as usize]);
        }

        self.rel_pos = 0;

        loop {
            self.cur_node = self.node(cur).next;
            filled += size as usize;
            pending -= size;

            if self.cur_node == DUMMY || pending == 0 {
                break;
            }

            cur = self.cur_node;
            size = self.node(cur).bytes;

            if pending < size {
                buf[filled..filled + pending as usize]
                    .copy_from_slice(&self.block(cur)[..pending as usize]);
                self.rel_pos = pending;
                pending = 0;
                break;
            }

            buf[filled..filled + size as usize]
                .copy_from_slice(&self.block(cur)[..size as usize]);
        }

        let done = bytes - pending;
        self.abs_pos += done;
        done
    }

    /// Overwrites bytes at the cursor, appending zero-filled blocks first
    /// when the write runs past the end. Returns the bytes written: 0 when
    /// the result would not fit in the addressable range, or when the
    /// append fails.
    pub fn write(&mut self, buf: &[u8]) -> u32 {
        if !self.is_open() {
            return 0;
        }

        let bytes = u32::try_from(buf.len()).unwrap_or(u32::MAX);
        let (end, overflowed) = self.abs_pos.overflowing_add(bytes);

        if overflowed || end > MAX_SIZE {
            return 0;
        }

        if bytes == 0 {
            // A zero-length write past the end still extends the payload
            // up to the cursor.
            if self.abs_pos > self.dummy().bytes_subtree {
                let _ = self.resize(self.abs_pos);
            }
            return 0;
        }

        self.check_integrity(true);

        if end > self.dummy().bytes_subtree && self.resize(end).is_err() {
            return 0;
        }

        if bytes < self.node(self.cur_node).bytes - self.rel_pos {
            let offset = self.rel_pos as usize;
            self.block_mut(self.cur_node)[offset..offset + bytes as usize]
                .copy_from_slice(&buf[..bytes as usize]);

            self.rel_pos += bytes;
            self.abs_pos += bytes;
            return bytes;
        }

        let mut pending = bytes;
        let mut cur = self.cur_node;
        let mut size = self.node(cur).bytes - self.rel_pos;
        let mut taken = 0usize;

        if size > 0 {
            let offset = self.rel_pos as usize;
            self.block_mut(cur)[offset..offset + size as usize]
                .copy_from_slice(&buf[..size as usize]);
        }

        self.rel_pos = 0;

        loop {
            self.cur_node = self.node(cur).next;
            taken += size as usize;
            pending -= size;

            if self.cur_node == DUMMY || pending == 0 {
                break;
            }

            cur = self.cur_node;
            size = self.node(cur).bytes;

            if pending < size {
                self.block_mut(cur)[..pending as usize]
                    .copy_from_slice(&buf[taken..taken + pending as usize]);
                self.rel_pos = pending;
                pending = 0;
                break;
            }

            self.block_mut(cur)[..size as usize]
                .copy_from_slice(&buf[taken..taken + size as usize]);
        }

        let done = bytes - pending;
        self.abs_pos += done;
        done
    }
}

impl std::io::Read for ShiftableFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        Ok(ShiftableFile::read(self, buf) as usize)
    }
}

impl std::io::Write for ShiftableFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        Ok(ShiftableFile::write(self, buf) as usize)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(()) // writes land in the mapping; no further buffering
    }
}

impl std::io::Seek for ShiftableFile {
    fn seek(&mut self, pos: std::io::SeekFrom) -> std::io::Result<u64> {
        match pos {
            std::io::SeekFrom::Start(offset) => {
                self.seek_set(u64::min(offset, u64::from(u32::MAX)) as u32)
            }
            std::io::SeekFrom::Current(delta) => self.seek_cur(delta),
            std::io::SeekFrom::End(delta) => self.seek_end(delta),
        }

        Ok(u64::from(self.tell()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::BLOCK_SIZE;

    #[test]
    fn test_write_read_roundtrip() {
        let mut file = ShiftableFile::create_in_memory().unwrap();
        let data: Vec<u8> = (0..5000u32).map(|i| (i * 7) as u8).collect();

        assert_eq!(file.write(&data), 5000);
        assert_eq!(file.size(), 5000);
        assert_eq!(file.tell(), 5000);

        file.seek_cur(-5000);
        let mut back = vec![0u8; 5000];
        assert_eq!(file.read(&mut back), 5000);
        assert_eq!(back, data);
    }

    #[test]
    fn test_overwrite_in_the_middle() {
        let mut file = ShiftableFile::create_in_memory().unwrap();
        file.write(&[b'a'; 4000]);

        file.seek_set(1500);
        assert_eq!(file.write(&[b'b'; 1000]), 1000);
        assert_eq!(file.size(), 4000);

        file.seek_set(0);
        let mut all = vec![0u8; 4000];
        file.read(&mut all);
        assert!(all[..1500].iter().all(|&b| b == b'a'));
        assert!(all[1500..2500].iter().all(|&b| b == b'b'));
        assert!(all[2500..].iter().all(|&b| b == b'a'));
    }

    #[test]
    fn test_write_past_end_zero_fills() {
        let mut file = ShiftableFile::create_in_memory().unwrap();
        file.write(b"abc");

        file.seek_set(10);
        assert_eq!(file.write(b"xyz"), 3);
        assert_eq!(file.size(), 13);

        file.seek_set(0);
        let mut all = vec![0xFFu8; 13];
        file.read(&mut all);
        assert_eq!(&all[..3], b"abc");
        assert!(all[3..10].iter().all(|&b| b == 0));
        assert_eq!(&all[10..], b"xyz");
    }

    #[test]
    fn test_write_overflow_refused() {
        let mut file = ShiftableFile::create_in_memory().unwrap();

        file.seek_set(u32::MAX - 2);
        assert_eq!(file.write(b"abcdef"), 0);
        assert_eq!(file.size(), 0);
    }

    #[test]
    fn test_io_trait_adapters() {
        use std::io::{Read, Seek, SeekFrom, Write};

        let mut file = ShiftableFile::create_in_memory().unwrap();

        file.write_all(&[b'q'; (BLOCK_SIZE + 100) as usize]).unwrap();
        assert_eq!(file.seek(SeekFrom::Start(50)).unwrap(), 50);

        let mut buf = [0u8; 10];
        file.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [b'q'; 10]);

        assert_eq!(file.seek(SeekFrom::End(-4)).unwrap(), u64::from(BLOCK_SIZE) + 96);
        assert_eq!(file.seek(SeekFrom::Current(2)).unwrap(), u64::from(BLOCK_SIZE) + 98);
    }
}
