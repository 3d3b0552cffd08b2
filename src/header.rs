use bytemuck::{Pod, Zeroable};

use crate::layout::BLOCK_SIZE;

/// Signature of a file in shiftable form.
const MAGIC: [u8; 8] = *b"shfUAHes";

const VERSION_HIGH: u8 = 0;
const VERSION_LOW: u8 = 1;

/// `state_flags` value of a cleanly closed file.
pub(crate) const CLOSED_OK: u32 = 0;

/// Low bit of `state_flags`: the file is currently open.
pub(crate) const FLAG_OPEN: u32 = 1;

const OP_MASK: u32 = 7 << 1;

/// Operation-in-progress record kept in `state_flags` bits 1..4, written
/// before the mutating memory operations it annotates so that an
/// interrupted run is detectable on reopen.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CurrentOp {
    None = 0,
    ResizeGrow = 1,
    InsertGrow = 2,
    // Reserved in the format for growth driven directly by write; current
    // writes grow through resize and record ResizeGrow instead.
    #[allow(dead_code)]
    WriteGrow = 3,
    NormalShrink = 4,
    DelayedShrink = 5,
}

/// On-disk header at offset 0 of the mapped region.
///
/// The first 24 bytes identify the format (signature, version, word size,
/// endianness probe, block size); the rest is live bookkeeping mutated in
/// place through the mapping.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub(crate) struct Header {
    magic: [u8; 8],
    version_high: u8,
    version_low: u8,
    sizeof_unsigned: u8,
    padding: [u8; 5],
    endianness: u32,
    block_size: u32,

    pub map_size: u32,
    pub meta_data_size: u32,
    pub free_list_first: u32,
    pub free_list_last: u32,
    pub free_count: u32,

    pub state_flags: u32,
    pub op_start_pos: u32,
    pub op_bytes_requested: u32,
    pub op_bytes_done: u32,
}

/// The probe reads back as a different number on a machine of different
/// endianness, rejecting files written elsewhere.
const fn endianness_probe() -> u32 {
    u32::from_ne_bytes([0, 1, 2, 3])
}

impl Header {
    /// Stamps the identity fields of a freshly created file.
    pub(crate) fn init(&mut self) {
        self.magic = MAGIC;
        self.version_high = VERSION_HIGH;
        self.version_low = VERSION_LOW;
        self.sizeof_unsigned = core::mem::size_of::<u32>() as u8;
        self.padding = [0; 5];
        self.endianness = endianness_probe();
        self.block_size = BLOCK_SIZE;
    }

    pub(crate) fn has_magic(&self) -> bool {
        self.magic == MAGIC
    }

    /// Checks that an existing file matches this build of the library.
    pub(crate) fn is_compatible(&self) -> bool {
        self.version_high == VERSION_HIGH
            && self.version_low == VERSION_LOW
            && self.sizeof_unsigned == core::mem::size_of::<u32>() as u8
            && self.endianness == endianness_probe()
            && self.block_size == BLOCK_SIZE
    }

    /// Records the operation about to mutate the region.
    pub(crate) fn set_current_op(
        &mut self,
        op: CurrentOp,
        start_pos: u32,
        bytes_requested: u32,
        bytes_done: u32,
    ) {
        self.state_flags = (self.state_flags & !OP_MASK) | (((op as u32) << 1) & OP_MASK);
        self.op_start_pos = start_pos;
        self.op_bytes_requested = bytes_requested;
        self.op_bytes_done = bytes_done;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_size() {
        // Two node slots: the node array overlaps the header bytes.
        assert_eq!(core::mem::size_of::<Header>(), 60);
    }

    #[test]
    fn test_init_and_compatibility() {
        let mut header = Header::zeroed();
        assert!(!header.has_magic());

        header.init();
        assert!(header.has_magic());
        assert!(header.is_compatible());
    }

    #[test]
    fn test_current_op_preserves_open_flag() {
        let mut header = Header::zeroed();
        header.init();
        header.state_flags = FLAG_OPEN;

        header.set_current_op(CurrentOp::InsertGrow, 10, 20, 5);
        assert_eq!(header.state_flags & FLAG_OPEN, FLAG_OPEN);
        assert_eq!(header.state_flags >> 1 & 7, CurrentOp::InsertGrow as u32);
        assert_eq!(header.op_start_pos, 10);

        header.set_current_op(CurrentOp::None, 0, 0, 0);
        assert_eq!(header.state_flags, FLAG_OPEN);
    }
}
