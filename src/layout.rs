use core::mem::size_of;

use crate::header::Header;

/// Nodes are 2^5 = 32 bytes.
pub(crate) const LOG2_NODE_SIZE: u32 = 5;
pub(crate) const NODE_SIZE: u32 = 1 << LOG2_NODE_SIZE;

/// Data blocks are 2^10 = 1024 bytes.
pub(crate) const LOG2_BLOCK_SIZE: u32 = 10;
pub(crate) const BLOCK_SIZE: u32 = 1 << LOG2_BLOCK_SIZE;

/// Neighbour blocks visited on each side when compacting around the cursor.
pub(crate) const COMPACTION_STEPS: u32 = 2;

/// Largest payload a container can hold. Block aligned, and low enough
/// that `COMPACTION_STEPS + 1` sizes can be summed without overflow.
pub(crate) const MAX_SIZE: u32 =
    (u32::MAX << LOG2_BLOCK_SIZE) & (u32::MAX / (COMPACTION_STEPS + 1) * COMPACTION_STEPS);
pub(crate) const MAX_BLOCKS: u32 = MAX_SIZE >> LOG2_BLOCK_SIZE;

/// Index of the sentinel node: the first node slot past the header bytes.
pub(crate) const DUMMY: u32 = (size_of::<Header>() as u32 + NODE_SIZE - 1) >> LOG2_NODE_SIZE;

/// Rounds `size` up to a multiple of the block size.
pub(crate) const fn round_to_block(size: u32) -> u32 {
    (size + BLOCK_SIZE - 1) & (u32::MAX << LOG2_BLOCK_SIZE)
}

/// Number of usable data blocks in a map of the given geometry, excluding
/// the swap block reserved at the tail.
pub(crate) const fn data_blocks(map_size: u32, meta_data_size: u32) -> u32 {
    ((map_size - meta_data_size) >> LOG2_BLOCK_SIZE) - 1
}

/// Growth amortisation: ask for half again as much as strictly needed.
pub(crate) const fn extra_growth(blocks: u32) -> u32 {
    blocks * 3 / 2
}

/// Shrink policy: give space back once under a quarter of it is used.
pub(crate) const fn worth_shrink(occupied: u32, total: u32) -> bool {
    occupied < total / 4
}

/// Computes the map geometry required to hold `data_size` payload bytes.
///
/// Returns `(map_size, meta_data_size)`. The metadata area must be large
/// enough for one node per usable block plus the node slots that overlap
/// the header, and it must itself be block aligned; since enlarging it
/// consumes block positions (a node's block lives at `index * BLOCK_SIZE`),
/// the split is found by fixed point iteration. One extra block at the map
/// tail is reserved for swap staging.
pub(crate) fn expanded_size(data_size: u32) -> (u32, u32) {
    let data_size = round_to_block(if data_size == 0 { 1 } else { data_size });
    let data_blocks = data_size >> LOG2_BLOCK_SIZE;

    let mut unusable_nodes = DUMMY + 1;

    loop {
        let meta = round_to_block((unusable_nodes + data_blocks) << LOG2_NODE_SIZE);

        if unusable_nodes >= meta >> LOG2_BLOCK_SIZE {
            break;
        }

        unusable_nodes = meta >> LOG2_BLOCK_SIZE;
    }

    let meta_data_size = unusable_nodes << LOG2_BLOCK_SIZE;
    let map_size = meta_data_size + data_size + BLOCK_SIZE;

    (map_size, meta_data_size)
}

/// Computes the least fragmented placement of `data_size` payload bytes.
///
/// Returns `(sizes, positions)` for up to two runs. The first run holds the
/// bytes displaced by the metadata area, parked block-aligned at the tail;
/// the second run (present only when the payload outgrows the metadata)
/// stays where a plain file would keep it. A single `memcpy` of the first
/// run back over the metadata area turns the region into a plain file.
pub(crate) fn defragmented_layout(data_size: u32, meta_data_size: u32) -> ([u32; 2], [u32; 2]) {
    if data_size > meta_data_size {
        let size = [meta_data_size, data_size - meta_data_size];
        let pos = [round_to_block(size[0] + size[1]), size[0]];
        (size, pos)
    } else {
        ([data_size, 0], [meta_data_size, 0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dummy_index() {
        // The header occupies the first two node slots; the sentinel is next.
        assert_eq!(size_of::<Header>(), 60);
        assert_eq!(DUMMY, 2);
    }

    #[test]
    fn test_grow_shrink_consistency() {
        // Growing to the amortised size must never immediately look shrinkable.
        assert!(!worth_shrink(100, extra_growth(100)));
    }

    #[test]
    fn test_expanded_size_minimal() {
        let (map_size, meta_data_size) = expanded_size(0);

        assert_eq!(meta_data_size, (DUMMY + 1) << LOG2_BLOCK_SIZE);
        assert_eq!(map_size, meta_data_size + 2 * BLOCK_SIZE);
    }

    #[test]
    fn test_expanded_size_fits_nodes() {
        for data_size in [1, BLOCK_SIZE, 64 << 10, 10 << 20, 100 << 20] {
            let (map_size, meta_data_size) = expanded_size(data_size);
            let blocks = round_to_block(data_size) >> LOG2_BLOCK_SIZE;

            assert_eq!(meta_data_size % BLOCK_SIZE, 0);
            assert_eq!(map_size, meta_data_size + round_to_block(data_size) + BLOCK_SIZE);

            // One node slot per data block, past the slots shadowed by the
            // header and by the metadata area itself.
            let slots = meta_data_size >> LOG2_NODE_SIZE;
            let unusable = meta_data_size >> LOG2_BLOCK_SIZE;
            assert!(slots - unusable >= blocks);
            assert!(unusable > DUMMY);
        }
    }

    #[test]
    fn test_defragmented_layout_single_run() {
        let (size, pos) = defragmented_layout(1000, 3072);

        assert_eq!(size, [1000, 0]);
        assert_eq!(pos[0], 3072);
    }

    #[test]
    fn test_defragmented_layout_two_runs() {
        let (size, pos) = defragmented_layout(10_000, 3072);

        assert_eq!(size, [3072, 10_000 - 3072]);
        assert_eq!(pos[1], 3072);
        assert_eq!(pos[0], round_to_block(10_000));
    }
}
