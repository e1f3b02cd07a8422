use super::types::{NodeOffset, SlotIndex};

/// Size of one serialized book record in bytes.
pub const RECORD_SIZE: usize = 427;

/// Size of one serialized 2-3 tree node in bytes.
pub const NODE_SIZE: usize = 32;

/// Size of the data file header in bytes (two i32 fields).
pub const DATA_HEADER_SIZE: usize = 8;

/// Size of the index file header in bytes (three i32 fields).
pub const INDEX_HEADER_SIZE: usize = 12;

/// Width of the title field, including the terminating null byte.
pub const TITLE_LEN: usize = 151;

/// Width of the author field, including the terminating null byte.
pub const AUTHOR_LEN: usize = 201;

/// Width of the publisher field, including the terminating null byte.
pub const PUBLISHER_LEN: usize = 51;

/// Record code marking a slot as logically deleted.
pub const TOMBSTONE_CODE: i32 = -1;

/// Invalid slot index constant
pub const INVALID_SLOT_INDEX: SlotIndex = SlotIndex(-1);

/// Invalid node offset constant
pub const INVALID_NODE_OFFSET: NodeOffset = NodeOffset(-1);
