use crate::common::{
    NodeOffset, SlotIndex, INVALID_NODE_OFFSET, INVALID_SLOT_INDEX, NODE_SIZE,
};

const NUM_KEYS_OFFSET: usize = 0;
const LEFT_KEY_OFFSET: usize = 4;
const RIGHT_KEY_OFFSET: usize = 8;
const LEFT_SLOT_OFFSET: usize = 12;
const RIGHT_SLOT_OFFSET: usize = 16;
const LEFT_CHILD_OFFSET: usize = 20;
const MIDDLE_CHILD_OFFSET: usize = 24;
const RIGHT_CHILD_OFFSET: usize = 28;

/// A 2-3 tree node.
///
/// Each node carries one or two keys, the data-file slot bound to each
/// key, and up to three child offsets. All absent values are the `-1`
/// sentinel, and absent fields are pinned to `-1` on write so node images
/// stay byte-reproducible.
///
/// ## Node Binary Format
///
/// ```text
/// +----------+----------+-----------+-----------+------------+------------+--------------+-------------+
/// | num_keys | left_key | right_key | left_slot | right_slot | left_child | middle_child | right_child |
/// | i32      | i32      | i32       | i32       | i32        | i32        | i32          | i32         |
/// +----------+----------+-----------+-----------+------------+------------+--------------+-------------+
/// ```
///
/// All fields little-endian; the image is 32 bytes. Child fields hold
/// byte offsets into the index file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Node {
    pub num_keys: i32,
    pub keys: [i32; 2],
    pub slots: [SlotIndex; 2],
    pub children: [NodeOffset; 3],
}

impl Node {
    /// A fresh leaf holding a single key.
    pub fn leaf(key: i32, slot: SlotIndex) -> Self {
        Self {
            num_keys: 1,
            keys: [key, -1],
            slots: [slot, INVALID_SLOT_INDEX],
            children: [INVALID_NODE_OFFSET; 3],
        }
    }

    /// A fresh internal node holding a single key and two children.
    pub fn branch(key: i32, slot: SlotIndex, left: NodeOffset, middle: NodeOffset) -> Self {
        Self {
            num_keys: 1,
            keys: [key, -1],
            slots: [slot, INVALID_SLOT_INDEX],
            children: [left, middle, INVALID_NODE_OFFSET],
        }
    }

    pub fn is_leaf(&self) -> bool {
        !self.children[0].is_valid()
    }

    /// Serializes the node into `buf`, which must be `NODE_SIZE` bytes.
    /// Pure serializer: no invariant checks.
    pub fn write_to(&self, buf: &mut [u8]) {
        assert_eq!(buf.len(), NODE_SIZE, "Buffer must be NODE_SIZE bytes");

        let right_key = if self.num_keys == 2 { self.keys[1] } else { -1 };
        let right_slot = if self.num_keys == 2 {
            self.slots[1].as_i32()
        } else {
            -1
        };

        write_i32(buf, NUM_KEYS_OFFSET, self.num_keys);
        write_i32(buf, LEFT_KEY_OFFSET, self.keys[0]);
        write_i32(buf, RIGHT_KEY_OFFSET, right_key);
        write_i32(buf, LEFT_SLOT_OFFSET, self.slots[0].as_i32());
        write_i32(buf, RIGHT_SLOT_OFFSET, right_slot);
        write_i32(buf, LEFT_CHILD_OFFSET, self.children[0].as_i32());
        write_i32(buf, MIDDLE_CHILD_OFFSET, self.children[1].as_i32());
        write_i32(buf, RIGHT_CHILD_OFFSET, self.children[2].as_i32());
    }

    /// Deserializes a node from its byte image. Pure serializer: the
    /// caller is responsible for structural validation.
    pub fn read_from(buf: &[u8]) -> Self {
        assert_eq!(buf.len(), NODE_SIZE, "Buffer must be NODE_SIZE bytes");

        Self {
            num_keys: read_i32(buf, NUM_KEYS_OFFSET),
            keys: [read_i32(buf, LEFT_KEY_OFFSET), read_i32(buf, RIGHT_KEY_OFFSET)],
            slots: [
                SlotIndex::new(read_i32(buf, LEFT_SLOT_OFFSET)),
                SlotIndex::new(read_i32(buf, RIGHT_SLOT_OFFSET)),
            ],
            children: [
                NodeOffset::new(read_i32(buf, LEFT_CHILD_OFFSET)),
                NodeOffset::new(read_i32(buf, MIDDLE_CHILD_OFFSET)),
                NodeOffset::new(read_i32(buf, RIGHT_CHILD_OFFSET)),
            ],
        }
    }
}

fn write_i32(buf: &mut [u8], offset: usize, value: i32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn read_i32(buf: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap())
}
