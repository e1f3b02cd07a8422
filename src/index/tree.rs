use crate::common::{
    NodeOffset, Result, SlotIndex, StoreError, INVALID_NODE_OFFSET,
};
use crate::storage::IndexFile;

use super::node::Node;

/// Outcome of an insertion step that could not be absorbed: the child
/// split, promoting one entry, and `right` is the freshly written sibling
/// holding the keys greater than the promoted one.
struct Split {
    key: i32,
    slot: SlotIndex,
    right: NodeOffset,
}

/// Outcome of a deletion step that emptied the child subtree's root.
/// `survivor` is that node's remaining child (the `-1` sentinel when the
/// emptied node was a leaf). The node itself is never written with zero
/// keys; the parent repair rewrites or releases it.
struct Underflow {
    survivor: NodeOffset,
}

/// A 2-3 search tree persisted in an [`IndexFile`].
///
/// Every node holds one or two keys and the tree is perfectly balanced:
/// all leaves sit at the same depth. Keys are unique; each key carries
/// the data-file slot of its record. The tree owns the index file and
/// rewrites the file header once, at the end of every mutating operation.
pub struct TwoThreeTree {
    file: IndexFile,
}

impl TwoThreeTree {
    pub fn new(file: IndexFile) -> Self {
        Self { file }
    }

    pub fn file(&self) -> &IndexFile {
        &self.file
    }

    pub fn is_empty(&self) -> bool {
        !self.file.root().is_valid()
    }

    /// Descends from the root looking for `key`. Returns the record slot
    /// bound to it, or `None` if the key is absent. Visits exactly one
    /// root-to-leaf path.
    pub fn search(&self, key: i32) -> Result<Option<SlotIndex>> {
        let mut current = self.file.root();

        while current.is_valid() {
            let node = self.file.read_node(current)?;
            if key == node.keys[0] {
                return Ok(Some(node.slots[0]));
            }
            if node.num_keys == 2 && key == node.keys[1] {
                return Ok(Some(node.slots[1]));
            }
            current = node.children[descend_index(&node, key)];
        }

        Ok(None)
    }

    /// Inserts `key` bound to `slot`. Fails with [`StoreError::DuplicateKey`]
    /// before any file write if the key already exists.
    pub fn insert(&mut self, key: i32, slot: SlotIndex) -> Result<()> {
        let root = self.file.root();

        if !root.is_valid() {
            let offset = self.file.allocate_node()?;
            self.file.write_node(offset, &Node::leaf(key, slot))?;
            self.file.set_root(offset);
        } else if let Some(split) = self.insert_rec(root, key, slot)? {
            // The split reached the root: grow the tree by one level.
            let offset = self.file.allocate_node()?;
            let new_root = Node::branch(split.key, split.slot, root, split.right);
            self.file.write_node(offset, &new_root)?;
            self.file.set_root(offset);
        }

        self.file.commit_header()
    }

    fn insert_rec(&mut self, offset: NodeOffset, key: i32, slot: SlotIndex) -> Result<Option<Split>> {
        let node = self.file.read_node(offset)?;

        if key == node.keys[0] || (node.num_keys == 2 && key == node.keys[1]) {
            return Err(StoreError::DuplicateKey(key));
        }

        if node.is_leaf() {
            return self.absorb(offset, node, key, slot, INVALID_NODE_OFFSET);
        }

        let idx = descend_index(&node, key);
        match self.insert_rec(node.children[idx], key, slot)? {
            None => Ok(None),
            Some(split) => self.absorb(offset, node, split.key, split.slot, split.right),
        }
    }

    /// Places an entry into `node`. `right_child` is the subtree holding
    /// the keys just greater than `key` (`-1` at leaf level); it always
    /// lands in the child position immediately right of the entry.
    fn absorb(
        &mut self,
        offset: NodeOffset,
        mut node: Node,
        key: i32,
        slot: SlotIndex,
        right_child: NodeOffset,
    ) -> Result<Option<Split>> {
        if node.num_keys == 1 {
            if key < node.keys[0] {
                node.keys = [key, node.keys[0]];
                node.slots = [slot, node.slots[0]];
                node.children = [node.children[0], right_child, node.children[1]];
            } else {
                node.keys[1] = key;
                node.slots[1] = slot;
                node.children[2] = right_child;
            }
            node.num_keys = 2;
            self.file.write_node(offset, &node)?;
            return Ok(None);
        }

        self.split_insert(offset, node, key, slot, right_child).map(Some)
    }

    /// Splits a full node around the incoming entry. Of the three
    /// candidate keys the middle one is promoted; the smallest stays in
    /// the shrunken node at `offset`, the largest moves to a new sibling.
    fn split_insert(
        &mut self,
        offset: NodeOffset,
        node: Node,
        key: i32,
        slot: SlotIndex,
        right_child: NodeOffset,
    ) -> Result<Split> {
        let [c0, c1, c2] = node.children;

        let (left, right, promoted_key, promoted_slot) = if key > node.keys[1] {
            // Incoming entry is the largest: promote the old right key.
            (
                Node::branch(node.keys[0], node.slots[0], c0, c1),
                Node::branch(key, slot, c2, right_child),
                node.keys[1],
                node.slots[1],
            )
        } else if key < node.keys[0] {
            // Incoming entry is the smallest: promote the old left key.
            (
                Node::branch(key, slot, c0, right_child),
                Node::branch(node.keys[1], node.slots[1], c1, c2),
                node.keys[0],
                node.slots[0],
            )
        } else {
            // Incoming entry is the middle value: promote it as-is.
            (
                Node::branch(node.keys[0], node.slots[0], c0, c1),
                Node::branch(node.keys[1], node.slots[1], right_child, c2),
                key,
                slot,
            )
        };

        let new_offset = self.file.allocate_node()?;
        self.file.write_node(new_offset, &right)?;
        self.file.write_node(offset, &left)?;

        Ok(Split {
            key: promoted_key,
            slot: promoted_slot,
            right: new_offset,
        })
    }

    /// Removes `key`, returning the record slot it was bound to. Fails
    /// with [`StoreError::NotFound`] if the key is absent.
    pub fn remove(&mut self, key: i32) -> Result<SlotIndex> {
        let root = self.file.root();
        if !root.is_valid() {
            return Err(StoreError::NotFound(key));
        }

        let (slot, outcome) = self.remove_rec(root, key)?;
        if let Some(underflow) = outcome {
            // Root collapse: the tree shrinks by one level (or empties).
            self.file.release_node(root)?;
            self.file.set_root(underflow.survivor);
        }

        self.file.commit_header()?;
        Ok(slot)
    }

    fn remove_rec(&mut self, offset: NodeOffset, key: i32) -> Result<(SlotIndex, Option<Underflow>)> {
        let mut node = self.file.read_node(offset)?;

        let hit = if key == node.keys[0] {
            Some(0)
        } else if node.num_keys == 2 && key == node.keys[1] {
            Some(1)
        } else {
            None
        };

        match hit {
            Some(pos) if node.is_leaf() => {
                let slot = node.slots[pos];
                if node.num_keys == 2 {
                    if pos == 0 {
                        node.keys[0] = node.keys[1];
                        node.slots[0] = node.slots[1];
                    }
                    node.num_keys = 1;
                    self.file.write_node(offset, &node)?;
                    Ok((slot, None))
                } else {
                    Ok((slot, Some(Underflow { survivor: INVALID_NODE_OFFSET })))
                }
            }
            Some(pos) => {
                // Internal hit: swap in the in-order successor (the
                // smallest key right of `key`), then delete the
                // successor from that subtree. It lives in a leaf.
                let slot = node.slots[pos];
                let subtree = node.children[pos + 1];
                let (succ_key, succ_slot) = self.min_entry(subtree)?;
                node.keys[pos] = succ_key;
                node.slots[pos] = succ_slot;
                self.file.write_node(offset, &node)?;

                let (_, child_outcome) = self.remove_rec(subtree, succ_key)?;
                let outcome = match child_outcome {
                    None => None,
                    Some(u) => self.repair(offset, node, pos + 1, u)?,
                };
                Ok((slot, outcome))
            }
            None if node.is_leaf() => Err(StoreError::NotFound(key)),
            None => {
                let idx = descend_index(&node, key);
                let (slot, child_outcome) = self.remove_rec(node.children[idx], key)?;
                let outcome = match child_outcome {
                    None => None,
                    Some(u) => self.repair(offset, node, idx, u)?,
                };
                Ok((slot, outcome))
            }
        }
    }

    /// Smallest entry of the subtree at `offset`.
    fn min_entry(&self, offset: NodeOffset) -> Result<(i32, SlotIndex)> {
        let mut current = offset;
        loop {
            let node = self.file.read_node(current)?;
            if node.is_leaf() {
                return Ok((node.keys[0], node.slots[0]));
            }
            current = node.children[0];
        }
    }

    /// Repairs the deficient child at `parent.children[deficient_idx]`,
    /// either by rotating a key through the parent from a 2-key sibling
    /// or by merging with a 1-key sibling. Returns the parent's own
    /// underflow outcome, which the caller propagates.
    fn repair(
        &mut self,
        parent_offset: NodeOffset,
        mut parent: Node,
        deficient_idx: usize,
        u: Underflow,
    ) -> Result<Option<Underflow>> {
        let d_off = parent.children[deficient_idx];
        let d_child = u.survivor;

        // Sibling selection: the adjacent sibling is the middle child,
        // except for a deficient middle child, which borrows from the
        // left sibling in a 1-key parent and the right one otherwise.
        let sibling_idx = match deficient_idx {
            0 | 2 => 1,
            _ if parent.num_keys == 1 => 0,
            _ => 2,
        };
        let s_off = parent.children[sibling_idx];
        let sibling = self.file.read_node(s_off)?;

        if sibling.num_keys == 2 {
            // Redistribute: the separator drops into the deficient node
            // and the sibling's adjacent extremal key replaces it.
            let (repaired, shrunk) = match (deficient_idx, sibling_idx) {
                (0, 1) => {
                    let repaired =
                        Node::branch(parent.keys[0], parent.slots[0], d_child, sibling.children[0]);
                    parent.keys[0] = sibling.keys[0];
                    parent.slots[0] = sibling.slots[0];
                    let shrunk = Node::branch(
                        sibling.keys[1],
                        sibling.slots[1],
                        sibling.children[1],
                        sibling.children[2],
                    );
                    (repaired, shrunk)
                }
                (2, 1) => {
                    let repaired =
                        Node::branch(parent.keys[1], parent.slots[1], sibling.children[2], d_child);
                    parent.keys[1] = sibling.keys[1];
                    parent.slots[1] = sibling.slots[1];
                    let shrunk = Node::branch(
                        sibling.keys[0],
                        sibling.slots[0],
                        sibling.children[0],
                        sibling.children[1],
                    );
                    (repaired, shrunk)
                }
                (1, 0) => {
                    let repaired =
                        Node::branch(parent.keys[0], parent.slots[0], sibling.children[2], d_child);
                    parent.keys[0] = sibling.keys[1];
                    parent.slots[0] = sibling.slots[1];
                    let shrunk = Node::branch(
                        sibling.keys[0],
                        sibling.slots[0],
                        sibling.children[0],
                        sibling.children[1],
                    );
                    (repaired, shrunk)
                }
                _ => {
                    // (1, 2)
                    let repaired =
                        Node::branch(parent.keys[1], parent.slots[1], d_child, sibling.children[0]);
                    parent.keys[1] = sibling.keys[0];
                    parent.slots[1] = sibling.slots[0];
                    let shrunk = Node::branch(
                        sibling.keys[1],
                        sibling.slots[1],
                        sibling.children[1],
                        sibling.children[2],
                    );
                    (repaired, shrunk)
                }
            };

            self.file.write_node(d_off, &repaired)?;
            self.file.write_node(s_off, &shrunk)?;
            self.file.write_node(parent_offset, &parent)?;
            return Ok(None);
        }

        // Merge: fold the separator and the sibling's entry into a single
        // 2-key node written over the deficient slot; the emptied sibling
        // goes to the free-list and the parent loses a key and a child.
        let merged = match (deficient_idx, sibling_idx) {
            (0, 1) => Node {
                num_keys: 2,
                keys: [parent.keys[0], sibling.keys[0]],
                slots: [parent.slots[0], sibling.slots[0]],
                children: [d_child, sibling.children[0], sibling.children[1]],
            },
            (2, 1) => Node {
                num_keys: 2,
                keys: [sibling.keys[0], parent.keys[1]],
                slots: [sibling.slots[0], parent.slots[1]],
                children: [sibling.children[0], sibling.children[1], d_child],
            },
            (1, 0) => Node {
                num_keys: 2,
                keys: [sibling.keys[0], parent.keys[0]],
                slots: [sibling.slots[0], parent.slots[0]],
                children: [sibling.children[0], sibling.children[1], d_child],
            },
            _ => Node {
                // (1, 2)
                num_keys: 2,
                keys: [parent.keys[1], sibling.keys[0]],
                slots: [parent.slots[1], sibling.slots[0]],
                children: [d_child, sibling.children[0], sibling.children[1]],
            },
        };

        self.file.write_node(d_off, &merged)?;
        self.file.release_node(s_off)?;

        if parent.num_keys == 2 {
            // The merge consumed keys[0] when the left child was
            // deficient and keys[1] otherwise.
            parent = if deficient_idx == 0 {
                Node::branch(parent.keys[1], parent.slots[1], d_off, parent.children[2])
            } else {
                Node::branch(parent.keys[0], parent.slots[0], parent.children[0], d_off)
            };
            self.file.write_node(parent_offset, &parent)?;
            Ok(None)
        } else {
            // The parent lost its only key; hand its surviving child up.
            Ok(Some(Underflow { survivor: d_off }))
        }
    }

    /// Number of keys in the tree: the user-visible record count.
    pub fn total_keys(&self) -> Result<usize> {
        self.sum_keys(self.file.root())
    }

    fn sum_keys(&self, offset: NodeOffset) -> Result<usize> {
        if !offset.is_valid() {
            return Ok(0);
        }
        let node = self.file.read_node(offset)?;
        let mut total = node.num_keys as usize;
        for child in node.children {
            total += self.sum_keys(child)?;
        }
        Ok(total)
    }

    /// Number of live nodes in the tree.
    pub fn node_count(&self) -> Result<usize> {
        self.count_nodes(self.file.root())
    }

    fn count_nodes(&self, offset: NodeOffset) -> Result<usize> {
        if !offset.is_valid() {
            return Ok(0);
        }
        let node = self.file.read_node(offset)?;
        let mut total = 1;
        for child in node.children {
            total += self.count_nodes(child)?;
        }
        Ok(total)
    }

    /// Keys in ascending order.
    pub fn keys_in_order(&self) -> Result<Vec<i32>> {
        let mut out = Vec::new();
        self.in_order(self.file.root(), &mut out)?;
        Ok(out)
    }

    fn in_order(&self, offset: NodeOffset, out: &mut Vec<i32>) -> Result<()> {
        if !offset.is_valid() {
            return Ok(());
        }
        let node = self.file.read_node(offset)?;
        self.in_order(node.children[0], out)?;
        out.push(node.keys[0]);
        self.in_order(node.children[1], out)?;
        if node.num_keys == 2 {
            out.push(node.keys[1]);
            self.in_order(node.children[2], out)?;
        }
        Ok(())
    }

    /// Keys grouped by depth, root level first. Drives the level-order
    /// tree view in the menu.
    pub fn levels(&self) -> Result<Vec<Vec<i32>>> {
        let mut out = Vec::new();
        self.collect_level(self.file.root(), 0, &mut out)?;
        Ok(out)
    }

    fn collect_level(
        &self,
        offset: NodeOffset,
        depth: usize,
        out: &mut Vec<Vec<i32>>,
    ) -> Result<()> {
        if !offset.is_valid() {
            return Ok(());
        }
        let node = self.file.read_node(offset)?;
        if out.len() == depth {
            out.push(Vec::new());
        }
        out[depth].push(node.keys[0]);
        if node.num_keys == 2 {
            out[depth].push(node.keys[1]);
        }
        for child in node.children {
            self.collect_level(child, depth + 1, out)?;
        }
        Ok(())
    }

    /// Edges on the path from the root down to leaf level: 0 for an
    /// empty tree or a lone leaf root.
    pub fn height(&self) -> Result<usize> {
        let mut height = 0;
        let mut current = self.file.root();
        while current.is_valid() {
            let node = self.file.read_node(current)?;
            if node.is_leaf() {
                break;
            }
            current = node.children[0];
            height += 1;
        }
        Ok(height)
    }
}

/// Index of the child interval `key` falls into.
fn descend_index(node: &Node, key: i32) -> usize {
    if key < node.keys[0] {
        0
    } else if node.num_keys == 1 || key < node.keys[1] {
        1
    } else {
        2
    }
}
