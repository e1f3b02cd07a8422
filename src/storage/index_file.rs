use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::common::{NodeOffset, Result, StoreError, INDEX_HEADER_SIZE, NODE_SIZE};
use crate::index::Node;

/// Header of the index file.
///
/// `root` is the byte offset of the tree root, `-1` for an empty tree.
/// `first_empty` is the byte offset a fresh node allocation would use when
/// the free-list is empty. `head_empty` heads the singly-linked list of
/// released nodes, `-1` when the list is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexFileHeader {
    pub root: i32,
    pub first_empty: i32,
    pub head_empty: i32,
}

impl IndexFileHeader {
    fn new() -> Self {
        Self {
            root: -1,
            first_empty: INDEX_HEADER_SIZE as i32,
            head_empty: -1,
        }
    }

    fn write_to(&self, buf: &mut [u8]) {
        assert_eq!(buf.len(), INDEX_HEADER_SIZE);
        buf[0..4].copy_from_slice(&self.root.to_le_bytes());
        buf[4..8].copy_from_slice(&self.first_empty.to_le_bytes());
        buf[8..12].copy_from_slice(&self.head_empty.to_le_bytes());
    }

    fn read_from(buf: &[u8]) -> Self {
        assert_eq!(buf.len(), INDEX_HEADER_SIZE);
        Self {
            root: i32::from_le_bytes(buf[0..4].try_into().unwrap()),
            first_empty: i32::from_le_bytes(buf[4..8].try_into().unwrap()),
            head_empty: i32::from_le_bytes(buf[8..12].try_into().unwrap()),
        }
    }
}

/// IndexFile manages the tree file: fixed-size node blocks after a
/// 12-byte header, the header-resident root pointer, and the free-list of
/// released nodes.
///
/// All node addresses are byte offsets from the start of the file, the
/// header included, so the first node ever allocated sits at offset 12.
/// As with [`DataFile`], the header is cached at open and rewritten with
/// [`commit_header`] as the final write of the enclosing operation.
///
/// [`DataFile`]: crate::storage::DataFile
/// [`commit_header`]: IndexFile::commit_header
pub struct IndexFile {
    file: Mutex<File>,
    path: PathBuf,
    header: IndexFileHeader,
}

impl IndexFile {
    /// Opens (or creates) the index file at `path`. A fresh file gets an
    /// empty-tree header; an existing file has its header and free-list
    /// validated.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let len = file.metadata()?.len();
        let mut ix = Self {
            file: Mutex::new(file),
            path,
            header: IndexFileHeader::new(),
        };

        if len == 0 {
            ix.commit_header()?;
        } else {
            ix.header = ix.read_header()?;
            ix.validate(len)?;
        }

        Ok(ix)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> IndexFileHeader {
        self.header
    }

    /// Offset of the root node, or the `-1` sentinel for an empty tree.
    pub fn root(&self) -> NodeOffset {
        NodeOffset::new(self.header.root)
    }

    pub fn set_root(&mut self, root: NodeOffset) {
        self.header.root = root.as_i32();
    }

    /// Returns an offset a new node may be written to, preferring the
    /// free-list head and advancing the header past it.
    pub fn allocate_node(&mut self) -> Result<NodeOffset> {
        if self.header.head_empty != -1 {
            let offset = NodeOffset::new(self.header.head_empty);
            self.header.head_empty = self.read_free_link(offset)?;
            Ok(offset)
        } else {
            let offset = NodeOffset::new(self.header.first_empty);
            self.header.first_empty += NODE_SIZE as i32;
            Ok(offset)
        }
    }

    /// Links the node at `offset` onto the free-list. Its first four
    /// bytes are overwritten with the next-free link; the rest of the
    /// image is dead.
    pub fn release_node(&mut self, offset: NodeOffset) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset.as_u64()))?;
        file.write_all(&self.header.head_empty.to_le_bytes())?;
        file.flush()?;
        drop(file);

        self.header.head_empty = offset.as_i32();
        Ok(())
    }

    /// Writes a node image at `offset`.
    pub fn write_node(&self, offset: NodeOffset, node: &Node) -> Result<()> {
        let mut buf = [0u8; NODE_SIZE];
        node.write_to(&mut buf);

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset.as_u64()))?;
        file.write_all(&buf)?;
        file.flush()?;
        Ok(())
    }

    /// Reads and structurally validates the node at `offset`.
    pub fn read_node(&self, offset: NodeOffset) -> Result<Node> {
        self.check_offset(offset)?;

        let mut buf = [0u8; NODE_SIZE];
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset.as_u64()))?;
        file.read_exact(&mut buf)?;
        drop(file);

        let node = Node::read_from(&buf);
        if node.num_keys != 1 && node.num_keys != 2 {
            return Err(StoreError::CorruptIndex(format!(
                "node at {} has {} keys",
                offset.as_i32(),
                node.num_keys
            )));
        }
        for child in node.children {
            if child.is_valid() {
                self.check_offset(child)?;
            }
        }

        Ok(node)
    }

    fn check_offset(&self, offset: NodeOffset) -> Result<()> {
        let off = offset.as_i32();
        let aligned = (off - INDEX_HEADER_SIZE as i32) % NODE_SIZE as i32 == 0;
        if off < INDEX_HEADER_SIZE as i32 || !aligned || off >= self.header.first_empty {
            return Err(StoreError::CorruptIndex(format!(
                "node offset {} out of bounds",
                off
            )));
        }
        Ok(())
    }

    /// Rewrites the cached header. Callers invoke this as the final step
    /// of a mutating operation.
    pub fn commit_header(&mut self) -> Result<()> {
        let mut buf = [0u8; INDEX_HEADER_SIZE];
        self.header.write_to(&mut buf);

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&buf)?;
        file.flush()?;
        Ok(())
    }

    fn read_header(&self) -> Result<IndexFileHeader> {
        let mut buf = [0u8; INDEX_HEADER_SIZE];

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut buf)?;

        Ok(IndexFileHeader::read_from(&buf))
    }

    fn read_free_link(&self, offset: NodeOffset) -> Result<i32> {
        let mut buf = [0u8; 4];

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset.as_u64()))?;
        file.read_exact(&mut buf)?;

        Ok(i32::from_le_bytes(buf))
    }

    /// Snapshot of the free-list, head first.
    pub fn free_nodes(&self) -> Result<Vec<NodeOffset>> {
        let mut out = Vec::new();
        let mut current = self.header.head_empty;
        let capacity =
            (self.header.first_empty - INDEX_HEADER_SIZE as i32) / NODE_SIZE as i32;
        let limit = capacity as usize + 1;

        while current != -1 {
            if out.len() >= limit {
                return Err(StoreError::CorruptIndex(
                    "index file free-list does not terminate".to_string(),
                ));
            }
            let offset = NodeOffset::new(current);
            self.check_offset(offset)
                .map_err(|_| StoreError::CorruptIndex(format!(
                    "index file free-list entry {} out of bounds",
                    current
                )))?;
            out.push(offset);
            current = self.read_free_link(offset)?;
        }

        Ok(out)
    }

    fn validate(&self, len: u64) -> Result<()> {
        let header = &self.header;
        let aligned = |off: i32| (off - INDEX_HEADER_SIZE as i32) % NODE_SIZE as i32 == 0;

        if header.first_empty < INDEX_HEADER_SIZE as i32 || !aligned(header.first_empty) {
            return Err(StoreError::CorruptIndex(
                "index file header: bad allocation frontier".to_string(),
            ));
        }
        if len < header.first_empty as u64 {
            return Err(StoreError::CorruptIndex(format!(
                "index file shorter than its header claims ({} < {})",
                len, header.first_empty
            )));
        }
        if header.root != -1
            && (header.root < INDEX_HEADER_SIZE as i32
                || !aligned(header.root)
                || header.root >= header.first_empty)
        {
            return Err(StoreError::CorruptIndex(format!(
                "index file header: root offset {} out of bounds",
                header.root
            )));
        }

        self.free_nodes()?;
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }
}

impl Drop for IndexFile {
    fn drop(&mut self) {
        let _ = self.file.get_mut().sync_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::SlotIndex;

    #[test]
    fn test_index_file_new() {
        let dir = tempfile::tempdir().unwrap();
        let ix = IndexFile::open(dir.path().join("index.dat")).unwrap();

        assert_eq!(ix.header(), IndexFileHeader::new());
        assert!(!ix.root().is_valid());
    }

    #[test]
    fn test_allocate_fresh_nodes_are_contiguous() {
        let dir = tempfile::tempdir().unwrap();
        let mut ix = IndexFile::open(dir.path().join("index.dat")).unwrap();

        let first = ix.allocate_node().unwrap();
        let second = ix.allocate_node().unwrap();

        assert_eq!(first.as_i32(), INDEX_HEADER_SIZE as i32);
        assert_eq!(second.as_i32(), first.as_i32() + NODE_SIZE as i32);
    }

    #[test]
    fn test_release_and_reuse_is_lifo() {
        let dir = tempfile::tempdir().unwrap();
        let mut ix = IndexFile::open(dir.path().join("index.dat")).unwrap();

        let offsets: Vec<NodeOffset> = (0..3)
            .map(|i| {
                let off = ix.allocate_node().unwrap();
                ix.write_node(off, &Node::leaf(i, SlotIndex::new(i))).unwrap();
                off
            })
            .collect();

        ix.release_node(offsets[0]).unwrap();
        ix.release_node(offsets[2]).unwrap();

        // Old head first, then its successor.
        assert_eq!(ix.allocate_node().unwrap(), offsets[2]);
        assert_eq!(ix.allocate_node().unwrap(), offsets[0]);
        // Drained: next allocation extends the file.
        let fresh = ix.allocate_node().unwrap();
        assert_eq!(
            fresh.as_i32(),
            INDEX_HEADER_SIZE as i32 + 3 * NODE_SIZE as i32
        );
    }

    #[test]
    fn test_node_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut ix = IndexFile::open(dir.path().join("index.dat")).unwrap();

        let off = ix.allocate_node().unwrap();
        let node = Node::leaf(99, SlotIndex::new(4));
        ix.write_node(off, &node).unwrap();

        assert_eq!(ix.read_node(off).unwrap(), node);
    }

    #[test]
    fn test_read_node_rejects_bad_key_count() {
        let dir = tempfile::tempdir().unwrap();
        let mut ix = IndexFile::open(dir.path().join("index.dat")).unwrap();

        let off = ix.allocate_node().unwrap();
        let mut node = Node::leaf(1, SlotIndex::new(0));
        node.num_keys = 3;
        ix.write_node(off, &node).unwrap();

        assert!(matches!(
            ix.read_node(off),
            Err(StoreError::CorruptIndex(_))
        ));
    }

    #[test]
    fn test_read_node_rejects_unaligned_offset() {
        let dir = tempfile::tempdir().unwrap();
        let mut ix = IndexFile::open(dir.path().join("index.dat")).unwrap();

        ix.allocate_node().unwrap();

        assert!(matches!(
            ix.read_node(NodeOffset::new(INDEX_HEADER_SIZE as i32 + 1)),
            Err(StoreError::CorruptIndex(_))
        ));
    }

    #[test]
    fn test_header_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.dat");

        let (root, released) = {
            let mut ix = IndexFile::open(&path).unwrap();
            let root = ix.allocate_node().unwrap();
            ix.write_node(root, &Node::leaf(5, SlotIndex::new(0))).unwrap();
            let other = ix.allocate_node().unwrap();
            ix.write_node(other, &Node::leaf(6, SlotIndex::new(1))).unwrap();
            ix.release_node(other).unwrap();
            ix.set_root(root);
            ix.commit_header().unwrap();
            (root, other)
        };

        {
            let ix = IndexFile::open(&path).unwrap();
            assert_eq!(ix.root(), root);
            assert_eq!(ix.free_nodes().unwrap(), vec![released]);
            assert_eq!(ix.read_node(root).unwrap().keys[0], 5);
        }
    }
}
