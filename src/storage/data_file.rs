use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::common::{
    Result, SlotIndex, StoreError, DATA_HEADER_SIZE, RECORD_SIZE, TOMBSTONE_CODE,
};
use crate::record::Book;

/// Byte position, within a slot image, of the next-free link used while
/// the slot sits on the free-list (right after the tombstoned `code`).
const FREE_LINK_OFFSET: u64 = 4;

/// Header of the data file.
///
/// `first_empty` is the slot index a fresh allocation would use when the
/// free-list is empty; it equals the number of slots the file has ever
/// held. `head_empty` is the slot index heading the singly-linked list of
/// released slots, `-1` when the list is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataFileHeader {
    pub first_empty: i32,
    pub head_empty: i32,
}

impl DataFileHeader {
    fn new() -> Self {
        Self {
            first_empty: 0,
            head_empty: -1,
        }
    }

    fn write_to(&self, buf: &mut [u8]) {
        assert_eq!(buf.len(), DATA_HEADER_SIZE);
        buf[0..4].copy_from_slice(&self.first_empty.to_le_bytes());
        buf[4..8].copy_from_slice(&self.head_empty.to_le_bytes());
    }

    fn read_from(buf: &[u8]) -> Self {
        assert_eq!(buf.len(), DATA_HEADER_SIZE);
        Self {
            first_empty: i32::from_le_bytes(buf[0..4].try_into().unwrap()),
            head_empty: i32::from_le_bytes(buf[4..8].try_into().unwrap()),
        }
    }
}

/// DataFile manages the record file: fixed-size book slots after an
/// 8-byte header, plus the header-resident free-list of released slots.
///
/// The header is read once at open and cached; mutating operations update
/// the cache and the owner rewrites it with [`commit_header`] as the last
/// write of the enclosing store operation, so payload and free-list link
/// writes always land before the header does.
///
/// [`commit_header`]: DataFile::commit_header
pub struct DataFile {
    file: Mutex<File>,
    path: PathBuf,
    header: DataFileHeader,
}

impl DataFile {
    /// Opens (or creates) the data file at `path`. A fresh file gets an
    /// empty header; an existing file has its header and free-list
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
        let mut df = Self {
            file: Mutex::new(file),
            path,
            header: DataFileHeader::new(),
        };

        if len == 0 {
            df.commit_header()?;
        } else {
            df.header = df.read_header()?;
            df.validate(len)?;
        }

        Ok(df)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> DataFileHeader {
        self.header
    }

    /// Number of slots the file holds, live and free alike.
    pub fn slot_count(&self) -> i32 {
        self.header.first_empty
    }

    fn slot_position(slot: SlotIndex) -> u64 {
        DATA_HEADER_SIZE as u64 + slot.as_i32() as u64 * RECORD_SIZE as u64
    }

    /// Returns a slot a new record may be written to, preferring the
    /// free-list head and advancing the header past it.
    pub fn allocate_slot(&mut self) -> Result<SlotIndex> {
        if self.header.head_empty != -1 {
            let slot = SlotIndex::new(self.header.head_empty);
            self.header.head_empty = self.read_free_link(slot)?;
            Ok(slot)
        } else {
            let slot = SlotIndex::new(self.header.first_empty);
            self.header.first_empty += 1;
            Ok(slot)
        }
    }

    /// Tombstones `slot` and links it at the head of the free-list.
    pub fn release_slot(&mut self, slot: SlotIndex) -> Result<()> {
        let pos = Self::slot_position(slot);
        let mut file = self.file.lock();

        file.seek(SeekFrom::Start(pos))?;
        file.write_all(&TOMBSTONE_CODE.to_le_bytes())?;
        file.seek(SeekFrom::Start(pos + FREE_LINK_OFFSET))?;
        file.write_all(&self.header.head_empty.to_le_bytes())?;
        file.flush()?;
        drop(file);

        self.header.head_empty = slot.as_i32();
        Ok(())
    }

    /// Writes a record image into `slot`.
    pub fn write_record(&self, slot: SlotIndex, book: &Book) -> Result<()> {
        let mut buf = [0u8; RECORD_SIZE];
        book.write_to(&mut buf);

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(Self::slot_position(slot)))?;
        file.write_all(&buf)?;
        file.flush()?;
        Ok(())
    }

    /// Reads the record image stored in `slot`.
    pub fn read_record(&self, slot: SlotIndex) -> Result<Book> {
        let mut buf = [0u8; RECORD_SIZE];

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(Self::slot_position(slot)))?;
        file.read_exact(&mut buf)?;
        drop(file);

        Ok(Book::read_from(&buf))
    }

    /// Reads just the `code` field of `slot`.
    pub fn read_code(&self, slot: SlotIndex) -> Result<i32> {
        let mut buf = [0u8; 4];

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(Self::slot_position(slot)))?;
        file.read_exact(&mut buf)?;

        Ok(i32::from_le_bytes(buf))
    }

    /// Linear pass over every slot in index order, invoking `f` for each
    /// live record and skipping tombstones.
    pub fn for_each_live<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(SlotIndex, Book) -> Result<()>,
    {
        for i in 0..self.header.first_empty {
            let slot = SlotIndex::new(i);
            let book = self.read_record(slot)?;
            if !book.is_tombstone() {
                f(slot, book)?;
            }
        }
        Ok(())
    }

    /// Rewrites the cached header. Callers invoke this as the final step
    /// of a mutating operation.
    pub fn commit_header(&mut self) -> Result<()> {
        let mut buf = [0u8; DATA_HEADER_SIZE];
        self.header.write_to(&mut buf);

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&buf)?;
        file.flush()?;
        Ok(())
    }

    fn read_header(&self) -> Result<DataFileHeader> {
        let mut buf = [0u8; DATA_HEADER_SIZE];

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut buf)?;

        Ok(DataFileHeader::read_from(&buf))
    }

    fn read_free_link(&self, slot: SlotIndex) -> Result<i32> {
        let mut buf = [0u8; 4];

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(Self::slot_position(slot) + FREE_LINK_OFFSET))?;
        file.read_exact(&mut buf)?;

        Ok(i32::from_le_bytes(buf))
    }

    /// Snapshot of the free-list, head first.
    pub fn free_slots(&self) -> Result<Vec<SlotIndex>> {
        let mut out = Vec::new();
        let mut current = self.header.head_empty;
        // One step past the slot count is already proof of a cycle.
        let limit = self.header.first_empty as usize + 1;

        while current != -1 {
            if out.len() >= limit {
                return Err(StoreError::CorruptIndex(
                    "data file free-list does not terminate".to_string(),
                ));
            }
            if current < 0 || current >= self.header.first_empty {
                return Err(StoreError::CorruptIndex(format!(
                    "data file free-list entry {} out of bounds",
                    current
                )));
            }
            let slot = SlotIndex::new(current);
            out.push(slot);
            current = self.read_free_link(slot)?;
        }

        Ok(out)
    }

    fn validate(&self, len: u64) -> Result<()> {
        let header = &self.header;
        if header.first_empty < 0 || header.head_empty < -1 {
            return Err(StoreError::CorruptIndex(
                "data file header fields out of range".to_string(),
            ));
        }

        let expected = DATA_HEADER_SIZE as u64 + header.first_empty as u64 * RECORD_SIZE as u64;
        if len < expected {
            return Err(StoreError::CorruptIndex(format!(
                "data file shorter than its header claims ({} < {})",
                len, expected
            )));
        }

        // Every free-listed slot must be a tombstone.
        for slot in self.free_slots()? {
            if self.read_code(slot)? != TOMBSTONE_CODE {
                return Err(StoreError::CorruptIndex(format!(
                    "free-listed slot {} holds a live record",
                    slot.as_i32()
                )));
            }
        }

        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }
}

impl Drop for DataFile {
    fn drop(&mut self) {
        let _ = self.file.get_mut().sync_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(code: i32) -> Book {
        Book {
            code,
            title: format!("Title {}", code),
            author: "Author".to_string(),
            publisher: "Publisher".to_string(),
            edition: 1,
            year: 2020,
            price: 10.0,
            stock_quantity: 3,
        }
    }

    #[test]
    fn test_data_file_new() {
        let dir = tempfile::tempdir().unwrap();
        let df = DataFile::open(dir.path().join("books.dat")).unwrap();

        assert_eq!(df.header(), DataFileHeader::new());
        assert_eq!(df.slot_count(), 0);
    }

    #[test]
    fn test_allocate_fresh_slots() {
        let dir = tempfile::tempdir().unwrap();
        let mut df = DataFile::open(dir.path().join("books.dat")).unwrap();

        assert_eq!(df.allocate_slot().unwrap(), SlotIndex::new(0));
        assert_eq!(df.allocate_slot().unwrap(), SlotIndex::new(1));
        assert_eq!(df.slot_count(), 2);
    }

    #[test]
    fn test_release_and_reuse_is_lifo() {
        let dir = tempfile::tempdir().unwrap();
        let mut df = DataFile::open(dir.path().join("books.dat")).unwrap();

        for code in 0..3 {
            let slot = df.allocate_slot().unwrap();
            df.write_record(slot, &sample(code)).unwrap();
        }

        df.release_slot(SlotIndex::new(0)).unwrap();
        df.release_slot(SlotIndex::new(2)).unwrap();

        // The allocator must hand back the old head first, then advance.
        assert_eq!(df.allocate_slot().unwrap(), SlotIndex::new(2));
        assert_eq!(df.allocate_slot().unwrap(), SlotIndex::new(0));
        // List drained; the next allocation is fresh.
        assert_eq!(df.allocate_slot().unwrap(), SlotIndex::new(3));
    }

    #[test]
    fn test_free_list_snapshot_terminates() {
        let dir = tempfile::tempdir().unwrap();
        let mut df = DataFile::open(dir.path().join("books.dat")).unwrap();

        for code in 0..4 {
            let slot = df.allocate_slot().unwrap();
            df.write_record(slot, &sample(code)).unwrap();
        }
        df.release_slot(SlotIndex::new(1)).unwrap();
        df.release_slot(SlotIndex::new(3)).unwrap();

        let free = df.free_slots().unwrap();
        assert_eq!(free, vec![SlotIndex::new(3), SlotIndex::new(1)]);
    }

    #[test]
    fn test_record_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut df = DataFile::open(dir.path().join("books.dat")).unwrap();

        let book = sample(7);
        let slot = df.allocate_slot().unwrap();
        df.write_record(slot, &book).unwrap();

        assert_eq!(df.read_record(slot).unwrap(), book);
        assert_eq!(df.read_code(slot).unwrap(), 7);
    }

    #[test]
    fn test_header_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("books.dat");

        {
            let mut df = DataFile::open(&path).unwrap();
            for code in 0..2 {
                let slot = df.allocate_slot().unwrap();
                df.write_record(slot, &sample(code)).unwrap();
            }
            df.release_slot(SlotIndex::new(0)).unwrap();
            df.commit_header().unwrap();
        }

        {
            let df = DataFile::open(&path).unwrap();
            assert_eq!(df.header().first_empty, 2);
            assert_eq!(df.header().head_empty, 0);
            assert_eq!(df.free_slots().unwrap(), vec![SlotIndex::new(0)]);
        }
    }

    #[test]
    fn test_scan_skips_tombstones() {
        let dir = tempfile::tempdir().unwrap();
        let mut df = DataFile::open(dir.path().join("books.dat")).unwrap();

        for code in 0..3 {
            let slot = df.allocate_slot().unwrap();
            df.write_record(slot, &sample(code)).unwrap();
        }
        df.release_slot(SlotIndex::new(1)).unwrap();

        let mut seen = Vec::new();
        df.for_each_live(|_, book| {
            seen.push(book.code);
            Ok(())
        })
        .unwrap();

        assert_eq!(seen, vec![0, 2]);
    }
}
