use std::io::BufRead;
use std::path::Path;

use crate::common::{NodeOffset, Result, SlotIndex, StoreError};
use crate::index::TwoThreeTree;
use crate::record::{text, Book};
use crate::storage::{DataFile, IndexFile};

/// Tally of one batch import run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
    pub duplicates: usize,
    pub malformed: usize,
}

/// The book store: a [`DataFile`] of record slots paired with the 2-3
/// tree index that maps book codes to slots.
///
/// All mutations go through the tree so the two files stay in step: a
/// record slot is live exactly when its code is reachable from the tree
/// root. Both file headers are rewritten as the final step of every
/// mutating operation.
pub struct BookStore {
    data: DataFile,
    tree: TwoThreeTree,
}

impl BookStore {
    /// Opens (or creates) the paired data and index files.
    pub fn open<P: AsRef<Path>, Q: AsRef<Path>>(data_path: P, index_path: Q) -> Result<Self> {
        Ok(Self {
            data: DataFile::open(data_path)?,
            tree: TwoThreeTree::new(IndexFile::open(index_path)?),
        })
    }

    pub fn data(&self) -> &DataFile {
        &self.data
    }

    pub fn tree(&self) -> &TwoThreeTree {
        &self.tree
    }

    /// Registers a new book: allocates a data slot, writes the record,
    /// and indexes its code. A rejected duplicate releases the slot
    /// again before the error is returned, leaving the store unchanged.
    pub fn add(&mut self, book: &Book) -> Result<()> {
        let slot = self.data.allocate_slot()?;
        self.data.write_record(slot, book)?;

        match self.tree.insert(book.code, slot) {
            Ok(()) => {
                self.data.commit_header()?;
                Ok(())
            }
            Err(err @ StoreError::DuplicateKey(_)) => {
                self.data.release_slot(slot)?;
                self.data.commit_header()?;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Deletes the book with `code` and returns it. The key leaves the
    /// tree first; the slot is then tombstoned onto the data free-list.
    pub fn remove(&mut self, code: i32) -> Result<Book> {
        let slot = self
            .tree
            .search(code)?
            .ok_or(StoreError::NotFound(code))?;
        let book = self.data.read_record(slot)?;

        self.tree.remove(code)?;
        self.data.release_slot(slot)?;
        self.data.commit_header()?;

        Ok(book)
    }

    /// Fetches the book with `code` via the index.
    pub fn lookup(&self, code: i32) -> Result<Book> {
        let slot = self
            .tree
            .search(code)?
            .ok_or(StoreError::NotFound(code))?;
        self.data.read_record(slot)
    }

    /// Linear pass over the data file collecting every live record the
    /// predicate accepts. Tombstoned slots are skipped.
    pub fn scan<F>(&self, mut predicate: F) -> Result<Vec<Book>>
    where
        F: FnMut(&Book) -> bool,
    {
        let mut out = Vec::new();
        self.data.for_each_live(|_, book| {
            if predicate(&book) {
                out.push(book);
            }
            Ok(())
        })?;
        Ok(out)
    }

    /// Every live record, in slot order.
    pub fn list_all(&self) -> Result<Vec<Book>> {
        self.scan(|_| true)
    }

    /// All books by `author`, compared case-insensitively.
    pub fn search_by_author(&self, author: &str) -> Result<Vec<Book>> {
        self.scan(|book| book.author.eq_ignore_ascii_case(author))
    }

    /// The first book titled `title`, compared case-insensitively.
    pub fn search_by_title(&self, title: &str) -> Result<Option<Book>> {
        let mut found = None;
        self.data.for_each_live(|_, book| {
            if found.is_none() && book.title.eq_ignore_ascii_case(title) {
                found = Some(book);
            }
            Ok(())
        })?;
        Ok(found)
    }

    /// Number of registered books: the tree's key count.
    pub fn total_registered(&self) -> Result<usize> {
        self.tree.total_keys()
    }

    /// Sum of `stock_quantity` over all live records.
    pub fn total_stock(&self) -> Result<i64> {
        let mut total = 0i64;
        self.data.for_each_live(|_, book| {
            total += book.stock_quantity as i64;
            Ok(())
        })?;
        Ok(total)
    }

    /// Batch ingest: one `;`-separated record per line. Unparsable lines
    /// and negative codes are counted as malformed, rejected duplicates
    /// are counted separately, and neither stops the run.
    pub fn import_lines<R: BufRead>(&mut self, reader: R) -> Result<ImportSummary> {
        let mut summary = ImportSummary::default();

        for line in reader.lines() {
            let line = line.map_err(StoreError::Io)?;
            if line.trim().is_empty() {
                continue;
            }
            match text::parse_line(&line) {
                Some(book) if book.code >= 0 => match self.add(&book) {
                    Ok(()) => summary.imported += 1,
                    Err(StoreError::DuplicateKey(_)) => summary.duplicates += 1,
                    Err(err) => return Err(err),
                },
                _ => summary.malformed += 1,
            }
        }

        Ok(summary)
    }

    /// Free-list snapshot of the data file, head first.
    pub fn data_free_slots(&self) -> Result<Vec<SlotIndex>> {
        self.data.free_slots()
    }

    /// Free-list snapshot of the index file, head first.
    pub fn index_free_nodes(&self) -> Result<Vec<NodeOffset>> {
        self.tree.file().free_nodes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store(dir: &tempfile::TempDir) -> BookStore {
        BookStore::open(dir.path().join("books.dat"), dir.path().join("books.idx")).unwrap()
    }

    fn sample(code: i32) -> Book {
        Book {
            code,
            title: format!("Title {}", code),
            author: "Author".to_string(),
            publisher: "Publisher".to_string(),
            edition: 1,
            year: 2021,
            price: 25.0,
            stock_quantity: 4,
        }
    }

    #[test]
    fn test_add_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&dir);

        let book = sample(10);
        store.add(&book).unwrap();

        assert_eq!(store.lookup(10).unwrap(), book);
        assert!(matches!(store.lookup(11), Err(StoreError::NotFound(11))));
    }

    #[test]
    fn test_remove_returns_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&dir);

        store.add(&sample(10)).unwrap();
        let removed = store.remove(10).unwrap();

        assert_eq!(removed.code, 10);
        assert!(matches!(store.remove(10), Err(StoreError::NotFound(10))));
        assert_eq!(store.total_registered().unwrap(), 0);
    }

    #[test]
    fn test_import_counts() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&dir);

        let input = "\
1;A;Auth;Pub;1;2000;10,50;2
2;B;Auth;Pub;1;2001;12.00;3

1;A again;Auth;Pub;1;2000;10.50;2
not;a;line
-5;C;Auth;Pub;1;2002;9.99;1
";
        let summary = store.import_lines(input.as_bytes()).unwrap();

        assert_eq!(
            summary,
            ImportSummary {
                imported: 2,
                duplicates: 1,
                malformed: 2,
            }
        );
        assert_eq!(store.total_registered().unwrap(), 2);
    }
}
