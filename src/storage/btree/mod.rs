//! Write-once B+tree files
//!
//! Trees are bulk loaded from sorted input by [`BTreeWriter`] and are
//! immutable afterwards. Leaves are written left to right on consecutive
//! pages and doubly linked; interior levels are built bottom-up once the
//! last leaf is out. Page 0 holds the [`TreeHeader`].
//!
//! With `dupsort` a key may repeat, its values ascending. Keys compare as
//! raw bytes, so callers store sort-preserving encodings.

use std::path::Path;
use std::sync::Arc;

use bincode::{Decode, Encode};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::config::{Config, MIN_PAGE_SIZE};
use crate::error::{Error, Result};
use crate::storage::compute_checksum;
use crate::storage::files::PageFile;

pub mod cache;
pub mod cursor;
pub mod page;

pub use cursor::Cursor;

use cache::PageCache;
use page::{InteriorBuilder, LeafBuilder, Node, INTERIOR_ENTRY_OVERHEAD, LEAF_ENTRY_OVERHEAD, PAGE_HEADER_SIZE};

const TREE_MAGIC: u32 = 0x5754_4254; // "WTBT"
const TREE_VERSION: u32 = 1;
const FLAG_DUPSORT: u32 = 0x1;
const FLAG_PREFIX_COMPRESS: u32 = 0x2;

/// Tree header stored on page 0 as `checksum u64 | len u32 | bincode bytes`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct TreeHeader {
    pub magic: u32,
    pub version: u32,
    pub flags: u32,
    pub page_size: u32,
    /// Root page, 0 for an empty tree
    pub root: u32,
    pub first_leaf: u32,
    pub last_leaf: u32,
    /// Levels including the leaves, 0 for an empty tree
    pub height: u32,
    pub num_entries: u64,
    pub num_pages: u32,
}

impl TreeHeader {
    pub fn dupsort(&self) -> bool {
        self.flags & FLAG_DUPSORT != 0
    }

    pub fn prefix_compression(&self) -> bool {
        self.flags & FLAG_PREFIX_COMPRESS != 0
    }

    fn write(&self, page_size: usize) -> Result<Vec<u8>> {
        let body = bincode::encode_to_vec(self, bincode::config::standard())?;
        let mut page = vec![0u8; page_size];
        page[0..8].copy_from_slice(&compute_checksum(&body).to_le_bytes());
        page[8..12].copy_from_slice(&(body.len() as u32).to_le_bytes());
        page[12..12 + body.len()].copy_from_slice(&body);
        Ok(page)
    }

    fn read(prefix: &[u8], path: &Path) -> Result<Self> {
        let invalid = |what: &str| Error::backend(format!("{}: {}", path.display(), what));
        let mut checksum = [0u8; 8];
        checksum.copy_from_slice(&prefix[0..8]);
        let checksum = u64::from_le_bytes(checksum);
        let len = u32::from_le_bytes([prefix[8], prefix[9], prefix[10], prefix[11]]) as usize;
        if len == 0 || 12 + len > prefix.len() {
            return Err(invalid("not a tree file"));
        }
        let body = &prefix[12..12 + len];
        if compute_checksum(body) != checksum {
            return Err(invalid("tree header checksum mismatch"));
        }
        let (header, _): (TreeHeader, usize) = bincode::decode_from_slice(body, bincode::config::standard())?;
        if header.magic != TREE_MAGIC {
            return Err(invalid("invalid tree magic"));
        }
        if header.version != TREE_VERSION {
            return Err(invalid(&format!("unsupported tree version {}", header.version)));
        }
        let page_size = header.page_size as usize;
        if !page_size.is_power_of_two() || page_size < MIN_PAGE_SIZE {
            return Err(invalid(&format!("invalid page size {}", page_size)));
        }
        Ok(header)
    }
}

/// Largest key a tree with this page size accepts; keeps at least two
/// separators in every interior page so each level shrinks.
pub fn max_key_size(page_size: usize) -> usize {
    (page_size - PAGE_HEADER_SIZE) / 2 - INTERIOR_ENTRY_OVERHEAD
}

/// Bulk loader for a new tree file
pub struct BTreeWriter {
    file: PageFile,
    page_size: usize,
    flags: u32,
    leaf: LeafBuilder,
    /// (first key, page) of every written node at the level being built
    separators: Vec<(Vec<u8>, u32)>,
    first_leaf: u32,
    last_leaf: u32,
    last_key: Vec<u8>,
    last_value: Vec<u8>,
    num_entries: u64,
}

impl BTreeWriter {
    /// Create or truncate `path` for bulk loading
    pub fn create<P: AsRef<Path>>(path: P, config: &Config, dupsort: bool) -> Result<Self> {
        let page_size = config.page_size();
        let file = PageFile::create(path.as_ref(), page_size)?;
        let mut flags = 0;
        if dupsort {
            flags |= FLAG_DUPSORT;
        }
        if config.prefix_compression() {
            flags |= FLAG_PREFIX_COMPRESS;
        }
        debug!(path = %path.as_ref().display(), page_size, dupsort, "creating tree");
        Ok(BTreeWriter {
            file,
            page_size,
            flags,
            leaf: LeafBuilder::new(page_size, config.prefix_compression()),
            separators: Vec::new(),
            first_leaf: 0,
            last_leaf: 0,
            last_key: Vec::new(),
            last_value: Vec::new(),
            num_entries: 0,
        })
    }

    pub fn num_entries(&self) -> u64 {
        self.num_entries
    }

    /// Append an entry; input must arrive in ascending (key, value) order
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.len() > max_key_size(self.page_size) {
            return Err(Error::backend(format!(
                "key of {} bytes exceeds maximum of {}",
                key.len(),
                max_key_size(self.page_size)
            )));
        }
        if LEAF_ENTRY_OVERHEAD + key.len() + value.len() > self.page_size - PAGE_HEADER_SIZE {
            return Err(Error::backend(format!(
                "entry of {} bytes does not fit a {} byte page",
                key.len() + value.len(),
                self.page_size
            )));
        }
        if self.num_entries > 0 {
            let dupsort = self.flags & FLAG_DUPSORT != 0;
            let ordered = match key.cmp(&self.last_key) {
                std::cmp::Ordering::Greater => true,
                std::cmp::Ordering::Equal => dupsort && value > self.last_value.as_slice(),
                std::cmp::Ordering::Less => false,
            };
            if !ordered {
                return Err(Error::backend(format!(
                    "out of order or duplicate entry after {} entries",
                    self.num_entries
                )));
            }
        }
        if !self.leaf.try_push(key, value) {
            self.flush_leaf(false)?;
            if !self.leaf.try_push(key, value) {
                return Err(Error::backend("entry does not fit an empty leaf"));
            }
        }
        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.last_value.clear();
        self.last_value.extend_from_slice(value);
        self.num_entries += 1;
        Ok(())
    }

    /// Leaves are allocated consecutively, so every leaf but the last links to `page + 1`
    fn flush_leaf(&mut self, is_last: bool) -> Result<()> {
        let page_no = self.file.allocate_page();
        let next = if is_last { 0 } else { page_no + 1 };
        let first_key = self.leaf.first_key().to_vec();
        let page = self.leaf.finish(self.last_leaf, next);
        self.file.write_page(page_no, &page)?;
        trace!(page = page_no, "wrote leaf");
        self.separators.push((first_key, page_no));
        if self.first_leaf == 0 {
            self.first_leaf = page_no;
        }
        self.last_leaf = page_no;
        Ok(())
    }

    fn build_level(&mut self, children: Vec<(Vec<u8>, u32)>) -> Result<Vec<(Vec<u8>, u32)>> {
        let mut parents = Vec::new();
        let mut node = InteriorBuilder::new(self.page_size);
        for (key, child) in children {
            if !node.try_push(&key, child) {
                let first_key = node.first_key().to_vec();
                let page_no = self.file.allocate_page();
                self.file.write_page(page_no, &node.finish())?;
                parents.push((first_key, page_no));
                if !node.try_push(&key, child) {
                    return Err(Error::backend("separator does not fit an empty interior page"));
                }
            }
        }
        if !node.is_empty() {
            let first_key = node.first_key().to_vec();
            let page_no = self.file.allocate_page();
            self.file.write_page(page_no, &node.finish())?;
            parents.push((first_key, page_no));
        }
        Ok(parents)
    }

    /// Write remaining pages and the header, returning the header
    pub fn finish(mut self) -> Result<TreeHeader> {
        if !self.leaf.is_empty() {
            self.flush_leaf(true)?;
        }
        let mut level = std::mem::take(&mut self.separators);
        let mut height = if level.is_empty() { 0 } else { 1 };
        while level.len() > 1 {
            level = self.build_level(level)?;
            height += 1;
        }
        let header = TreeHeader {
            magic: TREE_MAGIC,
            version: TREE_VERSION,
            flags: self.flags,
            page_size: self.page_size as u32,
            root: level.first().map(|(_, page)| *page).unwrap_or(0),
            first_leaf: self.first_leaf,
            last_leaf: self.last_leaf,
            height,
            num_entries: self.num_entries,
            num_pages: self.file.num_pages(),
        };
        self.file.write_page(0, &header.write(self.page_size)?)?;
        self.file.sync()?;
        debug!(
            path = %self.file.path().display(),
            entries = header.num_entries,
            pages = header.num_pages,
            height,
            "finished tree"
        );
        Ok(header)
    }

    /// Discard everything written so far
    pub fn abort(mut self) -> Result<()> {
        debug!(path = %self.file.path().display(), "aborting tree");
        self.file.truncate()?;
        Ok(())
    }
}

/// Read-only handle on a finished tree file
pub struct BTree {
    file: PageFile,
    header: TreeHeader,
    cache: Mutex<PageCache>,
}

impl BTree {
    pub fn open<P: AsRef<Path>>(path: P, config: &Config) -> Result<Self> {
        let path = path.as_ref();
        let mut file = PageFile::open(path)?;
        let mut prefix = vec![0u8; MIN_PAGE_SIZE];
        file.read_prefix(&mut prefix)
            .map_err(|e| Error::backend(format!("{}: cannot read tree header: {}", path.display(), e)))?;
        let header = TreeHeader::read(&prefix, path)?;
        file.set_page_size(header.page_size as usize);
        let capacity = config.cache_pages(header.page_size as usize);
        debug!(
            path = %path.display(),
            entries = header.num_entries,
            height = header.height,
            cache_pages = capacity,
            "opened tree"
        );
        Ok(BTree {
            file,
            header,
            cache: Mutex::new(PageCache::new(capacity)),
        })
    }

    pub fn header(&self) -> &TreeHeader {
        &self.header
    }

    pub fn len(&self) -> u64 {
        self.header.num_entries
    }

    pub fn is_empty(&self) -> bool {
        self.header.num_entries == 0
    }

    /// (hits, misses) of the page cache
    pub fn cache_stats(&self) -> (u64, u64) {
        self.cache.lock().stats()
    }

    pub fn cursor(&self) -> Cursor<'_> {
        Cursor::new(self)
    }

    /// Value of the first entry with `key`
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut cursor = self.cursor();
        if cursor.set(key)? {
            Ok(cursor.value().map(<[u8]>::to_vec))
        } else {
            Ok(None)
        }
    }

    pub(crate) fn node(&self, page_no: u32) -> Result<Arc<Node>> {
        if page_no == 0 || page_no >= self.header.num_pages {
            return Err(Error::backend(format!(
                "page {} outside tree of {} pages",
                page_no, self.header.num_pages
            )));
        }
        if let Some(node) = self.cache.lock().get(page_no) {
            return Ok(node);
        }
        let mut buf = vec![0u8; self.header.page_size as usize];
        self.file.read_page(page_no, &mut buf)?;
        let node = Arc::new(Node::decode(&buf, page_no)?);
        self.cache.lock().insert(page_no, Arc::clone(&node));
        Ok(node)
    }

    /// Leaf that holds the first entry `>= key`, or the leaf after which it would go
    pub(crate) fn find_leaf(&self, key: &[u8]) -> Result<u32> {
        let mut page_no = self.header.root;
        for _ in 1..self.header.height {
            page_no = match &*self.node(page_no)? {
                Node::Interior(node) => node.child_for(key),
                Node::Leaf(_) => return Err(Error::backend(format!("page {}: unexpected leaf", page_no))),
            };
        }
        Ok(page_no)
    }
}
