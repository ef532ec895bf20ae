use crate::error::{Error, Result};
use crate::storage::compute_checksum;

/// Bytes at the start of every node page
pub const PAGE_HEADER_SIZE: usize = 32;
/// Per-entry overhead in a leaf: shared prefix, suffix and value lengths
pub const LEAF_ENTRY_OVERHEAD: usize = 6;
/// Per-entry overhead in an interior node: key length and child page number
pub const INTERIOR_ENTRY_OVERHEAD: usize = 6;

const PAGE_MAGIC: u32 = 0x5754_5047; // "WTPG"

/// Node page header
///
/// ```text
/// 0  magic u32 | 4 kind u8 | 5 reserved u8 | 6 num_entries u16
/// 8  prev u32  | 12 next u32 | 16 used u32 | 20 reserved u32
/// 24 checksum u64 over the `used` payload bytes
/// ```
///
/// All header integers are little-endian. Page 0 of a tree file is the
/// tree header, so a sibling pointer of 0 means no sibling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    pub kind: NodeKind,
    pub num_entries: u16,
    pub prev: u32,
    pub next: u32,
    pub used: u32,
    pub checksum: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Leaf = 1,
    Interior = 2,
}

impl PageHeader {
    fn write(&self, page: &mut [u8]) {
        page[0..4].copy_from_slice(&PAGE_MAGIC.to_le_bytes());
        page[4] = self.kind as u8;
        page[5] = 0;
        page[6..8].copy_from_slice(&self.num_entries.to_le_bytes());
        page[8..12].copy_from_slice(&self.prev.to_le_bytes());
        page[12..16].copy_from_slice(&self.next.to_le_bytes());
        page[16..20].copy_from_slice(&self.used.to_le_bytes());
        page[20..24].fill(0);
        page[24..32].copy_from_slice(&self.checksum.to_le_bytes());
    }

    fn read(page: &[u8], page_no: u32) -> Result<Self> {
        let magic = u32::from_le_bytes([page[0], page[1], page[2], page[3]]);
        if magic != PAGE_MAGIC {
            return Err(Error::backend(format!("page {}: invalid magic {:#x}", page_no, magic)));
        }
        let kind = match page[4] {
            1 => NodeKind::Leaf,
            2 => NodeKind::Interior,
            other => return Err(Error::backend(format!("page {}: unknown node kind {}", page_no, other))),
        };
        let used = read_u32(page, 16);
        if PAGE_HEADER_SIZE + used as usize > page.len() {
            return Err(Error::backend(format!("page {}: payload of {} bytes overflows page", page_no, used)));
        }
        Ok(PageHeader {
            kind,
            num_entries: read_u16(page, 6),
            prev: read_u32(page, 8),
            next: read_u32(page, 12),
            used,
            checksum: read_u64(page, 24),
        })
    }
}

fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

/// Length of the common prefix of two keys, capped to fit a u16
pub fn shared_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter()
        .zip(b)
        .take(u16::MAX as usize)
        .take_while(|(x, y)| x == y)
        .count()
}

/// Decoded leaf: sorted (key, value) entries plus sibling links
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Leaf {
    pub prev: u32,
    pub next: u32,
    pub entries: Vec<(Vec<u8>, Vec<u8>)>,
}

/// Decoded interior node: `keys[i]` is the first key stored under `children[i]`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Interior {
    pub keys: Vec<Vec<u8>>,
    pub children: Vec<u32>,
}

impl Interior {
    /// Child to descend into when looking for the first entry `>= key`
    ///
    /// This is the last child whose first key is strictly below `key`;
    /// duplicates of `key` may start at the end of that child.
    pub fn child_for(&self, key: &[u8]) -> u32 {
        let below = self.keys.partition_point(|first| first.as_slice() < key);
        self.children[below.saturating_sub(1)]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Leaf(Leaf),
    Interior(Interior),
}

impl Node {
    /// Decode a node page, verifying its checksum
    pub fn decode(page: &[u8], page_no: u32) -> Result<Node> {
        let header = PageHeader::read(page, page_no)?;
        let payload = &page[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + header.used as usize];
        let checksum = compute_checksum(payload);
        if checksum != header.checksum {
            return Err(Error::backend(format!(
                "page {}: checksum mismatch: expected {}, got {}",
                page_no, header.checksum, checksum
            )));
        }
        let truncated = || Error::backend(format!("page {}: truncated entry", page_no));
        let n = header.num_entries as usize;
        let mut pos = 0;
        match header.kind {
            NodeKind::Leaf => {
                let mut entries: Vec<(Vec<u8>, Vec<u8>)> = Vec::with_capacity(n);
                for _ in 0..n {
                    if pos + LEAF_ENTRY_OVERHEAD > payload.len() {
                        return Err(truncated());
                    }
                    let shared = read_u16(payload, pos) as usize;
                    let suffix_len = read_u16(payload, pos + 2) as usize;
                    let value_len = read_u16(payload, pos + 4) as usize;
                    pos += LEAF_ENTRY_OVERHEAD;
                    if pos + suffix_len + value_len > payload.len() {
                        return Err(truncated());
                    }
                    let mut key = match entries.last() {
                        Some((prev, _)) if shared <= prev.len() => prev[..shared].to_vec(),
                        None if shared == 0 => Vec::new(),
                        _ => return Err(Error::backend(format!("page {}: bad shared prefix {}", page_no, shared))),
                    };
                    key.extend_from_slice(&payload[pos..pos + suffix_len]);
                    pos += suffix_len;
                    let value = payload[pos..pos + value_len].to_vec();
                    pos += value_len;
                    entries.push((key, value));
                }
                Ok(Node::Leaf(Leaf { prev: header.prev, next: header.next, entries }))
            }
            NodeKind::Interior => {
                let mut node = Interior {
                    keys: Vec::with_capacity(n),
                    children: Vec::with_capacity(n),
                };
                for _ in 0..n {
                    if pos + INTERIOR_ENTRY_OVERHEAD > payload.len() {
                        return Err(truncated());
                    }
                    let key_len = read_u16(payload, pos) as usize;
                    pos += 2;
                    if pos + key_len + 4 > payload.len() {
                        return Err(truncated());
                    }
                    node.keys.push(payload[pos..pos + key_len].to_vec());
                    pos += key_len;
                    node.children.push(read_u32(payload, pos));
                    pos += 4;
                }
                if node.children.is_empty() {
                    return Err(Error::backend(format!("page {}: interior node without children", page_no)));
                }
                Ok(Node::Interior(node))
            }
        }
    }
}

/// Accumulates leaf entries until a page is full
pub struct LeafBuilder {
    page_size: usize,
    prefix_compression: bool,
    payload: Vec<u8>,
    num_entries: u16,
    first_key: Vec<u8>,
    last_key: Vec<u8>,
}

impl LeafBuilder {
    pub fn new(page_size: usize, prefix_compression: bool) -> Self {
        LeafBuilder {
            page_size,
            prefix_compression,
            payload: Vec::with_capacity(page_size),
            num_entries: 0,
            first_key: Vec::new(),
            last_key: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.num_entries == 0
    }

    pub fn first_key(&self) -> &[u8] {
        &self.first_key
    }

    fn shared_with_last(&self, key: &[u8]) -> usize {
        if self.prefix_compression && !self.is_empty() {
            shared_prefix(&self.last_key, key)
        } else {
            0
        }
    }

    /// Append an entry; returns false without changes if the page is full
    pub fn try_push(&mut self, key: &[u8], value: &[u8]) -> bool {
        let shared = self.shared_with_last(key);
        let suffix = &key[shared..];
        let needed = LEAF_ENTRY_OVERHEAD + suffix.len() + value.len();
        if PAGE_HEADER_SIZE + self.payload.len() + needed > self.page_size || self.num_entries == u16::MAX {
            return false;
        }
        self.payload.extend_from_slice(&(shared as u16).to_le_bytes());
        self.payload.extend_from_slice(&(suffix.len() as u16).to_le_bytes());
        self.payload.extend_from_slice(&(value.len() as u16).to_le_bytes());
        self.payload.extend_from_slice(suffix);
        self.payload.extend_from_slice(value);
        if self.is_empty() {
            self.first_key = key.to_vec();
        }
        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.num_entries += 1;
        true
    }

    /// Serialise into a full page and reset for the next leaf
    pub fn finish(&mut self, prev: u32, next: u32) -> Vec<u8> {
        let page = encode_page(NodeKind::Leaf, self.num_entries, prev, next, &self.payload, self.page_size);
        self.payload.clear();
        self.num_entries = 0;
        self.last_key.clear();
        page
    }
}

/// Accumulates interior entries until a page is full
pub struct InteriorBuilder {
    page_size: usize,
    payload: Vec<u8>,
    num_entries: u16,
    first_key: Vec<u8>,
}

impl InteriorBuilder {
    pub fn new(page_size: usize) -> Self {
        InteriorBuilder {
            page_size,
            payload: Vec::with_capacity(page_size),
            num_entries: 0,
            first_key: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.num_entries == 0
    }

    pub fn first_key(&self) -> &[u8] {
        &self.first_key
    }

    pub fn try_push(&mut self, key: &[u8], child: u32) -> bool {
        let needed = INTERIOR_ENTRY_OVERHEAD + key.len();
        if PAGE_HEADER_SIZE + self.payload.len() + needed > self.page_size || self.num_entries == u16::MAX {
            return false;
        }
        self.payload.extend_from_slice(&(key.len() as u16).to_le_bytes());
        self.payload.extend_from_slice(key);
        self.payload.extend_from_slice(&child.to_le_bytes());
        if self.is_empty() {
            self.first_key = key.to_vec();
        }
        self.num_entries += 1;
        true
    }

    pub fn finish(&mut self) -> Vec<u8> {
        let page = encode_page(NodeKind::Interior, self.num_entries, 0, 0, &self.payload, self.page_size);
        self.payload.clear();
        self.num_entries = 0;
        page
    }
}

fn encode_page(kind: NodeKind, num_entries: u16, prev: u32, next: u32, payload: &[u8], page_size: usize) -> Vec<u8> {
    let mut page = vec![0u8; page_size];
    let header = PageHeader {
        kind,
        num_entries,
        prev,
        next,
        used: payload.len() as u32,
        checksum: compute_checksum(payload),
    };
    header.write(&mut page);
    page[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + payload.len()].copy_from_slice(payload);
    page
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_round_trip_with_prefix_compression() {
        let mut builder = LeafBuilder::new(1024, true);
        let entries: Vec<(Vec<u8>, Vec<u8>)> = vec![
            (b"apple".to_vec(), b"1".to_vec()),
            (b"apples".to_vec(), b"2".to_vec()),
            (b"apply".to_vec(), b"3".to_vec()),
            (b"b".to_vec(), vec![]),
        ];
        for (k, v) in &entries {
            assert!(builder.try_push(k, v));
        }
        assert_eq!(builder.first_key(), b"apple");
        let page = builder.finish(3, 5);
        match Node::decode(&page, 4).unwrap() {
            Node::Leaf(leaf) => {
                assert_eq!(leaf.prev, 3);
                assert_eq!(leaf.next, 5);
                assert_eq!(leaf.entries, entries);
            }
            other => panic!("expected leaf, got {:?}", other),
        }
        assert!(builder.is_empty());
    }

    #[test]
    fn test_leaf_full() {
        let mut builder = LeafBuilder::new(64, false);
        // 32 header + 6 overhead + 10 key + 8 value = 56
        assert!(builder.try_push(&[1; 10], &[0; 8]));
        assert!(!builder.try_push(&[2; 10], &[0; 8]));
    }

    #[test]
    fn test_interior_round_trip_and_child_for() {
        let mut builder = InteriorBuilder::new(1024);
        assert!(builder.try_push(b"a", 1));
        assert!(builder.try_push(b"m", 2));
        assert!(builder.try_push(b"t", 3));
        let page = builder.finish();
        let Node::Interior(node) = Node::decode(&page, 9).unwrap() else {
            panic!("expected interior node");
        };
        assert_eq!(node.child_for(b"0"), 1);
        assert_eq!(node.child_for(b"a"), 1);
        assert_eq!(node.child_for(b"b"), 1);
        // Duplicates of "m" may end the first child
        assert_eq!(node.child_for(b"m"), 1);
        assert_eq!(node.child_for(b"n"), 2);
        assert_eq!(node.child_for(b"z"), 3);
    }

    #[test]
    fn test_corrupt_page_detected() {
        let mut builder = LeafBuilder::new(256, true);
        builder.try_push(b"key", b"value");
        let mut page = builder.finish(0, 0);
        page[PAGE_HEADER_SIZE + 7] ^= 0xff;
        assert!(Node::decode(&page, 1).is_err());
        page[0] = 0;
        assert!(Node::decode(&page, 1).is_err());
    }

    #[test]
    fn test_shared_prefix() {
        assert_eq!(shared_prefix(b"abc", b"abd"), 2);
        assert_eq!(shared_prefix(b"abc", b"abc"), 3);
        assert_eq!(shared_prefix(b"", b"abc"), 0);
    }
}
