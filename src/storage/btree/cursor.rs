use std::sync::Arc;

use crate::error::{Error, Result};

use super::page::{Leaf, Node};
use super::BTree;

/// Positioned reader over a tree's entries in (key, value) order
///
/// Movement methods return `Ok(false)` and leave the cursor unpositioned
/// when they run off either end. `next` on an unpositioned cursor starts
/// from the first entry and `prev` from the last.
#[derive(Clone)]
pub struct Cursor<'a> {
    tree: &'a BTree,
    position: Option<(Arc<Node>, usize)>,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(tree: &'a BTree) -> Self {
        Cursor { tree, position: None }
    }

    fn load_leaf(&self, page_no: u32) -> Result<Arc<Node>> {
        let node = self.tree.node(page_no)?;
        match &*node {
            Node::Leaf(leaf) if !leaf.entries.is_empty() => Ok(node),
            Node::Leaf(_) => Err(Error::backend(format!("page {}: empty leaf", page_no))),
            Node::Interior(_) => Err(Error::backend(format!("page {}: expected a leaf", page_no))),
        }
    }

    fn leaf(&self) -> Option<(&Leaf, usize)> {
        match &self.position {
            Some((node, slot)) => match &**node {
                Node::Leaf(leaf) => Some((leaf, *slot)),
                Node::Interior(_) => None,
            },
            None => None,
        }
    }

    fn settle(&mut self, page_no: u32, slot: Slot) -> Result<bool> {
        if page_no == 0 {
            self.position = None;
            return Ok(false);
        }
        let node = self.load_leaf(page_no)?;
        let slot = match (&*node, slot) {
            (Node::Leaf(leaf), Slot::Last) => leaf.entries.len() - 1,
            _ => 0,
        };
        self.position = Some((node, slot));
        Ok(true)
    }

    /// Drop the current position
    pub fn reset(&mut self) {
        self.position = None;
    }

    pub fn is_positioned(&self) -> bool {
        self.position.is_some()
    }

    pub fn key(&self) -> Option<&[u8]> {
        self.current().map(|(key, _)| key)
    }

    pub fn value(&self) -> Option<&[u8]> {
        self.current().map(|(_, value)| value)
    }

    pub fn current(&self) -> Option<(&[u8], &[u8])> {
        self.leaf()
            .and_then(|(leaf, slot)| leaf.entries.get(slot))
            .map(|(key, value)| (key.as_slice(), value.as_slice()))
    }

    pub fn first(&mut self) -> Result<bool> {
        let page_no = self.tree.header().first_leaf;
        self.settle(page_no, Slot::First)
    }

    pub fn last(&mut self) -> Result<bool> {
        let page_no = self.tree.header().last_leaf;
        self.settle(page_no, Slot::Last)
    }

    /// Position at the first entry whose key is `>= key`
    pub fn set_range(&mut self, key: &[u8]) -> Result<bool> {
        if self.tree.is_empty() {
            self.position = None;
            return Ok(false);
        }
        let page_no = self.tree.find_leaf(key)?;
        let node = self.load_leaf(page_no)?;
        let (slot, len, next) = match &*node {
            Node::Leaf(leaf) => (
                leaf.entries.partition_point(|(k, _)| k.as_slice() < key),
                leaf.entries.len(),
                leaf.next,
            ),
            Node::Interior(_) => (0, 0, 0),
        };
        if slot < len {
            self.position = Some((node, slot));
            Ok(true)
        } else {
            self.settle(next, Slot::First)
        }
    }

    /// Position at the first entry with exactly `key`
    pub fn set(&mut self, key: &[u8]) -> Result<bool> {
        if self.set_range(key)? && self.key() == Some(key) {
            return Ok(true);
        }
        self.position = None;
        Ok(false)
    }

    pub fn next(&mut self) -> Result<bool> {
        let Some((leaf, slot)) = self.leaf() else {
            return self.first();
        };
        if slot + 1 < leaf.entries.len() {
            let next_slot = slot + 1;
            if let Some((_, s)) = self.position.as_mut() {
                *s = next_slot;
            }
            return Ok(true);
        }
        let next = leaf.next;
        self.settle(next, Slot::First)
    }

    pub fn prev(&mut self) -> Result<bool> {
        let Some((leaf, slot)) = self.leaf() else {
            return self.last();
        };
        if slot > 0 {
            if let Some((_, s)) = self.position.as_mut() {
                *s = slot - 1;
            }
            return Ok(true);
        }
        let prev = leaf.prev;
        self.settle(prev, Slot::Last)
    }

    /// Skip the remaining duplicates of the current key
    pub fn next_nodup(&mut self) -> Result<bool> {
        let Some(current) = self.key().map(<[u8]>::to_vec) else {
            return self.first();
        };
        while self.next()? {
            if self.key() != Some(current.as_slice()) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Number of entries sharing the current key
    pub fn count(&self) -> Result<u64> {
        let Some(key) = self.key() else {
            return Err(Error::backend("cursor is not positioned"));
        };
        let mut scan = Cursor::new(self.tree);
        if !scan.set(key)? {
            return Ok(0);
        }
        let mut count = 1;
        while scan.next()? && scan.key() == Some(key) {
            count += 1;
        }
        Ok(count)
    }
}

#[derive(Clone, Copy)]
enum Slot {
    First,
    Last,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::btree::BTreeWriter;
    use tempfile::{tempdir, TempDir};

    fn build(entries: &[(&[u8], &[u8])], dupsort: bool) -> (TempDir, BTree) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.db");
        let config = Config::new().with_page_size(1024);
        let mut writer = BTreeWriter::create(&path, &config, dupsort).unwrap();
        for (key, value) in entries {
            writer.put(key, value).unwrap();
        }
        writer.finish().unwrap();
        let tree = BTree::open(&path, &config).unwrap();
        (dir, tree)
    }

    fn numbered(n: u32) -> Vec<(Vec<u8>, Vec<u8>)> {
        (0..n).map(|i| ((i * 2).to_be_bytes().to_vec(), i.to_be_bytes().to_vec())).collect()
    }

    fn build_numbered(n: u32) -> (TempDir, BTree) {
        let entries = numbered(n);
        let refs: Vec<(&[u8], &[u8])> = entries.iter().map(|(k, v)| (k.as_slice(), v.as_slice())).collect();
        build(&refs, false)
    }

    #[test]
    fn test_forward_and_backward_scan_cross_leaves() {
        let (_dir, tree) = build_numbered(3000);
        let mut cursor = tree.cursor();
        let mut seen = 0u32;
        while cursor.next().unwrap() {
            assert_eq!(cursor.key().unwrap(), (seen * 2).to_be_bytes());
            seen += 1;
        }
        assert_eq!(seen, 3000);
        assert!(!cursor.is_positioned());

        while cursor.prev().unwrap() {
            seen -= 1;
            assert_eq!(cursor.value().unwrap(), seen.to_be_bytes());
        }
        assert_eq!(seen, 0);
    }

    #[test]
    fn test_set_range_between_keys() {
        let (_dir, tree) = build_numbered(3000);
        let mut cursor = tree.cursor();
        assert!(cursor.set_range(&1001u32.to_be_bytes()).unwrap());
        assert_eq!(cursor.key().unwrap(), 1002u32.to_be_bytes());
        assert!(cursor.set_range(&0u32.to_be_bytes()).unwrap());
        assert_eq!(cursor.key().unwrap(), 0u32.to_be_bytes());
        assert!(!cursor.set_range(&5999u32.to_be_bytes()).unwrap());
        assert!(!cursor.set(&1001u32.to_be_bytes()).unwrap());
        assert!(cursor.set(&1002u32.to_be_bytes()).unwrap());
        assert!(cursor.last().unwrap());
        assert_eq!(cursor.key().unwrap(), 5998u32.to_be_bytes());
    }

    #[test]
    fn test_duplicates_count_and_nodup() {
        let mut entries: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
        for key in 0u16..50 {
            for dup in 0..(key as u32 % 7 + 1) * 20 {
                entries.push((key.to_be_bytes().to_vec(), dup.to_be_bytes().to_vec()));
            }
        }
        let refs: Vec<(&[u8], &[u8])> = entries.iter().map(|(k, v)| (k.as_slice(), v.as_slice())).collect();
        let (_dir, tree) = build(&refs, true);

        let mut cursor = tree.cursor();
        let mut distinct = Vec::new();
        while cursor.next_nodup().unwrap() {
            let key = cursor.key().unwrap().to_vec();
            let expected = (u16::from_be_bytes([key[0], key[1]]) as u64 % 7 + 1) * 20;
            assert_eq!(cursor.count().unwrap(), expected);
            assert_eq!(cursor.value().unwrap(), 0u32.to_be_bytes());
            distinct.push(key);
        }
        assert_eq!(distinct.len(), 50);

        assert!(cursor.set(&6u16.to_be_bytes()).unwrap());
        assert_eq!(cursor.value().unwrap(), 0u32.to_be_bytes());
        assert!(cursor.prev().unwrap());
        assert_eq!(cursor.key().unwrap(), 5u16.to_be_bytes());
    }
}
