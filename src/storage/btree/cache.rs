use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::trace;

use super::page::Node;

/// Least-recently-used cache of decoded node pages
///
/// Recency is a monotonically increasing tick; `order` maps ticks back to
/// page numbers so the oldest page is always the first entry.
pub struct PageCache {
    capacity: usize,
    tick: u64,
    pages: HashMap<u32, (Arc<Node>, u64)>,
    order: BTreeMap<u64, u32>,
    hits: u64,
    misses: u64,
}

impl PageCache {
    pub fn new(capacity: usize) -> Self {
        PageCache {
            capacity: capacity.max(1),
            tick: 0,
            pages: HashMap::with_capacity(capacity.min(4096)),
            order: BTreeMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    pub fn get(&mut self, page_no: u32) -> Option<Arc<Node>> {
        self.tick += 1;
        let tick = self.tick;
        match self.pages.get_mut(&page_no) {
            Some((node, last_used)) => {
                self.order.remove(last_used);
                *last_used = tick;
                self.order.insert(tick, page_no);
                self.hits += 1;
                Some(Arc::clone(node))
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, page_no: u32, node: Arc<Node>) {
        self.tick += 1;
        if let Some((_, last_used)) = self.pages.insert(page_no, (node, self.tick)) {
            self.order.remove(&last_used);
        }
        self.order.insert(self.tick, page_no);
        while self.pages.len() > self.capacity {
            let Some((_, victim)) = self.order.pop_first() else {
                break;
            };
            self.pages.remove(&victim);
            trace!(page = victim, "evicted page");
        }
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// (hits, misses) since the cache was created
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::btree::page::Leaf;

    fn node() -> Arc<Node> {
        Arc::new(Node::Leaf(Leaf::default()))
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let mut cache = PageCache::new(2);
        cache.insert(1, node());
        cache.insert(2, node());
        assert!(cache.get(1).is_some());
        cache.insert(3, node());
        assert_eq!(cache.len(), 2);
        assert!(cache.get(2).is_none());
        assert!(cache.get(1).is_some());
        assert!(cache.get(3).is_some());
        assert_eq!(cache.stats(), (3, 1));
    }

    #[test]
    fn test_reinsert_same_page() {
        let mut cache = PageCache::new(2);
        cache.insert(1, node());
        cache.insert(1, node());
        assert_eq!(cache.len(), 1);
        cache.insert(2, node());
        cache.insert(3, node());
        assert!(cache.get(1).is_none());
    }
}
