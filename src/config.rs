/// Default page cache budget per B-tree handle (16MB)
pub const DEFAULT_CACHE_SIZE: usize = 16 * 1024 * 1024;
/// Default B-tree page size (8KB)
pub const DEFAULT_PAGE_SIZE: usize = 8192;
pub const MIN_PAGE_SIZE: usize = 1024;
pub const MAX_PAGE_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub(crate) cache_size: usize,
    pub(crate) page_size: usize,
    pub(crate) prefix_compression: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cache_size: DEFAULT_CACHE_SIZE,
            page_size: DEFAULT_PAGE_SIZE,
            prefix_compression: true,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache_size(mut self, bytes: usize) -> Self {
        self.cache_size = bytes;
        self
    }

    /// Page size for newly written B-tree files, clamped to a power of
    /// two within [MIN_PAGE_SIZE, MAX_PAGE_SIZE].
    pub fn with_page_size(mut self, bytes: usize) -> Self {
        self.page_size = bytes
            .clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE)
            .next_power_of_two()
            .min(MAX_PAGE_SIZE);
        self
    }

    pub fn with_prefix_compression(mut self, enabled: bool) -> Self {
        self.prefix_compression = enabled;
        self
    }

    pub fn cache_size(&self) -> usize {
        self.cache_size
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn prefix_compression(&self) -> bool {
        self.prefix_compression
    }

    /// Number of pages the cache may hold, never less than a handful so a
    /// cursor and a root-to-leaf descent fit together.
    pub(crate) fn cache_pages(&self, page_size: usize) -> usize {
        (self.cache_size / page_size.max(1)).max(8)
    }
}
