//! Page/page-size bookkeeping for one resource table.

#![forbid(unsafe_code)]

use smallvec::SmallVec;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const DEFAULT_PAGE_SIZE_OPTIONS: [u32; 4] = [10, 20, 50, 100];

/// Current page (1-based) and page size.
///
/// The page is reset to 1 whenever the page size changes or the owner calls
/// [`Pagination::reset`] after a namespace/filter change, so a result set is
/// never read with a stale offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pagination {
    page: u32,
    page_size: u32,
    options: SmallVec<[u32; 4]>,
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl Pagination {
    pub fn new(page_size: u32) -> Self {
        Self::with_options(page_size, &DEFAULT_PAGE_SIZE_OPTIONS)
    }

    pub fn with_options(page_size: u32, options: &[u32]) -> Self {
        Self { page: 1, page_size: page_size.max(1), options: options.iter().copied().collect() }
    }

    pub fn page(&self) -> u32 { self.page }
    pub fn page_size(&self) -> u32 { self.page_size }
    pub fn page_size_options(&self) -> &[u32] { &self.options }

    /// No upper bound check: callers disable navigation past `total_pages`.
    pub fn set_page(&mut self, page: u32) {
        self.page = page.max(1);
    }

    pub fn set_page_size(&mut self, page_size: u32) {
        self.page_size = page_size.max(1);
        self.page = 1;
    }

    pub fn reset(&mut self) {
        self.page = 1;
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }

    pub fn total_pages(&self, total: u64) -> u64 {
        total.div_ceil(u64::from(self.page_size))
    }

    pub fn has_prev(&self) -> bool {
        self.page > 1
    }

    pub fn has_next(&self, total: u64) -> bool {
        u64::from(self.page) < self.total_pages(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_follows_page_and_size() {
        let mut p = Pagination::new(20);
        assert_eq!(p.offset(), 0);
        p.set_page(3);
        assert_eq!(p.offset(), 40);
        p.set_page(0);
        assert_eq!(p.page(), 1);
    }

    #[test]
    fn page_size_change_resets_page() {
        let mut p = Pagination::default();
        p.set_page(5);
        p.set_page_size(50);
        assert_eq!(p.page(), 1);
        assert_eq!(p.page_size(), 50);
    }

    #[test]
    fn reset_returns_to_first_page() {
        let mut p = Pagination::new(10);
        p.set_page(7);
        p.reset();
        assert_eq!(p.page(), 1);
        assert_eq!(p.page_size(), 10);
    }

    #[test]
    fn total_pages_rounds_up() {
        let mut p = Pagination::new(20);
        assert_eq!(p.total_pages(0), 0);
        assert_eq!(p.total_pages(20), 1);
        assert_eq!(p.total_pages(21), 2);
        assert!(p.has_next(21));
        p.set_page(2);
        assert!(!p.has_next(21));
        assert!(p.has_prev());
        assert_eq!(p.page_size_options(), &[10, 20, 50, 100]);
    }
}
