//! Client-side pagination over a sorted list.

/// Default number of rows per page.
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// One-based page cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    page: usize,
    page_size: usize,
}

impl Pagination {
    /// Start at page 1. A zero page size is treated as 1.
    #[must_use]
    pub const fn new(page_size: usize) -> Self {
        Self {
            page: 1,
            page_size: if page_size == 0 { 1 } else { page_size },
        }
    }

    #[must_use]
    pub const fn page(&self) -> usize {
        self.page
    }

    #[must_use]
    pub const fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of pages for `total` rows. Always at least 1.
    #[must_use]
    pub const fn page_count(&self, total: usize) -> usize {
        let pages = total.div_ceil(self.page_size);
        if pages == 0 { 1 } else { pages }
    }

    /// Jump to `page`, clamped to the valid range for `total` rows.
    pub fn set_page(&mut self, page: usize, total: usize) {
        self.page = page.clamp(1, self.page_count(total));
    }

    /// Back to page 1, e.g. after the search term changes.
    pub const fn reset(&mut self) {
        self.page = 1;
    }

    /// Rows on the current page. Out-of-range pages yield the last page.
    #[must_use]
    pub fn slice<'a, T>(&self, items: &'a [T]) -> &'a [T] {
        let page = self.page.min(self.page_count(items.len()));
        let start = (page - 1) * self.page_size;
        let end = (start + self.page_size).min(items.len());
        items.get(start..end).unwrap_or_default()
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}
