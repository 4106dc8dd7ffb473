use serde::{Deserialize, Serialize};

/// Page/limit/total bookkeeping for list views. Pages are 1-based and the
/// current page always stays within `1..=total_pages`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationState {
    page: usize,
    limit: usize,
    total: usize,
}

impl PaginationState {
    pub fn new(limit: usize) -> Self {
        Self {
            page: 1,
            limit: limit.max(1),
            total: 0,
        }
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Never less than 1, even for an empty list.
    pub fn total_pages(&self) -> usize {
        self.total.div_ceil(self.limit).max(1)
    }

    pub fn has_next_page(&self) -> bool {
        self.page < self.total_pages()
    }

    pub fn has_prev_page(&self) -> bool {
        self.page > 1
    }

    pub fn set_page(&mut self, page: usize) {
        self.page = page.clamp(1, self.total_pages());
    }

    /// Changing the page size returns to the first page.
    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit.max(1);
        self.page = 1;
    }

    /// Record the server's total and re-clamp the page.
    pub fn set_total(&mut self, total: usize) {
        self.total = total;
        self.page = self.page.clamp(1, self.total_pages());
    }

    pub fn next_page(&mut self) {
        self.set_page(self.page + 1);
    }

    pub fn prev_page(&mut self) {
        self.set_page(self.page.saturating_sub(1));
    }
}

impl Default for PaginationState {
    fn default() -> Self {
        Self::new(20)
    }
}
