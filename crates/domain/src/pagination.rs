use serde::{Deserialize, Serialize};

/// Cursor describing the last loaded page of a feed.
///
/// `total` counts entries across all pages. The last page may be short, so
/// `total == total_pages * limit` does not hold in general.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    /// 1-based page number.
    pub page: u32,
    /// Page size.
    pub limit: u32,
    /// Entry count across all pages.
    pub total: u64,
    /// Page count across the whole log.
    pub total_pages: u32,
    /// Whether a later page exists.
    pub has_more: bool,
    /// Whether an earlier page exists.
    pub has_previous: bool,
}

impl Pagination {
    /// Builds the cursor for `page` of a log holding `total` entries.
    #[must_use]
    pub fn for_page(page: u32, limit: u32, total: u64) -> Self {
        let page = page.max(1);
        let total_pages = if limit == 0 {
            0
        } else {
            u32::try_from(total.div_ceil(u64::from(limit))).unwrap_or(u32::MAX)
        };

        Self {
            page,
            limit,
            total,
            total_pages,
            has_more: page < total_pages,
            has_previous: page > 1,
        }
    }

    /// Returns the page to request next, when one exists.
    #[must_use]
    pub fn next_page(&self) -> Option<u32> {
        self.has_more.then(|| self.page.saturating_add(1))
    }

    /// Returns a copy with `total` raised by `added`.
    ///
    /// `total_pages` and `has_more` stay as the backend last reported them.
    #[must_use]
    pub fn with_additional_total(&self, added: u64) -> Self {
        Self {
            total: self.total.saturating_add(added),
            ..*self
        }
    }
}
