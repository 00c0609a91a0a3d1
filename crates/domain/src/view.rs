use crate::{FeedState, LogEntry, Pagination};

/// Number of entries shown while the feed is collapsed.
pub const PREVIEW_LIMIT: usize = 5;

/// Consumer-facing projection of a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedView<'a> {
    visible: &'a [LogEntry],
    loaded: usize,
    pagination: Option<&'a Pagination>,
    show_all: bool,
}

impl<'a> FeedView<'a> {
    /// Projects `state` for the given `show_all` flag.
    #[must_use]
    pub fn project(state: Option<&'a FeedState>, show_all: bool) -> Self {
        let entries = state.map(FeedState::entries).unwrap_or_default();
        let visible = if show_all {
            entries
        } else {
            &entries[..entries.len().min(PREVIEW_LIMIT)]
        };

        Self {
            visible,
            loaded: entries.len(),
            pagination: state.map(FeedState::pagination),
            show_all,
        }
    }

    /// Returns the entries to display.
    #[must_use]
    pub fn visible(&self) -> &'a [LogEntry] {
        self.visible
    }

    /// Returns the loaded entry count.
    #[must_use]
    pub fn loaded(&self) -> usize {
        self.loaded
    }

    /// Returns the cursor of the last loaded page.
    #[must_use]
    pub fn pagination(&self) -> Option<&'a Pagination> {
        self.pagination
    }

    /// Returns whether the full list is shown.
    #[must_use]
    pub fn show_all(&self) -> bool {
        self.show_all
    }

    /// Load more is offered only in the expanded view and only while the
    /// backend reports further pages.
    #[must_use]
    pub fn can_load_more(&self) -> bool {
        self.show_all && self.pagination.is_some_and(|pagination| pagination.has_more)
    }

    /// The expand toggle is offered once the preview hides something.
    #[must_use]
    pub fn can_toggle_show_all(&self) -> bool {
        self.loaded > PREVIEW_LIMIT
    }

    /// Returns the toggle caption.
    #[must_use]
    pub fn toggle_label(&self) -> String {
        if self.show_all {
            return "Show less".to_owned();
        }

        let total = self
            .pagination
            .map(|pagination| pagination.total)
            .filter(|total| *total > 0)
            .unwrap_or(u64::try_from(self.loaded).unwrap_or(u64::MAX));
        format!("View all activity ({total})")
    }

    /// Returns `Showing N of M activities` for the expanded view.
    #[must_use]
    pub fn showing_summary(&self) -> Option<String> {
        let total = self.pagination?.total;
        (self.show_all && total > 0)
            .then(|| format!("Showing {} of {total} activities", self.loaded))
    }
}
