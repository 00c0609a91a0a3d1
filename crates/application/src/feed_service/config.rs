use tasklane_core::{AppError, AppResult};

/// Tuning for mounted feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedConfig {
    /// Page size for every load.
    pub page_limit: u32,
    /// First delay before resubscribing after the live channel ends.
    pub resubscribe_initial_backoff_ms: u64,
    /// Upper bound for the resubscribe delay.
    pub resubscribe_max_backoff_ms: u64,
    /// Buffered live deliveries per feed.
    pub delivery_channel_capacity: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            page_limit: 20,
            resubscribe_initial_backoff_ms: 500,
            resubscribe_max_backoff_ms: 30_000,
            delivery_channel_capacity: 64,
        }
    }
}

impl FeedConfig {
    /// Rejects zero values.
    pub fn validate(&self) -> AppResult<()> {
        if self.page_limit == 0 {
            return Err(AppError::Validation(
                "feed page limit must be greater than zero".to_owned(),
            ));
        }

        if self.resubscribe_initial_backoff_ms == 0 {
            return Err(AppError::Validation(
                "resubscribe initial backoff must be greater than zero".to_owned(),
            ));
        }

        if self.resubscribe_max_backoff_ms < self.resubscribe_initial_backoff_ms {
            return Err(AppError::Validation(
                "resubscribe max backoff must not be below the initial backoff".to_owned(),
            ));
        }

        if self.delivery_channel_capacity == 0 {
            return Err(AppError::Validation(
                "delivery channel capacity must be greater than zero".to_owned(),
            ));
        }

        Ok(())
    }
}
