//! Client configuration.

use crate::remote::Table;
use std::time::Duration;

/// Tunables for the sync layer.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Deadline for each remote call made on a mutation path.
    pub remote_timeout: Duration,
    /// Tables the change feed subscription covers.
    pub watched_tables: Vec<Table>,
    /// Optional title substring applied to marketplace refreshes.
    pub listing_title_filter: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote_timeout: Duration::from_secs(10),
            watched_tables: vec![
                Table::Posts,
                Table::Comments,
                Table::Reactions,
                Table::Listings,
            ],
            listing_title_filter: None,
        }
    }
}

impl SyncConfig {
    /// Override the per-call remote deadline.
    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    /// Restrict the change feed to specific tables.
    pub fn with_watched_tables(mut self, tables: Vec<Table>) -> Self {
        self.watched_tables = tables;
        self
    }

    /// Filter marketplace refreshes by a title substring.
    pub fn with_listing_title_filter(mut self, filter: impl Into<String>) -> Self {
        self.listing_title_filter = Some(filter.into());
        self
    }
}
