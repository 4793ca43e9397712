use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::validation::Validator;

/// Cursor pagination parameters for message listings.
///
/// The cursor is an exclusive upper bound: only messages strictly older
/// than it are returned, newest first.
#[derive(Debug, Clone, Copy)]
pub struct Filters {
    pub cursor: DateTime<Utc>,
    pub page_size: i64,
}

impl Filters {
    pub fn validate(&self, v: &mut Validator) {
        v.check(self.cursor <= Utc::now(), "cursor", "Cursor must be in the past");
        v.check(
            self.page_size > 0,
            "page_size",
            "Page size must be greater than zero",
        );
        v.check(
            self.page_size <= 100,
            "page_size",
            "Page size must be a maximum of 100",
        );
    }
}

/// Pagination envelope returned alongside a page of messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Metadata {
    pub current_cursor: String,
    pub next_cursor: String,
    pub page_size: i64,
}

impl Metadata {
    /// Metadata for an empty page; the next cursor stays where it was.
    pub(crate) fn empty(cursor: DateTime<Utc>, page_size: i64) -> Self {
        Self {
            current_cursor: format_cursor(cursor),
            next_cursor: format_cursor(cursor),
            page_size,
        }
    }

    /// Metadata for a non-empty page ending at `next_cursor` (the oldest
    /// timestamp of the returned page).
    pub(crate) fn page(
        current_cursor: DateTime<Utc>,
        next_cursor: DateTime<Utc>,
        page_size: i64,
    ) -> Self {
        Self {
            current_cursor: format_cursor(current_cursor),
            next_cursor: format_cursor(next_cursor),
            page_size,
        }
    }
}

fn format_cursor(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn test_filters_valid() {
        let mut v = Validator::new();
        let filters = Filters {
            cursor: Utc::now() - Duration::seconds(1),
            page_size: 20,
        };
        filters.validate(&mut v);
        assert!(v.is_valid());
    }

    #[test]
    fn test_filters_future_cursor_rejected() {
        let mut v = Validator::new();
        let filters = Filters {
            cursor: Utc::now() + Duration::hours(1),
            page_size: 20,
        };
        filters.validate(&mut v);
        assert_eq!(
            v.into_errors().get("cursor").map(String::as_str),
            Some("Cursor must be in the past")
        );
    }

    #[test]
    fn test_filters_page_size_bounds() {
        let cursor = Utc::now() - Duration::seconds(1);

        let mut v = Validator::new();
        Filters { cursor, page_size: 0 }.validate(&mut v);
        assert_eq!(
            v.into_errors().get("page_size").map(String::as_str),
            Some("Page size must be greater than zero")
        );

        let mut v = Validator::new();
        Filters { cursor, page_size: 101 }.validate(&mut v);
        assert_eq!(
            v.into_errors().get("page_size").map(String::as_str),
            Some("Page size must be a maximum of 100")
        );

        let mut v = Validator::new();
        Filters { cursor, page_size: 100 }.validate(&mut v);
        assert!(v.is_valid());
    }

    #[test]
    fn test_empty_metadata_keeps_cursor() {
        let cursor = Utc::now();
        let metadata = Metadata::empty(cursor, 20);
        assert_eq!(metadata.current_cursor, metadata.next_cursor);
        assert_eq!(metadata.page_size, 20);
    }

    #[test]
    fn test_page_metadata_advances_cursor() {
        let current = Utc::now();
        let next = current - Duration::minutes(5);
        let metadata = Metadata::page(current, next, 20);
        assert_ne!(metadata.current_cursor, metadata.next_cursor);
        assert_eq!(metadata.next_cursor, next.to_rfc3339_opts(SecondsFormat::Nanos, true));
    }
}
