//! Request validation collecting per-field failure reasons.

use std::collections::HashMap;

/// Accumulates validation failures as a field → reason map.
///
/// Only the first failure for a field is kept, so checks can be listed
/// from most to least specific.
#[derive(Debug, Default)]
pub struct Validator {
    errors: HashMap<String, String>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `message` for `field` when `ok` is false.
    pub fn check(&mut self, ok: bool, field: &str, message: &str) {
        if !ok {
            self.add_error(field, message);
        }
    }

    pub fn add_error(&mut self, field: &str, message: &str) {
        self.errors
            .entry(field.to_string())
            .or_insert_with(|| message.to_string());
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_errors(self) -> HashMap<String, String> {
        self.errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_when_all_checks_pass() {
        let mut v = Validator::new();
        v.check(true, "content", "Content is required");
        assert!(v.is_valid());
        assert!(v.into_errors().is_empty());
    }

    #[test]
    fn test_failed_check_records_message() {
        let mut v = Validator::new();
        v.check(false, "content", "Content is required");
        assert!(!v.is_valid());
        assert_eq!(
            v.into_errors().get("content").map(String::as_str),
            Some("Content is required")
        );
    }

    #[test]
    fn test_first_failure_per_field_wins() {
        let mut v = Validator::new();
        v.check(false, "page_size", "Page size must be greater than zero");
        v.check(false, "page_size", "Page size must be a maximum of 100");
        assert_eq!(
            v.into_errors().get("page_size").map(String::as_str),
            Some("Page size must be greater than zero")
        );
    }
}
