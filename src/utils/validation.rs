//! Input validation primitives.
//!
//! Ergonomic helpers for the fail-fast checks run before any remote call:
//! - Validating non-empty strings and collections
//! - Validating membership in an allowed set

use crate::error::{Error, Result};

/// Require a string to be non-empty after trimming.
///
/// Returns a reference to the trimmed string on success.
pub fn require_non_empty<'a>(value: &'a str, field: &str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(Error::validation_invalid_argument(
            field,
            format!("{} must be a non-empty string", field),
            None,
            None,
        ))
    } else {
        Ok(trimmed)
    }
}

/// Require a collection to be non-empty.
pub fn require_non_empty_vec<'a, T>(vec: &'a [T], field: &str) -> Result<&'a [T]> {
    if vec.is_empty() {
        Err(Error::validation_invalid_argument(
            field,
            format!("{} must be a non-empty list", field),
            None,
            None,
        ))
    } else {
        Ok(vec)
    }
}

/// Require a non-empty list whose items are all non-empty strings.
pub fn require_non_empty_items<'a, S: AsRef<str>>(items: &'a [S], field: &str) -> Result<&'a [S]> {
    require_non_empty_vec(items, field)?;

    if let Some(index) = items.iter().position(|s| s.as_ref().trim().is_empty()) {
        return Err(Error::validation_invalid_argument(
            field,
            format!("All items in {} must be non-empty strings", field),
            Some(index.to_string()),
            None,
        ));
    }

    Ok(items)
}
