//! Identifier validation
//!
//! Partition names, namespaces and keys are bounded by the engine. Oversize
//! identifiers are not rejected: they are truncated to the configured limit
//! and the truncated form is used for the rest of the call. The caller only
//! learns about it through a warning.

use crate::error::{Error, Result};
use std::borrow::Cow;
use std::fmt;
use tracing::warn;

/// Which identifier is being checked, for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    Partition,
    Namespace,
    Key,
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentifierKind::Partition => write!(f, "partition"),
            IdentifierKind::Namespace => write!(f, "namespace"),
            IdentifierKind::Key => write!(f, "key"),
        }
    }
}

/// Truncate `value` to at most `max_len` bytes.
///
/// The cut never splits a UTF-8 sequence, so a multi-byte character that
/// straddles the limit is dropped whole. Same input, same output.
///
/// # Examples
///
/// ```rust
/// use nvs_pool::validate::{truncate, IdentifierKind};
///
/// assert_eq!(truncate(IdentifierKind::Key, "short", 15), "short");
/// assert_eq!(
///     truncate(IdentifierKind::Key, "a_very_long_key_name", 15),
///     "a_very_long_key"
/// );
/// ```
pub fn truncate(kind: IdentifierKind, value: &str, max_len: usize) -> Cow<'_, str> {
    if value.len() <= max_len {
        return Cow::Borrowed(value);
    }

    let mut end = max_len;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    let truncated = &value[..end];

    warn!(
        %kind,
        original = value,
        truncated,
        max_len,
        "Identifier too long, truncated; this may cause unexpected collisions"
    );
    crate::metrics::record_truncation(kind);
    Cow::Borrowed(truncated)
}

/// Reject an empty identifier, then truncate it
pub fn identifier(kind: IdentifierKind, value: &str, max_len: usize) -> Result<Cow<'_, str>> {
    if value.is_empty() {
        return Err(Error::InvalidArgument(format!("{} cannot be empty", kind)));
    }
    Ok(truncate(kind, value, max_len))
}

/// Validate a key: non-empty, truncated to `max_len`
pub fn key(value: &str, max_len: usize) -> Result<Cow<'_, str>> {
    identifier(IdentifierKind::Key, value, max_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_identifiers_untouched() {
        let value = truncate(IdentifierKind::Namespace, "wifi", 15);
        assert!(matches!(value, Cow::Borrowed("wifi")));
        assert_eq!(truncate(IdentifierKind::Key, &"k".repeat(15), 15).len(), 15);
    }

    #[test]
    fn test_truncation_is_deterministic() {
        let long = "calibration_offset_x";
        let first = truncate(IdentifierKind::Key, long, 15);
        let second = truncate(IdentifierKind::Key, long, 15);
        assert_eq!(first, "calibration_off");
        assert_eq!(first, second);
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        // 'é' is two bytes; a cut at byte 15 would split it
        let value = format!("{}é", "a".repeat(14));
        let truncated = truncate(IdentifierKind::Key, &value, 15);
        assert_eq!(truncated, "a".repeat(14));
    }

    #[test]
    fn test_empty_identifiers_rejected() {
        assert!(matches!(key("", 15), Err(Error::InvalidArgument(_))));
        assert!(matches!(
            identifier(IdentifierKind::Partition, "", 15),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(key("boot_count", 15).unwrap(), "boot_count");
    }
}
