//! Validation utilities for ledger inputs

use std::collections::HashSet;
use std::hash::Hash;

/// Longest free-text note accepted on requests, returns and receipts
pub const MAX_NOTE_LENGTH: usize = 500;

// ============================================================================
// Line Item Validations
// ============================================================================

/// First key that appears more than once, if any.
///
/// Item lists are keyed by product; a product may only appear on one line.
pub fn first_duplicate<T, I>(keys: I) -> Option<T>
where
    T: Eq + Hash + Copy,
    I: IntoIterator<Item = T>,
{
    let mut seen = HashSet::new();
    keys.into_iter().find(|k| !seen.insert(*k))
}

/// Validate an optional free-text note
pub fn validate_note(note: Option<&str>) -> Result<(), &'static str> {
    match note {
        Some(n) if n.chars().count() > MAX_NOTE_LENGTH => Err("Note must be at most 500 characters"),
        _ => Ok(()),
    }
}

/// Trim a note, mapping blank input to `None`
pub fn normalize_note(note: Option<String>) -> Option<String> {
    note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())
}

// ============================================================================
// Reference Validations
// ============================================================================

/// Validate a ledger reference (purchase order, invoice...)
pub fn validate_reference(reference: &str) -> Result<(), &'static str> {
    let trimmed = reference.trim();
    if trimmed.is_empty() {
        return Err("Reference cannot be empty");
    }
    if trimmed.len() > 100 {
        return Err("Reference must be at most 100 characters");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_first_duplicate() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(first_duplicate([a, b]), None);
        assert_eq!(first_duplicate([a, b, a]), Some(a));
        assert_eq!(first_duplicate(Vec::<Uuid>::new()), None);
    }

    #[test]
    fn test_validate_note() {
        assert!(validate_note(None).is_ok());
        assert!(validate_note(Some("short")).is_ok());
        assert!(validate_note(Some(&"x".repeat(MAX_NOTE_LENGTH))).is_ok());
        assert!(validate_note(Some(&"x".repeat(MAX_NOTE_LENGTH + 1))).is_err());
    }

    #[test]
    fn test_normalize_note() {
        assert_eq!(normalize_note(Some("  ok ".to_string())), Some("ok".to_string()));
        assert_eq!(normalize_note(Some("   ".to_string())), None);
        assert_eq!(normalize_note(None), None);
    }

    #[test]
    fn test_validate_reference() {
        assert!(validate_reference("PO-2024-001").is_ok());
        assert!(validate_reference("  ").is_err());
        assert!(validate_reference(&"R".repeat(101)).is_err());
    }
}
