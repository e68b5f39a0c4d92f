//! Table naming rules.

use crate::error::{CoreError, Result};

/// Separator reserved for internal sub-map names.
pub const RESERVED_SEPARATOR: &str = "__";

/// Check that `name` may be used as a user table name.
pub fn validate_table_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CoreError::InvalidTableName {
            name: name.to_string(),
            reason: "name is empty",
        });
    }
    if name.contains(RESERVED_SEPARATOR) {
        return Err(CoreError::InvalidTableName {
            name: name.to_string(),
            reason: "name contains the reserved separator \"__\"",
        });
    }
    Ok(())
}

/// Whether a stored map name is a user table rather than internal metadata.
pub fn is_user_table(name: &str) -> bool {
    validate_table_name(name).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        assert!(validate_table_name("users").is_ok());
        assert!(validate_table_name("a_b").is_ok());
    }

    #[test]
    fn test_reserved_separator_rejected() {
        assert!(validate_table_name("users__meta").is_err());
        assert!(validate_table_name("__").is_err());
        assert!(validate_table_name("").is_err());
    }

    #[test]
    fn test_internal_names_are_not_user_tables() {
        assert!(!is_user_table("users__meta"));
        assert!(is_user_table("users"));
    }
}
