pub mod bookmarks;
pub mod history;
pub mod preferences;

use chrono::Utc;
use rusqlite::ErrorCode;
use std::fmt;

/// Failure taxonomy shared by the three stores. The dispatcher maps these
/// onto the tagged categories of the command contract.
#[derive(Debug)]
pub enum StoreError {
    /// Malformed or out-of-range input (unknown preference key, negative
    /// duration delta, type mismatch).
    Validation(String),
    /// Would violate a uniqueness or referential constraint.
    Constraint(String),
    /// The underlying engine failed to open, read, or commit.
    Storage(anyhow::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Validation(message) => write!(f, "validation: {message}"),
            StoreError::Constraint(message) => write!(f, "constraint: {message}"),
            StoreError::Storage(error) => write!(f, "storage: {error}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(error: rusqlite::Error) -> Self {
        match &error {
            rusqlite::Error::SqliteFailure(failure, message) => match failure.code {
                ErrorCode::ConstraintViolation => StoreError::Constraint(
                    message
                        .clone()
                        .unwrap_or_else(|| "constraint violation".to_string()),
                ),
                _ => StoreError::Storage(error.into()),
            },
            _ => StoreError::Storage(error.into()),
        }
    }
}

impl From<anyhow::Error> for StoreError {
    fn from(error: anyhow::Error) -> Self {
        StoreError::Storage(error)
    }
}

/// Epoch milliseconds, the timestamp unit of the persisted contract.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Builds a `%substring%` LIKE pattern with SQL wildcards escaped so the
/// query text matches literally. Pair with `ESCAPE '\'`.
pub fn like_pattern(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len() + 2);
    escaped.push('%');
    for ch in query.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

#[cfg(test)]
mod tests {
    use super::like_pattern;

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("100%_done"), "%100\\%\\_done%");
    }

    #[test]
    fn like_pattern_wraps_plain_text() {
        assert_eq!(like_pattern("rust"), "%rust%");
    }
}
