use thiserror::Error;

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(format!("JSON serialization error: {}", err))
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return Self::WriteConflict(db_err.message().to_string());
            }
        }
        Self::Database(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Write conflict: {0}")]
    WriteConflict(String),

    #[error(
        "Cursor desync: writer is at sequence {cursor_sequence}, store tail is at {store_sequence}"
    )]
    CursorDesync {
        cursor_sequence: u64,
        store_sequence: u64,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

impl LedgerError {
    pub fn duplicate(field: &str, value: &str) -> Self {
        Self::WriteConflict(format!("duplicate {}: {}", field, value))
    }

    /// True when retrying with a fresh request id could succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::WriteConflict(_))
    }
}
