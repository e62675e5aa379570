//! Error types for problems that may arise when reading or storing wallet data
//! in SQLite.

use std::error;
use std::fmt;

/// The primary error type for the SQLite wallet backend.
#[derive(Debug)]
pub enum SqliteClientError {
    /// A stored value could not be decoded. The database either was written by other
    /// software or has been modified outside the wallet APIs.
    CorruptedData(String),

    /// An error produced by the underlying SQLite database.
    DbError(rusqlite::Error),
}

impl fmt::Display for SqliteClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqliteClientError::CorruptedData(reason) => {
                write!(f, "Data DB is corrupted: {}", reason)
            }
            SqliteClientError::DbError(e) => write!(f, "{}", e),
        }
    }
}

impl error::Error for SqliteClientError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            SqliteClientError::DbError(e) => Some(e),
            SqliteClientError::CorruptedData(_) => None,
        }
    }
}

impl From<rusqlite::Error> for SqliteClientError {
    fn from(e: rusqlite::Error) -> Self {
        SqliteClientError::DbError(e)
    }
}
