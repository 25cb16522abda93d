/// Errors surfaced while compiling a query model into an operator tree, or while executing it.
///
/// `SqlError` always carries the character offset of the offending token so callers can render a
/// caret diagnostic. `StorageError` comes from the storage collaborator and carries no position.
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[{position}] {message}")]
pub struct SqlError {
    pub position: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("table does not exist [table={0}]")]
    NoTable(String),
    #[error("table structure changed [table={table}, expected={expected}, actual={actual}]")]
    VersionMismatch {
        table: String,
        expected: u64,
        actual: u64,
    },
    #[error("access denied [principal={principal}, table={table}]")]
    AccessDenied { principal: String, table: String },
    #[error("invalid row id [{0}]")]
    InvalidRowId(u64),
    #[error("cursor does not support random access")]
    NoRandomAccess,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error(transparent)]
    Sql(#[from] SqlError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl SqlError {
    pub fn new(position: usize, message: impl fmt::Display) -> Self {
        Self {
            position,
            message: message.to_string(),
        }
    }

    pub fn invalid_column(position: usize, column: &str) -> Self {
        Self::new(position, format!("Invalid column: {}", column))
    }

    pub fn invalid_date(position: usize) -> Self {
        Self::new(position, "Invalid date")
    }
}

impl Error {
    /// Position of the offending token, when the error came out of compilation.
    pub fn position(&self) -> Option<usize> {
        match self {
            Self::Sql(err) => Some(err.position),
            Self::Storage(_) => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Sql(err) => err.message.clone(),
            Self::Storage(err) => err.to_string(),
        }
    }
}

/// Shorthand for `Err(SqlError::new(..).into())`.
pub(crate) fn sql_err<T>(position: usize, message: impl fmt::Display) -> Result<T> {
    Err(SqlError::new(position, message).into())
}
