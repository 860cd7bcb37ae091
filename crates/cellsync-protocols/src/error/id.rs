//! Identifier validation errors.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdError {
    #[error("Identifier is empty")]
    Empty,

    #[error("Identifier too long: {0} (max {1} characters)")]
    TooLong(String, usize),

    #[error("Invalid identifier {0}: only lowercase letters, digits and '-' are allowed")]
    InvalidCharacters(String),

    #[error("Invalid identifier {0}: must start and end with a letter or digit")]
    InvalidBoundary(String),

    #[error("Unknown kernel kind: {0}")]
    UnknownKernelKind(String),
}
