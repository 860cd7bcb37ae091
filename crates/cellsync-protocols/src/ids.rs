//! Identifiers for documents, users and kernels.
//!
//! Document and user ids end up inside orchestration resource names
//! (`rt-{document}-{kind}`, `vol-{user}`), so both are restricted to
//! DNS label characters.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::IdError;

/// Longest document id that still fits `rt-{id}-{kind}` into a 63 character label.
pub const MAX_DOCUMENT_ID_LEN: usize = 48;

/// Longest user id that fits `vol-{id}` into a 63 character label.
pub const MAX_USER_ID_LEN: usize = 59;

fn validate_label(value: &str, max: usize) -> Result<(), IdError> {
    if value.is_empty() {
        return Err(IdError::Empty);
    }
    if value.len() > max {
        return Err(IdError::TooLong(value.to_string(), max));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(IdError::InvalidCharacters(value.to_string()));
    }
    if value.starts_with('-') || value.ends_with('-') {
        return Err(IdError::InvalidBoundary(value.to_string()));
    }
    Ok(())
}

macro_rules! label_id {
    ($(#[$meta:meta])* $name:ident, $max:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Parse and validate an identifier.
            pub fn parse(value: impl Into<String>) -> Result<Self, IdError> {
                let value = value.into();
                validate_label(&value, $max)?;
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

label_id!(
    /// Identifier of a collaborative document.
    DocumentId,
    MAX_DOCUMENT_ID_LEN
);

label_id!(
    /// Identifier of a user, used to name the per-user volume.
    UserId,
    MAX_USER_ID_LEN
);

/// The fixed set of kernel kinds a document can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelKind {
    Python,
    Julia,
    R,
    Javascript,
}

impl KernelKind {
    pub const ALL: [KernelKind; 4] = [
        KernelKind::Python,
        KernelKind::Julia,
        KernelKind::R,
        KernelKind::Javascript,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KernelKind::Python => "python",
            KernelKind::Julia => "julia",
            KernelKind::R => "r",
            KernelKind::Javascript => "javascript",
        }
    }

    /// Whether the kernel answers `execute_request` with an `execute_reply`.
    ///
    /// Kernels that don't are considered finished once they publish a result.
    pub fn emits_execute_reply(&self) -> bool {
        !matches!(self, KernelKind::Javascript)
    }
}

impl fmt::Display for KernelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KernelKind {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KernelKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| IdError::UnknownKernelKind(s.to_string()))
    }
}

/// Key of one kernel: at most one kernel runs per (document, kind).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KernelKey {
    pub document: DocumentId,
    pub kind: KernelKind,
}

impl KernelKey {
    pub fn new(document: DocumentId, kind: KernelKind) -> Self {
        Self { document, kind }
    }

    /// Suffix shared by every orchestration resource of this kernel.
    pub fn resource_suffix(&self) -> String {
        format!("{}-{}", self.document, self.kind)
    }
}

impl fmt::Display for KernelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.document, self.kind)
    }
}

#[cfg(test)]
#[path = "ids_tests.rs"]
mod tests;
