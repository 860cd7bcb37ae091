//! Connection permission levels.

use serde::{Deserialize, Serialize};

/// What a client may do with a document, resolved once per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    #[default]
    None,
    Read,
    Write,
}

impl Permission {
    pub fn can_read(&self) -> bool {
        *self >= Permission::Read
    }

    pub fn can_write(&self) -> bool {
        *self == Permission::Write
    }

    /// Cap the permission at `read` when the server runs read-only.
    pub fn restrict(self, read_only: bool) -> Self {
        if read_only && self == Permission::Write {
            Permission::Read
        } else {
            self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering() {
        assert!(Permission::Write > Permission::Read);
        assert!(Permission::Read > Permission::None);
    }

    #[test]
    fn test_capabilities() {
        assert!(!Permission::None.can_read());
        assert!(Permission::Read.can_read());
        assert!(!Permission::Read.can_write());
        assert!(Permission::Write.can_write());
    }

    #[test]
    fn test_restrict_read_only() {
        assert_eq!(Permission::Write.restrict(true), Permission::Read);
        assert_eq!(Permission::Write.restrict(false), Permission::Write);
        assert_eq!(Permission::None.restrict(true), Permission::None);
    }
}
