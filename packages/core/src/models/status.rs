//! Page status bitmask

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr};

/// Status flags stored in `pages.status`
///
/// Visibility grows more restrictive as the numeric value grows: anything at
/// or above [`Status::HIDDEN`] is hidden from default finds, at or above
/// [`Status::UNPUBLISHED`] is unpublished, and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Status(pub i64);

impl Status {
    pub const ON: Status = Status(1);
    pub const LOCKED: Status = Status(4);
    pub const SYSTEM_ID: Status = Status(8);
    pub const SYSTEM: Status = Status(16);
    pub const HIDDEN: Status = Status(1024);
    pub const UNPUBLISHED: Status = Status(2048);
    pub const TRASH: Status = Status(8192);
    pub const DELETED: Status = Status(16384);
    pub const CORRUPTED: Status = Status(131072);

    const NAMES: [(&'static str, Status); 9] = [
        ("on", Status::ON),
        ("locked", Status::LOCKED),
        ("systemid", Status::SYSTEM_ID),
        ("system", Status::SYSTEM),
        ("hidden", Status::HIDDEN),
        ("unpublished", Status::UNPUBLISHED),
        ("trash", Status::TRASH),
        ("deleted", Status::DELETED),
        ("corrupted", Status::CORRUPTED),
    ];

    pub fn bits(self) -> i64 {
        self.0
    }

    pub fn has(self, flag: Status) -> bool {
        self.0 & flag.0 != 0
    }

    #[must_use]
    pub fn with(self, flag: Status) -> Status {
        Status(self.0 | flag.0)
    }

    #[must_use]
    pub fn without(self, flag: Status) -> Status {
        Status(self.0 & !flag.0)
    }

    /// Resolve a status name (`hidden`, `unpublished`, ...) or a numeric literal
    pub fn from_name(name: &str) -> Option<Status> {
        let lowered = name.trim().to_ascii_lowercase();
        if let Ok(bits) = lowered.parse::<i64>() {
            return Some(Status(bits));
        }
        Self::NAMES
            .iter()
            .find(|(n, _)| *n == lowered)
            .map(|(_, status)| *status)
    }

    /// Names of every flag set on this status
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(_, flag)| self.has(*flag))
            .map(|(name, _)| *name)
            .collect()
    }

    pub fn is_hidden(self) -> bool {
        self.has(Status::HIDDEN)
    }

    pub fn is_unpublished(self) -> bool {
        self.has(Status::UNPUBLISHED)
    }

    pub fn is_trash(self) -> bool {
        self.has(Status::TRASH)
    }

    /// System pages can be neither deleted nor trashed
    pub fn is_system(self) -> bool {
        self.has(Status::SYSTEM) || self.has(Status::SYSTEM_ID)
    }

    pub fn is_locked(self) -> bool {
        self.has(Status::LOCKED)
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::ON
    }
}

impl BitOr for Status {
    type Output = Status;

    fn bitor(self, rhs: Status) -> Status {
        self.with(rhs)
    }
}

impl BitAnd for Status {
    type Output = Status;

    fn bitand(self, rhs: Status) -> Status {
        Status(self.0 & rhs.0)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_arithmetic() {
        let status = Status::ON | Status::HIDDEN;
        assert!(status.is_hidden());
        assert!(!status.is_trash());

        let trashed = status.with(Status::TRASH);
        assert!(trashed.is_trash());
        assert_eq!(trashed.without(Status::TRASH), status);
    }

    #[test]
    fn test_from_name() {
        assert_eq!(Status::from_name("Hidden"), Some(Status::HIDDEN));
        assert_eq!(Status::from_name("2048"), Some(Status::UNPUBLISHED));
        assert_eq!(Status::from_name("bogus"), None);
    }

    #[test]
    fn test_names() {
        let status = Status::ON | Status::UNPUBLISHED | Status::TRASH;
        assert_eq!(status.names(), vec!["on", "unpublished", "trash"]);
    }

    #[test]
    fn test_visibility_ordering() {
        assert!(Status::ON.with(Status::HIDDEN) < Status::UNPUBLISHED);
        assert!(Status::ON.with(Status::UNPUBLISHED) < Status::TRASH);
    }
}
