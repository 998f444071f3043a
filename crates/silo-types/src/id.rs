use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Generates a UUID v7 identifier newtype.
///
/// UUID v7 embeds a millisecond timestamp in its high bits, so identifiers
/// minted later sort after earlier ones. The engine still orders rows by
/// creation anchor first and only uses the id as a tie-breaker.
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(uuid::Uuid);

        impl $name {
            /// Generate a new time-ordered identifier (UUID v7).
            pub fn new() -> Self {
                Self(uuid::Uuid::now_v7())
            }

            /// Create from an existing UUID.
            pub fn from_uuid(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }

            /// The underlying UUID.
            pub fn as_uuid(&self) -> &uuid::Uuid {
                &self.0
            }

            /// Short representation (first 8 characters of the UUID).
            pub fn short_id(&self) -> String {
                self.0.to_string()[..8].to_string()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "({})"), self.short_id())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = TypeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                uuid::Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| TypeError::InvalidId(e.to_string()))
            }
        }
    };
}

uuid_id!(
    /// Identity of a stored file record. Assigned at ingest, never reused.
    FileId,
    "FileId"
);

uuid_id!(
    /// Identity of a duplicate-to-canonical reference edge.
    ReferenceId,
    "ReferenceId"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        assert_ne!(FileId::new(), FileId::new());
        assert_ne!(ReferenceId::new(), ReferenceId::new());
    }

    #[test]
    fn parse_roundtrip() {
        let id = FileId::new();
        let parsed: FileId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(
            "not-a-uuid".parse::<FileId>(),
            Err(TypeError::InvalidId(_))
        ));
    }

    #[test]
    fn debug_uses_short_id() {
        let id = ReferenceId::new();
        let debug = format!("{id:?}");
        assert!(debug.starts_with("ReferenceId("));
        assert_eq!(id.short_id().len(), 8);
    }
}
