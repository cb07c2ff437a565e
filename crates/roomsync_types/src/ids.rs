//! Opaque string identifiers.
//!
//! Identifiers are compared byte-for-byte. They are never validated beyond
//! what individual helpers need (e.g. [`UserId::localpart`]).

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates an identifier from any string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consumes the identifier, returning the owned string.
            #[must_use]
            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }
    };
}

string_id!(
    /// Identifier of a room, e.g. `!abc:example.org`.
    RoomId
);

string_id!(
    /// Identifier of an event, e.g. `$xyz`.
    EventId
);

string_id!(
    /// Identifier of a user, e.g. `@alice:example.org`.
    UserId
);

impl UserId {
    /// Returns the localpart: the text between the sigil and the first `:`.
    ///
    /// Identifiers without a sigil or server part are returned whole.
    #[must_use]
    pub fn localpart(&self) -> &str {
        let s = self.0.strip_prefix('@').unwrap_or(&self.0);
        s.split_once(':').map_or(s, |(local, _)| local)
    }
}
