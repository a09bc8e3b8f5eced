use nanoid::nanoid;
use serde::{Deserialize, Serialize};

/// Generate a 12-character nanoid
#[must_use]
pub fn generate_id() -> String {
    nanoid!(12)
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Room name. Doubles as the relay's application namespace (`app`).
    RoomId
);

string_id!(
    /// Opaque participant identity as supplied by the presence caller
    Identity
);

string_id!(
    /// Identifier of one push channel (SSE connection)
    ClientId
);

string_id!(
    /// Stream name within a room (the relay's `stream` / `name`)
    StreamName
);

impl ClientId {
    /// `{room}-{nanoid}`
    #[must_use]
    pub fn generate(room: &RoomId) -> Self {
        Self(format!("{}-{}", room.as_str(), generate_id()))
    }
}
