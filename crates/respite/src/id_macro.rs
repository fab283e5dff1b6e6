//! Macros for reducing identifier boilerplate. Crate-local: the expansions
//! name `serde` and `uuid` directly.

/// Declare a string-backed identifier newtype for authored content.
///
/// Definitions come out of the surrounding application's record store keyed by
/// whatever id the admin tooling assigned, so these ids stay opaque strings.
///
/// # Example
///
/// ```ignore
/// use crate::id_macro::string_id;
///
/// string_id! {
///     /// Identifier of a breathing protocol.
///     pub struct ProtocolId;
/// }
///
/// let id = ProtocolId::new("box-breathing");
/// assert_eq!(id.as_str(), "box-breathing");
/// ```
macro_rules! string_id {
    ($(#[$meta:meta])* pub struct $name:ident;) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

/// Declare a UUID-backed identifier newtype for runtime entities.
macro_rules! uuid_id {
    ($(#[$meta:meta])* pub struct $name:ident;) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(uuid::Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4())
            }

            pub fn from_uuid(id: uuid::Uuid) -> Self {
                Self(id)
            }

            pub fn as_uuid(&self) -> &uuid::Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                std::fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

pub(crate) use string_id;
pub(crate) use uuid_id;

#[cfg(test)]
mod tests {
    use super::{string_id, uuid_id};

    string_id! {
        pub struct LabelId;
    }

    uuid_id! {
        pub struct TokenId;
    }

    #[test]
    fn test_macros_expand_by_module_path() {
        let label = LabelId::from("evening");
        assert_eq!(serde_json::to_string(&label).unwrap(), "\"evening\"");

        let token = TokenId::new();
        let json = serde_json::to_string(&token).unwrap();
        assert_eq!(json, format!("\"{}\"", token.as_uuid()));
    }
}
