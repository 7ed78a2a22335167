//! Identifiers.
//!
//! Text ids come from outside the process (identity provider, tenant
//! directory, client requests) and are only checked for blankness. UUID ids
//! are minted here.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::ValidationError;

macro_rules! text_id {
    ($(#[$meta:meta])* $name:ident, $field:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Fails on an empty or all-whitespace id.
            pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
                let id = id.into();
                if id.trim().is_empty() {
                    return Err(ValidationError::empty_field($field));
                }
                Ok(Self(id))
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
    };
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

text_id!(
    /// A console user (tutor, student, admin), as issued by the identity provider.
    UserId,
    "user_id"
);

text_id!(
    /// A tutoring business. Budgets are kept per tenant.
    TenantId,
    "tenant_id"
);

uuid_id!(
    /// One live socket held by this process.
    ConnectionId
);

uuid_id!(EventId);

/// A room, e.g. `lesson_42` or `tenant_acme`.
///
/// Stricter than the other text ids: room names end up in client messages
/// and log fields, so whitespace is refused outright.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.is_empty() {
            return Err(ValidationError::empty_field("room_id"));
        }
        if id.chars().any(char::is_whitespace) {
            return Err(ValidationError::invalid_format("room_id", "contains whitespace"));
        }
        Ok(Self(id))
    }

    /// Room every admin of a tenant joins to receive budget notices.
    pub fn for_tenant(tenant: &TenantId) -> Self {
        Self(format!("tenant_{}", tenant.as_str().replace(char::is_whitespace, "-")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The running process, stamped as `origin` on everything it publishes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// `$HOSTNAME:port`, which is the pod name under Kubernetes.
    pub fn from_env(port: u16) -> Self {
        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_owned());
        Self(format!("{host}:{port}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_text_ids_name_their_field() {
        assert_eq!(UserId::new("   ").unwrap_err(), ValidationError::empty_field("user_id"));
        assert_eq!(TenantId::new("").unwrap_err(), ValidationError::empty_field("tenant_id"));
        assert_eq!(UserId::new("u1").unwrap().as_str(), "u1");
    }

    #[test]
    fn room_id_refuses_inner_whitespace() {
        assert!(RoomId::new("lesson 42").is_err());
        assert!(RoomId::new("").is_err());
        assert_eq!(RoomId::new("lesson_42").unwrap().to_string(), "lesson_42");
    }

    #[test]
    fn tenant_room_replaces_spaces() {
        let tenant = TenantId::new("north side").unwrap();
        assert_eq!(RoomId::for_tenant(&tenant).as_str(), "tenant_north-side");
    }

    #[test]
    fn connection_id_survives_a_display_parse_cycle() {
        let id = ConnectionId::new();
        assert_eq!(id.to_string().parse::<ConnectionId>().unwrap(), id);
        assert!("not-a-uuid".parse::<ConnectionId>().is_err());
    }

    #[test]
    fn text_ids_are_bare_json_strings() {
        let id = UserId::new("tutor-7").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"tutor-7\"");
    }
}
