//! # latchkey-types: Core types for `Latchkey`
//!
//! This crate contains shared types used across the `Latchkey` system:
//! - String identifiers ([`PolicyId`], [`SubjectId`], [`DeviceId`])
//! - Generated identifiers ([`RequestId`], [`GrantId`], [`DelegationId`])
//! - Actors ([`Principal`], [`Role`])
//! - Content addressing ([`ContentHash`])

use std::fmt::{Debug, Display};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// String Identifiers - Clone (caller-chosen names)
// ============================================================================

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Returns true if the identifier is the empty string.
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Unique, immutable identifier of a policy. Chosen by the policy author.
    PolicyId
);

string_id!(
    /// Identifier of a subject (user, service account, or device acting as a requester).
    SubjectId
);

string_id!(
    /// Identifier of a registered IoT device.
    DeviceId
);

// ============================================================================
// Generated Identifiers - Copy (16-byte UUIDs)
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generates a fresh random identifier.
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }
    };
}

uuid_id!(
    /// Identifier of an access request, assigned when the request is accepted.
    RequestId
);

uuid_id!(
    /// Identifier of an issued access grant.
    GrantId
);

uuid_id!(
    /// Identifier of a delegation chain.
    DelegationId
);

// ============================================================================
// Actors
// ============================================================================

/// Privilege level of an actor performing administrative operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Ordinary subject. May only mutate entities it created or owns.
    User,
    /// Administrator. May mutate any policy, delegation, or grant.
    Admin,
}

/// A subject together with its resolved role.
///
/// Precondition checks on mutating operations take a `Principal` so the
/// role decision is made once, by the caller that knows the admin set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    pub id: SubjectId,
    pub role: Role,
}

impl Principal {
    pub fn new(id: impl Into<SubjectId>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    /// Creates a principal with the `User` role.
    pub fn user(id: impl Into<SubjectId>) -> Self {
        Self::new(id, Role::User)
    }

    /// Creates a principal with the `Admin` role.
    pub fn admin(id: impl Into<SubjectId>) -> Self {
        Self::new(id, Role::Admin)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Returns true if this principal is an admin or is `owner`.
    pub fn is_admin_or(&self, owner: &SubjectId) -> bool {
        self.is_admin() || &self.id == owner
    }
}

// ============================================================================
// Content Hash - Copy (fixed 32-byte value)
// ============================================================================

/// Length of content hashes in bytes (SHA-256).
pub const HASH_LENGTH: usize = 32;

/// Digest of a terminal record, handed to the ledger anchor.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentHash([u8; HASH_LENGTH]);

impl ContentHash {
    /// Creates a hash from raw bytes.
    pub fn from_bytes(bytes: [u8; HASH_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Returns the hash as a byte slice.
    pub fn as_bytes(&self) -> &[u8; HASH_LENGTH] {
        &self.0
    }
}

impl Debug for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // First 8 bytes are enough to tell hashes apart in logs
        write!(
            f,
            "ContentHash({:02x}{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}...)",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5], self.0[6], self.0[7]
        )
    }
}

impl Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl From<[u8; HASH_LENGTH]> for ContentHash {
    fn from(bytes: [u8; HASH_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for ContentHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
