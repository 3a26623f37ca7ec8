//! The closed set of principal roles.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Role assigned to an identity.
///
/// Stored as its snake_case name (`super_admin`, `admin`, ...) both in the
/// credential store and in token claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Top-level administrator.
    SuperAdmin,
    /// Clinic administrator.
    Admin,
    /// Clinician.
    Doctor,
    Staff,
    Patient,
    /// Non-interactive caller authenticated by API key.
    ApiClient,
}

impl Role {
    /// Every role, widest privileges first.
    pub const ALL: [Role; 6] = [
        Role::SuperAdmin,
        Role::Admin,
        Role::Doctor,
        Role::Staff,
        Role::Patient,
        Role::ApiClient,
    ];

    /// Roles that bypass resource ownership checks.
    pub const ADMINISTRATORS: [Role; 2] = [Role::SuperAdmin, Role::Admin];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SuperAdmin => "super_admin",
            Self::Admin => "admin",
            Self::Doctor => "doctor",
            Self::Staff => "staff",
            Self::Patient => "patient",
            Self::ApiClient => "api_client",
        }
    }

    /// Returns `true` for top-level and clinic administrators.
    #[must_use]
    pub fn is_administrator(self) -> bool {
        Self::ADMINISTRATORS.contains(&self)
    }

    /// Returns `true` for roles whose resource access is scoped by clinic.
    #[must_use]
    pub fn is_clinic_scoped(self) -> bool {
        matches!(self, Self::Doctor | Self::Staff)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown role name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| UnknownRole(s.to_string()))
    }
}
