/// User roles and the capabilities they carry
use crate::error::{EstateError, EstateResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of an estate user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Unrestricted estate administrator
    Super,
    /// Property owner
    Landlord,
    /// Tenant or occupant
    Resident,
    /// Gate guard
    Security,
}

/// Actions gated by role, resolved once per authenticated request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    IssueTokens,
    ManageEntries,
    MakePayments,
    BypassSubscription,
    Administer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Super => "super",
            Role::Landlord => "landlord",
            Role::Resident => "resident",
            Role::Security => "security",
        }
    }

    pub fn from_str(s: &str) -> EstateResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "super" => Ok(Role::Super),
            "landlord" => Ok(Role::Landlord),
            "resident" => Ok(Role::Resident),
            "security" => Ok(Role::Security),
            _ => Err(EstateError::Validation(format!("Invalid role: {}", s))),
        }
    }

    /// Capabilities granted to this role
    pub fn capabilities(&self) -> &'static [Capability] {
        match self {
            Role::Super => &[
                Capability::IssueTokens,
                Capability::ManageEntries,
                Capability::BypassSubscription,
                Capability::Administer,
            ],
            Role::Landlord | Role::Resident => {
                &[Capability::IssueTokens, Capability::MakePayments]
            }
            Role::Security => &[Capability::ManageEntries],
        }
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    /// Roles a user may pick for themselves at registration
    pub fn is_self_assignable(&self) -> bool {
        !matches!(self, Role::Super)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
