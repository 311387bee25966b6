use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Account role, supplied by the auth collaborator.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Normal,
    Vip,
    Admin,
}

impl Role {
    /// Case-insensitive parse. Unrecognized roles get the least privilege.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "admin" => Self::Admin,
            "vip" => Self::Vip,
            _ => Self::Normal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Vip => "vip",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// The signed-in account. Read-only to the core.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub account_id: String,
    pub role: Role,
    pub subscription_expiry: Option<DateTime<Utc>>,
}

impl Identity {
    pub fn new(
        account_id: impl Into<String>,
        role: Role,
        subscription_expiry: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            role,
            subscription_expiry,
        }
    }
}

/// Source of the current identity (session/auth collaborator).
pub trait IdentityProvider: Send + Sync {
    fn current(&self) -> Option<Identity>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parse_case_insensitive() {
        assert_eq!(Role::parse("ADMIN"), Role::Admin);
        assert_eq!(Role::parse("Vip"), Role::Vip);
        assert_eq!(Role::parse("normal"), Role::Normal);
    }

    #[test]
    fn unknown_role_is_normal() {
        assert_eq!(Role::parse("superuser"), Role::Normal);
        assert_eq!(Role::parse(""), Role::Normal);
    }

    #[test]
    fn identity_decodes_session_payload() {
        let json = r#"{"accountId": "ops@sdis.example", "role": "VIP", "subscriptionExpiry": "2999-01-01T00:00:00Z"}"#;
        let identity: Identity = serde_json::from_str(json).unwrap();
        assert_eq!(identity.role, Role::Vip);
        assert!(identity.subscription_expiry.is_some());
    }

    #[test]
    fn identity_without_expiry() {
        let json = r#"{"accountId": "a@b.c", "role": "admin", "subscriptionExpiry": null}"#;
        let identity: Identity = serde_json::from_str(json).unwrap();
        assert_eq!(identity.role, Role::Admin);
        assert!(identity.subscription_expiry.is_none());
    }
}
