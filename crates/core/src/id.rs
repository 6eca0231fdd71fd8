//! Strongly-typed identifiers shared by every layer.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::RepositoryError;

/// Identifier of a tenant (multi-tenant boundary).
///
/// Tenants are numbered by the identity collaborator; the data-access layer only
/// ever compares them for equality.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(i64);

impl TenantId {
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl core::fmt::Display for TenantId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<i64> for TenantId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<TenantId> for i64 {
    fn from(value: TenantId) -> Self {
        value.0
    }
}

impl FromStr for TenantId {
    type Err = RepositoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s
            .trim()
            .parse::<i64>()
            .map_err(|e| RepositoryError::invalid_argument(format!("TenantId: {e}")))?;
        Ok(Self(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_displays() {
        let tenant: TenantId = " 42 ".parse().unwrap();
        assert_eq!(tenant, TenantId::new(42));
        assert_eq!(tenant.to_string(), "42");
        assert_eq!(i64::from(tenant), 42);
    }

    #[test]
    fn rejects_non_numeric_tenant() {
        let err = "acme".parse::<TenantId>().unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidArgument(msg) if msg.starts_with("TenantId")));
    }
}
