use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use guardrail_core::TenantId;

use crate::PrincipalId;

/// Identity claims model (transport-agnostic).
///
/// This is the minimal set of claims guardrail expects once a token has been
/// decoded/verified by whatever transport/security layer is in use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Subject / principal identifier.
    pub sub: PrincipalId,

    /// Human-readable label written into audit stamps (user name, service name).
    pub actor_label: String,

    /// Tenant context for the token.
    pub tenant_id: TenantId,

    pub issuer: String,

    pub audience: String,

    /// Issued-at timestamp.
    pub issued_at: DateTime<Utc>,

    /// Expiration timestamp.
    pub expires_at: DateTime<Utc>,
}

/// Issuer and audience a token must have been minted for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenExpectations {
    pub issuer: String,
    pub audience: String,
}

impl TokenExpectations {
    pub fn new(issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid token time window (expires_at <= issued_at)")]
    InvalidTimeWindow,

    #[error("unexpected issuer: {0}")]
    IssuerMismatch(String),

    #[error("unexpected audience: {0}")]
    AudienceMismatch(String),

    #[error("token carries an empty actor label")]
    MissingActor,
}

/// Deterministically validate identity claims. No clock skew is allowed.
///
/// Note: this validates the *claims* only. Signature verification / decoding is
/// intentionally outside this crate.
pub fn validate_claims(
    claims: &IdentityClaims,
    expected: &TokenExpectations,
    now: DateTime<Utc>,
) -> Result<(), TokenValidationError> {
    if claims.expires_at <= claims.issued_at {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    if now < claims.issued_at {
        return Err(TokenValidationError::NotYetValid);
    }
    if now >= claims.expires_at {
        return Err(TokenValidationError::Expired);
    }
    if claims.issuer != expected.issuer {
        return Err(TokenValidationError::IssuerMismatch(claims.issuer.clone()));
    }
    if claims.audience != expected.audience {
        return Err(TokenValidationError::AudienceMismatch(claims.audience.clone()));
    }
    if claims.actor_label.trim().is_empty() {
        return Err(TokenValidationError::MissingActor);
    }
    Ok(())
}

/// Boolean form of [`validate_claims`]; an invalid token is an expected
/// outcome, not a fault.
pub fn is_token_valid(claims: &IdentityClaims, expected: &TokenExpectations, now: DateTime<Utc>) -> bool {
    match validate_claims(claims, expected, now) {
        Ok(()) => true,
        Err(reason) => {
            tracing::debug!(%reason, sub = %claims.sub, "token rejected");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn expectations() -> TokenExpectations {
        TokenExpectations::new("https://id.example", "ledger-api")
    }

    fn claims(now: DateTime<Utc>) -> IdentityClaims {
        IdentityClaims {
            sub: PrincipalId::new(),
            actor_label: "erin".to_string(),
            tenant_id: TenantId::new(12),
            issuer: "https://id.example".to_string(),
            audience: "ledger-api".to_string(),
            issued_at: now - Duration::minutes(1),
            expires_at: now + Duration::minutes(9),
        }
    }

    #[test]
    fn accepts_a_live_token() {
        let now = Utc::now();
        assert_eq!(validate_claims(&claims(now), &expectations(), now), Ok(()));
        assert!(is_token_valid(&claims(now), &expectations(), now));
    }

    #[test]
    fn expiry_is_exclusive() {
        let now = Utc::now();
        let c = claims(now);
        assert_eq!(
            validate_claims(&c, &expectations(), c.expires_at),
            Err(TokenValidationError::Expired)
        );
    }

    #[test]
    fn rejects_foreign_issuer_and_audience() {
        let now = Utc::now();

        let mut c = claims(now);
        c.issuer = "https://evil.example".to_string();
        assert!(matches!(
            validate_claims(&c, &expectations(), now),
            Err(TokenValidationError::IssuerMismatch(_))
        ));

        let mut c = claims(now);
        c.audience = "billing".to_string();
        assert!(!is_token_valid(&c, &expectations(), now));
    }

    #[test]
    fn rejects_inverted_window_and_future_tokens() {
        let now = Utc::now();

        let mut c = claims(now);
        c.expires_at = c.issued_at;
        assert_eq!(
            validate_claims(&c, &expectations(), now),
            Err(TokenValidationError::InvalidTimeWindow)
        );

        let c = claims(now + Duration::hours(1));
        assert_eq!(
            validate_claims(&c, &expectations(), now),
            Err(TokenValidationError::NotYetValid)
        );
    }
}
