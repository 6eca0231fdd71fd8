use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use guardrail_core::{IdentityProvider, TenantId};

use crate::claims::{IdentityClaims, TokenExpectations, is_token_valid};
use crate::PrincipalId;

/// Identity of a caller whose token has been validated.
///
/// This is the bridge from the auth boundary to the data-access layer: it
/// implements [`IdentityProvider`], so a unit of work can resolve "who" and
/// "which tenant" from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimsIdentity {
    principal_id: PrincipalId,
    actor_label: String,
    tenant_id: TenantId,
}

impl ClaimsIdentity {
    /// `None` when the claims do not describe a currently valid token.
    pub fn from_claims(claims: &IdentityClaims, expected: &TokenExpectations, now: DateTime<Utc>) -> Option<Self> {
        if !is_token_valid(claims, expected, now) {
            return None;
        }
        Some(Self {
            principal_id: claims.sub,
            actor_label: claims.actor_label.clone(),
            tenant_id: claims.tenant_id,
        })
    }

    pub fn principal_id(&self) -> PrincipalId {
        self.principal_id
    }
}

impl IdentityProvider for ClaimsIdentity {
    fn current_actor_label(&self) -> String {
        self.actor_label.clone()
    }

    fn current_tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use guardrail_core::IdentityContext;

    #[test]
    fn valid_claims_resolve_to_an_identity_context() {
        let now = Utc::now();
        let claims = IdentityClaims {
            sub: PrincipalId::new(),
            actor_label: "frank".to_string(),
            tenant_id: TenantId::new(8),
            issuer: "iss".to_string(),
            audience: "aud".to_string(),
            issued_at: now - Duration::seconds(5),
            expires_at: now + Duration::minutes(5),
        };
        let expected = TokenExpectations::new("iss", "aud");

        let identity = ClaimsIdentity::from_claims(&claims, &expected, now).unwrap();
        let context = IdentityContext::resolve(&identity);

        assert_eq!(context.actor_label(), "frank");
        assert_eq!(context.tenant_id(), TenantId::new(8));
        assert_eq!(identity.principal_id(), claims.sub);

        assert!(ClaimsIdentity::from_claims(&claims, &expected, claims.expires_at).is_none());
    }
}
