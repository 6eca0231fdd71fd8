//! Identity context: who is acting, for which tenant, and at what instant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::TenantId;

/// Source of the current actor and tenant (auth/session collaborator).
pub trait IdentityProvider: Send + Sync {
    fn current_actor_label(&self) -> String;
    fn current_tenant_id(&self) -> TenantId;
}

/// Identity resolved once for a unit of work.
///
/// This is immutable; a unit of work never re-resolves its identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityContext {
    actor_label: String,
    tenant_id: TenantId,
}

impl IdentityContext {
    pub fn new(actor_label: impl Into<String>, tenant_id: TenantId) -> Self {
        Self {
            actor_label: actor_label.into(),
            tenant_id,
        }
    }

    pub fn resolve(provider: &dyn IdentityProvider) -> Self {
        Self::new(provider.current_actor_label(), provider.current_tenant_id())
    }

    pub fn actor_label(&self) -> &str {
        &self.actor_label
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

impl IdentityProvider for IdentityContext {
    fn current_actor_label(&self) -> String {
        self.actor_label.clone()
    }

    fn current_tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

/// Source of "now" for audit stamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Copy, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at one instant. Prefer this in tests for determinism.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SessionUser;

    impl IdentityProvider for SessionUser {
        fn current_actor_label(&self) -> String {
            "carol".to_string()
        }

        fn current_tenant_id(&self) -> TenantId {
            TenantId::new(3)
        }
    }

    #[test]
    fn resolve_captures_provider_values() {
        let identity = IdentityContext::resolve(&SessionUser);
        assert_eq!(identity.actor_label(), "carol");
        assert_eq!(identity.tenant_id(), TenantId::new(3));
    }

    #[test]
    fn fixed_clock_never_moves() {
        let at = Utc::now();
        let clock = FixedClock(at);
        assert_eq!(clock.now(), at);
        assert_eq!(clock.now(), at);
    }
}
