//! Approval workflow state carried by `Approvable` entities.
//!
//! ```text
//! Pending --approve--> Approved
//!    \----reject----> Rejected
//! ```
//!
//! `Approved` and `Rejected` are terminal for the regular flow. `set_status` is
//! an administrative override that skips both the transition rules and the
//! actor/timestamp stamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RepositoryError, RepositoryResult};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }
}

impl core::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// Approval field group: status plus who decided and when.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Approval {
    pub status: ApprovalStatus,
    pub actor: Option<String>,
    pub action_at: Option<DateTime<Utc>>,
}

impl Approval {
    /// Force the initial state used for newly added entities.
    pub fn reset(&mut self) {
        self.status = ApprovalStatus::Pending;
        self.actor = None;
        self.action_at = None;
    }

    pub fn approve(&mut self, actor: &str, at: DateTime<Utc>) -> RepositoryResult<()> {
        self.decide(ApprovalStatus::Approved, actor, at)
    }

    pub fn reject(&mut self, actor: &str, at: DateTime<Utc>) -> RepositoryResult<()> {
        self.decide(ApprovalStatus::Rejected, actor, at)
    }

    /// Administrative correction: no transition rules, no stamp.
    pub fn set_status(&mut self, status: ApprovalStatus) {
        self.status = status;
    }

    fn decide(&mut self, to: ApprovalStatus, actor: &str, at: DateTime<Utc>) -> RepositoryResult<()> {
        if self.status.is_terminal() {
            return Err(RepositoryError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.actor = Some(actor.to_string());
        self.action_at = Some(at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn approve_stamps_actor_and_time() {
        let mut approval = Approval::default();
        let at = test_time();

        approval.approve("alice", at).unwrap();

        assert_eq!(approval.status, ApprovalStatus::Approved);
        assert_eq!(approval.actor.as_deref(), Some("alice"));
        assert_eq!(approval.action_at, Some(at));
    }

    #[test]
    fn decided_status_is_terminal() {
        let mut approval = Approval::default();
        approval.reject("bob", test_time()).unwrap();

        let err = approval.approve("alice", test_time()).unwrap_err();
        assert_eq!(
            err,
            RepositoryError::InvalidTransition {
                from: ApprovalStatus::Rejected,
                to: ApprovalStatus::Approved,
            }
        );
        assert_eq!(approval.actor.as_deref(), Some("bob"));
    }

    #[test]
    fn set_status_bypasses_rules_and_stamp() {
        let mut approval = Approval::default();
        approval.approve("alice", test_time()).unwrap();

        approval.set_status(ApprovalStatus::Pending);

        assert_eq!(approval.status, ApprovalStatus::Pending);
        assert_eq!(approval.actor.as_deref(), Some("alice"));
    }

    #[test]
    fn reset_clears_decision() {
        let mut approval = Approval {
            status: ApprovalStatus::Approved,
            actor: Some("mallory".into()),
            action_at: Some(test_time()),
        };

        approval.reset();

        assert_eq!(approval, Approval::default());
    }
}
