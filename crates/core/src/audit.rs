//! Audit and soft-delete field groups.
//!
//! Entity types embed these structs and expose them through their
//! [`Capabilities`](crate::capability::Capabilities) binding. Stamping always goes
//! through the methods below so the "who" and "when" are written together.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `CreationAudit` fields. Written once, when the entity is added.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CreationStamp {
    pub created_by: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl CreationStamp {
    pub fn stamp(&mut self, actor: &str, at: DateTime<Utc>) {
        self.created_by = Some(actor.to_string());
        self.created_at = Some(at);
    }
}

/// `UpdateAudit` fields. Rewritten on every successful update.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UpdateStamp {
    pub updated_by: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl UpdateStamp {
    pub fn stamp(&mut self, actor: &str, at: DateTime<Utc>) {
        self.updated_by = Some(actor.to_string());
        self.updated_at = Some(at);
    }
}

/// `SoftDelete` fields.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeletionMark {
    pub is_deleted: bool,
    pub deleted_by: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl DeletionMark {
    pub fn mark(&mut self, actor: &str, at: DateTime<Utc>) {
        self.is_deleted = true;
        self.deleted_by = Some(actor.to_string());
        self.deleted_at = Some(at);
    }
}
