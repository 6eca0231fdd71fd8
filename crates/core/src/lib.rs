//! `guardrail-core`: data-access building blocks.
//!
//! This crate contains **pure** primitives (no I/O): entity identity, the
//! capability declarations that drive tenant isolation, auditing, soft deletion
//! and approval, query shapes, paging math and the error taxonomy.

pub mod approval;
pub mod audit;
pub mod capability;
pub mod entity;
pub mod error;
pub mod id;
pub mod identity;
pub mod paging;
pub mod query;

pub use approval::{Approval, ApprovalStatus};
pub use audit::{CreationStamp, DeletionMark, UpdateStamp};
pub use capability::{Capabilities, CapabilityRegistry, CapabilitySet, Field};
pub use entity::Entity;
pub use error::{RepositoryError, RepositoryResult, StorageError};
pub use id::TenantId;
pub use identity::{Clock, FixedClock, IdentityContext, IdentityProvider, SystemClock};
pub use paging::{PageRequest, PagedResult};
pub use query::{Filter, OrderBy, Query, Setters};
