//! Persistence port boundary.
//!
//! The repository talks to storage only through the traits defined here:
//! [`PersistencePort`] for one entity collection and [`TransactionPort`] for
//! transaction scope and raw statements. The in-memory engine implements both
//! and is the reference for their semantics.

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod r#trait;

pub use in_memory::{InMemoryCollection, InMemoryDatabase};
#[cfg(feature = "postgres")]
pub use postgres::PgTransactionPort;
pub use r#trait::{
    ChangeBatch, IsolationLevel, ParseIsolationLevelError, PersistencePort, RawStatement,
    TransactionPort,
};
