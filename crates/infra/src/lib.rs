//! Infrastructure layer: persistence ports, repositories, unit of work, config.

pub mod config;
pub mod persistence;
pub mod repository;
pub mod unit_of_work;

pub use config::{ConfigError, PersistenceConfig};
pub use persistence::{
    ChangeBatch, InMemoryCollection, InMemoryDatabase, IsolationLevel, PersistencePort,
    RawStatement, TransactionPort,
};
pub use repository::{EntryState, Repository, Tracked, Unscoped, View};
pub use unit_of_work::UnitOfWork;

pub use tokio_util::sync::CancellationToken;
