//! Persistent storage contracts backed by PostgreSQL.

mod filters;
mod messages;
mod users;

pub use filters::{Filters, Metadata};
pub use messages::{Chat, Message, MessageStore, MAX_CONTENT_BYTES};
pub use users::{User, UserStore};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// No row matched the given identifier.
    #[error("record not found")]
    RecordNotFound,

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}
