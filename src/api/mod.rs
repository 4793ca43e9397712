//! API layer - HTTP endpoint handlers.

mod health;
mod messages;
mod subscribe;

pub use health::healthcheck;
pub use messages::{list_chats, list_messages, read_message, send_message};
pub use subscribe::subscribe;

use std::future::Future;
use std::time::Duration;

use crate::error::AppError;
use crate::server::AppState;
use crate::store::StoreError;

/// Upper bound on store work done within a request.
const STORE_TIMEOUT: Duration = Duration::from_secs(1);

/// Run a store operation with the request-scoped timeout.
async fn with_store_timeout<T, F>(operation: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(STORE_TIMEOUT, operation)
        .await
        .map_err(|_| AppError::internal("store operation timed out"))?
        .map_err(AppError::from)
}

/// 404 unless the user exists.
async fn ensure_user(state: &AppState, id: i64) -> Result<(), AppError> {
    with_store_timeout(state.users.get(id)).await.map(|_| ())
}
