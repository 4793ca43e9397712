use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::Response;

use crate::error::AppError;
use crate::server::AppState;

use super::ensure_user;

/// Upgrade to a WebSocket subscription for live messages from `peer_id`.
///
/// Both users are validated before the upgrade; afterwards the hub owns
/// the connection until the client disconnects or is evicted.
pub async fn subscribe(
    State(state): State<AppState>,
    Path((user_id, peer_id)): Path<(i64, i64)>,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    if user_id < 1 || peer_id < 1 {
        return Err(AppError::NotFound);
    }

    ensure_user(&state, user_id).await?;
    ensure_user(&state, peer_id).await?;

    let hub = state.hub.clone();
    Ok(ws.on_upgrade(move |socket| async move {
        hub.run_connection(socket, user_id, peer_id).await;
    }))
}
