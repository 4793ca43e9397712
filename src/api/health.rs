use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::server::AppState;

pub async fn healthcheck(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "data": {
            "status": "available",
            "environment": state.settings.server.env,
            "version": env!("CARGO_PKG_VERSION"),
        }
    }))
}
