use crate::config::Config;
use crate::dispatch::{CommandRequest, CommandResponse, Dispatcher, StorageStats};
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct ApiState {
    pub config: Arc<Config>,
    pub dispatcher: Arc<Mutex<Dispatcher>>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/command", post(command))
        .route("/api/v1/status", get(status))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct StatusPayload {
    ready: bool,
    history_db: String,
    bookmarks_db: String,
    preferences_path: String,
    api_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    stats: Option<StorageStats>,
}

/// The whole command surface goes through this one handler. The dispatcher
/// mutex keeps commands strictly one at a time.
async fn command(State(state): State<ApiState>, Json(body): Json<Value>) -> Json<CommandResponse> {
    let request: CommandRequest = match serde_json::from_value(body) {
        Ok(request) => request,
        Err(error) => {
            return Json(CommandResponse::malformed(format!(
                "malformed command request: {error}"
            )));
        }
    };

    let mut dispatcher = state.dispatcher.lock().await;
    Json(dispatcher.dispatch(&request))
}

async fn status(State(state): State<ApiState>) -> Json<StatusPayload> {
    let stats = {
        let dispatcher = state.dispatcher.lock().await;
        dispatcher.stats().ok()
    };

    Json(StatusPayload {
        ready: stats.is_some(),
        history_db: state.config.history_db_path.display().to_string(),
        bookmarks_db: state.config.bookmarks_db_path.display().to_string(),
        preferences_path: state.config.preferences_path.display().to_string(),
        api_port: state.config.api_port,
        stats,
    })
}
