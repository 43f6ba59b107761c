use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::channel::{InboundMessage, ReplyTarget};
use crate::engine::Engine;
use crate::state::StateRegistry;

#[derive(Clone)]
pub struct AppState {
    /// Shared by all requests; the engine serializes turns per group.
    pub engine: Arc<Engine>,
    pub states: Arc<StateRegistry>,
    pub name: String,
    pub channel_name: String,
    pub api_key: Option<String>,
}

#[derive(Deserialize)]
pub struct MessageRequest {
    pub text: String,
    #[serde(default = "default_group")]
    pub group: String,
    #[serde(default)]
    pub group_name: Option<String>,
    /// Defaults to the channel the king listens in.
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub mention: bool,
    #[serde(default)]
    pub mention_everyone: bool,
}

fn default_group() -> String {
    "cli".into()
}

fn default_user() -> String {
    "peasant".into()
}

impl MessageRequest {
    fn into_inbound(self, channel_name: &str) -> InboundMessage {
        InboundMessage {
            author_id: self.user_id.unwrap_or_else(|| self.user.clone()),
            author_name: self.user,
            content: self.text,
            channel_name: self.channel.unwrap_or_else(|| channel_name.to_string()),
            group_name: self.group_name.unwrap_or_else(|| self.group.clone()),
            group_id: self.group,
            mentions_bot: self.mention,
            mention_everyone: self.mention_everyone,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sent {
    pub kind: String,
    pub text: String,
}

#[derive(Serialize, Deserialize)]
pub struct MessageResponse {
    pub replies: Vec<Sent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Buffers what the king says so it can go back in the HTTP response.
#[derive(Default)]
struct Collector(std::sync::Mutex<Vec<Sent>>);

impl Collector {
    fn push(&self, kind: &str, text: &str) {
        self.0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Sent {
                kind: kind.to_string(),
                text: text.to_string(),
            });
    }

    fn take(&self) -> Vec<Sent> {
        std::mem::take(&mut *self.0.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

#[async_trait::async_trait]
impl ReplyTarget for Collector {
    async fn reply(&self, text: &str) -> Result<()> {
        self.push("reply", text);
        Ok(())
    }

    async fn send(&self, text: &str) -> Result<()> {
        self.push("send", text);
        Ok(())
    }
}

#[derive(Deserialize)]
pub struct SummaryRequest {
    pub summary: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/message", post(handle_message))
        .route("/groups/:id", get(handle_group))
        .route("/groups/:id/summary", put(handle_summary))
        .route("/health", get(handle_health))
        .layer(middleware::from_fn_with_state(state.clone(), auth_layer))
        .with_state(state)
}

async fn auth_layer(State(state): State<AppState>, req: Request, next: Next) -> impl IntoResponse {
    if let Some(ref expected) = state.api_key {
        let auth_ok = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|t| t == expected);
        if !auth_ok {
            return (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({"error": "Unauthorized"})),
            )
                .into_response();
        }
    }
    next.run(req).await.into_response()
}

async fn handle_message(
    State(state): State<AppState>,
    Json(req): Json<MessageRequest>,
) -> impl IntoResponse {
    let msg = req.into_inbound(&state.channel_name);
    let out = Collector::default();
    match state.engine.handle_message(&msg, &out).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(MessageResponse {
                replies: out.take(),
                mode: outcome.map(|o| o.mode.label().to_string()),
                error: None,
            }),
        ),
        Err(e) => {
            tracing::error!("[{}] Failed to answer: {e:#}", msg.group_id);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(MessageResponse {
                    replies: out.take(),
                    mode: None,
                    error: Some(format!("{e:#}")),
                }),
            )
        }
    }
}

async fn handle_group(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.states.get(&id) {
        Some(group) => (StatusCode::OK, Json(serde_json::to_value(group).unwrap_or_default())),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": format!("Unknown group {id}")})),
        ),
    }
}

async fn handle_summary(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SummaryRequest>,
) -> impl IntoResponse {
    match state.states.set_summary(&id, req.summary) {
        Ok(true) => StatusCode::NO_CONTENT,
        Ok(false) => StatusCode::NOT_FOUND,
        Err(e) => {
            tracing::error!("[{id}] Failed to store summary: {e:#}");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "name": state.name,
        "groups": state.states.groups().len(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
