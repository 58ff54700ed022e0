use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;

use crate::agent::OrderAgent;
use crate::error::AgentError;
use crate::types::{DEFAULT_START_URL, PendingSafetyCheck, RunOutcome, RunRequest};

/// Progress of order runs, streamed to watchers via SSE.
///
/// The feed is shared by every run, so events carry counters and action
/// kinds only. Prompts, typed text and URLs stay out of it.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    Started { run: u64 },
    Thinking { run: u64, turn: usize },
    Step { run: u64, number: usize, action: String },
    Finished { run: u64, status: String },
}

impl RunEvent {
    fn name(&self) -> &'static str {
        match self {
            RunEvent::Started { .. } => "started",
            RunEvent::Thinking { .. } => "thinking",
            RunEvent::Step { .. } => "step",
            RunEvent::Finished { .. } => "finished",
        }
    }

    fn to_sse_event(&self) -> Event {
        let data = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        Event::default().event(self.name()).data(data)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub agent: Arc<OrderAgent>,
    pub default_start_url: String,
}

impl AppState {
    pub fn new(agent: Arc<OrderAgent>) -> Self {
        Self {
            agent,
            default_start_url: DEFAULT_START_URL.to_string(),
        }
    }
}

/// Body of `POST /order/start`. Every field is optional at the wire level so
/// a missing prompt can be answered with 400 rather than a decode failure.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StartPayload {
    pub prompt: Option<String>,
    pub start_url: Option<String>,
    pub allow_domains: Option<Vec<String>>,
    pub session_id: Option<String>,
    pub acknowledged_safety_ids: Option<Vec<String>>,
}

impl StartPayload {
    pub fn into_request(self, default_start_url: &str) -> RunRequest {
        RunRequest {
            prompt: self.prompt.unwrap_or_default(),
            start_url: self
                .start_url
                .filter(|u| !u.trim().is_empty())
                .unwrap_or_else(|| default_start_url.to_string()),
            allowed_domains: self.allow_domains.unwrap_or_default(),
            prior_session_id: self.session_id.filter(|s| !s.is_empty()),
            acknowledged_safety_ids: self
                .acknowledged_safety_ids
                .unwrap_or_default()
                .into_iter()
                .collect::<HashSet<_>>(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StartResponse {
    NeedsAck {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "safetyChecks")]
        safety_checks: Vec<PendingSafetyCheck>,
        #[serde(rename = "lastScreenshotBase64")]
        last_screenshot_base64: String,
        logs: Vec<String>,
    },
    Completed {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "lastScreenshotBase64")]
        last_screenshot_base64: String,
        logs: Vec<String>,
    },
    Error {
        message: String,
        #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(rename = "lastScreenshotBase64", skip_serializing_if = "Option::is_none")]
        last_screenshot_base64: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        logs: Option<Vec<String>>,
    },
}

impl StartResponse {
    fn message(message: impl Into<String>) -> Self {
        StartResponse::Error {
            message: message.into(),
            session_id: None,
            last_screenshot_base64: None,
            logs: None,
        }
    }
}

/// Map a run outcome to its HTTP status and body.
pub fn outcome_response(outcome: RunOutcome) -> (StatusCode, StartResponse) {
    match outcome {
        RunOutcome::Completed {
            turn_id,
            screenshot_base64,
            logs,
        } => (
            StatusCode::OK,
            StartResponse::Completed {
                session_id: turn_id,
                last_screenshot_base64: screenshot_base64,
                logs,
            },
        ),
        RunOutcome::NeedsAcknowledgement {
            turn_id,
            safety_checks,
            screenshot_base64,
            logs,
        } => (
            StatusCode::OK,
            StartResponse::NeedsAck {
                session_id: turn_id,
                safety_checks,
                last_screenshot_base64: screenshot_base64,
                logs,
            },
        ),
        RunOutcome::Blocked {
            turn_id,
            url,
            screenshot_base64,
            logs,
        } => (
            StatusCode::OK,
            StartResponse::Error {
                message: format!("Blocked domain: {}", url),
                session_id: Some(turn_id),
                last_screenshot_base64: Some(screenshot_base64),
                logs: Some(logs),
            },
        ),
        RunOutcome::Error {
            turn_id,
            message,
            logs,
        } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            StartResponse::Error {
                message,
                session_id: turn_id,
                last_screenshot_base64: None,
                logs: Some(logs),
            },
        ),
    }
}

fn error_response(err: AgentError) -> (StatusCode, StartResponse) {
    let status = match err {
        AgentError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, StartResponse::message(err.to_string()))
}

/// Routes served at the root and again under `/api`.
pub fn router(state: AppState) -> Router {
    let routes = Router::new()
        .route("/order/start", post(start_handler))
        .route("/order/events", get(events_handler))
        .with_state(Arc::new(state));

    Router::new().merge(routes.clone()).nest("/api", routes)
}

async fn start_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    // Undecodable bodies are treated as empty.
    let payload: StartPayload = serde_json::from_slice(&body).unwrap_or_default();
    let request = payload.into_request(&state.default_start_url);
    info!(
        prompt_chars = request.prompt.chars().count(),
        allow = request.allowed_domains.len(),
        acks = request.acknowledged_safety_ids.len(),
        "POST /order/start"
    );

    let (status, body) = match state.agent.run(request).await {
        Ok(outcome) => outcome_response(outcome),
        Err(err) => error_response(err),
    };
    (status, Json(body)).into_response()
}

async fn events_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx: broadcast::Receiver<RunEvent> = state.agent.events().subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(event) => Some(Ok::<_, Infallible>(event.to_sse_event())),
        Err(_) => None,
    });
    Sse::new(stream)
}
