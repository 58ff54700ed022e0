use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::{AgentError, AgentResult};
use crate::types::{
    ACTION_VOCABULARY, Action, AgentTurn, PendingSafetyCheck, ProposedCall, Viewport,
};

pub const DEFAULT_MODEL: &str = "computer-use-preview";
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// First exchange of a run: the user's task and what the page looks like.
///
/// Always a fresh conversation. The browser restarts at the start URL every
/// run, so chaining onto an earlier response would leave the service
/// expecting a screenshot for a call that was never executed here.
#[derive(Debug, Clone)]
pub struct SessionOpening {
    pub prompt: String,
    pub screenshot_base64: String,
    pub viewport: Viewport,
}

/// What happened after executing one proposed call.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub prior_turn_id: String,
    pub call_id: String,
    pub screenshot_base64: String,
    pub acknowledged_safety_checks: Vec<PendingSafetyCheck>,
    pub current_url: String,
    pub viewport: Viewport,
}

/// Remote service that looks at screenshots and proposes browser actions.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn start_session(&self, opening: SessionOpening) -> AgentResult<AgentTurn>;
    async fn continue_session(&self, outcome: ActionOutcome) -> AgentResult<AgentTurn>;
}

/// Computer-use client over the OpenAI Responses API.
pub struct OpenAiBrain {
    client: Client,
    api_key: SecretString,
    api_base: String,
    model: String,
}

impl OpenAiBrain {
    pub fn new(
        api_key: SecretString,
        api_base: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            api_key,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    async fn create_response(&self, body: Value) -> AgentResult<AgentTurn> {
        let response = self
            .client
            .post(format!("{}/responses", self.api_base))
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let err_msg = api_error_message(status, &text);
            warn!(%status, "Reasoning service error: {}", err_msg);
            return Err(AgentError::Reasoning(format!(
                "OpenAI API error ({}): {}",
                status, err_msg
            )));
        }

        let json_resp: Value = serde_json::from_str(&text)
            .map_err(|e| AgentError::Reasoning(format!("Malformed response body: {}", e)))?;
        let turn = parse_turn(&json_resp)?;
        debug!(turn_id = %turn.id, calls = turn.calls.len(), "Reasoning service replied");
        Ok(turn)
    }
}

#[async_trait]
impl ReasoningService for OpenAiBrain {
    async fn start_session(&self, opening: SessionOpening) -> AgentResult<AgentTurn> {
        self.create_response(opening_body(&self.model, &opening)).await
    }

    async fn continue_session(&self, outcome: ActionOutcome) -> AgentResult<AgentTurn> {
        self.create_response(continuation_body(&self.model, &outcome))
            .await
    }
}

/// Best available message for a failed call. Gateways in front of the API
/// answer with HTML or an empty body, so JSON is not assumed.
pub(crate) fn api_error_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|json| json["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("Unknown API error")
                .to_string()
        })
}

fn computer_tool(viewport: Viewport) -> Value {
    json!({
        "type": "computer_use_preview",
        "display_width": viewport.width,
        "display_height": viewport.height,
        "environment": "browser",
    })
}

fn data_url(screenshot_base64: &str) -> String {
    format!("data:image/png;base64,{}", screenshot_base64)
}

pub(crate) fn opening_body(model: &str, opening: &SessionOpening) -> Value {
    json!({
        "model": model,
        "tools": [computer_tool(opening.viewport)],
        "instructions": format!(
            "Operate the browser using only these actions: {}.",
            ACTION_VOCABULARY.join(", ")
        ),
        "input": [{
            "role": "user",
            "content": [
                { "type": "input_text", "text": opening.prompt },
                {
                    "type": "input_image",
                    "image_url": data_url(&opening.screenshot_base64),
                    "detail": "auto",
                },
            ],
        }],
        "reasoning": { "summary": "concise" },
        "truncation": "auto",
    })
}

pub(crate) fn continuation_body(model: &str, outcome: &ActionOutcome) -> Value {
    json!({
        "model": model,
        "previous_response_id": outcome.prior_turn_id,
        "tools": [computer_tool(outcome.viewport)],
        "input": [{
            "type": "computer_call_output",
            "call_id": outcome.call_id,
            "output": {
                "type": "computer_screenshot",
                "image_url": data_url(&outcome.screenshot_base64),
            },
            "acknowledged_safety_checks": outcome.acknowledged_safety_checks,
            "current_url": outcome.current_url,
        }],
        "truncation": "auto",
    })
}

/// Extract the turn id and every `computer_call` item from a response.
pub(crate) fn parse_turn(json_resp: &Value) -> AgentResult<AgentTurn> {
    let id = json_resp["id"]
        .as_str()
        .ok_or_else(|| AgentError::Reasoning(format!("No id in response: {}", json_resp)))?
        .to_string();

    let calls = json_resp["output"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter(|item| item["type"] == "computer_call")
                .map(parse_call)
                .collect::<AgentResult<Vec<_>>>()
        })
        .transpose()?
        .unwrap_or_default();

    Ok(AgentTurn { id, calls })
}

fn parse_call(item: &Value) -> AgentResult<ProposedCall> {
    let call_id = item["call_id"]
        .as_str()
        .or_else(|| item["id"].as_str())
        .unwrap_or_default()
        .to_string();

    let pending_safety_checks = match item.get("pending_safety_checks") {
        Some(Value::Null) | None => Vec::new(),
        Some(checks) => serde_json::from_value::<Vec<PendingSafetyCheck>>(checks.clone())
            .map_err(|e| AgentError::Reasoning(format!("Malformed safety checks: {}", e)))?,
    };

    Ok(ProposedCall {
        call_id,
        action: Action::from_value(&item["action"]),
        pending_safety_checks,
    })
}
