use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// Hard cap on executed actions per run. Reaching it ends the run as completed.
pub const MAX_TURNS_PER_RUN: usize = 10;

/// Only the first proposed action of a turn is executed; the rest are left
/// for the reasoning service to propose again.
pub const ACTIONS_EXECUTED_PER_TURN: usize = 1;

/// Log descriptions of typed text are cut to this many characters.
pub const TYPED_TEXT_LOG_CHARS: usize = 80;

pub const DEFAULT_START_URL: &str = "https://bing.com";

/// The action vocabulary declared to the reasoning service.
pub const ACTION_VOCABULARY: [&str; 6] =
    ["click", "scroll", "keypress", "type", "wait", "screenshot"];

/// Fixed logical viewport the reasoning service reasons about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 768,
        }
    }
}

/// One invocation of the order agent.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub prompt: String,
    pub start_url: String,
    /// Suffix-match patterns; empty allows every domain.
    pub allowed_domains: Vec<String>,
    pub prior_session_id: Option<String>,
    pub acknowledged_safety_ids: HashSet<String>,
}

impl RunRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            start_url: DEFAULT_START_URL.to_string(),
            ..Default::default()
        }
    }

    pub fn is_acknowledged(&self, check: &PendingSafetyCheck) -> bool {
        self.acknowledged_safety_ids.contains(&check.id)
    }
}

/// A flag the reasoning service attaches to an action that needs human sign-off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSafetyCheck {
    pub id: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
    Back,
    Forward,
}

impl MouseButton {
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "right" => MouseButton::Right,
            "middle" | "wheel" => MouseButton::Middle,
            "back" => MouseButton::Back,
            "forward" => MouseButton::Forward,
            _ => MouseButton::Left,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MouseButton::Left => "left",
            MouseButton::Right => "right",
            MouseButton::Middle => "middle",
            MouseButton::Back => "back",
            MouseButton::Forward => "forward",
        }
    }

    /// DOM `MouseEvent.button` index.
    pub fn dom_index(self) -> u8 {
        match self {
            MouseButton::Left => 0,
            MouseButton::Middle => 1,
            MouseButton::Right => 2,
            MouseButton::Back => 3,
            MouseButton::Forward => 4,
        }
    }
}

/// A single browser-level operation proposed by the reasoning service.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Click { x: f64, y: f64, button: MouseButton },
    Scroll { x: f64, y: f64, delta_x: f64, delta_y: f64 },
    Keypress { keys: Vec<String> },
    Type { text: String },
    Wait,
    Screenshot,
    /// Unknown tag, kept verbatim and treated as a no-op.
    Other { kind: String, raw: Value },
}

impl Action {
    /// Decode an action object as sent by the reasoning service.
    pub fn from_value(raw: &Value) -> Self {
        let kind = raw.get("type").and_then(Value::as_str).unwrap_or_default();
        let num = |key: &str| raw.get(key).and_then(Value::as_f64).unwrap_or(0.0);

        match kind {
            "click" => Action::Click {
                x: num("x"),
                y: num("y"),
                button: raw
                    .get("button")
                    .and_then(Value::as_str)
                    .map(MouseButton::parse)
                    .unwrap_or_default(),
            },
            "scroll" => Action::Scroll {
                x: num("x"),
                y: num("y"),
                delta_x: num("scroll_x"),
                delta_y: num("scroll_y"),
            },
            "keypress" => Action::Keypress {
                keys: raw
                    .get("keys")
                    .and_then(Value::as_array)
                    .map(|keys| {
                        keys.iter()
                            .filter_map(|k| k.as_str().map(String::from))
                            .collect()
                    })
                    .unwrap_or_default(),
            },
            "type" => Action::Type {
                text: raw
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
            "wait" => Action::Wait,
            "screenshot" => Action::Screenshot,
            other => Action::Other {
                kind: other.to_string(),
                raw: raw.clone(),
            },
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            Action::Click { .. } => "click",
            Action::Scroll { .. } => "scroll",
            Action::Keypress { .. } => "keypress",
            Action::Type { .. } => "type",
            Action::Wait => "wait",
            Action::Screenshot => "screenshot",
            Action::Other { kind, .. } => kind,
        }
    }
}

/// One action proposal inside a turn, with the safety checks guarding it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProposedCall {
    pub call_id: String,
    pub action: Action,
    pub pending_safety_checks: Vec<PendingSafetyCheck>,
}

/// One exchange with the reasoning service.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentTurn {
    /// Used as the prior session id of the next exchange.
    pub id: String,
    pub calls: Vec<ProposedCall>,
}

/// Terminal result of a run. Every variant carries the full action log.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed {
        turn_id: String,
        screenshot_base64: String,
        logs: Vec<String>,
    },
    NeedsAcknowledgement {
        turn_id: String,
        safety_checks: Vec<PendingSafetyCheck>,
        screenshot_base64: String,
        logs: Vec<String>,
    },
    Blocked {
        turn_id: String,
        url: String,
        screenshot_base64: String,
        logs: Vec<String>,
    },
    Error {
        turn_id: Option<String>,
        message: String,
        logs: Vec<String>,
    },
}

impl RunOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            RunOutcome::Completed { .. } => "completed",
            RunOutcome::NeedsAcknowledgement { .. } => "needs_ack",
            RunOutcome::Blocked { .. } => "blocked",
            RunOutcome::Error { .. } => "error",
        }
    }

    pub fn logs(&self) -> &[String] {
        match self {
            RunOutcome::Completed { logs, .. }
            | RunOutcome::NeedsAcknowledgement { logs, .. }
            | RunOutcome::Blocked { logs, .. }
            | RunOutcome::Error { logs, .. } => logs,
        }
    }
}
