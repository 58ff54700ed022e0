#![allow(dead_code)]

use async_trait::async_trait;
use order_assistant::brain::{ActionOutcome, ReasoningService, SessionOpening};
use order_assistant::config::LoopTimings;
use order_assistant::face::RunEvent;
use order_assistant::hands::{BrowserControl, BrowserLauncher, LaunchPolicy};
use order_assistant::types::MouseButton;
use order_assistant::{Action, AgentError, AgentTurn, OrderAgent, PendingSafetyCheck, ProposedCall};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Navigate(String),
    Click(f64, f64, MouseButton),
    Move(f64, f64),
    Scroll(f64, f64),
    Press(String),
    Type(String),
    Close,
}

#[derive(Default)]
struct PageState {
    ops: Vec<Op>,
    url: String,
    /// URL the page lands on after each successive click.
    after_click: VecDeque<String>,
    screenshots: usize,
    fail_close: bool,
}

/// In-memory page that records every call made against it.
#[derive(Clone, Default)]
pub struct FakeBrowser {
    state: Arc<Mutex<PageState>>,
    drops: Arc<AtomicUsize>,
}

impl Drop for FakeBrowser {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

impl FakeBrowser {
    pub fn with_click_destinations(urls: &[&str]) -> Self {
        let browser = Self::default();
        browser.state.lock().unwrap().after_click = urls.iter().map(|u| u.to_string()).collect();
        browser
    }

    pub fn failing_close(self) -> Self {
        self.state.lock().unwrap().fail_close = true;
        self
    }

    pub fn ops(&self) -> Vec<Op> {
        self.state.lock().unwrap().ops.clone()
    }

    pub fn clicks(&self) -> usize {
        self.ops().iter().filter(|op| matches!(op, Op::Click(..))).count()
    }

    pub fn presses(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::Press(key) => Some(key),
                _ => None,
            })
            .collect()
    }

    /// Handles dropped so far, across every clone of this page.
    pub fn drops(&self) -> usize {
        self.drops.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> bool {
        self.ops().contains(&Op::Close)
    }

    fn record(&self, op: Op) {
        self.state.lock().unwrap().ops.push(op);
    }
}

#[async_trait]
impl BrowserControl for FakeBrowser {
    async fn navigate(&self, url: &str) -> Result<(), AgentError> {
        let mut state = self.state.lock().unwrap();
        state.url = url.to_string();
        state.ops.push(Op::Navigate(url.to_string()));
        Ok(())
    }

    async fn current_url(&self) -> Result<String, AgentError> {
        Ok(self.state.lock().unwrap().url.clone())
    }

    async fn screenshot(&self) -> Result<Vec<u8>, AgentError> {
        let mut state = self.state.lock().unwrap();
        state.screenshots += 1;
        Ok(format!("png-{}", state.screenshots).into_bytes())
    }

    async fn click(&self, x: f64, y: f64, button: MouseButton) -> Result<(), AgentError> {
        let mut state = self.state.lock().unwrap();
        state.ops.push(Op::Click(x, y, button));
        if let Some(next) = state.after_click.pop_front() {
            state.url = next;
        }
        Ok(())
    }

    async fn move_pointer(&self, x: f64, y: f64) -> Result<(), AgentError> {
        self.record(Op::Move(x, y));
        Ok(())
    }

    async fn scroll_by(&self, dx: f64, dy: f64) -> Result<(), AgentError> {
        self.record(Op::Scroll(dx, dy));
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<(), AgentError> {
        self.record(Op::Press(key.to_string()));
        Ok(())
    }

    async fn type_text(&self, text: &str) -> Result<(), AgentError> {
        self.record(Op::Type(text.to_string()));
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), AgentError> {
        self.record(Op::Close);
        if self.state.lock().unwrap().fail_close {
            return Err(AgentError::Browser("close exploded".into()));
        }
        Ok(())
    }
}

pub struct FakeLauncher {
    browser: FakeBrowser,
    failure: Option<String>,
    launches: AtomicUsize,
}

impl FakeLauncher {
    pub fn new(browser: FakeBrowser) -> Self {
        Self {
            browser,
            failure: None,
            launches: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            browser: FakeBrowser::default(),
            failure: Some(message.to_string()),
            launches: AtomicUsize::new(0),
        }
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self, _policy: &LaunchPolicy) -> Result<Box<dyn BrowserControl>, AgentError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(message) => Err(AgentError::Browser(message.clone())),
            None => Ok(Box::new(self.browser.clone())),
        }
    }
}

/// Replays scripted turns; once the script runs out it proposes nothing.
#[derive(Default)]
pub struct ScriptedBrain {
    turns: Mutex<VecDeque<AgentTurn>>,
    fail_at: Option<usize>,
    stall: bool,
    exchanges: AtomicUsize,
    pub openings: Mutex<Vec<SessionOpening>>,
    pub outcomes: Mutex<Vec<ActionOutcome>>,
}

impl ScriptedBrain {
    pub fn new(turns: Vec<AgentTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            ..Default::default()
        }
    }

    /// Fail the nth exchange (1-based).
    pub fn failing_at(mut self, exchange: usize) -> Self {
        self.fail_at = Some(exchange);
        self
    }

    /// Never answers the opening exchange.
    pub fn stalled() -> Self {
        Self {
            stall: true,
            ..Default::default()
        }
    }

    pub fn outcomes(&self) -> Vec<ActionOutcome> {
        self.outcomes.lock().unwrap().clone()
    }

    pub fn openings(&self) -> Vec<SessionOpening> {
        self.openings.lock().unwrap().clone()
    }

    fn next_turn(&self) -> Result<AgentTurn, AgentError> {
        let n = self.exchanges.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_at == Some(n) {
            return Err(AgentError::Reasoning("service unavailable".into()));
        }
        Ok(self.turns.lock().unwrap().pop_front().unwrap_or(AgentTurn {
            id: format!("resp_{}", n),
            calls: vec![],
        }))
    }
}

#[async_trait]
impl ReasoningService for ScriptedBrain {
    async fn start_session(&self, opening: SessionOpening) -> Result<AgentTurn, AgentError> {
        self.openings.lock().unwrap().push(opening);
        if self.stall {
            std::future::pending::<()>().await;
        }
        self.next_turn()
    }

    async fn continue_session(&self, outcome: ActionOutcome) -> Result<AgentTurn, AgentError> {
        self.outcomes.lock().unwrap().push(outcome);
        self.next_turn()
    }
}

pub fn call(call_id: &str, action: Action) -> ProposedCall {
    ProposedCall {
        call_id: call_id.to_string(),
        action,
        pending_safety_checks: vec![],
    }
}

pub fn guarded(call_id: &str, action: Action, check_ids: &[&str]) -> ProposedCall {
    ProposedCall {
        call_id: call_id.to_string(),
        action,
        pending_safety_checks: check_ids
            .iter()
            .map(|id| PendingSafetyCheck {
                id: id.to_string(),
                code: "irreversible_action".into(),
                message: "This will place an order".into(),
            })
            .collect(),
    }
}

pub fn turn(id: &str, calls: Vec<ProposedCall>) -> AgentTurn {
    AgentTurn {
        id: id.to_string(),
        calls,
    }
}

pub fn click(x: f64, y: f64) -> Action {
    Action::Click {
        x,
        y,
        button: MouseButton::Left,
    }
}

pub fn agent(launcher: Arc<FakeLauncher>, brain: Option<Arc<ScriptedBrain>>) -> OrderAgent {
    let (tx, _) = broadcast::channel::<RunEvent>(256);
    OrderAgent::new(
        launcher,
        brain.map(|b| b as Arc<dyn ReasoningService>),
        LaunchPolicy::default(),
        LoopTimings::immediate(),
        tx,
    )
}
