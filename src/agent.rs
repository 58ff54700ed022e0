//! The order agent's action loop.
//!
//! A run alternates between one reasoning-service exchange and at most one
//! browser action until the service stops proposing actions, a safety check
//! needs a human, the page leaves the allow-list, the turn cap is hit, or
//! something fails. Each of those exits is a [`RunOutcome`] variant; the loop
//! itself only ever sits in [`LoopState::Running`] between them.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::allowlist::DomainAllowList;
use crate::brain::{ActionOutcome, ReasoningService, SessionOpening};
use crate::config::LoopTimings;
use crate::error::{AgentError, AgentResult};
use crate::face::RunEvent;
use crate::hands::{BrowserControl, BrowserLauncher, LaunchPolicy, key_for_token};
use crate::types::{
    ACTIONS_EXECUTED_PER_TURN, Action, AgentTurn, MAX_TURNS_PER_RUN, PendingSafetyCheck,
    ProposedCall, RunOutcome, RunRequest, TYPED_TEXT_LOG_CHARS, Viewport,
};

/// Where a run stands between two exchanges with the reasoning service.
#[derive(Debug)]
enum LoopState {
    Running {
        turn: AgentTurn,
        executed: usize,
    },
    Finished(RunOutcome),
}

/// What a turn asks the loop to do next, before the allow-list is consulted.
#[derive(Debug, PartialEq)]
pub enum TurnDecision {
    /// Some proposal carries checks missing from the acknowledgement set.
    AwaitAcknowledgement(Vec<PendingSafetyCheck>),
    /// Nothing proposed: the task is done.
    Finish,
    Execute(ProposedCall),
}

/// Decide on a turn. Only the first proposal is ever executed.
pub fn inspect_turn(turn: &AgentTurn, acknowledged: &HashSet<String>) -> TurnDecision {
    let unacknowledged: Vec<PendingSafetyCheck> = turn
        .calls
        .iter()
        .flat_map(|call| call.pending_safety_checks.iter())
        .filter(|check| !acknowledged.contains(&check.id))
        .cloned()
        .collect();

    if !unacknowledged.is_empty() {
        return TurnDecision::AwaitAcknowledgement(unacknowledged);
    }

    match turn.calls.first() {
        Some(call) => TurnDecision::Execute(call.clone()),
        None => TurnDecision::Finish,
    }
}

/// Human-readable log line for an action, as recorded in the run log.
pub fn describe_action(action: &Action) -> Vec<String> {
    match action {
        Action::Click { x, y, button } => vec![format!("click ({},{}) {}", x, y, button.as_str())],
        Action::Scroll {
            x,
            y,
            delta_x,
            delta_y,
        } => vec![format!("scroll at ({},{}) by ({},{})", x, y, delta_x, delta_y)],
        Action::Keypress { keys } => keys.iter().map(|k| format!("keypress {}", k)).collect(),
        Action::Type { text } => {
            let shown: String = text.chars().take(TYPED_TEXT_LOG_CHARS).collect();
            vec![format!("type '{}'", shown)]
        }
        Action::Wait => vec!["wait".to_string()],
        Action::Screenshot => vec!["screenshot".to_string()],
        Action::Other { kind, .. } => vec![format!("unhandled action {}", kind)],
    }
}

/// Drives browser sessions on behalf of users. One instance serves every
/// request; each run owns its own browser and reasoning session.
pub struct OrderAgent {
    launcher: Arc<dyn BrowserLauncher>,
    brain: Option<Arc<dyn ReasoningService>>,
    policy: LaunchPolicy,
    timings: LoopTimings,
    events: broadcast::Sender<RunEvent>,
    next_run: AtomicU64,
}

impl OrderAgent {
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        brain: Option<Arc<dyn ReasoningService>>,
        policy: LaunchPolicy,
        timings: LoopTimings,
        events: broadcast::Sender<RunEvent>,
    ) -> Self {
        Self {
            launcher,
            brain,
            policy,
            timings,
            events,
            next_run: AtomicU64::new(1),
        }
    }

    pub fn events(&self) -> &broadcast::Sender<RunEvent> {
        &self.events
    }

    /// Run one request to a terminal outcome.
    ///
    /// Only precondition failures are returned as `Err`; anything that goes
    /// wrong once the browser is launched becomes [`RunOutcome::Error`].
    pub async fn run(&self, request: RunRequest) -> AgentResult<RunOutcome> {
        if request.prompt.trim().is_empty() {
            return Err(AgentError::InvalidRequest("Missing prompt".into()));
        }
        let brain = self
            .brain
            .clone()
            .ok_or_else(|| AgentError::Configuration("Missing OPENAI_API_KEY".into()))?;

        let run = self.next_run.fetch_add(1, Ordering::Relaxed);
        info!(
            run,
            start_url = %request.start_url,
            prior_session = request.prior_session_id.as_deref().unwrap_or("-"),
            "Starting order run"
        );
        let _ = self.events.send(RunEvent::Started { run });

        let outcome = match self.launcher.launch(&self.policy).await {
            Ok(browser) => {
                let mut driver = RunDriver {
                    run,
                    allow_list: DomainAllowList::new(&request.allowed_domains),
                    request: &request,
                    browser: browser.as_ref(),
                    brain: brain.as_ref(),
                    viewport: self.policy.viewport,
                    timings: self.timings,
                    events: &self.events,
                    logs: Vec::new(),
                    last_turn_id: None,
                };
                let outcome = driver.drive().await;

                if let Err(e) = browser.close().await {
                    warn!(run, "Browser teardown failed: {}", e);
                }
                outcome
            }
            Err(e) => RunOutcome::Error {
                turn_id: None,
                message: e.to_string(),
                logs: Vec::new(),
            },
        };

        info!(run, status = outcome.status(), "Order run finished");
        let _ = self.events.send(RunEvent::Finished {
            run,
            status: outcome.status().to_string(),
        });
        Ok(outcome)
    }
}

/// State for one run; lives exactly as long as its browser.
struct RunDriver<'a> {
    run: u64,
    request: &'a RunRequest,
    allow_list: DomainAllowList,
    browser: &'a dyn BrowserControl,
    brain: &'a dyn ReasoningService,
    viewport: Viewport,
    timings: LoopTimings,
    events: &'a broadcast::Sender<RunEvent>,
    logs: Vec<String>,
    last_turn_id: Option<String>,
}

impl RunDriver<'_> {
    async fn drive(&mut self) -> RunOutcome {
        match self.run_loop().await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(run = self.run, "Order run failed: {}", e);
                RunOutcome::Error {
                    turn_id: self.last_turn_id.clone(),
                    message: e.to_string(),
                    logs: std::mem::take(&mut self.logs),
                }
            }
        }
    }

    async fn run_loop(&mut self) -> AgentResult<RunOutcome> {
        self.browser.navigate(&self.request.start_url).await?;
        tokio::time::sleep(self.timings.initial_load).await;

        let screenshot = self.screenshot().await?;
        let _ = self.events.send(RunEvent::Thinking { run: self.run, turn: 1 });
        let turn = self
            .brain
            .start_session(SessionOpening {
                prompt: self.request.prompt.clone(),
                screenshot_base64: screenshot,
                viewport: self.viewport,
            })
            .await?;

        let mut state = LoopState::Running { turn, executed: 0 };
        loop {
            state = match state {
                LoopState::Running { turn, executed } => self.advance(turn, executed).await?,
                LoopState::Finished(outcome) => return Ok(outcome),
            };
        }
    }

    async fn advance(&mut self, turn: AgentTurn, executed: usize) -> AgentResult<LoopState> {
        self.last_turn_id = Some(turn.id.clone());

        let call = match inspect_turn(&turn, &self.request.acknowledged_safety_ids) {
            TurnDecision::AwaitAcknowledgement(safety_checks) => {
                info!(
                    run = self.run,
                    checks = safety_checks.len(),
                    "Safety checks need acknowledgement"
                );
                return Ok(LoopState::Finished(RunOutcome::NeedsAcknowledgement {
                    screenshot_base64: self.screenshot().await?,
                    turn_id: turn.id,
                    safety_checks,
                    logs: std::mem::take(&mut self.logs),
                }));
            }
            TurnDecision::Finish => {
                debug!(run = self.run, "No further actions proposed");
                return Ok(LoopState::Finished(RunOutcome::Completed {
                    screenshot_base64: self.screenshot().await?,
                    turn_id: turn.id,
                    logs: std::mem::take(&mut self.logs),
                }));
            }
            TurnDecision::Execute(call) => call,
        };

        let deferred = turn.calls.len().saturating_sub(ACTIONS_EXECUTED_PER_TURN);
        if deferred > 0 {
            debug!(run = self.run, deferred, "Deferring extra proposals to later turns");
        }

        // The allow-list is checked against where the page is now, not where
        // the action may take it.
        let current = self.current_url().await?;
        if !self.allow_list.permits(&current) {
            warn!(run = self.run, url = %current, "Blocked domain");
            return Ok(LoopState::Finished(RunOutcome::Blocked {
                screenshot_base64: self.screenshot().await?,
                turn_id: turn.id,
                url: current,
                logs: std::mem::take(&mut self.logs),
            }));
        }

        self.execute(&call.action).await?;
        tokio::time::sleep(self.timings.settle).await;
        let screenshot = self.screenshot().await?;

        let executed = executed + 1;
        if executed >= MAX_TURNS_PER_RUN {
            info!(run = self.run, executed, "Turn cap reached");
            return Ok(LoopState::Finished(RunOutcome::Completed {
                turn_id: turn.id,
                screenshot_base64: screenshot,
                logs: std::mem::take(&mut self.logs),
            }));
        }

        let acknowledged_safety_checks = call
            .pending_safety_checks
            .iter()
            .filter(|check| self.request.is_acknowledged(check))
            .cloned()
            .collect();
        let current_url = self.browser.current_url().await?;

        let _ = self.events.send(RunEvent::Thinking {
            run: self.run,
            turn: executed + 1,
        });
        let next = self
            .brain
            .continue_session(ActionOutcome {
                prior_turn_id: turn.id,
                call_id: call.call_id,
                screenshot_base64: screenshot,
                acknowledged_safety_checks,
                current_url,
                viewport: self.viewport,
            })
            .await?;

        Ok(LoopState::Running {
            turn: next,
            executed,
        })
    }

    async fn execute(&mut self, action: &Action) -> AgentResult<()> {
        for description in describe_action(action) {
            debug!(run = self.run, "{}", description);
            self.logs.push(description);
        }
        let _ = self.events.send(RunEvent::Step {
            run: self.run,
            number: self.logs.len(),
            action: action.kind().to_string(),
        });

        match action {
            Action::Click { x, y, button } => self.browser.click(*x, *y, *button).await?,
            Action::Scroll {
                x,
                y,
                delta_x,
                delta_y,
            } => {
                self.browser.move_pointer(*x, *y).await?;
                self.browser.scroll_by(*delta_x, *delta_y).await?;
            }
            Action::Keypress { keys } => {
                for key in keys {
                    self.browser.press_key(key_for_token(key)).await?;
                }
            }
            Action::Type { text } => self.browser.type_text(text).await?,
            Action::Wait => tokio::time::sleep(self.timings.wait_action).await,
            Action::Screenshot => {}
            Action::Other { kind, .. } => warn!(run = self.run, kind = %kind, "Unhandled action"),
        }
        Ok(())
    }

    async fn screenshot(&self) -> AgentResult<String> {
        let png = self.browser.screenshot().await?;
        Ok(STANDARD.encode(png))
    }

    async fn current_url(&self) -> AgentResult<String> {
        let url = self.browser.current_url().await?;
        if url.is_empty() {
            Ok(self.request.start_url.clone())
        } else {
            Ok(url)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MouseButton;

    fn call(id: &str, checks: &[&str]) -> ProposedCall {
        ProposedCall {
            call_id: id.to_string(),
            action: Action::Wait,
            pending_safety_checks: checks
                .iter()
                .map(|c| PendingSafetyCheck {
                    id: c.to_string(),
                    code: "irreversible_action".into(),
                    message: "Confirm".into(),
                })
                .collect(),
        }
    }

    #[test]
    fn empty_turn_finishes() {
        let turn = AgentTurn {
            id: "r1".into(),
            calls: vec![],
        };
        assert_eq!(inspect_turn(&turn, &HashSet::new()), TurnDecision::Finish);
    }

    #[test]
    fn first_call_wins() {
        let turn = AgentTurn {
            id: "r1".into(),
            calls: vec![call("a", &[]), call("b", &[])],
        };
        match inspect_turn(&turn, &HashSet::new()) {
            TurnDecision::Execute(c) => assert_eq!(c.call_id, "a"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unacknowledged_check_on_any_call_pauses() {
        let turn = AgentTurn {
            id: "r1".into(),
            calls: vec![call("a", &["sc_1"]), call("b", &["sc_2"])],
        };
        let acked: HashSet<String> = ["sc_1".to_string()].into();
        match inspect_turn(&turn, &acked) {
            TurnDecision::AwaitAcknowledgement(checks) => {
                assert_eq!(checks.len(), 1);
                assert_eq!(checks[0].id, "sc_2");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn acknowledged_checks_allow_execution() {
        let turn = AgentTurn {
            id: "r1".into(),
            calls: vec![call("a", &["sc_1"])],
        };
        let acked: HashSet<String> = ["sc_1".to_string()].into();
        assert!(matches!(inspect_turn(&turn, &acked), TurnDecision::Execute(_)));
    }

    #[test]
    fn typed_text_is_truncated_in_logs() {
        let text = "x".repeat(200);
        let lines = describe_action(&Action::Type { text });
        assert_eq!(lines, vec![format!("type '{}'", "x".repeat(80))]);
    }

    #[test]
    fn descriptions_match_log_format() {
        assert_eq!(
            describe_action(&Action::Click {
                x: 10.0,
                y: 20.0,
                button: MouseButton::Right
            }),
            vec!["click (10,20) right"]
        );
        assert_eq!(
            describe_action(&Action::Keypress {
                keys: vec!["CTRL".into(), "L".into()]
            }),
            vec!["keypress CTRL", "keypress L"]
        );
        assert_eq!(
            describe_action(&Action::Scroll {
                x: 1.0,
                y: 2.0,
                delta_x: 0.0,
                delta_y: -300.0
            }),
            vec!["scroll at (1,2) by (0,-300)"]
        );
    }
}
