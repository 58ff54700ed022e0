//! Supervised browser agent behind the order assistant's `/order/start` route.
//!
//! A run launches a sandboxed browser, shows the page to a computer-use
//! reasoning service, and executes the actions it proposes one at a time,
//! pausing for human acknowledgement of safety checks and stopping when the
//! page leaves the allowed domains.

pub mod agent;
pub mod allowlist;
pub mod brain;
pub mod config;
pub mod dom;
pub mod error;
pub mod face;
pub mod hands;
pub mod types;

pub use agent::OrderAgent;
pub use error::{AgentError, AgentResult};
pub use types::{Action, AgentTurn, PendingSafetyCheck, ProposedCall, RunOutcome, RunRequest};
