use thiserror::Error;

/// Failures surfaced by the order agent and its collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Configuration(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Reasoning service error: {0}")]
    Reasoning(String),
}

impl AgentError {
    pub fn browser(err: impl std::fmt::Display) -> Self {
        AgentError::Browser(format!("{:#}", err))
    }

    pub fn reasoning(err: impl std::fmt::Display) -> Self {
        AgentError::Reasoning(err.to_string())
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        AgentError::browser(err)
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        AgentError::reasoning(err)
    }
}

pub type AgentResult<T> = Result<T, AgentError>;
