use clap::Parser;
use secrecy::SecretString;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::brain::{DEFAULT_API_BASE, DEFAULT_MODEL};
use crate::hands::LaunchPolicy;
use crate::types::DEFAULT_START_URL;

/// Order assistant server.
#[derive(Debug, Clone, Parser)]
#[command(name = "order-assistant", version, about)]
pub struct Config {
    /// Address the HTTP server listens on.
    #[arg(long, env = "ORDER_ASSISTANT_BIND", default_value = "127.0.0.1:3000")]
    pub bind: SocketAddr,

    /// Credential for the reasoning service. Runs fail with a configuration
    /// error while it is unset.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    #[arg(long, env = "OPENAI_API_BASE", default_value = DEFAULT_API_BASE)]
    pub api_base: String,

    #[arg(long, env = "ORDER_ASSISTANT_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Run the browser without a window. Off by default so a human can watch.
    #[arg(long, env = "ORDER_ASSISTANT_HEADLESS")]
    pub headless: bool,

    /// Explicit browser binary; auto-detected when unset.
    #[arg(long, env = "CHROME_PATH")]
    pub chrome_path: Option<PathBuf>,

    /// Start URL used when a request does not name one.
    #[arg(long, default_value = DEFAULT_START_URL)]
    pub default_start_url: String,
}

impl Config {
    pub fn api_key(&self) -> Option<SecretString> {
        self.openai_api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(|k| SecretString::from(k.to_string()))
    }

    pub fn launch_policy(&self) -> LaunchPolicy {
        LaunchPolicy {
            headless: self.headless,
            chrome_path: self.chrome_path.clone(),
            ..Default::default()
        }
    }
}

/// Pauses inside the action loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopTimings {
    /// After the first navigation.
    pub initial_load: Duration,
    /// After each executed action, before the next screenshot.
    pub settle: Duration,
    /// Length of a `wait` action.
    pub wait_action: Duration,
}

impl Default for LoopTimings {
    fn default() -> Self {
        Self {
            initial_load: Duration::from_millis(500),
            settle: Duration::from_millis(1000),
            wait_action: Duration::from_millis(1500),
        }
    }
}

impl LoopTimings {
    pub fn immediate() -> Self {
        Self {
            initial_load: Duration::ZERO,
            settle: Duration::ZERO,
            wait_action: Duration::ZERO,
        }
    }
}
