use anyhow::Result;
use clap::Parser;
use dotenvy::dotenv;
use order_assistant::OrderAgent;
use order_assistant::brain::{OpenAiBrain, ReasoningService};
use order_assistant::config::{Config, LoopTimings};
use order_assistant::face::{self, AppState, RunEvent};
use order_assistant::hands::ChromeLauncher;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("order_assistant=info,tower_http=info")),
        )
        .init();

    let config = Config::parse();

    let brain: Option<Arc<dyn ReasoningService>> = match config.api_key() {
        Some(key) => Some(Arc::new(OpenAiBrain::new(
            key,
            config.api_base.clone(),
            config.model.clone(),
        ))),
        None => {
            warn!("OPENAI_API_KEY is not set; order runs will be rejected");
            None
        }
    };

    let (event_tx, _) = broadcast::channel::<RunEvent>(64);
    let agent = OrderAgent::new(
        Arc::new(ChromeLauncher),
        brain,
        config.launch_policy(),
        LoopTimings::default(),
        event_tx,
    );

    let state = AppState {
        agent: Arc::new(agent),
        default_start_url: config.default_start_url.clone(),
    };
    let app = face::router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    info!("Order assistant listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
