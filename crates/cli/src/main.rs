//! chat-agent
//!
//! Interactive terminal chat with a tool-using model.

mod config;
mod session;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use chat_agent_backend::OpenAiClient;
use chat_agent_core::{AgentLoop, ConversationState};
use chat_agent_tools::{ToolsConfig, default_registry};

use crate::config::{Cli, Settings};
use crate::session::{Session, spawn_stdin_reader};

fn init_logging(verbose: u8) -> Result<()> {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let settings = Settings::load(&cli)?;

    let root = std::env::current_dir().context("Failed to determine working directory")?;
    let mut tools_config = ToolsConfig::new(root);
    tools_config.tavily_api_key = settings.tavily_api_key.clone();
    let registry = default_registry(&tools_config).context("Failed to register tools")?;
    info!(tools = ?registry.names(), "Tools registered");

    let client =
        OpenAiClient::new(settings.backend_config()).context("Failed to create model client")?;
    let agent = AgentLoop::new(client, Arc::new(registry), settings.loop_config());

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted");
                shutdown.cancel();
            }
        });
    }

    let mut lines = spawn_stdin_reader().context("Failed to start input reader")?;
    let conversation = ConversationState::with_system(&settings.system_prompt);
    let mut session = Session::new(agent, conversation, shutdown);

    let mut stdout = std::io::stdout();
    let end = session.run(&mut lines, &mut stdout).await?;
    info!(
        reason = ?end,
        exchanges = session.conversation().exchange_count(),
        "Session ended"
    );

    println!("Goodbye!");
    Ok(())
}
