//! Command-line flags, config file and resolved settings.
//!
//! Precedence: flag or environment variable, then the config file, then the
//! built-in default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::Deserialize;
use tracing::debug;

use chat_agent_backend::OpenAiConfig;
use chat_agent_core::LoopConfig;

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MAX_ROUNDS: u32 = 8;
const DEFAULT_MODEL_TIMEOUT_SECS: u64 = 120;
const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_RETRIES: u32 = 2;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant running in a terminal. \
You can list, search, read and write files in the current working directory, and search the web \
when that tool is available. Use tools when they help answer the request, and keep answers concise.";

#[derive(Debug, Parser)]
#[command(name = "chat-agent")]
#[command(about = "Interactive chat agent with file and web tools")]
pub struct Cli {
    /// Model name
    #[arg(long, env = "CHAT_AGENT_MODEL")]
    pub model: Option<String>,

    /// Base URL of an OpenAI-compatible API
    #[arg(long, env = "OPENAI_BASE_URL")]
    pub base_url: Option<String>,

    /// API key for the model backend
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Maximum tool rounds per request
    #[arg(long, env = "CHAT_AGENT_MAX_ROUNDS")]
    pub max_rounds: Option<u32>,

    /// Model call timeout in seconds
    #[arg(long)]
    pub model_timeout: Option<u64>,

    /// Tool call timeout in seconds
    #[arg(long)]
    pub tool_timeout: Option<u64>,

    /// Retries for transient backend failures
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// System prompt seeded at the start of the session
    #[arg(long)]
    pub system_prompt: Option<String>,

    /// Tavily API key; enables the web_search tool
    #[arg(long, env = "TAVILY_API_KEY", hide_env_values = true)]
    pub tavily_api_key: Option<String>,

    /// Config file (defaults to <config dir>/chat-agent/config.toml)
    #[arg(long, env = "CHAT_AGENT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Contents of the TOML config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub max_rounds: Option<u32>,
    pub model_timeout_secs: Option<u64>,
    pub tool_timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub system_prompt: Option<String>,
    pub tavily_api_key: Option<String>,
}

impl FileConfig {
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).context("Invalid config file")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("In {}", path.display()))
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("chat-agent").join("config.toml"))
}

/// Fully resolved settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub model: String,
    pub base_url: String,
    pub api_key: String,
    pub max_rounds: u32,
    pub model_timeout: Duration,
    pub tool_timeout: Duration,
    pub max_retries: u32,
    pub system_prompt: String,
    pub tavily_api_key: Option<String>,
}

impl Settings {
    /// Read the config file named by the flags (or the default one, if present)
    /// and resolve everything.
    pub fn load(cli: &Cli) -> Result<Self> {
        let file = match &cli.config {
            Some(path) => FileConfig::load(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => FileConfig::load(&path)?,
                _ => FileConfig::default(),
            },
        };
        Self::resolve(cli, file)
    }

    pub fn resolve(cli: &Cli, file: FileConfig) -> Result<Self> {
        let api_key = cli
            .api_key
            .clone()
            .or(file.api_key)
            .filter(|k| !k.trim().is_empty())
            .context("No API key configured: pass --api-key, set OPENAI_API_KEY, or add api_key to the config file")?;

        let max_rounds = cli.max_rounds.or(file.max_rounds).unwrap_or(DEFAULT_MAX_ROUNDS);
        if max_rounds == 0 {
            bail!("max_rounds must be at least 1");
        }

        let model_timeout_secs = cli
            .model_timeout
            .or(file.model_timeout_secs)
            .unwrap_or(DEFAULT_MODEL_TIMEOUT_SECS);
        let tool_timeout_secs = cli
            .tool_timeout
            .or(file.tool_timeout_secs)
            .unwrap_or(DEFAULT_TOOL_TIMEOUT_SECS);
        if model_timeout_secs == 0 || tool_timeout_secs == 0 {
            bail!("timeouts must be at least 1 second");
        }

        let settings = Self {
            model: cli
                .model
                .clone()
                .or(file.model)
                .unwrap_or_else(|| DEFAULT_MODEL.into()),
            base_url: cli
                .base_url
                .clone()
                .or(file.base_url)
                .unwrap_or_else(|| DEFAULT_BASE_URL.into()),
            api_key,
            max_rounds,
            model_timeout: Duration::from_secs(model_timeout_secs),
            tool_timeout: Duration::from_secs(tool_timeout_secs),
            max_retries: cli
                .max_retries
                .or(file.max_retries)
                .unwrap_or(DEFAULT_MAX_RETRIES),
            system_prompt: cli
                .system_prompt
                .clone()
                .or(file.system_prompt)
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.into()),
            tavily_api_key: cli
                .tavily_api_key
                .clone()
                .or(file.tavily_api_key)
                .filter(|k| !k.trim().is_empty()),
        };

        debug!(
            model = %settings.model,
            base_url = %settings.base_url,
            max_rounds = settings.max_rounds,
            web_search = settings.tavily_api_key.is_some(),
            "Settings resolved"
        );
        Ok(settings)
    }

    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            max_rounds: self.max_rounds,
            model_timeout: self.model_timeout,
            tool_timeout: self.tool_timeout,
        }
    }

    pub fn backend_config(&self) -> OpenAiConfig {
        let mut config = OpenAiConfig::new(&self.base_url, &self.api_key, &self.model);
        config.max_retries = self.max_retries;
        config
    }
}
