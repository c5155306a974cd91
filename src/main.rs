// src/main.rs
// recall-trigger - command-line front end for the trigger engine

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use recall_trigger::config::{EngineConfig, apply_env_overrides};
use recall_trigger::memory::InMemoryStore;
use recall_trigger::{Collaborators, ConversationWindow, Message, OperatingMode, Platform, TriggerEngine};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{Level, debug, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "recall-trigger")]
#[command(about = "Decide when an assistant should save or recall long-term memory")]
#[command(version)]
struct Cli {
    /// Config file (default: ~/.recall-trigger/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decide what to do with one message and print the decision as JSON
    Decide {
        /// Message text
        #[arg(short, long)]
        text: String,

        /// Prior conversation, one JSON message per line
        #[arg(long)]
        history: Option<PathBuf>,

        /// Platform the message came from
        #[arg(short, long, default_value = "cli")]
        platform: String,

        /// User id
        #[arg(short, long, default_value = "local")]
        user: String,

        /// Operating mode (rules_only, model_only, hybrid, learning)
        #[arg(short, long)]
        mode: Option<OperatingMode>,
    },

    /// List configured rules and their state
    Rules,

    /// Validate the configuration and print the report
    CheckConfig,
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let mut config = EngineConfig::load(path)?;
    apply_env_overrides(&mut config);
    Ok(config)
}

fn log_level(verbose: bool, configured: &str) -> Level {
    if verbose {
        return Level::DEBUG;
    }
    configured.parse().unwrap_or(Level::WARN)
}

/// Read a JSON Lines history file into a window
fn read_history(path: &Path) -> Result<ConversationWindow> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read history file {}", path.display()))?;
    let mut window = ConversationWindow::default();
    for (n, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let message: Message = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: not a message", path.display(), n + 1))?;
        window.push(message);
    }
    debug!(messages = window.len(), "Loaded history");
    Ok(window)
}

fn build_engine(config: EngineConfig) -> Result<TriggerEngine> {
    let collaborators =
        Collaborators::from_config(&config).with_store(Arc::new(InMemoryStore::new()));
    Ok(TriggerEngine::new(config, collaborators)?)
}

async fn run_decide(
    mut config: EngineConfig,
    text: String,
    history: Option<PathBuf>,
    platform: &str,
    user: &str,
    mode: Option<OperatingMode>,
) -> Result<()> {
    if let Some(mode) = mode {
        config.mode = mode;
    }
    let mut window = match history {
        Some(path) => read_history(&path)?,
        None => ConversationWindow::default(),
    };
    let message = Message::user(text);
    window.push(message.clone());

    let engine = build_engine(config)?;
    let decision = engine
        .decide(&message, &window, Platform::from_name(platform), user)
        .await;

    info!(action = %decision.action, method = %decision.method, "Decided");
    println!("{}", serde_json::to_string_pretty(&decision)?);
    Ok(())
}

fn run_rules(config: EngineConfig) -> Result<()> {
    let engine = build_engine(config)?;
    println!("{}", serde_json::to_string_pretty(&engine.rules())?);
    Ok(())
}

fn run_check_config(config: &EngineConfig) -> Result<()> {
    let validation = config.validate();
    println!("{}", validation.report());
    if !validation.is_valid() {
        bail!("configuration has {} error(s)", validation.errors.len());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Some(home) = dirs::home_dir() {
        let _ = dotenvy::from_path(home.join(".recall-trigger/.env"));
    }
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level(cli.verbose, &config.log_level))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Decide {
            text,
            history,
            platform,
            user,
            mode,
        } => run_decide(config, text, history, &platform, &user, mode).await?,
        Commands::Rules => run_rules(config)?,
        Commands::CheckConfig => run_check_config(&config)?,
    }

    Ok(())
}
