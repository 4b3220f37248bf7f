//! # Conshell CLI
//!
//! Command-line definition and the interactive loop. Each stdin line is one console command
//! (`run`, `stop`, `input`, `list`, `help`); `exit`, end of input or Ctrl-C stops every
//! running process and quits.

use crate::{
    config::EngineConfig,
    console::Console,
    engine::Engine,
    environment::JsonProfileStore,
    messages::MessageCatalog,
    sink::TerminalSink,
    utils::logging::init_logging,
};
use anyhow::{Context, Result};
use clap::Parser;
use directories::ProjectDirs;
use std::{
    io::IsTerminal,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::io::{AsyncBufReadExt, BufReader};

const CONFIG_FILE: &str = "conshell.toml";
const PROFILES_FILE: &str = "environments.json";
const LANGUAGES_DIR: &str = "languages";

/// Conshell: run shell commands in the background and stream their output.
#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about,
    long_about = "conshell reads console commands from stdin:

  run [-d dir] [-e env] [-t seconds] <command>
  input <id> <text>
  list
  stop <id>
  help

Example: run -t 60 cargo build 2>&1 | tee build.log"
)]
pub struct Cli {
    /// Engine settings (TOML). Defaults to conshell.toml in the user config directory
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Stored environment profiles (JSON). Defaults to environments.json in the user config directory
    #[arg(long)]
    pub profiles: Option<PathBuf>,

    /// Message overrides (TOML). Defaults to languages/<language>.toml in the user config
    /// directory, where <language> is the `language` engine setting
    #[arg(long)]
    pub messages: Option<PathBuf>,

    /// Environment profile used by `run` when no -e flag is given
    #[arg(long)]
    pub profile: Option<String>,

    /// Default timeout in seconds for commands without -t (0 disables)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Print style codes as plain text instead of ANSI colors
    #[arg(long)]
    pub plain: bool,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Log to stderr instead of file
    #[arg(long)]
    pub log_to_stderr: bool,
}

impl Cli {
    fn resolve(explicit: &Option<PathBuf>, file: &Path) -> PathBuf {
        explicit.clone().unwrap_or_else(|| {
            ProjectDirs::from("com", "Conshell", "conshell")
                .map(|dirs| dirs.config_dir().join(file))
                .unwrap_or_else(|| file.to_path_buf())
        })
    }

    pub fn config_path(&self) -> PathBuf {
        Self::resolve(&self.config, Path::new(CONFIG_FILE))
    }

    pub fn profiles_path(&self) -> PathBuf {
        Self::resolve(&self.profiles, Path::new(PROFILES_FILE))
    }

    /// The message catalog for `language`, unless `--messages` names one explicitly.
    pub fn messages_path(&self, language: &str) -> PathBuf {
        let file = Path::new(LANGUAGES_DIR).join(format!("{language}.toml"));
        Self::resolve(&self.messages, &file)
    }

    /// Loads the engine settings and applies command-line overrides.
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = EngineConfig::load(&self.config_path())?;
        if let Some(timeout) = self.timeout {
            config.default_timeout = timeout;
        }
        if self.plain {
            config.enable_color = false;
        }
        Ok(config)
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.debug { "debug" } else { "info" };
    init_logging(log_level, !cli.log_to_stderr)?;

    let config = cli.engine_config()?;
    let messages = MessageCatalog::load(&cli.messages_path(&config.language))?;
    let profiles = JsonProfileStore::new(cli.profiles_path());
    let ansi = config.enable_color && std::io::stdout().is_terminal();
    tracing::info!(
        "Starting conshell (config: {}, profiles: {})",
        cli.config_path().display(),
        profiles.path().display()
    );

    let engine = Engine::builder(config, Arc::new(TerminalSink::new(ansi)))
        .messages(Arc::new(messages))
        .profiles(Arc::new(profiles))
        .build();
    let mut console = Console::new(engine.clone());
    if let Some(profile) = &cli.profile {
        console = console.with_profile(profile.clone());
    }

    let result = read_commands(&console).await;
    engine.shutdown().await;
    tracing::info!("conshell stopped");
    result
}

async fn read_commands(console: &Console) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read console input")?,
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                tracing::info!("Interrupted, shutting down");
                return Ok(());
            }
        };
        let Some(line) = line else {
            return Ok(());
        };
        let line = line.trim();
        if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
            return Ok(());
        }
        console.handle_line(line).await;
    }
}
