//! Parley - priority-queued LLM translation service
//!
//! Entry point: loads configuration, sets up logging and dispatches the
//! CLI subcommands onto the translation service.

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use parley::backend::ChatMessage;
use parley::cli::{Args, Commands};
use parley::config::Config;
use parley::queue::Priority;
use parley::server;
use parley::service::TranslationService;

const DEFAULT_CONFIG_FILE: &str = "parley.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging to both console and file
    setup_logging(args.verbose)?;

    // init-config must not depend on an existing (possibly broken) config
    if let Commands::InitConfig { output } = &args.command {
        Config::default().save_to_file(output)?;
        println!("Wrote default configuration to {}", output.display());
        return Ok(());
    }

    let config = load_config(args.config.as_deref())?;

    match args.command {
        Commands::Serve { bind } => {
            let mut server_config = config.server.clone();
            if let Some(bind) = bind {
                server_config.bind = bind;
            }
            let service = Arc::new(TranslationService::start(&config)?);
            server::serve(service, &server_config).await?;
        }
        Commands::Translate { text, from, to, priority } => {
            let service = TranslationService::start(&config)?;
            let translation = service
                .translate(&text, &from, &to, Priority::from_str(&priority))
                .await;
            service.shutdown().await;
            println!("{}", translation?);
        }
        Commands::Batch { input, output, from, to, priority } => {
            run_batch(&config, &input, output.as_deref(), &from, &to, &priority).await?;
        }
        Commands::Chat { message, system } => {
            let service = TranslationService::start(&config)?;
            let mut messages = Vec::new();
            if let Some(system) = system {
                messages.push(ChatMessage::system(system));
            }
            messages.push(ChatMessage::user(message));

            let mut deltas = service.stream_chat(messages).await?;
            let mut stdout = std::io::stdout();
            while let Some(delta) = deltas.next().await {
                stdout.write_all(delta?.as_bytes())?;
                stdout.flush()?;
            }
            println!();
            service.shutdown().await;
        }
        Commands::Health => {
            let service = TranslationService::start(&config)?;
            let snapshot = service.health().await;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            service.shutdown().await;
            if !snapshot.is_ok() {
                anyhow::bail!("LLM backend at {} is down", config.backend.endpoint);
            }
        }
        // Handled before the configuration is loaded
        Commands::InitConfig { .. } => {}
    }

    Ok(())
}

/// Explicit path, else `./parley.toml` when present, else defaults; then
/// environment overrides.
fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if Path::new(DEFAULT_CONFIG_FILE).exists() {
                info!("Found {} in current directory, loading...", DEFAULT_CONFIG_FILE);
                Config::from_file(DEFAULT_CONFIG_FILE)?
            } else {
                Config::default()
            }
        }
    };
    config.apply_env();
    Ok(config)
}

async fn run_batch(
    config: &Config,
    input: &Path,
    output: Option<&Path>,
    from: &str,
    to: &str,
    priority: &str,
) -> Result<()> {
    let content = tokio::fs::read_to_string(input)
        .await
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let lines: Vec<&str> = content.lines().collect();
    info!("Translating {} line(s) from {}", lines.len(), input.display());

    let service = TranslationService::start(config)?;
    let priority = Priority::from_str(priority);
    let handles: Vec<_> = lines
        .iter()
        .map(|line| service.submit_translation(line, from, to, priority))
        .collect();

    let pb = ProgressBar::new(handles.len() as u64);
    pb.set_style(ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
        .progress_chars("#>-"));

    let mut translated = Vec::with_capacity(handles.len());
    let mut failures = 0usize;
    for (line, handle) in lines.iter().zip(&handles) {
        match handle.wait().await {
            Ok(translation) => translated.push(translation),
            Err(e) => {
                warn!("Keeping original for {:?}: {}", line, e);
                failures += 1;
                translated.push(line.to_string());
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();
    service.shutdown().await;

    let rendered = translated.join("\n") + "\n";
    match output {
        Some(path) => {
            tokio::fs::write(path, rendered)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Wrote {} translation(s) to {}", translated.len(), path.display());
        }
        None => print!("{}", rendered),
    }

    if failures > 0 {
        warn!("{} of {} line(s) failed and were left untranslated", failures, lines.len());
    }
    Ok(())
}

fn setup_logging(verbose: bool) -> Result<()> {
    // Create log directory
    let log_dir = std::env::current_dir()?.join(".parley").join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(&log_dir, "parley.log");
    let (non_blocking_file, _guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(_guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    // Console output goes to stderr so translations on stdout stay clean
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false); // No ANSI colors in file

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Logging initialized - console: {}, file: {}",
          log_level, log_dir.join("parley.log").display());

    Ok(())
}
