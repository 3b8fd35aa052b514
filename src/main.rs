//! Main module for the `iota` CLI.
//!
//! Parses the command line, loads configuration (YAML file, `.env`, environment), installs
//! logging and dispatches to the chosen command.
//!
//! # Examples
//!
//! ```sh
//! iota ask "kya kar rahi hai?"
//! iota interactive
//! iota cache stats
//! iota init
//! ```

use std::{fs, io, path::Path, process::ExitCode};

use clap::Parser;
use crossterm::{
    ExecutableCommand,
    style::{Color, Print, ResetColor, SetForegroundColor},
};
use tracing::{debug, info, warn};

use iota_bot::{
    cache::{CacheStats, ResponseCache, SqliteResponseCache},
    commands::{CacheAction, Cli, Commands},
    config::BotConfig,
    conversation::{HistoryMessage, parse_history_arg},
    error::{BotError, Result},
    interactive, logging,
    workflow::Orchestrator,
};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match BotConfig::from_sources(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(2);
        }
    };

    if let Err(e) = logging::init_logging(config.log_dir.as_deref()) {
        eprintln!("Logging unavailable: {e}");
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Cannot start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli, config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e @ BotError::Configuration(_)) => {
            eprintln!("{e}");
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, mut config: BotConfig) -> Result<()> {
    debug!("Config loaded: {:?}", config.generation.model);

    match cli.command {
        Commands::Ask {
            message,
            history,
            top_k,
            no_cache,
        } => {
            if no_cache {
                config.cache.enabled = false;
            }
            let history = parse_history_arg(&history)?;
            let bot = Orchestrator::from_config(&config)?;
            let top_k = top_k.unwrap_or(config.top_k);

            println!("{}", ask(&bot, &message, history, top_k).await?);
        }
        Commands::Interactive { top_k } => {
            let bot = Orchestrator::from_config(&config)?;
            let top_k = top_k.unwrap_or(config.top_k);
            let analytics = interactive::run(&bot, io::stdin().lock(), top_k).await?;
            println!("\n{analytics}");
        }
        Commands::Cache { action } => cache_command(&config, action)?,
        Commands::Status => status(&config)?,
        Commands::Init { force } => init(force)?,
    }

    Ok(())
}

/// One turn, then save whatever the buffer still holds. The reply stands even if that
/// save fails.
async fn ask(
    bot: &Orchestrator,
    message: &str,
    history: Vec<HistoryMessage>,
    top_k: usize,
) -> Result<String> {
    let outcome = bot
        .respond_with(message, history, top_k)
        .await
        .map_err(|failure| failure.error)?;

    if let Err(e) = bot.flush_pending().await {
        warn!("Could not save the exchange: {}", e);
    }
    Ok(outcome.response)
}

fn open_cache(config: &BotConfig) -> Result<SqliteResponseCache> {
    let path = config.cache_path()?;
    SqliteResponseCache::open(&path, config.cache.max_entries)
}

fn describe_stats(stats: &CacheStats) -> String {
    format!(
        "Entries:  {}\nHits:     {}\nMisses:   {}\nHit rate: {:.1}% ({})",
        stats.total_entries,
        stats.cache_hits,
        stats.cache_misses,
        stats.hit_rate * 100.0,
        stats.efficiency()
    )
}

fn heading(text: &str) -> Result<()> {
    let mut out = io::stdout();
    out.execute(SetForegroundColor(Color::Yellow))?;
    out.execute(Print(format!("{text}\n")))?;
    out.execute(ResetColor)?;
    Ok(())
}

fn cache_command(config: &BotConfig, action: CacheAction) -> Result<()> {
    let cache = open_cache(config)?;

    match action {
        CacheAction::Stats => {
            heading("Response cache")?;
            println!("{}", describe_stats(&cache.stats()?));
        }
        CacheAction::Clear => {
            cache.clear()?;
            info!("Cleared response cache at {}", cache.path().display());
            println!("Cache cleared.");
        }
        CacheAction::Info { limit } => {
            let size = fs::metadata(cache.path()).map(|m| m.len()).unwrap_or(0);
            heading("Response cache")?;
            println!("Path:     {}", cache.path().display());
            println!("Size:     {:.1} KiB", size as f64 / 1024.0);
            println!("Capacity: {} entries", config.cache.max_entries);
            println!("{}", describe_stats(&cache.stats()?));

            let recent = cache.recent(limit)?;
            if !recent.is_empty() {
                heading("\nMost recently used")?;
                for entry in recent {
                    println!(
                        "{}  {} -> {}",
                        entry.created_at.format("%Y-%m-%d %H:%M"),
                        entry.query,
                        entry.value
                    );
                }
            }
        }
        CacheAction::Export { file } => {
            let stats = cache.export_stats(&file)?;
            println!(
                "Exported {} entries' stats to {}",
                stats.total_entries,
                file.display()
            );
        }
    }
    Ok(())
}

fn status(config: &BotConfig) -> Result<()> {
    let mark = |set: bool| if set { "set" } else { "not set" };

    heading("API status")?;
    println!(
        "Embedding:    HF_API_KEY {} ({}, {} dims)",
        mark(!config.embedding.api_key.is_empty()),
        config.embedding.model,
        config.embedding.dimension
    );
    println!(
        "Vector store: PINECONE_API_KEY {}, index {}",
        mark(!config.vector_store.api_key.is_empty()),
        config
            .vector_store
            .index_host
            .as_deref()
            .or(config.vector_store.index_name.as_deref())
            .unwrap_or("not set")
    );
    println!(
        "Generation:   GOOGLE_API_KEY {} ({}, temperature {})",
        mark(!config.generation.api_key.is_empty()),
        config.generation.model,
        config.generation.temperature
    );

    let persona = config.persona_config()?;
    println!(
        "Persona:      {} ({}), private name {}",
        persona.display_name(),
        persona.persona.voice(),
        mark(persona.private_name.is_some())
    );
    match config.cache_path() {
        Ok(path) if config.cache.enabled => println!("Cache:        {}", path.display()),
        _ => println!("Cache:        disabled"),
    }

    match &config.log_dir {
        Some(dir) => println!(
            "Log file:     {}",
            logging::log_file_path(dir, chrono::Utc::now().date_naive()).display()
        ),
        None => println!("Log file:     stderr only"),
    }

    match config.validate() {
        Ok(()) => println!("\nReady."),
        Err(e) => println!("\nNot ready: {e}"),
    }
    Ok(())
}

/// Write a default `config.yaml` into the configuration directory.
fn init(force: bool) -> Result<()> {
    let config_dir = iota_bot::config_dir()?;
    info!("Creating config directory: {}", config_dir.display());
    fs::create_dir_all(&config_dir)?;

    let config_path = config_dir.join("config.yaml");
    write_default_config(&config_path, force)?;
    println!("Wrote {}", config_path.display());
    println!("Put API keys in the environment or a .env file (see `iota status`).");
    Ok(())
}

fn write_default_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(BotError::configuration(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }
    let config_yaml = serde_yaml::to_string(&BotConfig::default())?;
    fs::write(path, config_yaml)?;
    Ok(())
}
