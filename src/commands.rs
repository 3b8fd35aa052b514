//! Command-line interface of the `iota` binary, defined with `clap`.
//!
//! ```text
//! iota ask "kya kar rahi hai?" --history '[{"role":"user","content":"hi"}]'
//! iota interactive
//! iota cache stats | clear | info | export [FILE]
//! iota status
//! iota init
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Represents the parsed command-line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, propagate_version = true, color = clap::ColorChoice::Always)]
pub struct Cli {
    /// YAML configuration file. Defaults to `<config_dir>/config.yaml` when present.
    #[arg(long, short = 'c', global = true, env = "IOTA_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(about, long_about = None, color = clap::ColorChoice::Always)]
pub enum Commands {
    /// Send one message and print the reply.
    #[clap(name = "ask", alias = "a")]
    Ask {
        message: String,

        /// Prior messages, as a JSON array or the path of a JSON file.
        #[arg(long, default_value = "[]")]
        history: String,

        /// Exchanges to retrieve (overrides the configured value).
        #[arg(long, short = 'k')]
        top_k: Option<usize>,

        /// Skip the response cache for this call.
        #[arg(long)]
        no_cache: bool,
    },

    /// Chat until `exit`, then print session analytics.
    #[clap(name = "interactive", alias = "i")]
    Interactive {
        #[arg(long, short = 'k')]
        top_k: Option<usize>,
    },

    /// Inspect or manage the response cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Show which API keys and models are configured.
    Status,

    /// Write a default `config.yaml` to the configuration directory.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum CacheAction {
    /// Entry count, hits, misses and hit rate.
    Stats,
    /// Delete every entry and reset the counters.
    Clear,
    /// Location, size and the most recently used entries.
    Info {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Write the statistics as JSON.
    Export {
        #[arg(default_value = "cache_stats.json")]
        file: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ask_with_history() {
        let cli = Cli::parse_from([
            "iota",
            "ask",
            "kya kar rahi hai?",
            "--history",
            r#"[{"role":"user","content":"hi"}]"#,
            "-k",
            "5",
        ]);
        match cli.command {
            Commands::Ask {
                message,
                history,
                top_k,
                no_cache,
            } => {
                assert_eq!(message, "kya kar rahi hai?");
                assert!(history.starts_with('['));
                assert_eq!(top_k, Some(5));
                assert!(!no_cache);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_cache_export_default_file() {
        let cli = Cli::parse_from(["iota", "cache", "export"]);
        match cli.command {
            Commands::Cache { action } => assert_eq!(
                action,
                CacheAction::Export {
                    file: PathBuf::from("cache_stats.json")
                }
            ),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::parse_from(["iota", "status", "--config", "/tmp/iota.yaml"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/iota.yaml")));
    }

    #[test]
    fn test_ask_requires_message() {
        assert!(Cli::try_parse_from(["iota", "ask"]).is_err());
    }
}
