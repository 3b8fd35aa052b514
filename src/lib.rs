//! # iota_bot (library root)
//!
//! A chat assistant that answers in the voice of a configured persona. For each message
//! it looks for a cached reply, otherwise it embeds the message, pulls the most similar
//! past exchanges out of a hosted vector index, assembles a persona-flavoured prompt and
//! asks a hosted LLM for the reply. New exchanges are written back to the index so the
//! persona keeps learning from its own conversations.
//!
//! The crate is organised leaf-first:
//!
//! - Hosted clients: [`embedding`], [`vector_store`], [`generation`] (sharing [`remote`]).
//! - Local state: [`cache`] with its SQLite [`schema`] and [`models`].
//! - Turn inputs: [`persona`], [`conversation`], [`prompt`].
//! - The pipeline itself: [`workflow`].
//! - Ambient plumbing: [`config`], [`error`], [`logging`].
//! - The `iota` CLI: [`commands`], [`interactive`].
//!
//! ## Configuration directory
//!
//! [`config_dir`] resolves the per-platform directory holding `config.yaml` and, by
//! default, the response cache database:
//!
//! - macOS: `~/Library/Application Support/com.iota.iota-bot/`
//! - Linux (XDG): `~/.config/iota-bot/`
//! - Windows: `%APPDATA%\iota\iota-bot\config\`

use directories::ProjectDirs;

pub mod cache;
pub mod commands;
pub mod config;
pub mod conversation;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod interactive;
pub mod logging;
pub mod models;
pub mod persona;
pub mod prompt;
pub mod remote;
pub mod schema;
pub mod vector_store;
pub mod workflow;

use error::{BotError, Result};

/// Return the per-platform configuration directory.
///
/// The directory is **not** created by this function.
///
/// # Errors
/// [`BotError::Configuration`] if the platform has no home/config directory.
pub fn config_dir() -> Result<std::path::PathBuf> {
    let proj_dirs = ProjectDirs::from("com", "iota", "iota-bot")
        .ok_or_else(|| BotError::configuration("Unable to determine config directory"))?;
    Ok(proj_dirs.config_dir().to_path_buf())
}
