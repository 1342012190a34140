//! Command-line interface definitions for the newsroom pipeline.
//!
//! Each subcommand maps onto one orchestrator or store operation so a timer,
//! a web backend or an operator can drive the pipeline from the shell.

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments for the newsroom pipeline.
///
/// # Examples
///
/// ```sh
/// # Scheduled ingestion run
/// GEMINI_API_KEYS=key1,key2 newsroom --config config.yaml seed
///
/// # Regenerate one article on demand
/// newsroom heal breaking-g7-summit-ends
///
/// # Promote due scheduled articles
/// newsroom publish-scheduled
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to config.yaml file
    #[arg(short, long, env = "NEWSROOM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Model API keys, comma separated. Replaces any keys in the config file.
    #[arg(long, env = "GEMINI_API_KEYS", value_delimiter = ',', hide_env_values = true)]
    pub api_keys: Vec<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Ingest every configured feed, skipping slugs that already exist
    Seed,

    /// Regenerate one article from its feed item or its stored fields
    Heal { slug: String },

    /// Publish every scheduled article whose time has come
    PublishScheduled,

    /// Rebuild the listing index from the record files
    RebuildIndex,

    /// Print one page of the index as JSON
    List {
        #[arg(long, default_value_t = 1)]
        page: usize,

        #[arg(long, default_value_t = 10)]
        page_size: usize,

        #[arg(long)]
        category: Option<String>,
    },

    /// Print one article as JSON
    Show { slug: String },

    /// Set an article's image by hand and pin it
    SetImage { slug: String, image: String },

    /// Schedule an article for publication at an RFC 3339 instant
    Schedule { slug: String, at: DateTime<Utc> },

    /// Remove an article record
    Delete { slug: String },
}
