//! # Newsroom
//!
//! A news ingestion pipeline that reads category RSS/Atom feeds, finds a
//! representative image for each story, has a generative text model rewrite
//! it into a structured article, and persists the result as one JSON record
//! per slug plus a derived listing index.
//!
//! ## Features
//!
//! - One feed per site section, deduplicated by title slug
//! - Publisher URL resolution and JSON-LD / Open Graph / Twitter image discovery
//! - Local media download with deterministic fallback images
//! - Credential pool with round-robin rotation and rate-limit failover
//! - Write-through cache over durable records; index rebuilt on every write
//! - On-demand self-heal of thin articles and a scheduled-publish sweep
//!
//! ## Usage
//!
//! ```sh
//! GEMINI_API_KEYS=key1,key2 newsroom --config config.yaml seed
//! ```
//!
//! ## Architecture
//!
//! 1. **Feeds**: fetch each category feed ([`feeds`])
//! 2. **Media**: resolve links, scrape and download images ([`media`])
//! 3. **Generation**: rewrite via the credential pool ([`api`])
//! 4. **Storage**: upsert the record and rebuild the index ([`store`])
//!
//! [`pipeline`] sequences the above for each entry point.

use clap::Parser;
use serde::Serialize;
use std::error::Error;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod api;
mod cli;
mod config;
mod error;
mod feeds;
mod media;
mod models;
mod pipeline;
mod store;
mod utils;

use cli::{Cli, Command};
use config::Config;
use pipeline::Pipeline;
use utils::ensure_writable_dir;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("newsroom starting up");

    let args = Cli::parse();
    debug!(?args.config, command = ?args.command, "Parsed CLI arguments");

    let mut config = Config::load(args.config.as_deref())?;
    if !args.api_keys.is_empty() {
        config.model.api_keys = args.api_keys.clone();
    }

    // Early check: writers need the record directory. A failure here is not
    // fatal because the store degrades to memory-only saves.
    if command_writes(&args.command) {
        if let Err(e) = ensure_writable_dir(&config.records_dir).await {
            warn!(
                path = %config.records_dir.display(),
                error = %e,
                "Record directory is not writable; saves will be memory-only"
            );
        }
    }

    let pipeline = Pipeline::from_config(config)?;
    let outcome = run(&pipeline, args.command).await;

    let elapsed = start_time.elapsed();
    match &outcome {
        Ok(()) => info!(elapsed_secs = elapsed.as_secs_f64(), "newsroom finished"),
        Err(e) => error!(elapsed_secs = elapsed.as_secs_f64(), error = %e, "newsroom failed"),
    }
    outcome
}

fn command_writes(command: &Command) -> bool {
    !matches!(command, Command::List { .. } | Command::Show { .. })
}

async fn run(pipeline: &Pipeline, command: Command) -> Result<(), Box<dyn Error>> {
    let store = pipeline.store();
    match command {
        Command::Seed => print_json(&pipeline.seed().await?),
        Command::Heal { slug } => {
            let healed = pipeline.self_heal(&slug, None).await?;
            if !healed.durable {
                warn!(%slug, "Healed article is held in memory only");
            }
            print_json(&healed.article)
        }
        Command::PublishScheduled => {
            let published = pipeline.publish_scheduled(chrono::Utc::now()).await;
            info!(count = published.len(), "Scheduled publish sweep complete");
            print_json(&published)
        }
        Command::RebuildIndex => {
            let snapshot = store.rebuild_index().await?;
            info!(entries = snapshot.articles.len(), "Index rebuilt");
            Ok(())
        }
        Command::List {
            page,
            page_size,
            category,
        } => print_json(&store.list_page(page, page_size, category.as_deref()).await),
        Command::Show { slug } => match store.get_by_slug(&slug).await {
            Some(article) => print_json(&article),
            None => Err(error::StoreError::NotFound(slug).into()),
        },
        Command::SetImage { slug, image } => {
            print_json(&pipeline.set_custom_image(&slug, &image).await?.article)
        }
        Command::Schedule { slug, at } => print_json(&pipeline.schedule(&slug, at).await?.article),
        Command::Delete { slug } => {
            if !store.delete(&slug).await? {
                return Err(error::StoreError::NotFound(slug).into());
            }
            info!(%slug, "Deleted");
            Ok(())
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
