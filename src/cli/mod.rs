//! CLI module for superchain
//!
//! Each subcommand builds a demonstration chain, runs it once and prints the
//! resulting context as JSON:
//! - `chain`: a single chain with a final link
//! - `buckets`: three buckets run in sequence
//! - `exit`: three buckets where the second one exits early

pub mod buckets;
pub mod chain;

use clap::{Parser, Subcommand};
use tracing::warn;

use crate::config::AppConfig;
use crate::domain::{ExecutionContext, Link, RunArgs};
use crate::infrastructure::logging;

/// superchain - middleware-style link chains
#[derive(Parser)]
#[command(name = "superchain")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Override the configured log level
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a four-link chain with a final link
    Chain,

    /// Run three buckets in sequence
    Buckets,

    /// Run three buckets where the second exits early
    Exit,
}

/// Load `.env`, configuration and logging shared by every subcommand
pub fn bootstrap(log_level: Option<String>) -> AppConfig {
    dotenvy::dotenv().ok();

    let (mut config, load_error) = match AppConfig::load() {
        Ok(config) => (config, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };

    if let Some(level) = log_level {
        config.logging.level = level;
    }

    logging::init_logging(&config.logging);

    if let Some(e) = load_error {
        warn!(error = %e, "Failed to load configuration, using defaults");
    }

    config
}

/// Link that records its name in the context's `links` list and continues
pub(crate) fn named_link<A: RunArgs>(name: &'static str) -> Link<A> {
    Link::callback(move |ctx, _, next| {
        ctx.append("links", name);
        next.proceed();
        Ok(())
    })
}

pub(crate) fn print_context(ctx: &ExecutionContext) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(&ctx.snapshot())?);
    Ok(())
}
