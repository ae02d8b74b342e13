#![forbid(unsafe_code)]

//! Command-line driver: runs the acquisition pipeline for a few products and
//! prints the resulting mapping, optionally downloading every video.

use std::{path::PathBuf, process::ExitCode};

use anyhow::{Result, anyhow};
use clap::Parser;
use reelscout::{
    config::{SettingsOverrides, resolve_settings},
    downloads_from_settings,
    logging::{LogFormat, init_logging},
    model::ProductQuery,
    pipeline::DEFAULT_VIDEOS_PER_QUERY,
    pipeline_from_settings,
};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "scout", about = "Find a product's TikTok videos and optionally download them")]
struct ScoutArgs {
    /// Product as `name=description`, e.g. `Opal=screen time app`. Repeatable.
    #[arg(long = "query", short = 'q', required = true, value_parser = parse_query)]
    queries: Vec<ProductQuery>,
    /// Videos to fetch per product.
    #[arg(long, default_value_t = DEFAULT_VIDEOS_PER_QUERY)]
    count: usize,
    /// Download the videos after listing them.
    #[arg(long)]
    download: bool,
    /// Base directory for downloaded videos (overrides DOWNLOAD_ROOT).
    #[arg(long)]
    download_root: Option<PathBuf>,
    /// Worker pool size (overrides SCOUT_WORKERS).
    #[arg(long)]
    workers: Option<usize>,
    /// Path of the dotenv file to read.
    #[arg(long)]
    env_file: Option<PathBuf>,
    /// `pretty` or `json` (overrides LOG_FORMAT).
    #[arg(long)]
    log_format: Option<LogFormat>,
}

fn parse_query(raw: &str) -> Result<ProductQuery> {
    let (name, description) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected name=description, got {raw:?}"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(anyhow!("product name must not be empty"));
    }
    Ok(ProductQuery::new(name, description.trim()))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = ScoutArgs::parse();
    init_logging(args.log_format.unwrap_or_else(LogFormat::from_env))?;

    if args.count == 0 {
        return Err(anyhow!("--count must be at least 1"));
    }

    let settings = resolve_settings(SettingsOverrides {
        download_root: args.download_root.clone(),
        workers: args.workers,
        env_path: args.env_file.clone(),
        ..SettingsOverrides::default()
    })?;

    let pipeline = pipeline_from_settings(&settings);
    let result = pipeline.run(&args.queries, args.count).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if !args.download {
        return Ok(ExitCode::SUCCESS);
    }

    let downloads = downloads_from_settings(&settings);
    info!(root = %downloads.root().display(), "downloading videos");
    let report = downloads.download_all(&result).await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.all_succeeded() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
