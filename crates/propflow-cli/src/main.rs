//! `propflow`: operator CLI for the migration control API.
//!
//! Set PROPFLOW_API_URL (or pass --api-url); defaults to http://localhost:3000.

use anyhow::Context;
use clap::{Parser, Subcommand};
use propflow_cli::{format_status, init_tracing, ApiClient};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "propflow", about = "Property media migration CLI")]
struct Cli {
    /// Base URL of the control API
    #[arg(long, env = "PROPFLOW_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the migration, or resume it when paused
    Start,
    /// Stop dispatching new items; in-flight items finish
    Pause,
    /// Requeue every errored item (does not start the run)
    RetryErrors,
    /// Show migration progress
    Status {
        /// Poll every N seconds until the run stops running
        #[arg(long, value_name = "SECS")]
        watch: Option<u64>,
        /// Print the raw JSON snapshot
        #[arg(long)]
        json: bool,
    },
    /// Queue photos by source reference (URL, gdrive:<id> or local path)
    Enqueue {
        refs: Vec<String>,
        /// File with one reference per line
        #[arg(long)]
        from_file: Option<PathBuf>,
    },
    /// Show one item
    Item { id: String },
    /// Issue a fresh access URL for a processed item
    Url { id: String },
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize response")?;
    println!("{}", out);
    Ok(())
}

fn read_refs(refs: Vec<String>, from_file: Option<PathBuf>) -> anyhow::Result<Vec<String>> {
    let mut all = refs;
    if let Some(path) = from_file {
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        all.extend(
            contents
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(String::from),
        );
    }
    if all.is_empty() {
        anyhow::bail!("No source references given");
    }
    Ok(all)
}

async fn watch_status(client: &ApiClient, every: Duration) -> anyhow::Result<()> {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let status = client.status().await?;
        println!("{}", format_status(&status));
        if !status.is_running() {
            return Ok(());
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let client = ApiClient::new(&cli.api_url)?;

    match cli.command {
        Commands::Start => {
            let response = client.start().await?;
            print_json(&response)?;
        }
        Commands::Pause => {
            let status = client.pause().await?;
            println!("{}", format_status(&status));
        }
        Commands::RetryErrors => {
            let response = client.retry_errors().await?;
            print_json(&response)?;
        }
        Commands::Status { watch, json } => match watch {
            Some(secs) => watch_status(&client, Duration::from_secs(secs.max(1))).await?,
            None => {
                let status = client.status().await?;
                if json {
                    print_json(&status)?;
                } else {
                    println!("{}", format_status(&status));
                }
            }
        },
        Commands::Enqueue { refs, from_file } => {
            let refs = read_refs(refs, from_file)?;
            let response = client.enqueue(&refs).await?;
            print_json(&response)?;
        }
        Commands::Item { id } => {
            let response = client.item(&id).await?;
            print_json(&response)?;
        }
        Commands::Url { id } => {
            let response = client.item_url(&id).await?;
            print_json(&response)?;
        }
    }

    Ok(())
}
