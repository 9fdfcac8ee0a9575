use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use reqwest::Client;
use serde_json::json;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "stay-search-cli")]
#[command(about = "Stay search index operator CLI", long_about = None)]
struct Cli {
    #[arg(short, long, env = "STAY_SEARCH_ENDPOINT", default_value = "http://localhost:8080")]
    endpoint: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server health
    Health,

    /// Run a search
    Search {
        /// JSON file holding a search request
        #[arg(short, long, value_name = "FILE", conflicts_with = "city")]
        file: Option<PathBuf>,

        #[arg(short, long)]
        city: Option<String>,

        #[arg(long)]
        check_in: Option<String>,

        #[arg(long)]
        check_out: Option<String>,

        #[arg(short, long)]
        adults: Option<u32>,

        #[arg(short, long, default_value = "1")]
        page: u32,

        #[arg(short = 's', long)]
        page_size: Option<u32>,
    },

    /// Start a full rebuild
    Rebuild,

    /// Show rebuild job progress
    Job {
        #[arg(value_name = "JOB_ID")]
        id: String,
    },

    /// Reindex one unit
    Reindex {
        #[arg(long)]
        property_id: String,

        #[arg(long)]
        unit_id: String,
    },

    /// Flush the index store
    Flush,

    /// Index, cache and failure statistics
    Stats,

    /// Units whose last update failed
    Failed,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = Client::new();

    let response = match cli.command {
        Commands::Health => {
            client
                .get(format!("{}/health", cli.endpoint))
                .send()
                .await
                .with_context(|| format!("connecting to {}", cli.endpoint))?
        }

        Commands::Search {
            file,
            city,
            check_in,
            check_out,
            adults,
            page,
            page_size,
        } => {
            let body: serde_json::Value = match file {
                Some(path) => {
                    let raw = tokio::fs::read_to_string(&path)
                        .await
                        .with_context(|| format!("reading {}", path.display()))?;
                    serde_json::from_str(&raw)
                        .with_context(|| format!("parsing {}", path.display()))?
                }
                None => json!({
                    "city": city,
                    "check_in": check_in,
                    "check_out": check_out,
                    "adults": adults,
                    "page": page,
                    "page_size": page_size,
                }),
            };
            client
                .post(format!("{}/v1/search", cli.endpoint))
                .json(&body)
                .send()
                .await?
        }

        Commands::Rebuild => {
            client
                .post(format!("{}/admin/index/rebuild", cli.endpoint))
                .send()
                .await?
        }

        Commands::Job { id } => {
            client
                .get(format!("{}/admin/index/jobs/{}", cli.endpoint, id))
                .send()
                .await?
        }

        Commands::Reindex {
            property_id,
            unit_id,
        } => {
            client
                .post(format!("{}/admin/index/reindex", cli.endpoint))
                .json(&json!({
                    "property_id": property_id,
                    "unit_id": unit_id,
                }))
                .send()
                .await?
        }

        Commands::Flush => {
            client
                .post(format!("{}/admin/index/flush", cli.endpoint))
                .send()
                .await?
        }

        Commands::Stats => {
            client
                .get(format!("{}/admin/index/stats", cli.endpoint))
                .send()
                .await?
        }

        Commands::Failed => {
            client
                .get(format!("{}/admin/index/failed", cli.endpoint))
                .send()
                .await?
        }
    };

    let status = response.status();
    let text = response.text().await?;
    if text.is_empty() {
        println!("{}", status);
    } else {
        let body: serde_json::Value =
            serde_json::from_str(&text).context("server returned invalid JSON")?;
        println!("{}", serde_json::to_string_pretty(&body)?);
    }

    if !status.is_success() {
        bail!("request failed with {}", status);
    }
    Ok(())
}
