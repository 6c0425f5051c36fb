mod config;
mod embeddings;
mod http;
mod metrics;
mod models;
mod pipeline;
mod shopify;
mod supabase;
mod transform;

use clap::Parser;
use models::RunOptions;
use pipeline::Pipeline;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

/// Import the DRMERS CLUB catalog: fetch products, generate embeddings,
/// upsert into the shared products table.
#[derive(Debug, Parser)]
#[command(name = "drmers-importer")]
struct Cli {
    /// Cap the number of products processed
    #[arg(long)]
    limit: Option<usize>,
    /// Report what would be written without touching the store
    #[arg(long)]
    dry_run: bool,
    /// Leave embedding fields empty (faster non-production runs)
    #[arg(long)]
    skip_embeddings: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Real environment wins over .env values, so CI secrets stay intact.
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let opts = RunOptions {
        limit: cli.limit,
        dry_run: cli.dry_run,
        skip_embeddings: cli.skip_embeddings,
    };

    let pipeline = Pipeline::from_env();
    match pipeline.run(opts).await {
        Ok(report) => {
            info!(
                target = "importer",
                fetched = report.fetched,
                embedded = report.embedded,
                skipped = report.skipped,
                written = report.written,
                dry_run = report.dry_run,
                "run complete"
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(
                target = "importer",
                stage = err.stage(),
                kind = ?err.kind(),
                "{err}"
            );
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
