use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use curator::api::{self, ApiState};
use curator::config::AppSettings;
use curator::db::TaskStore;
use curator::logging;
use curator::pipeline::Pipeline;
use curator::render::MarkdownRenderer;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[clap(name = "curator", about = "Generate curated newsletter digests from URL manifests")]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process a manifest file and write a newsletter digest
    Run {
        /// Path to the manifest file, one URL per line
        manifest: PathBuf,

        /// Directory the digest is written to
        #[clap(short, long)]
        output_dir: Option<PathBuf>,

        /// Print the digest to stdout instead of writing a file
        #[clap(long)]
        dry_run: bool,
    },

    /// Run the HTTP API for task-driven generation
    Serve {
        /// Port to listen on
        #[clap(short, long, default_value = "8080")]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::configure_logging();

    let cli = Cli::parse();
    let settings = AppSettings::from_env();

    match cli.command {
        Commands::Run {
            manifest,
            output_dir,
            dry_run,
        } => run_manifest(&settings, &manifest, output_dir, dry_run).await,
        Commands::Serve { port } => serve(settings, port).await,
    }
}

async fn run_manifest(
    settings: &AppSettings,
    manifest: &PathBuf,
    output_dir: Option<PathBuf>,
    dry_run: bool,
) -> Result<()> {
    let pipeline = Pipeline::from_settings(settings)?;
    let result = pipeline
        .run_file(manifest)
        .await
        .with_context(|| format!("cannot process manifest {}", manifest.display()))?;

    let renderer = MarkdownRenderer::new();
    if dry_run {
        print!("{}", renderer.render(&result.entries));
    } else {
        let output_dir = output_dir.unwrap_or_else(|| settings.output_dir.clone());
        let path = renderer
            .write(&result.entries, &output_dir)
            .with_context(|| format!("cannot write digest to {}", output_dir.display()))?;
        info!("Wrote digest to {}", path.display());
    }

    println!(
        "Processed entries: {} | Invalid URLs: {} | Duplicates skipped: {} | Failures: {}",
        result.success_count(),
        result.invalid_urls.len(),
        result.skipped_urls.len(),
        result.failed_urls.len()
    );
    Ok(())
}

async fn serve(settings: AppSettings, port: u16) -> Result<()> {
    let store = TaskStore::new(&settings.database_path)
        .await
        .context("cannot open task database")?;
    let state = ApiState {
        store,
        settings: Arc::new(settings),
    };
    api::serve(state, port).await
}
