use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use ingest::pipeline::IngestOutcome;
use ingest::store::PgStore;
use ingest::validate::{display_errors, Rejection};
use ingest::{CancellationToken, Config, IngestRequest, Ingestor};

#[derive(Parser, Debug)]
#[command(name = "ingest", about = "Uploads a mite-monitoring spreadsheet (.csv or .xlsx)")]
struct Args {
    /// File to ingest
    #[arg(long)]
    file: PathBuf,

    /// User id recorded on the upload ledger
    #[arg(long, default_value = "cli")]
    user: String,

    /// Validate against the catalog without writing anything
    #[arg(long, default_value = "false")]
    dry_run: bool,

    /// Rejected rows to list (defaults to ERROR_DISPLAY_LIMIT)
    #[arg(long)]
    show_errors: Option<usize>,
}

fn print_rejections(errors: &[Rejection], limit: usize) {
    if errors.is_empty() {
        return;
    }
    let (shown, rest) = display_errors(errors, limit);
    println!("\nRejected rows (showing {} of {}):", shown.len(), errors.len());
    for e in shown {
        println!("  line {:>5} | {} | {}", e.row_number, e.reason, e.raw_value);
    }
    if rest > 0 {
        println!("  ... and {} more", rest);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = Config::from_env()?;
    let show = args.show_errors.unwrap_or(config.error_display_limit);

    let filename = args
        .file
        .file_name()
        .and_then(|n| n.to_str())
        .context("File path has no usable file name")?
        .to_string();

    println!("=== Monitoreo de Ácaros Ingest ===");
    println!("File: {}", args.file.display());
    println!("Mode: {}", if args.dry_run { "dry-run" } else { "live" });

    let bytes = tokio::fs::read(&args.file)
        .await
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    println!("Content size: {} bytes", bytes.len());

    let store = PgStore::connect(&config.db_url, config.db_max_connections)
        .await
        .context("Failed to connect to database")?;
    let ingestor = Ingestor::new(Arc::new(store)).with_batch_size(config.batch_size);

    if args.dry_run {
        let report = ingestor.validate_only(&filename, &bytes).await?;
        println!("\nRows read: {}", report.total());
        println!("Valid:     {}", report.valid.len());
        println!("Rejected:  {}", report.errors.len());
        print_rejections(&report.errors, show);
        println!("\nDry run - nothing saved to database");
        return Ok(());
    }

    let request = IngestRequest {
        user_id: args.user.clone(),
        filename,
        bytes,
    };
    let mut last = None;
    let mut progress = |pct: u8| {
        if last != Some(pct) {
            println!("Progress: {}%", pct);
            last = Some(pct);
        }
    };

    let summary = ingestor
        .ingest(request, &mut progress, &CancellationToken::new())
        .await?;

    println!("\nUpload ID: {}", summary.upload_id);
    println!("Rows read: {}", summary.total);
    println!("Valid:     {}", summary.valid);
    println!("Rejected:  {}", summary.rejected);
    print_rejections(&summary.errors, show);

    match summary.outcome {
        IngestOutcome::Uploaded => println!("\nUploaded {} observations", summary.uploaded),
        IngestOutcome::NothingToUpload => println!("\nNo valid rows - nothing to upload"),
    }

    Ok(())
}
