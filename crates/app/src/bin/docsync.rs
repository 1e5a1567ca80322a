// Docsync - pending upload synchronization client

use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Map;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use docsync_app::{create_pipelines, parse_option, Pipelines};
use docsync_common::{telemetry, Config};
use docsync_uploads::{DispatchOutcome, InvoiceOwner, ProgressEvent, ReceiptOwner};

#[derive(Parser)]
#[command(
    name = "docsync",
    version,
    about = "Durable invoice and receipt upload pipelines"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resume every pending upload and wait for the dispatches to finish
    Sync,
    /// Queue an invoice photo for upload
    AddInvoice {
        /// Restaurant the invoice belongs to
        #[arg(long)]
        restaurant: i64,
        /// Extra registration field, repeatable
        #[arg(long = "option", value_name = "KEY=VALUE", value_parser = parse_option)]
        options: Vec<(String, serde_json::Value)>,
        /// Local image path
        path: String,
    },
    /// Queue a receipt photo for a card transaction
    AddReceipt {
        #[arg(long)]
        transaction: i64,
        #[arg(long)]
        company: i64,
        /// Local image path
        path: String,
    },
    /// List pending uploads
    List,
    /// Cancel a pending upload and delete its file
    Remove {
        pipeline: PipelineName,
        path: String,
    },
    /// Drop every pending upload (sign-out)
    Clear,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PipelineName {
    Invoices,
    Receipts,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;
    telemetry::init(&config.rust_log);

    let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
    let forwarder = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            info!(
                pipeline = event.pipeline,
                local_path = %event.local_path,
                stage = %event.stage,
                percent = ?event.percent,
                "Upload progress"
            );
        }
    });

    let pipelines = create_pipelines(&config, Arc::new(tx)).await.map_err(|e| {
        error!("Failed to create pipelines: {}", e);
        e
    })?;

    let result = run(cli.command, &pipelines).await;

    // Closing every sender ends the forwarder after it drains
    drop(pipelines);
    if let Err(e) = forwarder.await {
        warn!("Progress forwarder stopped: {}", e);
    }
    result
}

async fn run(command: Commands, pipelines: &Pipelines) -> anyhow::Result<()> {
    match command {
        Commands::Sync => {
            let report = pipelines.resume().await?;
            for (path, outcome) in report.invoices.iter().chain(report.receipts.iter()) {
                println!("{}\t{}", path, describe(outcome));
            }
            if report.stalled() > 0 {
                warn!(stalled = report.stalled(), "Some uploads are waiting for the next sync");
            }
        }

        Commands::AddInvoice {
            restaurant,
            options,
            path,
        } => {
            let mut owner = InvoiceOwner::new(restaurant);
            if !options.is_empty() {
                owner = owner.with_options(options.into_iter().collect::<Map<_, _>>());
            }
            let added = pipelines.invoices.add(owner, path).await?;
            let outcome = added.dispatch.await?;
            println!("{}\t{}", added.record.local_path, describe(&outcome));
        }

        Commands::AddReceipt {
            transaction,
            company,
            path,
        } => {
            let added = pipelines
                .receipts
                .add(ReceiptOwner::new(transaction, company), path)
                .await?;
            let outcome = added.dispatch.await?;
            println!("{}\t{}", added.record.local_path, describe(&outcome));
        }

        Commands::List => {
            for record in pipelines.invoices.load_all().await? {
                println!("invoices\t{}\t{}\t{}", record.local_path, record.state(), record.captured_at);
            }
            for record in pipelines.receipts.load_all().await? {
                println!("receipts\t{}\t{}\t{}", record.local_path, record.state(), record.captured_at);
            }
        }

        Commands::Remove { pipeline, path } => {
            let existed = match pipeline {
                PipelineName::Invoices => pipelines.invoices.remove(&path).await?,
                PipelineName::Receipts => pipelines.receipts.remove(&path).await?,
            };
            if existed {
                println!("Removed {}", path);
            } else {
                println!("Nothing pending for {}", path);
            }
        }

        Commands::Clear => {
            let cleared = pipelines.clear().await?;
            println!("Cleared {} pending uploads", cleared);
        }
    }

    Ok(())
}

fn describe(outcome: &DispatchOutcome) -> String {
    match outcome {
        DispatchOutcome::Completed => "registered".to_string(),
        DispatchOutcome::Busy => "in progress".to_string(),
        DispatchOutcome::Missing => "not pending".to_string(),
        DispatchOutcome::Stalled { stage } => format!("stalled at {}", stage),
    }
}
