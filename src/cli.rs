//! # datahub CLI interface
//!
//! Argument parsing and glue only; loading packages, uploads and submission
//! all live in `datahub-core`.
//!
//! - [`Cli`] / [`Commands`] define the user-facing subcommands.
//! - [`run`] is the async entrypoint shared by `main()` and integration tests.
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use datahub_core::client::HttpDataHub;
use datahub_core::contract::{PushEvent, PushStage, SubmitResponse};
use datahub_core::options::{Findability, OutputsConfig, PushOptions};
use datahub_core::package::Dataset;
use datahub_core::push::{DataHub, PushControl};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::load_config::load_config;

/// CLI for datahub: push data packages and processing flows.
#[derive(Parser)]
#[clap(
    name = "datahub",
    version,
    about = "Push data packages and processing flows to DataHub"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Upload a data package and submit it for processing
    Push {
        /// Directory containing datapackage.json
        #[clap(default_value = ".")]
        dir: PathBuf,
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// published, unlisted or private
        #[clap(long, default_value = "unlisted")]
        findability: String,
        /// Recurrence of the processing, e.g. "every 1d"
        #[clap(long)]
        schedule: Option<String>,
        /// Spreadsheet sheets to process: "all" or a comma separated list of indexes and names
        #[clap(long)]
        sheets: Option<String>,
        /// Also produce a zip of the processed dataset
        #[clap(long)]
        zip: bool,
        /// Also produce an sqlite database of the processed dataset
        #[clap(long)]
        sqlite: bool,
    },
    /// Submit a flow file, uploading only its data package descriptor
    PushFlow {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        #[clap(long, default_value = ".datahub/flow.yaml")]
        flow: PathBuf,
        /// Existing descriptor to attach to the flow, if present
        #[clap(long, default_value = ".datahub/datapackage.json")]
        descriptor: PathBuf,
    },
}

async fn render_events(mut events: UnboundedReceiver<PushEvent>) {
    let mut current = PushStage::default();
    while let Some(event) = events.recv().await {
        match event {
            PushEvent::Stage(stage) => {
                tracing::info!(from = ?current, to = ?stage, "Push stage");
                current = stage;
            }
            PushEvent::Upload(progress) if progress.completed => {
                tracing::info!(file = %progress.file, total_bytes = progress.total_bytes, "Upload complete")
            }
            PushEvent::Upload(progress) => tracing::debug!(
                file = %progress.file,
                transferred = progress.transferred,
                total_bytes = progress.total_bytes,
                "Upload progress"
            ),
        }
    }
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    let config_path = match &cli.command {
        Commands::Push { config, .. } | Commands::PushFlow { config, .. } => config.clone(),
    };
    let config = load_config(config_path)?;
    let hub = DataHub::new(HttpDataHub::from_config(&config)?, config.owner());

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let renderer = tokio::spawn(render_events(rx));
    let control = PushControl::with_events(tx);

    let result: Result<SubmitResponse> = match cli.command {
        Commands::Push {
            dir,
            findability,
            schedule,
            sheets,
            zip,
            sqlite,
            ..
        } => {
            tracing::info!(command = "push", dir = %dir.display(), "Starting push");
            let dataset = Dataset::load(&dir).await?;
            let options = PushOptions {
                findability: Findability::normalize(&findability),
                schedule,
                sheets,
                outputs: OutputsConfig { zip, sqlite },
            };
            hub.push(&dataset, &options, &control)
                .await
                .map_err(anyhow::Error::from)
        }
        Commands::PushFlow {
            flow, descriptor, ..
        } => {
            tracing::info!(command = "push-flow", flow = %flow.display(), "Starting flow push");
            hub.push_flow(&flow, &descriptor, &control)
                .await
                .map_err(anyhow::Error::from)
        }
    };

    drop(control);
    let _ = renderer.await;

    match result {
        Ok(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "Push failed");
            Err(e)
        }
    }
}
