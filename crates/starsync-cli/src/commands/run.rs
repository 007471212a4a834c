//! Run command - watch and replicate until interrupted

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use starsync_engine::{ProgressEvent, ProgressListener};

use super::{build_topology, load_config};

#[derive(Debug, Args)]
pub struct RunCommand {
    /// The authoritative directory
    #[arg(long)]
    pub primary: PathBuf,

    /// A mirror directory (repeatable)
    #[arg(long = "replica", required = true)]
    pub replicas: Vec<PathBuf>,
}

/// Logs per-destination completion and failures
struct LogProgress;

impl ProgressListener for LogProgress {
    fn on_progress(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Completing {
                target_id,
                successful_files,
                failed_files,
                ..
            } => {
                info!(target = %target_id, ok = successful_files, failed = failed_files, "Batch applied");
            }
            ProgressEvent::Error {
                target_id, error, ..
            } => {
                tracing::warn!(target = %target_id, error, "Replication error");
            }
            _ => {}
        }
    }
}

impl RunCommand {
    pub async fn execute(&self, config_path: Option<&str>) -> Result<()> {
        let config = load_config(config_path);
        let manager = build_topology(config, &self.primary, &self.replicas).await?;
        manager.add_progress_listener(Arc::new(LogProgress));

        info!(
            primary = %self.primary.display(),
            replicas = self.replicas.len(),
            "Replication running, press Ctrl-C to stop"
        );

        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;

        info!("Shutting down");
        manager.dispose().await;
        Ok(())
    }
}
