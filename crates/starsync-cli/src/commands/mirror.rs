//! Mirror command - one-shot bootstrap of every replica

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use tracing::info;

use super::{build_topology, load_config};

#[derive(Debug, Args)]
pub struct MirrorCommand {
    /// The authoritative directory
    #[arg(long)]
    pub primary: PathBuf,

    /// A mirror directory (repeatable)
    #[arg(long = "replica", required = true)]
    pub replicas: Vec<PathBuf>,
}

impl MirrorCommand {
    pub async fn execute(&self, config_path: Option<&str>) -> Result<()> {
        let config = load_config(config_path);
        // Registration bootstraps every replica from the primary
        let manager = build_topology(config, &self.primary, &self.replicas).await?;

        info!(replicas = self.replicas.len(), "Mirrors rebuilt from primary");
        manager.dispose().await;
        Ok(())
    }
}
