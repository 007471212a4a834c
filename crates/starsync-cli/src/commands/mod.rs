//! CLI command implementations

pub mod mirror;
pub mod run;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use starsync_core::config::Config;
use starsync_core::domain::TargetId;
use starsync_engine::{FileSyncManager, SyncTarget, TargetRole};
use starsync_fs::{LocalFileSystem, SubstrateKind};

/// Loads configuration from `--config`, or defaults
pub fn load_config(config_path: Option<&str>) -> Config {
    match config_path {
        Some(path) => {
            let config = Config::load_or_default(Path::new(path));
            info!(config_path = path, "Loaded configuration");
            config
        }
        None => Config::default(),
    }
}

/// Builds the manager and registers one native primary plus mirrors
///
/// The primary is registered last so every mirror is bootstrapped in
/// one pass when it arrives.
pub async fn build_topology(
    config: Config,
    primary_root: &PathBuf,
    replica_roots: &[PathBuf],
) -> Result<Arc<FileSyncManager>> {
    let manager = FileSyncManager::new(config);
    manager.initialize().context("Manager initialization failed")?;

    for (index, root) in replica_roots.iter().enumerate() {
        let id = TargetId::new(format!("replica-{index}"))
            .context("Invalid replica target id")?;
        let target = Arc::new(SyncTarget::with_config(
            id,
            SubstrateKind::Native,
            manager.ignore(),
            &manager.config().engine,
        ));
        let fs = Arc::new(LocalFileSystem::new(root));
        target
            .initialize(fs, false)
            .await
            .with_context(|| format!("Failed to initialize replica {}", root.display()))?;
        manager
            .register_target(target, TargetRole::Secondary)
            .await
            .with_context(|| format!("Failed to register replica {}", root.display()))?;
    }

    let primary_id = TargetId::new("primary").context("Invalid primary target id")?;
    let primary = Arc::new(SyncTarget::with_config(
        primary_id,
        SubstrateKind::Native,
        manager.ignore(),
        &manager.config().engine,
    ));
    let fs = Arc::new(LocalFileSystem::new(primary_root));
    primary
        .initialize(fs, true)
        .await
        .with_context(|| format!("Failed to initialize primary {}", primary_root.display()))?;
    manager
        .register_target(primary, TargetRole::Primary)
        .await
        .context("Failed to register primary (mirror bootstrap)")?;

    Ok(manager)
}
