mod config;
mod conflicts;
mod info;
mod merge;
mod scan;
mod toggle;

pub use config::*;
pub use conflicts::*;
pub use info::*;
pub use merge::*;
pub use scan::*;
pub use toggle::*;

use crate::errors::CliError;
use crate::utils::config::AppConfig;
use crate::utils::ConfirmLockedHandler;
use kmm_core::{ExternalMergeTool, ManagerOptions, ModManager};
use miette::Result;
use std::sync::Arc;

/// Open a manager for the configured game, scan it and re-apply the saved
/// priority orders.
fn open_manager(cfg: &AppConfig) -> Result<ModManager> {
    let game_path = cfg.game_path.clone().ok_or(CliError::GamePathMissing)?;
    let tool = Arc::new(ExternalMergeTool::new(cfg.merge_tool_path()));
    let options = ManagerOptions::new(game_path.clone(), tool)
        .with_index_path(cfg.index_path())
        .with_locked_handler(Arc::new(ConfirmLockedHandler));

    let manager = ModManager::open(options).map_err(|e| match e {
        kmm_core::Error::InvalidGameDir(_) => CliError::invalid_game_path(game_path),
        other => CliError::from(other),
    })?;
    Ok(manager)
}

/// Run `f` against a freshly scanned manager. The manager is shut down on
/// every path, including errors from `f`.
fn with_manager<T>(cfg: &AppConfig, f: impl FnOnce(&ModManager) -> Result<T>) -> Result<T> {
    let manager = open_manager(cfg)?;

    let result = manager
        .scan()
        .map_err(CliError::from)
        .map_err(miette::Report::from)
        .and_then(|summary| {
            for name in &summary.migrated {
                tracing::info!(mod_name = %name, "moved legacy archive into its own mod folder");
            }
            manager
                .apply_priorities(&cfg.conflict_order)
                .map_err(CliError::from)?;
            f(&manager)
        });

    if let Err(e) = manager.shutdown() {
        tracing::warn!(error = %e, "shutdown did not complete cleanly");
    }
    result
}
