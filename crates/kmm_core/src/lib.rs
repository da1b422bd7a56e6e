//! Conflict detection and merging for Kingdom Come: Deliverance mods.
//!
//! Mods live in folders under the game's `Mods` directory, each with a
//! `mod.manifest` and one or more `.pak` (zip) archives. When two enabled
//! mods ship the same file, this crate merges the copies with an external
//! three-way merge tool and installs the result as one more mod that loads
//! last:
//!
//! - **Discovery**: find mods, migrate legacy `zzz*.pak` archives, list files
//! - **Conflicts**: group files by identity, keep a priority order per group
//! - **Vanilla lookup**: find the unmodified game copy to use as merge base
//! - **Merge pipeline**: extract, fold copies together, stage the results
//! - **Packaging**: pack the staging tree and install it as `zzz_ModMerger`
//!
//! # Example
//!
//! ```no_run
//! use kmm_core::{ExternalMergeTool, ManagerOptions, MergeOptions, ModManager};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let tool = Arc::new(ExternalMergeTool::new("Tools/KDiff3/kdiff3.exe"));
//! let manager = ModManager::open(ManagerOptions::new("C:/Games/KingdomComeDeliverance", tool))?;
//!
//! let summary = manager.scan()?;
//! println!("{} mods, {} conflicts", summary.mods, summary.conflicts);
//!
//! let outcome = manager.merge(MergeOptions::default());
//! manager.shutdown()?;
//! println!("merged {} files", outcome?.report.merged.len());
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod conflicts;
pub mod discovery;
pub mod error;
pub mod events;
pub mod layout;
pub mod manager;
pub mod manifest;
pub mod merge_tool;
pub mod mod_config;
pub mod mod_file;
pub mod normalize;
pub mod packager;
pub mod pipeline;
pub mod vanilla;

// Re-export main types
pub use archive::{ArchiveStore, ZipStore};
pub use conflicts::{ConflictSet, PriorityMap, CONFIG_BUCKET};
pub use discovery::{Mod, ModDiscovery, ModStatus};
pub use error::{Error, ErrorKind, Result};
pub use events::{EventBus, EventListener, ManagerEvent};
pub use layout::{DirectoryLayout, LockedAction, LockedDirectoryHandler};
pub use manager::{ManagerOptions, MergeOutcome, ModManager, ModState, ScanSummary};
pub use manifest::ManifestRecord;
pub use merge_tool::{ExternalMergeTool, MergeTool};
pub use mod_file::ModFile;
pub use normalize::{ArchiveFormat, ArchiveNormalizer, RarConverter};
pub use packager::{PackResult, Packager};
pub use pipeline::{MergeJob, MergeOptions, MergeReport, SkippedIdentity};
pub use vanilla::{VanillaPathIndex, VanillaResolver, INDEX_FILE};

/// Version written into generated manifests.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
