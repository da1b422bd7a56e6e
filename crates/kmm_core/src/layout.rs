//! On-disk directory layout of the game install and the merger's scratch tree.
//!
//! ```text
//! <game>/
//!   Data/                      vanilla data archives
//!   Localization/              vanilla language archives
//!   Mods/<mod>/...             enabled mods
//!   Mods/zzz_ModMerger/        installed merge result
//!   Disabled_Mods/<mod>/...    quarantined mods
//!   ModMerger/                 scratch tree, owned by the pipeline
//!     TempFiles/Vanilla/{Data,Localization}
//!     TempFiles/<mod>/{Data,Localization/<pak>}/...
//!     TempFiles/Steps/...      merge tool input snapshots
//!     MergedFiles/{Data,Localization/<pak>}
//!     MergedFiles/Merged/      packed archives before install
//! ```

use crate::error::{Error, Result};
use crate::mod_file::ModFile;
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::Disks;
use walkdir::WalkDir;

pub const MODS_DIR: &str = "Mods";
pub const DISABLED_MODS_DIR: &str = "Disabled_Mods";
pub const DATA_DIR: &str = "Data";
pub const LOCALIZATION_DIR: &str = "Localization";
pub const SCRATCH_DIR: &str = "ModMerger";
pub const TEMP_DIR: &str = "TempFiles";
pub const VANILLA_DIR: &str = "Vanilla";
pub const STEPS_DIR: &str = "Steps";
pub const MERGED_DIR: &str = "MergedFiles";
pub const PACKED_DIR: &str = "Merged";
pub const MERGED_MOD_NAME: &str = "zzz_ModMerger";

/// Free space below this many bytes triggers a warning.
pub const LOW_DISK_SPACE: u64 = 100 * 1024 * 1024;

/// Default wait before retrying a locked directory.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Retries offered for a locked directory before giving up.
pub const MAX_REMOVE_RETRIES: u32 = 2;

/// What to do about a directory that could not be removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockedAction {
    Retry,
    Abort,
}

/// Asked when a directory cannot be removed, usually because another program
/// holds a file in it open.
pub trait LockedDirectoryHandler: Send + Sync {
    fn on_locked(&self, path: &Utf8Path, error: &io::Error, attempt: u32) -> LockedAction;
}

/// Handler that never retries.
#[derive(Debug, Default, Clone, Copy)]
pub struct AbortOnLocked;

impl LockedDirectoryHandler for AbortOnLocked {
    fn on_locked(&self, _path: &Utf8Path, _error: &io::Error, _attempt: u32) -> LockedAction {
        LockedAction::Abort
    }
}

/// Check that `root` looks like a game install.
pub fn validate_game_root(root: &Utf8Path) -> Result<()> {
    for dir in [MODS_DIR, DATA_DIR, LOCALIZATION_DIR] {
        if !root.join(dir).is_dir() {
            return Err(Error::InvalidGameDir(format!(
                "{root} has no {dir} directory"
            )));
        }
    }
    Ok(())
}

/// Paths derived from the game root plus the policy for removing them.
#[derive(Clone)]
pub struct DirectoryLayout {
    root: Utf8PathBuf,
    locked_handler: Arc<dyn LockedDirectoryHandler>,
    retry_delay: Duration,
}

impl std::fmt::Debug for DirectoryLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryLayout")
            .field("root", &self.root)
            .field("retry_delay", &self.retry_delay)
            .finish()
    }
}

impl DirectoryLayout {
    /// Create the layout description without touching the disk.
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            locked_handler: Arc::new(AbortOnLocked),
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_locked_handler(mut self, handler: Arc<dyn LockedDirectoryHandler>) -> Self {
        self.locked_handler = handler;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Wipe any previous scratch tree and recreate the fixed subtree.
    ///
    /// Destructive: whatever a previous run left in the scratch tree is lost.
    pub fn initialize(&self) -> Result<()> {
        self.remove_dir(&self.scratch_dir())?;

        for dir in [
            self.vanilla_dir().join(DATA_DIR),
            self.vanilla_dir().join(LOCALIZATION_DIR),
            self.staging_data_dir(),
            self.staging_localization_dir(),
            self.disabled_mods_dir(),
        ] {
            fs::create_dir_all(&dir)?;
        }

        self.log_free_space();
        tracing::info!(scratch = %self.scratch_dir(), "initialized scratch tree");
        Ok(())
    }

    /// Clear the staging tree so a new merge starts empty.
    pub fn reset_staging(&self) -> Result<()> {
        self.remove_dir(&self.merged_dir())?;
        self.remove_dir(&self.steps_dir())?;
        fs::create_dir_all(self.staging_data_dir())?;
        fs::create_dir_all(self.staging_localization_dir())?;
        Ok(())
    }

    /// Delete the whole scratch tree.
    pub fn teardown(&self) -> Result<()> {
        self.remove_dir(&self.scratch_dir())?;
        tracing::info!(scratch = %self.scratch_dir(), "removed scratch tree");
        Ok(())
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn mods_dir(&self) -> Utf8PathBuf {
        self.root.join(MODS_DIR)
    }

    pub fn disabled_mods_dir(&self) -> Utf8PathBuf {
        self.root.join(DISABLED_MODS_DIR)
    }

    pub fn game_data_dir(&self) -> Utf8PathBuf {
        self.root.join(DATA_DIR)
    }

    pub fn game_localization_dir(&self) -> Utf8PathBuf {
        self.root.join(LOCALIZATION_DIR)
    }

    pub fn merged_mod_dir(&self) -> Utf8PathBuf {
        self.mods_dir().join(MERGED_MOD_NAME)
    }

    pub fn scratch_dir(&self) -> Utf8PathBuf {
        self.root.join(SCRATCH_DIR)
    }

    pub fn temp_dir(&self) -> Utf8PathBuf {
        self.scratch_dir().join(TEMP_DIR)
    }

    pub fn vanilla_dir(&self) -> Utf8PathBuf {
        self.temp_dir().join(VANILLA_DIR)
    }

    pub fn steps_dir(&self) -> Utf8PathBuf {
        self.temp_dir().join(STEPS_DIR)
    }

    pub fn merged_dir(&self) -> Utf8PathBuf {
        self.scratch_dir().join(MERGED_DIR)
    }

    pub fn staging_data_dir(&self) -> Utf8PathBuf {
        self.merged_dir().join(DATA_DIR)
    }

    pub fn staging_localization_dir(&self) -> Utf8PathBuf {
        self.merged_dir().join(LOCALIZATION_DIR)
    }

    pub fn packed_dir(&self) -> Utf8PathBuf {
        self.merged_dir().join(PACKED_DIR)
    }

    /// Scratch directory a mod file is extracted into.
    ///
    /// `TempFiles/<mod>/Data/<sub dirs>` for data files and
    /// `TempFiles/<mod>/Localization/<pak>/<sub dirs>` for localization files.
    /// Created if missing.
    pub fn dir_for(&self, file: &ModFile) -> Result<Utf8PathBuf> {
        let mut dir = self.temp_dir().join(&file.mod_name);
        if file.is_localization {
            dir.push(LOCALIZATION_DIR);
            dir.push(file.archive_stem());
        } else {
            dir.push(DATA_DIR);
        }
        for segment in parent_segments(&file.logical_path) {
            dir.push(segment);
        }

        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Full scratch path a mod file is extracted to.
    pub fn path_for(&self, file: &ModFile) -> Result<Utf8PathBuf> {
        Ok(self.dir_for(file)?.join(file.file_name()))
    }

    /// Scratch path for the vanilla copy of a file.
    pub fn vanilla_path_for(
        &self,
        logical_path: &str,
        localization_pak: Option<&str>,
    ) -> Result<Utf8PathBuf> {
        let mut path = self.vanilla_dir();
        match localization_pak {
            Some(pak) => {
                path.push(LOCALIZATION_DIR);
                path.push(archive_stem(pak));
            }
            None => path.push(DATA_DIR),
        }
        for segment in logical_path.split('/').filter(|s| !s.is_empty()) {
            path.push(segment);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(path)
    }

    /// Staging path the merge result for a file's identity accumulates at.
    ///
    /// Data files mirror their full entry path under `MergedFiles/Data`.
    /// Localization archives are flat, so their entries land directly in
    /// `MergedFiles/Localization/<pak>/<file name>`.
    pub fn staging_path_for(&self, file: &ModFile) -> Result<Utf8PathBuf> {
        let path = if file.is_localization {
            self.staging_localization_dir()
                .join(file.archive_stem())
                .join(file.file_name())
        } else {
            let mut path = self.staging_data_dir();
            for segment in file.logical_path.split('/').filter(|s| !s.is_empty()) {
                path.push(segment);
            }
            path
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(path)
    }

    /// Path of a merge tool input snapshot.
    pub fn step_path(&self, job: usize, step: usize, file_name: &str) -> Result<Utf8PathBuf> {
        let dir = self
            .steps_dir()
            .join(job.to_string())
            .join(step.to_string());
        fs::create_dir_all(&dir)?;
        Ok(dir.join(file_name))
    }

    /// `path` relative to the scratch root with `/` separators, for display in
    /// manifests. Paths outside the scratch tree are returned unchanged.
    pub fn display_path(&self, path: &Utf8Path) -> String {
        match path.strip_prefix(self.scratch_dir()) {
            Ok(relative) => relative.as_str().replace('\\', "/"),
            Err(_) => path.as_str().replace('\\', "/"),
        }
    }

    /// Remove a directory tree, asking the locked-directory handler whether
    /// to retry when removal fails. A missing directory is fine.
    pub fn remove_dir(&self, path: &Utf8Path) -> Result<()> {
        let mut attempt = 0;
        loop {
            match fs::remove_dir_all(path) {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
                Err(e) => {
                    attempt += 1;
                    if attempt > MAX_REMOVE_RETRIES {
                        tracing::warn!(path = %path, error = %e, "giving up on locked directory");
                        return Err(Error::DirectoryLocked(path.to_owned()));
                    }

                    match self.locked_handler.on_locked(path, &e, attempt) {
                        LockedAction::Retry => {
                            tracing::warn!(
                                path = %path,
                                error = %e,
                                attempt,
                                "directory locked, retrying after {:?}",
                                self.retry_delay
                            );
                            std::thread::sleep(self.retry_delay);
                        }
                        LockedAction::Abort => {
                            tracing::warn!(path = %path, error = %e, "directory locked, aborted");
                            return Err(Error::DirectoryLocked(path.to_owned()));
                        }
                    }
                }
            }
        }
    }

    /// Move a directory, falling back to copy-then-delete across devices.
    pub fn move_dir(&self, from: &Utf8Path, to: &Utf8Path) -> Result<()> {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        match fs::rename(from, to) {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::debug!(from = %from, to = %to, error = %e, "rename failed, copying");
                copy_dir_all(from, to)?;
                self.remove_dir(from)
            }
        }
    }

    /// Log the free space on the disk holding the game root.
    pub fn log_free_space(&self) -> Option<u64> {
        let disks = Disks::new_with_refreshed_list();
        let root = self.root.as_std_path();
        let disk = disks
            .iter()
            .filter(|d| root.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len())?;

        let available = disk.available_space();
        if available < LOW_DISK_SPACE {
            tracing::warn!(
                available_mb = available / (1024 * 1024),
                "less than 100 MB free on the game drive, merging may fail"
            );
        } else {
            tracing::info!(available_mb = available / (1024 * 1024), "free space on game drive");
        }
        Some(available)
    }
}

/// Recursively copy `from` into `to`.
pub fn copy_dir_all(from: &Utf8Path, to: &Utf8Path) -> Result<()> {
    for entry in WalkDir::new(from) {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(from.as_std_path())
            .map_err(|e| Error::Other(e.to_string()))?;
        let target = to.as_std_path().join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn parent_segments(logical_path: &str) -> impl Iterator<Item = &str> {
    let parent = match logical_path.rfind('/') {
        Some(i) => &logical_path[..i],
        None => "",
    };
    parent.split('/').filter(|s| !s.is_empty())
}

fn archive_stem(name: &str) -> &str {
    match name.rfind('.') {
        Some(i) if i > 0 => &name[..i],
        _ => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::tempdir;

    fn layout(dir: &tempfile::TempDir) -> DirectoryLayout {
        DirectoryLayout::new(Utf8Path::from_path(dir.path()).unwrap())
            .with_retry_delay(Duration::from_millis(1))
    }

    #[test]
    fn test_initialize_creates_tree_and_wipes_old_state() {
        let dir = tempdir().unwrap();
        let layout = layout(&dir);
        fs::create_dir_all(layout.temp_dir().join("OldMod")).unwrap();
        fs::write(layout.temp_dir().join("OldMod/stale.xml"), b"x").unwrap();

        layout.initialize().unwrap();

        assert!(!layout.temp_dir().join("OldMod").exists());
        assert!(layout.vanilla_dir().join("Data").is_dir());
        assert!(layout.vanilla_dir().join("Localization").is_dir());
        assert!(layout.staging_data_dir().is_dir());
        assert!(layout.staging_localization_dir().is_dir());
        assert!(layout.disabled_mods_dir().is_dir());
    }

    #[test]
    fn test_dir_for_data_and_localization() {
        let dir = tempdir().unwrap();
        let layout = layout(&dir);

        let data = ModFile::new(
            "ModA",
            "libs/tables/item.xml",
            Utf8Path::new("Mods/ModA/Data/data.pak"),
            false,
        );
        let data_dir = layout.dir_for(&data).unwrap();
        assert_eq!(data_dir, layout.temp_dir().join("ModA/Data/libs/tables"));
        assert!(data_dir.is_dir());
        assert_eq!(
            layout.path_for(&data).unwrap(),
            layout.temp_dir().join("ModA/Data/libs/tables/item.xml")
        );

        let loc = ModFile::new(
            "ModA",
            "text_ui_menus.xml",
            Utf8Path::new("Mods/ModA/Localization/english_xml.pak"),
            true,
        );
        assert_eq!(
            layout.dir_for(&loc).unwrap(),
            layout.temp_dir().join("ModA/Localization/english_xml")
        );

        // Idempotent.
        assert_eq!(layout.dir_for(&data).unwrap(), data_dir);
    }

    #[test]
    fn test_staging_path_flattens_localization() {
        let dir = tempdir().unwrap();
        let layout = layout(&dir);

        let loc = ModFile::new(
            "ModA",
            "text/greeting.xml",
            Utf8Path::new("Mods/ModA/Localization/english_xml.pak"),
            true,
        );
        assert_eq!(
            layout.staging_path_for(&loc).unwrap(),
            layout.staging_localization_dir().join("english_xml/greeting.xml")
        );

        let data = ModFile::new(
            "ModA",
            "libs/table.xml",
            Utf8Path::new("Mods/ModA/Data/data.pak"),
            false,
        );
        assert_eq!(
            layout.staging_path_for(&data).unwrap(),
            layout.staging_data_dir().join("libs/table.xml")
        );
    }

    #[test]
    fn test_display_path_is_relative_with_forward_slashes() {
        let dir = tempdir().unwrap();
        let layout = layout(&dir);
        let path = layout.staging_data_dir().join("libs").join("table.xml");
        assert_eq!(layout.display_path(&path), "MergedFiles/Data/libs/table.xml");
    }

    #[test]
    fn test_validate_game_root() {
        let dir = tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        assert!(matches!(
            validate_game_root(root),
            Err(Error::InvalidGameDir(_))
        ));

        for d in [MODS_DIR, DATA_DIR, LOCALIZATION_DIR] {
            fs::create_dir_all(root.join(d)).unwrap();
        }
        validate_game_root(root).unwrap();
    }

    #[test]
    fn test_move_dir_and_copy() {
        let dir = tempdir().unwrap();
        let layout = layout(&dir);
        let from = layout.mods_dir().join("ModA");
        fs::create_dir_all(from.join("Data")).unwrap();
        fs::write(from.join("Data/file.txt"), b"content").unwrap();

        let to = layout.disabled_mods_dir().join("ModA");
        layout.move_dir(&from, &to).unwrap();

        assert!(!from.exists());
        assert_eq!(fs::read(to.join("Data/file.txt")).unwrap(), b"content");

        let copy = layout.root().join("copy");
        copy_dir_all(&to, &copy).unwrap();
        assert_eq!(fs::read(copy.join("Data/file.txt")).unwrap(), b"content");
    }

    struct Counting(AtomicU32);

    impl LockedDirectoryHandler for Counting {
        fn on_locked(&self, _: &Utf8Path, _: &io::Error, _: u32) -> LockedAction {
            self.0.fetch_add(1, Ordering::SeqCst);
            LockedAction::Retry
        }
    }

    #[test]
    fn test_remove_dir_gives_up_after_retries() {
        let dir = tempdir().unwrap();
        let handler = Arc::new(Counting(AtomicU32::new(0)));
        let layout = layout(&dir).with_locked_handler(handler.clone());

        // A regular file cannot be removed with remove_dir_all.
        let file = layout.root().join("not_a_dir");
        fs::write(&file, b"x").unwrap();

        let err = layout.remove_dir(&file).unwrap_err();
        assert!(matches!(err, Error::DirectoryLocked(_)));
        assert_eq!(handler.0.load(Ordering::SeqCst), MAX_REMOVE_RETRIES);
    }

    #[test]
    fn test_remove_missing_dir_is_ok() {
        let dir = tempdir().unwrap();
        let layout = layout(&dir);
        layout.remove_dir(&layout.root().join("missing")).unwrap();
    }
}
