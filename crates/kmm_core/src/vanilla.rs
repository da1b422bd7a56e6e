//! Locating and extracting the unmodified game version of a file.
//!
//! Localization files are looked up directly in the language archive named
//! by the mod's copy. Data files can live in any of the archives below the
//! game's `Data` folder, so a persisted [`VanillaPathIndex`] remembers which
//! archive holds which entries. Claims from the index are verified on use;
//! when the index has no valid claim the archives are scanned and every
//! archive opened on the way is recorded.

use crate::archive::{find_archives_recursive, ArchiveStore};
use crate::error::{Error, Result};
use crate::layout::DirectoryLayout;
use crate::mod_file::ModFile;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;

pub const INDEX_FILE: &str = "VanillaFiles.json";

/// Archive path -> entries it contains.
///
/// # JSON format
///
/// ```json
/// {
///   "C:/Games/KCD/Data/Tables.pak": ["libs/tables/item/item.xml", "..."]
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VanillaPathIndex {
    archives: BTreeMap<Utf8PathBuf, Vec<String>>,
}

impl VanillaPathIndex {
    /// Load the index from a file.
    ///
    /// Returns `Ok(None)` if the file doesn't exist.
    pub fn load(path: &Utf8Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(path)?;
        let index: Self = serde_json::from_str(&contents)?;
        Ok(Some(index))
    }

    /// Save the index, creating parent directories if needed.
    pub fn save(&self, path: &Utf8Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.archives.is_empty()
    }

    pub fn len(&self) -> usize {
        self.archives.len()
    }

    pub fn contains_archive(&self, archive: &Utf8Path) -> bool {
        self.archives.contains_key(archive)
    }

    /// First archive claiming `logical_path`.
    pub fn lookup(&self, logical_path: &str) -> Option<&Utf8Path> {
        self.archives
            .iter()
            .find(|(_, entries)| entries.iter().any(|e| e == logical_path))
            .map(|(archive, _)| archive.as_path())
    }

    /// Replace the entry list of `archive`.
    pub fn record(&mut self, archive: Utf8PathBuf, entries: Vec<String>) {
        self.archives.insert(archive, entries);
    }

    pub fn forget_archive(&mut self, archive: &Utf8Path) {
        self.archives.remove(archive);
    }
}

/// Finds base-game copies of mod files and extracts them into the scratch tree.
#[derive(Debug)]
pub struct VanillaResolver {
    layout: DirectoryLayout,
    index: VanillaPathIndex,
    index_path: Option<Utf8PathBuf>,
    dirty: bool,
}

impl VanillaResolver {
    pub fn new(layout: DirectoryLayout, index: VanillaPathIndex) -> Self {
        Self {
            layout,
            index,
            index_path: None,
            dirty: false,
        }
    }

    /// Create a resolver backed by the index file at `index_path`. An
    /// unreadable index is discarded and rebuilt on demand.
    pub fn open(layout: DirectoryLayout, index_path: &Utf8Path) -> Self {
        let index = match VanillaPathIndex::load(index_path) {
            Ok(Some(index)) => {
                tracing::info!(archives = index.len(), path = %index_path, "loaded vanilla index");
                index
            }
            Ok(None) => VanillaPathIndex::default(),
            Err(e) => {
                tracing::warn!(path = %index_path, error = %e, "discarding unreadable vanilla index");
                VanillaPathIndex::default()
            }
        };

        Self {
            layout,
            index,
            index_path: Some(index_path.to_owned()),
            dirty: false,
        }
    }

    pub fn index(&self) -> &VanillaPathIndex {
        &self.index
    }

    /// Extract the base-game version of `file`.
    ///
    /// `Ok(None)` means the game does not ship this file, which is normal for
    /// files a mod adds.
    pub fn extract_base(
        &mut self,
        store: &dyn ArchiveStore,
        file: &ModFile,
    ) -> Result<Option<Utf8PathBuf>> {
        let pak = file.is_localization.then_some(file.archive_name.as_str());
        self.extract_base_path(store, &file.logical_path, pak)
    }

    /// Extract the base-game version of `logical_path`, looking in the
    /// language archive `localization_pak` if given.
    pub fn extract_base_path(
        &mut self,
        store: &dyn ArchiveStore,
        logical_path: &str,
        localization_pak: Option<&str>,
    ) -> Result<Option<Utf8PathBuf>> {
        let archive = match localization_pak {
            Some(pak) => {
                let archive = self.layout.game_localization_dir().join(pak);
                if !archive.exists() {
                    tracing::debug!(archive = %archive, "no vanilla localization archive");
                    return Ok(None);
                }
                archive
            }
            None => match self.locate_data(store, logical_path)? {
                Some(archive) => archive,
                None => {
                    tracing::debug!(path = logical_path, "no vanilla copy");
                    return Ok(None);
                }
            },
        };

        let dest = self.layout.vanilla_path_for(logical_path, localization_pak)?;
        match store.extract_entry(&archive, logical_path, &dest) {
            Ok(()) => Ok(Some(dest)),
            Err(Error::EntryNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Find the data archive containing `logical_path`.
    fn locate_data(
        &mut self,
        store: &dyn ArchiveStore,
        logical_path: &str,
    ) -> Result<Option<Utf8PathBuf>> {
        let mut invalidated = false;

        if let Some(claimed) = self.index.lookup(logical_path).map(Utf8Path::to_owned) {
            if !claimed.exists() {
                tracing::debug!(archive = %claimed, "indexed archive is gone");
                self.index.forget_archive(&claimed);
                self.dirty = true;
                invalidated = true;
            } else {
                match store.contains_entry(&claimed, logical_path) {
                    Ok(true) => return Ok(Some(claimed)),
                    Ok(false) => {
                        tracing::debug!(archive = %claimed, path = logical_path, "stale index entry");
                        self.index.forget_archive(&claimed);
                        self.dirty = true;
                        invalidated = true;
                    }
                    Err(e) => {
                        tracing::warn!(archive = %claimed, error = %e, "indexed archive unreadable");
                        self.index.forget_archive(&claimed);
                        self.dirty = true;
                        invalidated = true;
                    }
                }
            }
        }

        let found = self.scan_for(store, logical_path, invalidated)?;
        if self.dirty {
            if let Err(e) = self.flush() {
                tracing::warn!(error = %e, "failed to save vanilla index");
            }
        }
        Ok(found)
    }

    /// Scan data archives for `logical_path`, recording each archive opened.
    ///
    /// Archives already in the index are trusted not to contain the path
    /// unless an invalidation showed the index to be out of date.
    fn scan_for(
        &mut self,
        store: &dyn ArchiveStore,
        logical_path: &str,
        rescan_all: bool,
    ) -> Result<Option<Utf8PathBuf>> {
        let archives = find_archives_recursive(&self.layout.game_data_dir())?;
        tracing::debug!(
            path = logical_path,
            archives = archives.len(),
            rescan_all,
            "scanning vanilla archives"
        );

        for archive in archives {
            if !rescan_all && self.index.contains_archive(&archive) {
                continue;
            }

            match store.list_entries(&archive) {
                Ok(entries) => {
                    let hit = entries.iter().any(|e| e == logical_path);
                    self.index.record(archive.clone(), entries);
                    self.dirty = true;
                    if hit {
                        return Ok(Some(archive));
                    }
                }
                Err(e) => {
                    tracing::warn!(archive = %archive, error = %e, "skipping unreadable vanilla archive");
                }
            }
        }

        Ok(None)
    }

    /// Write the index if it changed since the last flush.
    pub fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(path) = &self.index_path {
            self.index.save(path)?;
            tracing::debug!(path = %path, archives = self.index.len(), "saved vanilla index");
        }
        self.dirty = false;
        Ok(())
    }
}
