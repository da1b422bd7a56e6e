//! Finding installed mods and enumerating the mergeable files they ship.

use crate::archive::{has_archive_extension, ArchiveStore};
use crate::error::{Error, Result};
use crate::layout::{DirectoryLayout, DATA_DIR, LOCALIZATION_DIR, MERGED_MOD_NAME};
use crate::manifest::{ManifestRecord, MANIFEST_EXTENSION, MANIFEST_FILE};
use crate::mod_config::read_config_keys;
use crate::mod_file::ModFile;
use crate::normalize::ArchiveNormalizer;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;

/// Entry extensions that are binary assets and cannot be merged as text.
pub const DISALLOWED_EXTENSIONS: &[&str] = &[
    ".tbl", ".skin", ".dds", ".cgf", ".cdf", ".chr", ".usm", ".sqcb", ".1", ".2", ".3", ".4", ".5",
];

/// Suffix added to a migrated legacy mod whose name is already taken.
pub const LEGACY_CLASH_SUFFIX: &str = "_extracted";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModStatus {
    Enabled,
    Disabled,
}

/// One installed mod folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mod {
    /// Folder name; the mod's identity.
    pub name: String,
    pub dir: Utf8PathBuf,
    pub status: ModStatus,
    pub manifest: ManifestRecord,
    /// Archives one level below the mod folder, sorted.
    pub archives: Vec<Utf8PathBuf>,
    /// Mergeable entries of all archives. Empty while disabled.
    pub files: Vec<ModFile>,
    /// Keys set by the mod's `mod.cfg`.
    pub config_keys: BTreeSet<String>,
}

impl Mod {
    pub fn display_name(&self) -> &str {
        &self.manifest.display_name
    }

    pub fn is_enabled(&self) -> bool {
        self.status == ModStatus::Enabled
    }
}

/// Whether an archive entry can take part in merging.
pub fn is_mergeable_entry(name: &str) -> bool {
    let file_name = name.rsplit('/').next().unwrap_or(name);
    if !file_name.contains('.') {
        return false;
    }
    let lower = name.to_ascii_lowercase();
    !DISALLOWED_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

fn subdirectories(dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>> {
    let mut dirs = Vec::new();
    for entry in dir.read_dir_utf8()? {
        match entry {
            Ok(entry) if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) => {
                dirs.push(entry.path().to_owned());
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(dir = %dir, error = %e, "skipping unreadable entry"),
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn files_in(dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>> {
    let mut files = Vec::new();
    for entry in dir.read_dir_utf8()? {
        match entry {
            Ok(entry) if entry.file_type().map(|t| t.is_file()).unwrap_or(false) => {
                files.push(entry.path().to_owned());
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(dir = %dir, error = %e, "skipping unreadable entry"),
        }
    }
    files.sort();
    Ok(files)
}

/// A folder is a mod if it directly contains a manifest or an archive.
pub fn is_mod_folder(dir: &Utf8Path) -> Result<bool> {
    Ok(files_in(dir)?.iter().any(|file| {
        let name = file.file_name().unwrap_or_default().to_ascii_lowercase();
        name.ends_with(MANIFEST_EXTENSION) || has_archive_extension(&name)
    }))
}

/// Archives directly inside the first-level subdirectories of a mod folder
/// (`Data/x.pak`, `Localization/english_xml.pak`).
pub fn find_mod_archives(mod_dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>> {
    let mut archives = Vec::new();
    for sub in subdirectories(mod_dir)? {
        for file in files_in(&sub)? {
            if has_archive_extension(file.file_name().unwrap_or_default()) {
                archives.push(file);
            }
        }
    }
    Ok(archives)
}

fn is_localization_archive(archive: &Utf8Path) -> bool {
    archive
        .parent()
        .and_then(Utf8Path::file_name)
        .map(|name| name.eq_ignore_ascii_case(LOCALIZATION_DIR))
        .unwrap_or(false)
}

/// Scans mod folders.
pub struct ModDiscovery<'a> {
    store: &'a dyn ArchiveStore,
    normalizer: &'a ArchiveNormalizer,
}

impl<'a> ModDiscovery<'a> {
    pub fn new(store: &'a dyn ArchiveStore, normalizer: &'a ArchiveNormalizer) -> Self {
        Self { store, normalizer }
    }

    /// Discover every mod under `mods_dir` (enabled) and `disabled_dir`
    /// (disabled), sorted by folder name.
    ///
    /// Folders without a manifest or archive are ignored, and so is the merge
    /// output folder. A mod that fails to load is logged and left out.
    pub fn scan(&self, mods_dir: &Utf8Path, disabled_dir: &Utf8Path) -> Result<Vec<Mod>> {
        let mut mods = Vec::new();

        for (dir, status) in [
            (mods_dir, ModStatus::Enabled),
            (disabled_dir, ModStatus::Disabled),
        ] {
            if !dir.is_dir() {
                tracing::debug!(dir = %dir, "mod directory missing, skipping");
                continue;
            }

            for folder in subdirectories(dir)? {
                if folder.file_name() == Some(MERGED_MOD_NAME) {
                    continue;
                }
                match is_mod_folder(&folder) {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::debug!(folder = %folder, "not a mod folder");
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!(folder = %folder, error = %e, "cannot read folder");
                        continue;
                    }
                }

                match self.load_mod(&folder, status) {
                    Ok(m) => mods.push(m),
                    Err(e) => tracing::warn!(folder = %folder, error = %e, "failed to load mod"),
                }
            }
        }

        mods.sort_by(|a, b| a.name.cmp(&b.name));
        tracing::info!(count = mods.len(), "discovered mods");
        Ok(mods)
    }

    /// Build the record for one mod folder.
    pub fn load_mod(&self, dir: &Utf8Path, status: ModStatus) -> Result<Mod> {
        let name = dir
            .file_name()
            .ok_or_else(|| Error::Other(format!("mod folder has no name: {dir}")))?
            .to_string();

        let manifest = ManifestRecord::read(&dir.join(MANIFEST_FILE), &name)?;
        let config_keys = read_config_keys(dir)?.unwrap_or_default();
        let archives = find_mod_archives(dir)?;
        let files = match status {
            ModStatus::Enabled => self.enumerate_files(&name, &archives),
            ModStatus::Disabled => Vec::new(),
        };

        tracing::debug!(
            mod_name = %name,
            archives = archives.len(),
            files = files.len(),
            "loaded mod"
        );

        Ok(Mod {
            name,
            dir: dir.to_owned(),
            status,
            manifest,
            archives,
            files,
            config_keys,
        })
    }

    /// List the mergeable entries of every archive. Unreadable archives are
    /// logged and skipped.
    pub fn enumerate_files(&self, mod_name: &str, archives: &[Utf8PathBuf]) -> Vec<ModFile> {
        let mut files = Vec::new();

        for archive in archives {
            if let Err(e) = self.normalizer.normalize(archive) {
                tracing::warn!(archive = %archive, error = %e, "skipping archive");
                continue;
            }

            let entries = match self.store.list_entries(archive) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(archive = %archive, error = %e, "skipping unreadable archive");
                    continue;
                }
            };

            let is_localization = is_localization_archive(archive);
            files.extend(
                entries
                    .into_iter()
                    .filter(|entry| is_mergeable_entry(entry))
                    .map(|entry| ModFile::new(mod_name, entry, archive, is_localization)),
            );
        }

        files
    }
}

/// Mod name for a legacy `zzz*.pak` archive dropped into the game's `Data`.
pub fn legacy_mod_name(file_name: &str) -> String {
    let lower = file_name.to_ascii_lowercase();
    let mut name = file_name;
    if lower.ends_with(".pak") {
        name = &name[..name.len() - 4];
    }
    let lower = name.to_ascii_lowercase();
    if lower.starts_with("zzz_") {
        name = &name[4..];
    } else if lower.starts_with("zzz") {
        name = &name[3..];
    }

    if name.is_empty() {
        file_name.to_string()
    } else {
        name.to_string()
    }
}

/// Move `zzz*.pak` archives from the game's `Data` folder into mod folders of
/// their own, each with a generated manifest.
///
/// The source archive is removed only after its copy exists. Returns the
/// names of the created mods.
pub fn migrate_legacy_archives(layout: &DirectoryLayout, version: &str) -> Result<Vec<String>> {
    let data_dir = layout.game_data_dir();
    if !data_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut migrated = Vec::new();
    for archive in files_in(&data_dir)? {
        let file_name = archive.file_name().unwrap_or_default().to_string();
        let lower = file_name.to_ascii_lowercase();
        if !lower.starts_with("zzz") || !lower.ends_with(".pak") {
            continue;
        }

        let name = legacy_mod_name(&file_name);
        let mut target = layout.mods_dir().join(&name);
        if target.exists() {
            target = layout.mods_dir().join(format!("{name}{LEGACY_CLASH_SUFFIX}"));
        }
        if target.exists() {
            tracing::warn!(archive = %archive, target = %target, "legacy mod folder taken, skipping");
            continue;
        }

        let mod_name = target.file_name().unwrap_or(&name).to_string();
        fs::create_dir_all(target.join(DATA_DIR))?;
        fs::create_dir_all(target.join(LOCALIZATION_DIR))?;
        ManifestRecord::legacy(&mod_name, version).write(&target.join(MANIFEST_FILE))?;

        let copy = target.join(DATA_DIR).join(&file_name);
        fs::copy(&archive, &copy)?;
        if copy.exists() {
            fs::remove_file(&archive)?;
        }

        tracing::info!(archive = %archive, mod_name = %mod_name, "migrated legacy archive");
        migrated.push(mod_name);
    }

    Ok(migrated)
}
