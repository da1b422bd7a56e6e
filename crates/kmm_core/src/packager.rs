//! Packing the staging tree into game archives and installing them as the
//! merged mod.

use crate::archive::ZipStore;
use crate::error::Result;
use crate::layout::{DirectoryLayout, DATA_DIR, LOCALIZATION_DIR};
use crate::manifest::{ManifestRecord, MANIFEST_FILE, MERGED_MOD_DISPLAY_NAME};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;

/// Name of the packed data archive.
pub const DATA_ARCHIVE: &str = "data.pak";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackResult {
    /// Archives written to the packed output folder.
    pub packed: Vec<Utf8PathBuf>,
    /// Archives in the installed merged mod.
    pub installed: Vec<Utf8PathBuf>,
    pub manifest: Utf8PathBuf,
}

pub struct Packager<'a> {
    layout: &'a DirectoryLayout,
    store: ZipStore,
    version: &'a str,
}

impl<'a> Packager<'a> {
    pub fn new(layout: &'a DirectoryLayout, version: &'a str) -> Self {
        Self {
            layout,
            store: ZipStore,
            version,
        }
    }

    /// Pack `MergedFiles/Data` into `Merged/Data/data.pak` and every
    /// `MergedFiles/Localization/<lang>` into `Merged/Localization/<lang>.pak`.
    /// Empty subtrees produce no archive.
    pub fn pack(&self) -> Result<Vec<Utf8PathBuf>> {
        let packed_dir = self.layout.packed_dir();
        let mut packed = Vec::new();

        let data_archive = packed_dir.join(DATA_DIR).join(DATA_ARCHIVE);
        if self.layout.staging_data_dir().is_dir()
            && self
                .store
                .pack_directory(&self.layout.staging_data_dir(), &data_archive)?
                > 0
        {
            packed.push(data_archive);
        }

        let localization = self.layout.staging_localization_dir();
        if localization.is_dir() {
            let mut languages: Vec<Utf8PathBuf> = Vec::new();
            for entry in localization.read_dir_utf8()? {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    languages.push(entry.path().to_owned());
                }
            }
            languages.sort();

            for language in languages {
                let Some(name) = language.file_name() else {
                    continue;
                };
                let archive = packed_dir
                    .join(LOCALIZATION_DIR)
                    .join(format!("{name}.pak"));
                if self.store.pack_directory(&language, &archive)? > 0 {
                    packed.push(archive);
                }
            }
        }

        Ok(packed)
    }

    /// Install packed archives into the merged mod folder, merging into
    /// archives a previous run left there, and write its manifest.
    ///
    /// `merged_files` is combined with the list of an existing manifest.
    pub fn install(&self, packed: &[Utf8PathBuf], merged_files: &[String]) -> Result<PackResult> {
        let packed_dir = self.layout.packed_dir();
        let mod_dir = self.layout.merged_mod_dir();
        let mut installed = Vec::with_capacity(packed.len());

        for archive in packed {
            let relative = archive
                .strip_prefix(&packed_dir)
                .unwrap_or_else(|_| Utf8Path::new(archive.file_name().unwrap_or_default()));
            let dest = mod_dir.join(relative);
            self.store.merge_archive_into(archive, &dest)?;
            installed.push(dest);
        }

        let manifest_path = mod_dir.join(MANIFEST_FILE);
        let previous = ManifestRecord::read(&manifest_path, MERGED_MOD_DISPLAY_NAME)?;
        let mut files = previous.merged_files;
        for file in merged_files {
            if !files.contains(file) {
                files.push(file.clone());
            }
        }

        let manifest = ManifestRecord::merged_output(self.version, files);
        manifest.write(&packed_dir.join(MANIFEST_FILE))?;
        fs::create_dir_all(&mod_dir)?;
        manifest.write(&manifest_path)?;

        tracing::info!(
            mod_dir = %mod_dir,
            archives = installed.len(),
            "installed merged mod"
        );

        Ok(PackResult {
            packed: packed.to_vec(),
            installed,
            manifest: manifest_path,
        })
    }

    pub fn pack_and_install(&self, merged_files: &[String]) -> Result<PackResult> {
        let packed = self.pack()?;
        self.install(&packed, merged_files)
    }
}
