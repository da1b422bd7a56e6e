//! ZIP-backed access to game and mod archives.
//!
//! Every operation opens the archive for the duration of the call only. ZIP
//! has no in-place delete, so deleting or replacing an entry rewrites the
//! archive into a temporary file next to it and swaps it in afterwards.

use crate::error::{Error, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use tempfile::NamedTempFile;
use walkdir::WalkDir;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Operations the pipeline needs from an archive container.
///
/// The production implementation is [`ZipStore`]. Tests substitute doubles to
/// observe how often archives are opened.
pub trait ArchiveStore: Send + Sync {
    /// List every file entry (directories excluded) in archive order.
    fn list_entries(&self, archive: &Utf8Path) -> Result<Vec<String>>;

    /// Check whether `entry` exists in `archive`.
    fn contains_entry(&self, archive: &Utf8Path, entry: &str) -> Result<bool> {
        Ok(self.list_entries(archive)?.iter().any(|e| e == entry))
    }

    /// Extract `entry` into `dest`, creating parent directories.
    ///
    /// Fails with [`Error::EntryNotFound`] if the entry is absent.
    fn extract_entry(&self, archive: &Utf8Path, entry: &str, dest: &Utf8Path) -> Result<()>;

    /// Read `entry` into memory.
    fn read_entry(&self, archive: &Utf8Path, entry: &str) -> Result<Vec<u8>>;

    /// Remove `entry` from `archive`. Absent entries are a logged no-op.
    fn delete_entry(&self, archive: &Utf8Path, entry: &str) -> Result<()>;

    /// Write `entry` from `source`, replacing an existing entry of the same
    /// name. Creates the archive if it does not exist.
    fn create_or_replace_entry(
        &self,
        archive: &Utf8Path,
        entry: &str,
        source: &mut dyn Read,
    ) -> Result<()>;
}

/// [`ArchiveStore`] over plain ZIP files on disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipStore;

type ZipReader = ZipArchive<BufReader<File>>;

fn file_options() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(CompressionMethod::Deflated)
}

fn corrupt(archive: &Utf8Path, error: ZipError) -> Error {
    Error::CorruptArchive {
        path: archive.to_owned(),
        reason: error.to_string(),
    }
}

fn ensure_parent(path: &Utf8Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

impl ZipStore {
    fn open(archive: &Utf8Path) -> Result<ZipReader> {
        let file = File::open(archive).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::ArchiveNotFound(archive.to_owned()),
            _ => Error::Io(e),
        })?;
        ZipArchive::new(BufReader::new(file)).map_err(|e| corrupt(archive, e))
    }

    /// Rewrite `archive`, dropping entries matched by `skip` and appending
    /// whatever `append` writes.
    fn rewrite<S, A>(archive: &Utf8Path, skip: S, append: A) -> Result<()>
    where
        S: Fn(&str) -> bool,
        A: FnOnce(&mut ZipWriter<File>) -> Result<()>,
    {
        let dir = match archive.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent,
            _ => Utf8Path::new("."),
        };

        let mut source = Self::open(archive)?;
        let temp = NamedTempFile::new_in(dir)?;
        let mut writer = ZipWriter::new(temp.reopen()?);

        for i in 0..source.len() {
            let file = source.by_index_raw(i).map_err(|e| corrupt(archive, e))?;
            if skip(file.name()) {
                continue;
            }
            writer.raw_copy_file(file).map_err(|e| corrupt(archive, e))?;
        }

        append(&mut writer)?;
        writer.finish().map_err(|e| corrupt(archive, e))?;

        // Release the source handle before replacing the file.
        drop(source);
        temp.persist(archive).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    /// Pack every file below `dir` into a new archive at `archive`.
    ///
    /// Entry names are paths relative to `dir` with `/` separators. Returns
    /// the number of packed files; an empty directory produces no archive.
    pub fn pack_directory(&self, dir: &Utf8Path, archive: &Utf8Path) -> Result<usize> {
        let mut files = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(io::Error::from)?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }

        if files.is_empty() {
            tracing::debug!(dir = %dir, "nothing to pack");
            return Ok(0);
        }

        ensure_parent(archive)?;
        let mut writer = ZipWriter::new(File::create(archive)?);
        let options = file_options();

        for path in &files {
            let relative = path
                .strip_prefix(dir.as_std_path())
                .map_err(|e| Error::Other(e.to_string()))?;
            let name = relative.to_string_lossy().replace('\\', "/");

            writer
                .start_file(name, options)
                .map_err(|e| corrupt(archive, e))?;
            let mut file = File::open(path)?;
            io::copy(&mut file, &mut writer)?;
        }

        writer.finish().map_err(|e| corrupt(archive, e))?;
        tracing::info!(archive = %archive, files = files.len(), "packed archive");
        Ok(files.len())
    }

    /// Merge all entries of `source` into `dest`, overwriting entries with the
    /// same name. If `dest` does not exist it becomes a copy of `source`.
    pub fn merge_archive_into(&self, source: &Utf8Path, dest: &Utf8Path) -> Result<()> {
        if !dest.exists() {
            ensure_parent(dest)?;
            fs::copy(source, dest)?;
            tracing::info!(source = %source, dest = %dest, "installed archive");
            return Ok(());
        }

        let incoming: HashSet<String> = self.list_entries(source)?.into_iter().collect();
        let mut src = Self::open(source)?;

        Self::rewrite(
            dest,
            |name| incoming.contains(name),
            |writer| {
                for i in 0..src.len() {
                    let file = src.by_index_raw(i).map_err(|e| corrupt(source, e))?;
                    writer.raw_copy_file(file).map_err(|e| corrupt(dest, e))?;
                }
                Ok(())
            },
        )?;

        tracing::info!(
            source = %source,
            dest = %dest,
            entries = incoming.len(),
            "merged archive into existing one"
        );
        Ok(())
    }
}

impl ArchiveStore for ZipStore {
    fn list_entries(&self, archive: &Utf8Path) -> Result<Vec<String>> {
        let mut zip = Self::open(archive)?;
        let mut entries = Vec::with_capacity(zip.len());
        for i in 0..zip.len() {
            let file = zip.by_index_raw(i).map_err(|e| corrupt(archive, e))?;
            if !file.is_dir() {
                entries.push(file.name().to_string());
            }
        }
        Ok(entries)
    }

    fn extract_entry(&self, archive: &Utf8Path, entry: &str, dest: &Utf8Path) -> Result<()> {
        let mut zip = Self::open(archive)?;
        let mut file = match zip.by_name(entry) {
            Ok(file) => file,
            Err(ZipError::FileNotFound) => {
                return Err(Error::EntryNotFound {
                    archive: archive.to_owned(),
                    entry: entry.to_string(),
                })
            }
            Err(e) => return Err(corrupt(archive, e)),
        };

        ensure_parent(dest)?;
        let mut out = File::create(dest)?;
        io::copy(&mut file, &mut out)?;
        tracing::trace!(archive = %archive, entry, dest = %dest, "extracted entry");
        Ok(())
    }

    fn read_entry(&self, archive: &Utf8Path, entry: &str) -> Result<Vec<u8>> {
        let mut zip = Self::open(archive)?;
        let mut file = match zip.by_name(entry) {
            Ok(file) => file,
            Err(ZipError::FileNotFound) => {
                return Err(Error::EntryNotFound {
                    archive: archive.to_owned(),
                    entry: entry.to_string(),
                })
            }
            Err(e) => return Err(corrupt(archive, e)),
        };

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    fn delete_entry(&self, archive: &Utf8Path, entry: &str) -> Result<()> {
        if !self.contains_entry(archive, entry)? {
            tracing::info!(archive = %archive, entry, "entry not present, nothing to delete");
            return Ok(());
        }

        Self::rewrite(archive, |name| name == entry, |_| Ok(()))?;
        tracing::debug!(archive = %archive, entry, "deleted entry");
        Ok(())
    }

    fn create_or_replace_entry(
        &self,
        archive: &Utf8Path,
        entry: &str,
        source: &mut dyn Read,
    ) -> Result<()> {
        if !archive.exists() {
            ensure_parent(archive)?;
            let mut writer = ZipWriter::new(File::create(archive)?);
            writer
                .start_file(entry, file_options())
                .map_err(|e| corrupt(archive, e))?;
            io::copy(source, &mut writer)?;
            writer.finish().map_err(|e| corrupt(archive, e))?;
            return Ok(());
        }

        Self::rewrite(
            archive,
            |name| name == entry,
            |writer| {
                writer
                    .start_file(entry, file_options())
                    .map_err(|e| corrupt(archive, e))?;
                io::copy(source, writer)?;
                Ok(())
            },
        )
    }
}

/// Collect every `.pak` file below `dir`, recursively, in a stable order.
pub fn find_archives_recursive(dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>> {
    let mut archives = Vec::new();
    if !dir.exists() {
        return Ok(archives);
    }

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() || !has_archive_extension(&entry.file_name().to_string_lossy())
        {
            continue;
        }
        match Utf8PathBuf::from_path_buf(entry.into_path()) {
            Ok(path) => archives.push(path),
            Err(path) => tracing::warn!("Skipping non UTF-8 archive path: {}", path.display()),
        }
    }
    Ok(archives)
}

/// Whether a file name looks like a game archive (`.pak`).
pub fn has_archive_extension(file_name: &str) -> bool {
    file_name.to_ascii_lowercase().ends_with(".pak")
}
