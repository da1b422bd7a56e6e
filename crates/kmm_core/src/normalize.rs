//! Pre-ingestion archive normalization.
//!
//! Some older mods ship RAR archives renamed to `.pak`. Before such an archive
//! is enumerated it is sniffed, and converted to ZIP if a [`RarConverter`] has
//! been provided. Without a converter the archive is reported and skipped.

use crate::error::{Error, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs::{self, File};
use std::io::Read;

/// Converted archives at or below this size are treated as failed conversions.
pub const MIN_CONVERTED_SIZE: u64 = 30;

const HEADER_LEN: u64 = 5;

/// Container format of an archive file, as far as the header tells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Rar,
    Unknown,
}

/// Decides the container format of an archive file.
pub trait FormatDetector: Send + Sync {
    fn detect(&self, archive: &Utf8Path) -> Result<ArchiveFormat>;
}

/// Looks at the first bytes of the file.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeaderSniffer;

impl HeaderSniffer {
    pub fn classify(header: &[u8]) -> ArchiveFormat {
        let text = String::from_utf8_lossy(header)
            .replace(' ', "")
            .to_lowercase();

        if text.contains("rar") {
            ArchiveFormat::Rar
        } else if header.starts_with(b"PK") {
            ArchiveFormat::Zip
        } else {
            ArchiveFormat::Unknown
        }
    }
}

impl FormatDetector for HeaderSniffer {
    fn detect(&self, archive: &Utf8Path) -> Result<ArchiveFormat> {
        let mut header = Vec::with_capacity(HEADER_LEN as usize);
        File::open(archive)?
            .take(HEADER_LEN)
            .read_to_end(&mut header)?;
        Ok(Self::classify(&header))
    }
}

/// Converts a RAR archive into a ZIP archive at `dest`.
pub trait RarConverter: Send + Sync {
    fn convert(&self, source: &Utf8Path, dest: &Utf8Path) -> Result<()>;
}

/// Runs format detection and optional conversion before an archive is read.
pub struct ArchiveNormalizer {
    detector: Box<dyn FormatDetector>,
    converter: Option<Box<dyn RarConverter>>,
}

impl Default for ArchiveNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveNormalizer {
    pub fn new() -> Self {
        Self {
            detector: Box::new(HeaderSniffer),
            converter: None,
        }
    }

    pub fn with_detector(mut self, detector: impl FormatDetector + 'static) -> Self {
        self.detector = Box::new(detector);
        self
    }

    pub fn with_converter(mut self, converter: impl RarConverter + 'static) -> Self {
        self.converter = Some(Box::new(converter));
        self
    }

    /// Make sure `archive` can be read as ZIP.
    ///
    /// A RAR archive is converted in place: the converted file takes the
    /// archive's name and the original is kept as `<name>.backup`.
    pub fn normalize(&self, archive: &Utf8Path) -> Result<ArchiveFormat> {
        let format = self.detector.detect(archive)?;
        if format != ArchiveFormat::Rar {
            return Ok(format);
        }

        let Some(converter) = &self.converter else {
            return Err(Error::UnsupportedArchiveFormat {
                path: archive.to_owned(),
                format: "RAR".to_string(),
            });
        };

        tracing::info!(archive = %archive, "converting RAR archive to ZIP");
        let extracted = Utf8PathBuf::from(format!("{archive}.extracted"));
        converter.convert(archive, &extracted)?;

        let size = fs::metadata(&extracted).map(|m| m.len()).unwrap_or(0);
        if size <= MIN_CONVERTED_SIZE {
            let _ = fs::remove_file(&extracted);
            return Err(Error::CorruptArchive {
                path: archive.to_owned(),
                reason: "RAR conversion produced an empty archive".to_string(),
            });
        }

        let backup = Utf8PathBuf::from(format!("{archive}.backup"));
        fs::rename(archive, &backup)?;
        fs::rename(&extracted, archive)?;
        tracing::info!(archive = %archive, backup = %backup, "converted RAR archive");
        Ok(ArchiveFormat::Zip)
    }
}
