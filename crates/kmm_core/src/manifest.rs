//! Reading and writing `mod.manifest` files.
//!
//! ```xml
//! <kcd_mod>
//!   <info>
//!     <name>Better Tables</name>
//!     <description>...</description>
//!     <author>...</author>
//!     <version>1.2</version>
//!     <created_on>...</created_on>
//!   </info>
//!   <supports>
//!     <kcd_version>1.9.6</kcd_version>
//!   </supports>
//!   <merged_files>
//!     <file>MergedFiles/Data/libs/table.xml</file>
//!   </merged_files>
//! </kcd_mod>
//! ```
//!
//! Reading is tolerant: every section is optional, list values may be
//! comma-joined, and a malformed `supports` or `merged_files` section is
//! dropped with a warning instead of failing the whole read.

use crate::error::{Error, Result};
use camino::Utf8Path;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use std::fs;

pub const MANIFEST_FILE: &str = "mod.manifest";
pub const MANIFEST_EXTENSION: &str = ".manifest";

pub const MERGED_MOD_DISPLAY_NAME: &str = "MMM - ModMerger Merged Mods";
pub const MERGED_MOD_DESCRIPTION: &str = "Merged Mods by KCDModMerger";
pub const MERGED_MOD_AUTHOR: &str = "Mortimer";

pub const LEGACY_MOD_DESCRIPTION: &str = "Extracted by KCDModMerger";
pub const LEGACY_MOD_AUTHOR: &str = "KCDModMerger";

/// Parsed manifest of one mod.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestRecord {
    /// `info/name`, or the mod's folder name when absent.
    pub display_name: String,
    pub author: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    pub created_on: Option<String>,
    pub supported_versions: Vec<String>,
    pub merged_files: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Info,
    Supports,
    MergedFiles,
    Other,
}

fn section_of(stack: &[String]) -> Section {
    match stack.get(1).map(String::as_str) {
        Some("info") => Section::Info,
        Some("supports") => Section::Supports,
        Some("merged_files") => Section::MergedFiles,
        _ => Section::Other,
    }
}

fn split_list(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

impl ManifestRecord {
    /// Record for a mod without a manifest.
    pub fn for_folder(folder_name: &str) -> Self {
        Self {
            display_name: folder_name.to_string(),
            ..Default::default()
        }
    }

    /// Read the manifest at `path`. A missing file is not an error; the
    /// record then only carries `folder_name` as display name.
    pub fn read(path: &Utf8Path, folder_name: &str) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path, "no manifest, using folder name");
            return Ok(Self::for_folder(folder_name));
        }

        let bytes = fs::read(path)?;
        Ok(Self::parse(&bytes, folder_name))
    }

    /// Parse manifest XML. Never fails; unreadable parts keep their defaults.
    pub fn parse(bytes: &[u8], folder_name: &str) -> Self {
        let mut record = Self::for_folder(folder_name);
        let mut reader = Reader::from_reader(bytes);
        reader.trim_text(true);
        let mut buf = Vec::new();
        let mut stack: Vec<String> = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    stack.push(String::from_utf8_lossy(e.name().as_ref()).to_ascii_lowercase());
                }
                Ok(Event::End(_)) => {
                    stack.pop();
                }
                Ok(Event::Text(t)) => match t.unescape() {
                    Ok(text) => record.apply(&stack, &text),
                    Err(e) => {
                        record.discard(section_of(&stack), folder_name, &e.to_string());
                    }
                },
                Ok(Event::CData(t)) => {
                    let text = String::from_utf8_lossy(&t.into_inner()).into_owned();
                    record.apply(&stack, &text);
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    record.discard(section_of(&stack), folder_name, &e.to_string());
                    break;
                }
                _ => {}
            }
            buf.clear();
        }

        record
    }

    fn apply(&mut self, stack: &[String], text: &str) {
        let path: Vec<&str> = stack.iter().map(String::as_str).collect();
        match path.as_slice() {
            [_, "info", "name"] => {
                if !text.trim().is_empty() {
                    self.display_name = text.trim().to_string();
                }
            }
            [_, "info", "author"] => self.author = Some(text.to_string()),
            [_, "info", "version"] => self.version = Some(text.to_string()),
            [_, "info", "description"] => self.description = Some(text.to_string()),
            [_, "info", "created_on"] => self.created_on = Some(text.to_string()),
            [_, "supports", "kcd_version"] => self.supported_versions.extend(split_list(text)),
            [_, "merged_files", "file"] => self.merged_files.extend(split_list(text)),
            _ => {}
        }
    }

    fn discard(&mut self, section: Section, folder_name: &str, reason: &str) {
        match section {
            Section::Supports => {
                tracing::warn!(mod_name = folder_name, reason, "malformed supports section ignored");
                self.supported_versions.clear();
            }
            Section::MergedFiles => {
                tracing::warn!(mod_name = folder_name, reason, "malformed merged_files section ignored");
                self.merged_files.clear();
            }
            Section::Info | Section::Other => {
                tracing::warn!(mod_name = folder_name, reason, "malformed manifest, stopped reading");
            }
        }
    }

    /// Manifest of the merged output mod.
    pub fn merged_output(version: &str, merged_files: Vec<String>) -> Self {
        Self {
            display_name: MERGED_MOD_DISPLAY_NAME.to_string(),
            author: Some(MERGED_MOD_AUTHOR.to_string()),
            version: Some(version.to_string()),
            description: Some(MERGED_MOD_DESCRIPTION.to_string()),
            created_on: Some(now()),
            supported_versions: Vec::new(),
            merged_files,
        }
    }

    /// Manifest generated for a migrated legacy archive.
    pub fn legacy(name: &str, version: &str) -> Self {
        Self {
            display_name: name.to_string(),
            author: Some(LEGACY_MOD_AUTHOR.to_string()),
            version: Some(version.to_string()),
            description: Some(LEGACY_MOD_DESCRIPTION.to_string()),
            created_on: Some(now()),
            supported_versions: Vec::new(),
            merged_files: Vec::new(),
        }
    }

    /// Multi-line description for display. Empty sections are left out.
    pub fn summary(&self) -> String {
        let mut lines = vec![self.display_name.clone()];

        if let Some(version) = non_empty(&self.version) {
            lines.push(format!("Version: {version}"));
        }
        if let Some(author) = non_empty(&self.author) {
            lines.push(format!("Author: {author}"));
        }
        if let Some(created_on) = non_empty(&self.created_on) {
            lines.push(format!("Created On: {created_on}"));
        }
        if let Some(description) = non_empty(&self.description) {
            lines.push(String::new());
            lines.push(description.to_string());
        }
        if !self.supported_versions.is_empty() {
            lines.push(String::new());
            lines.push("Supported Versions:".to_string());
            lines.extend(self.supported_versions.iter().cloned());
        }
        if !self.merged_files.is_empty() {
            lines.push(String::new());
            lines.push("Merged Files:".to_string());
            lines.extend(self.merged_files.iter().cloned());
        }

        lines.join("\n")
    }

    /// Serialize to manifest XML.
    pub fn to_xml(&self) -> std::result::Result<String, quick_xml::DeError> {
        let document = ManifestXml {
            info: InfoXml {
                name: &self.display_name,
                description: self.description.as_deref().unwrap_or_default(),
                author: self.author.as_deref().unwrap_or_default(),
                version: self.version.as_deref().unwrap_or_default(),
                created_on: self.created_on.as_deref().unwrap_or_default(),
            },
            supports: (!self.supported_versions.is_empty()).then(|| SupportsXml {
                kcd_version: self.supported_versions.iter().map(String::as_str).collect(),
            }),
            merged_files: self
                .merged_files
                .iter()
                .any(|f| !f.is_empty())
                .then(|| MergedFilesXml {
                    file: self
                        .merged_files
                        .iter()
                        .filter(|f| !f.is_empty())
                        .map(String::as_str)
                        .collect(),
                }),
        };

        let mut xml = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n".to_string();
        let mut ser = quick_xml::se::Serializer::new(&mut xml);
        ser.indent(' ', 2);
        document.serialize(ser)?;
        xml.push('\n');
        Ok(xml)
    }

    /// Write the manifest to `path`, creating parent directories.
    pub fn write(&self, path: &Utf8Path) -> Result<()> {
        let xml = self.to_xml().map_err(|e| Error::Manifest {
            path: path.to_owned(),
            reason: e.to_string(),
        })?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, xml)?;
        Ok(())
    }
}

fn now() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

#[derive(Serialize)]
#[serde(rename = "kcd_mod")]
struct ManifestXml<'a> {
    info: InfoXml<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    supports: Option<SupportsXml<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    merged_files: Option<MergedFilesXml<'a>>,
}

#[derive(Serialize)]
struct InfoXml<'a> {
    name: &'a str,
    description: &'a str,
    author: &'a str,
    version: &'a str,
    created_on: &'a str,
}

#[derive(Serialize)]
struct SupportsXml<'a> {
    kcd_version: Vec<&'a str>,
}

#[derive(Serialize)]
struct MergedFilesXml<'a> {
    file: Vec<&'a str>,
}
