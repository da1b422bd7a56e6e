use crate::archive::ArchiveStore;
use crate::error::Result;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

/// Separator between a localization archive's name and the entry path in a
/// conflict identity.
pub const LOCALIZATION_SEPARATOR: char = '\\';

/// One mergeable entry inside one of a mod's archives.
///
/// Equality covers all five fields. Two files with the same entry path in
/// different language archives are different files, and so are the copies of
/// one path shipped by two mods. Use [`ModFile::identity`] to group files
/// across mods.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModFile {
    /// Folder name of the owning mod.
    pub mod_name: String,
    /// Entry path inside the archive, `/`-separated.
    pub logical_path: String,
    /// File name of the archive, including extension.
    pub archive_name: String,
    /// Directory the archive lives in.
    pub archive_dir: Utf8PathBuf,
    pub is_localization: bool,
}

impl ModFile {
    pub fn new(
        mod_name: impl Into<String>,
        logical_path: impl Into<String>,
        archive: &Utf8Path,
        is_localization: bool,
    ) -> Self {
        Self {
            mod_name: mod_name.into(),
            logical_path: logical_path.into(),
            archive_name: archive.file_name().unwrap_or_default().to_string(),
            archive_dir: archive.parent().map(Utf8Path::to_owned).unwrap_or_default(),
            is_localization,
        }
    }

    pub fn archive_path(&self) -> Utf8PathBuf {
        self.archive_dir.join(&self.archive_name)
    }

    /// Archive file name without its extension (`english_xml` for
    /// `english_xml.pak`).
    pub fn archive_stem(&self) -> &str {
        match self.archive_name.rfind('.') {
            Some(i) if i > 0 => &self.archive_name[..i],
            _ => &self.archive_name,
        }
    }

    /// Last path segment of the entry.
    pub fn file_name(&self) -> &str {
        self.logical_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.logical_path)
    }

    /// The key conflicts are grouped by.
    ///
    /// Localization entries are qualified with the archive they live in
    /// (`english_xml\text_ui_menus.xml`); data entries are keyed by their
    /// path alone. The owning mod is never part of the identity.
    pub fn identity(&self) -> String {
        if self.is_localization {
            format!(
                "{}{}{}",
                self.archive_stem(),
                LOCALIZATION_SEPARATOR,
                self.logical_path
            )
        } else {
            self.logical_path.clone()
        }
    }

    /// Where the merge result lands, relative to the staging root.
    /// Localization entries are flattened to their file name.
    pub fn staging_key(&self) -> String {
        if self.is_localization {
            format!("Localization/{}/{}", self.archive_stem(), self.file_name())
        } else {
            format!("Data/{}", self.logical_path.trim_start_matches('/'))
        }
    }

    /// Remove this entry from its archive on disk.
    pub fn delete(&self, store: &dyn ArchiveStore) -> Result<()> {
        store.delete_entry(&self.archive_path(), &self.logical_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_file(mod_name: &str, path: &str) -> ModFile {
        ModFile::new(
            mod_name,
            path,
            Utf8Path::new("Mods/x/Data/data.pak"),
            false,
        )
    }

    fn loc_file(mod_name: &str, pak: &str, path: &str) -> ModFile {
        ModFile::new(
            mod_name,
            path,
            &Utf8PathBuf::from(format!("Mods/x/Localization/{pak}")),
            true,
        )
    }

    #[test]
    fn test_identity_ignores_mod_name() {
        let a = data_file("ModA", "libs/table.xml");
        let b = data_file("ModB", "libs/table.xml");

        assert_eq!(a.identity(), b.identity());
        assert_ne!(a, b);
    }

    #[test]
    fn test_localization_identity_is_qualified() {
        let english = loc_file("ModA", "english_xml.pak", "text_ui_menus.xml");
        let german = loc_file("ModA", "german_xml.pak", "text_ui_menus.xml");

        assert_eq!(english.identity(), "english_xml\\text_ui_menus.xml");
        assert_ne!(english.identity(), german.identity());
        assert_ne!(english, german);
    }

    #[test]
    fn test_localization_flag_separates_identity() {
        let data = data_file("ModA", "text_ui_menus.xml");
        let loc = loc_file("ModA", "english_xml.pak", "text_ui_menus.xml");
        assert_ne!(data.identity(), loc.identity());
    }

    #[test]
    fn test_equality_uses_all_fields() {
        let a = data_file("ModA", "libs/table.xml");
        let mut other_archive = a.clone();
        other_archive.archive_name = "data2.pak".to_string();
        assert_ne!(a, other_archive);
        assert_eq!(a.identity(), other_archive.identity());

        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_names() {
        let file = loc_file("ModA", "english_xml.pak", "text/greeting.xml");
        assert_eq!(file.archive_stem(), "english_xml");
        assert_eq!(file.file_name(), "greeting.xml");
        assert_eq!(
            file.archive_path(),
            Utf8PathBuf::from("Mods/x/Localization/english_xml.pak")
        );
    }

    #[test]
    fn test_localization_staging_key_is_flat() {
        let a = loc_file("ModA", "english_xml.pak", "a/t.xml");
        let b = loc_file("ModA", "english_xml.pak", "b/t.xml");
        assert_ne!(a.identity(), b.identity());
        assert_eq!(a.staging_key(), "Localization/english_xml/t.xml");
        assert_eq!(a.staging_key(), b.staging_key());

        let data = data_file("ModA", "libs/table.xml");
        assert_eq!(data.staging_key(), "Data/libs/table.xml");
    }
}
