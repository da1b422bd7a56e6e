//! Application configuration management utilities.

use camino::{Utf8Path, Utf8PathBuf};
use kmm_core::{MergeOptions, PriorityMap, INDEX_FILE};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::io;

/// Default merge tool location, relative to the executable.
pub const DEFAULT_MERGE_TOOL: &str = "Tools/KDiff3/kdiff3.exe";

/// Application-wide configuration stored in config.toml.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub game_path: Option<Utf8PathBuf>,
    pub merge_tool: Option<Utf8PathBuf>,
    pub index_path: Option<Utf8PathBuf>,
    pub copy_all_files: bool,
    pub delete_sources_after_merge: bool,
    /// Saved priority order per conflict identity.
    pub conflict_order: PriorityMap,
}

impl AppConfig {
    /// Configured merge tool, or the bundled KDiff3 next to the executable.
    pub fn merge_tool_path(&self) -> Utf8PathBuf {
        self.merge_tool
            .clone()
            .or_else(|| config_path(DEFAULT_MERGE_TOOL))
            .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_MERGE_TOOL))
    }

    /// Configured vanilla index location, or `VanillaFiles.json` next to the
    /// executable.
    pub fn index_path(&self) -> Utf8PathBuf {
        self.index_path
            .clone()
            .or_else(|| config_path(INDEX_FILE))
            .unwrap_or_else(|| Utf8PathBuf::from(INDEX_FILE))
    }

    pub fn merge_options(&self) -> MergeOptions {
        MergeOptions {
            copy_all_files: self.copy_all_files,
            delete_sources_after_merge: self.delete_sources_after_merge,
        }
    }
}

/// Returns the directory where the current executable resides.
pub fn install_dir() -> Option<Utf8PathBuf> {
    let exe = env::current_exe().ok()?;
    let parent = exe.parent()?;
    Utf8PathBuf::from_path_buf(parent.to_path_buf()).ok()
}

/// Returns a path located next to the executable.
pub fn config_path(file_name: &str) -> Option<Utf8PathBuf> {
    install_dir().map(|dir| dir.join(file_name))
}

/// Returns the default configuration file path (config.toml).
pub fn default_config_path() -> Option<Utf8PathBuf> {
    config_path("config.toml")
}

/// Loads the application configuration from config.toml.
/// Returns default configuration if file doesn't exist or cannot be parsed.
pub fn load_config() -> AppConfig {
    default_config_path()
        .map(|path| load_config_from(&path))
        .unwrap_or_default()
}

pub fn load_config_from(path: &Utf8Path) -> AppConfig {
    if !path.exists() {
        return AppConfig::default();
    }
    match fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "ignoring unparseable config");
                AppConfig::default()
            }
        },
        Err(e) => {
            tracing::warn!(path = %path, error = %e, "ignoring unreadable config");
            AppConfig::default()
        }
    }
}

/// Saves the application configuration to config.toml.
pub fn save_config(cfg: &AppConfig) -> io::Result<()> {
    match default_config_path() {
        Some(path) => save_config_to(&path, cfg),
        None => Err(io::Error::new(
            io::ErrorKind::NotFound,
            "Could not determine config path",
        )),
    }
}

pub fn save_config_to(path: &Utf8Path, cfg: &AppConfig) -> io::Result<()> {
    let content = toml::to_string_pretty(cfg).map_err(io::Error::other)?;
    fs::write(path, content)
}

/// Loads existing configuration or creates a new one with defaults.
pub fn load_or_create_config() -> io::Result<(AppConfig, Utf8PathBuf)> {
    let path = default_config_path().ok_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "Could not determine config path")
    })?;

    if path.exists() {
        let content = fs::read_to_string(&path)?;
        let cfg =
            toml::from_str(&content).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok((cfg, path))
    } else {
        let cfg = AppConfig::default();
        save_config_to(&path, &cfg)?;
        Ok((cfg, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_round_trip() {
        let dir = tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("config.toml")).unwrap();

        let mut cfg = AppConfig {
            game_path: Some("C:/Games/KingdomComeDeliverance".into()),
            copy_all_files: true,
            ..Default::default()
        };
        cfg.conflict_order.insert(
            "english_xml\\text_ui_menus.xml".to_string(),
            vec!["B".to_string(), "A".to_string()],
        );

        save_config_to(&path, &cfg).unwrap();
        assert_eq!(load_config_from(&path), cfg);
    }

    #[test]
    fn test_missing_or_broken_config_is_default() {
        let dir = tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("config.toml")).unwrap();
        assert_eq!(load_config_from(&path), AppConfig::default());

        fs::write(&path, "game_path = [").unwrap();
        assert_eq!(load_config_from(&path), AppConfig::default());
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("config.toml")).unwrap();
        fs::write(&path, "delete_sources_after_merge = true\n").unwrap();

        let cfg = load_config_from(&path);
        assert!(cfg.delete_sources_after_merge);
        assert!(!cfg.copy_all_files);
        assert!(cfg.game_path.is_none());
        assert!(cfg.merge_tool_path().as_str().ends_with("kdiff3.exe"));
    }
}
