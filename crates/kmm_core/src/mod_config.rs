//! `mod.cfg` handling. Only the keys matter for conflict detection.

use crate::error::Result;
use camino::Utf8Path;
use std::collections::BTreeSet;
use std::fs;

pub const MOD_CONFIG_FILE: &str = "mod.cfg";

/// Keys of a `key=value` config: the trimmed text before the first `=` on
/// every line that has one.
pub fn config_keys(contents: &str) -> BTreeSet<String> {
    contents
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(key, _)| key.trim())
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .collect()
}

/// Read the keys of `<mod_dir>/mod.cfg`. `None` if the mod has no config.
pub fn read_config_keys(mod_dir: &Utf8Path) -> Result<Option<BTreeSet<String>>> {
    let path = mod_dir.join(MOD_CONFIG_FILE);
    if !path.exists() {
        return Ok(None);
    }

    let bytes = fs::read(&path)?;
    Ok(Some(config_keys(&String::from_utf8_lossy(&bytes))))
}

/// Whether two configs set at least one common key.
pub fn shares_key(a: &BTreeSet<String>, b: &BTreeSet<String>) -> bool {
    !a.is_disjoint(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_keys() {
        let keys = config_keys("wh_pl_Stamina = 100\n-- comment\n  g_fov=60=x\n\n=orphan\n");
        let expected: BTreeSet<String> = ["g_fov", "wh_pl_Stamina"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn test_shares_key() {
        let a = config_keys("g_fov=60\nsys_maxfps=30");
        let b = config_keys("sys_maxfps=60");
        let c = config_keys("e_shadows=1");

        assert!(shares_key(&a, &b));
        assert!(!shares_key(&a, &c));
    }

    #[test]
    fn test_read_missing_config() {
        let dir = tempdir().unwrap();
        let mod_dir = Utf8Path::from_path(dir.path()).unwrap();
        assert!(read_config_keys(mod_dir).unwrap().is_none());

        fs::write(mod_dir.join(MOD_CONFIG_FILE), "g_fov=70\r\n").unwrap();
        let keys = read_config_keys(mod_dir).unwrap().unwrap();
        assert!(keys.contains("g_fov"));
    }
}
