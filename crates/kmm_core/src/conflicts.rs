//! Grouping mod files by conflict identity.
//!
//! A [`ConflictSet`] maps each identity claimed by two or more enabled mods to
//! the ordered list of those mods. The order is the merge priority: the last
//! mod is applied last and wins. It starts as discovery order and is then
//! adjusted by the user, so every update here keeps the existing order of the
//! mods that stay in a bucket.

use crate::discovery::Mod;
use crate::error::{Error, Result};
use crate::mod_config::shares_key;
use crate::mod_file::ModFile;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Synthetic bucket holding every mod whose `mod.cfg` shares a key with
/// another enabled mod's.
pub const CONFIG_BUCKET: &str = "Config";

/// Saved priority orders, keyed by conflict identity.
pub type PriorityMap = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictSet {
    buckets: BTreeMap<String, Vec<String>>,
}

impl ConflictSet {
    /// Build the conflict set for the enabled mods in `mods`.
    pub fn build(mods: &[Mod]) -> Self {
        let mut set = Self::default();
        for m in mods.iter().filter(|m| m.is_enabled()) {
            for file in &m.files {
                let bucket = set.buckets.entry(file.identity()).or_default();
                if !bucket.iter().any(|name| name == &m.name) {
                    bucket.push(m.name.clone());
                }
            }
        }
        set.prune();
        set.refresh_config_bucket(mods);

        tracing::info!(conflicts = set.len(), "built conflict set");
        set
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Mods claiming `identity`, in priority order.
    pub fn get(&self, identity: &str) -> Option<&[String]> {
        self.buckets.get(identity).map(Vec::as_slice)
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.buckets.contains_key(identity)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.buckets
            .iter()
            .map(|(identity, mods)| (identity.as_str(), mods.as_slice()))
    }

    /// File identities only, without the config bucket.
    pub fn file_conflicts(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.iter().filter(|(identity, _)| *identity != CONFIG_BUCKET)
    }

    /// Drop every bucket with fewer than two mods.
    fn prune(&mut self) {
        self.buckets.retain(|_, mods| mods.len() >= 2);
    }

    /// Strip a disabled mod from every bucket.
    pub fn remove_mod(&mut self, mod_name: &str) {
        for mods in self.buckets.values_mut() {
            mods.retain(|name| name != mod_name);
        }
        self.prune();
    }

    /// Insert a newly enabled mod.
    ///
    /// `live_files` is every enabled file, the new mod's included. Existing
    /// buckets get the mod appended; identities that only now collide get a
    /// new bucket with the earlier owners first.
    pub fn add_mod(&mut self, mod_name: &str, files: &[ModFile], live_files: &[ModFile]) {
        let mut owners: HashMap<String, Vec<&str>> = HashMap::new();
        for file in live_files.iter().filter(|f| f.mod_name != mod_name) {
            let entry = owners.entry(file.identity()).or_default();
            if !entry.contains(&file.mod_name.as_str()) {
                entry.push(&file.mod_name);
            }
        }

        for file in files {
            let identity = file.identity();
            if let Some(bucket) = self.buckets.get_mut(&identity) {
                if !bucket.iter().any(|name| name == mod_name) {
                    bucket.push(mod_name.to_string());
                }
                continue;
            }

            if let Some(others) = owners.get(&identity) {
                let mut bucket: Vec<String> = others.iter().map(|s| s.to_string()).collect();
                bucket.push(mod_name.to_string());
                self.buckets.insert(identity, bucket);
            }
        }
    }

    /// Recompute the config bucket from the enabled mods' config keys.
    ///
    /// Any pair of enabled mods sharing a key puts both into one flat bucket.
    /// Mods already in the bucket keep their position.
    pub fn refresh_config_bucket(&mut self, mods: &[Mod]) {
        let enabled: Vec<&Mod> = mods
            .iter()
            .filter(|m| m.is_enabled() && !m.config_keys.is_empty())
            .collect();

        let mut members: Vec<String> = Vec::new();
        for (i, a) in enabled.iter().enumerate() {
            for b in &enabled[i + 1..] {
                if shares_key(&a.config_keys, &b.config_keys) {
                    for name in [&a.name, &b.name] {
                        if !members.contains(name) {
                            members.push(name.clone());
                        }
                    }
                }
            }
        }

        let previous = self.buckets.remove(CONFIG_BUCKET).unwrap_or_default();
        let ordered = keep_order(&previous, &members);
        if ordered.len() >= 2 {
            tracing::debug!(mods = ?ordered, "config conflict");
            self.buckets.insert(CONFIG_BUCKET.to_string(), ordered);
        }
    }

    /// Replace the priority order of one bucket. `order` must contain exactly
    /// the bucket's mods.
    pub fn reorder(&mut self, identity: &str, order: Vec<String>) -> Result<()> {
        let bucket = self
            .buckets
            .get_mut(identity)
            .ok_or_else(|| Error::ConflictNotFound(identity.to_string()))?;

        let mut expected = bucket.clone();
        let mut given = order.clone();
        expected.sort();
        given.sort();
        if expected != given {
            return Err(Error::InvalidPriorityOrder {
                identity: identity.to_string(),
                reason: format!("expected a permutation of {bucket:?}, got {order:?}"),
            });
        }

        *bucket = order;
        Ok(())
    }

    /// Current priority orders, for persisting.
    pub fn priorities(&self) -> PriorityMap {
        self.buckets.clone()
    }

    /// Re-apply saved orders. Saved mods no longer in a bucket are ignored;
    /// mods new to a bucket keep their place after the saved ones.
    pub fn apply_priorities(&mut self, saved: &PriorityMap) {
        for (identity, mods) in self.buckets.iter_mut() {
            if let Some(order) = saved.get(identity) {
                *mods = keep_order(order, mods);
            }
        }
    }
}

/// `current` sorted so that names in `preferred` come first in that order,
/// followed by the rest in their current order.
fn keep_order(preferred: &[String], current: &[String]) -> Vec<String> {
    let mut ordered: Vec<String> = preferred
        .iter()
        .filter(|name| current.contains(name))
        .cloned()
        .collect();
    for name in current {
        if !ordered.contains(name) {
            ordered.push(name.clone());
        }
    }
    ordered
}
