//! The merge run: extract every conflicting file, fold the copies together
//! with the merge tool in priority order, and accumulate the results in the
//! staging tree.

use crate::archive::ArchiveStore;
use crate::conflicts::{ConflictSet, CONFIG_BUCKET};
use crate::error::Result;
use crate::layout::DirectoryLayout;
use crate::merge_tool::MergeTool;
use crate::mod_file::ModFile;
use crate::vanilla::VanillaResolver;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeOptions {
    /// Also stage every file that is not in conflict.
    pub copy_all_files: bool,
    /// Remove merged entries from the mods' own archives afterwards.
    pub delete_sources_after_merge: bool,
}

/// The copies of one conflicting identity, in priority order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeJobEntry {
    pub identity: String,
    pub files: Vec<ModFile>,
}

/// Work for one merge run. Not persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeJob {
    pub entries: Vec<MergeJobEntry>,
    /// Files outside any conflict, copied as-is when `copy_all_files` is set.
    pub copies: Vec<ModFile>,
    /// Mods in the config bucket; these need manual attention.
    pub config_conflicts: Vec<String>,
    /// Identities dropped while planning.
    pub skipped: Vec<SkippedIdentity>,
}

impl MergeJob {
    /// Derive the job from the conflict set and the live file list.
    ///
    /// Localization output is flattened to `<pak>/<file name>`, so two
    /// identities can share a staging path. Only the first one claiming a
    /// path is kept; the rest are reported as skipped.
    pub fn plan(conflicts: &ConflictSet, files: &[ModFile], options: &MergeOptions) -> Self {
        let mut job = Self::default();
        let mut claimed: HashMap<String, String> = HashMap::new();

        for (identity, mods) in conflicts.iter() {
            if identity == CONFIG_BUCKET {
                job.config_conflicts = mods.to_vec();
                continue;
            }

            let copies: Vec<ModFile> = mods
                .iter()
                .filter_map(|mod_name| {
                    files
                        .iter()
                        .find(|f| &f.mod_name == mod_name && f.identity() == identity)
                        .cloned()
                })
                .collect();

            if copies.len() >= 2 {
                if !job.claim(&mut claimed, &copies[0]) {
                    continue;
                }
                job.entries.push(MergeJobEntry {
                    identity: identity.to_string(),
                    files: copies,
                });
            }
        }

        if options.copy_all_files {
            for file in files.iter().filter(|f| !conflicts.contains(&f.identity())) {
                if job.claim(&mut claimed, file) {
                    job.copies.push(file.clone());
                }
            }
        }

        job
    }

    /// Record `file`'s staging path as taken by its identity. Returns false
    /// and records a skip if another identity already holds it.
    fn claim(&mut self, claimed: &mut HashMap<String, String>, file: &ModFile) -> bool {
        let identity = file.identity();
        match claimed.get(&file.staging_key()) {
            Some(owner) if *owner == identity => false,
            Some(owner) => {
                tracing::warn!(identity = %identity, taken_by = %owner, "staging path already in use");
                self.skipped.push(SkippedIdentity {
                    reason: format!("staging path {} is already used by {owner}", file.staging_key()),
                    identity,
                });
                false
            }
            None => {
                claimed.insert(file.staging_key(), identity);
                true
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.copies.is_empty()
    }
}

/// An identity that was abandoned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedIdentity {
    pub identity: String,
    pub reason: String,
}

/// Outcome of a merge run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    pub merged: Vec<String>,
    pub copied: Vec<String>,
    pub skipped: Vec<SkippedIdentity>,
    pub config_conflicts: Vec<String>,
    /// Every file read or written, relative to the scratch root, in order.
    pub merged_files: Vec<String>,
}

/// Progress of a merge run.
#[derive(Debug, Clone)]
pub struct MergeProgress {
    pub current: usize,
    pub total: usize,
    pub identity: String,
}

pub type ProgressCallback = Arc<dyn Fn(MergeProgress) + Send + Sync>;

pub struct MergePipeline<'a> {
    layout: &'a DirectoryLayout,
    store: &'a dyn ArchiveStore,
    tool: &'a dyn MergeTool,
    progress: Option<ProgressCallback>,
}

impl<'a> MergePipeline<'a> {
    pub fn new(
        layout: &'a DirectoryLayout,
        store: &'a dyn ArchiveStore,
        tool: &'a dyn MergeTool,
    ) -> Self {
        Self {
            layout,
            store,
            tool,
            progress: None,
        }
    }

    /// Set a progress callback, invoked after each identity.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Run the job. Identities that fail are skipped with a warning; the run
    /// itself only fails if nothing can be done at all.
    pub fn run(
        &self,
        job: &MergeJob,
        vanilla: &mut VanillaResolver,
        options: &MergeOptions,
    ) -> Result<MergeReport> {
        let mut report = MergeReport {
            config_conflicts: job.config_conflicts.clone(),
            skipped: job.skipped.clone(),
            ..Default::default()
        };

        if !job.config_conflicts.is_empty() {
            tracing::info!(
                mods = ?job.config_conflicts,
                "mod.cfg conflicts are not merged, resolve them manually"
            );
        }

        let total = job.entries.len();
        tracing::info!(conflicts = total, copies = job.copies.len(), "starting merge");

        for (index, entry) in job.entries.iter().enumerate() {
            match self.merge_identity(index, entry, vanilla) {
                Ok(traced) => {
                    report.merged_files.extend(traced);
                    report.merged.push(entry.identity.clone());
                    if options.delete_sources_after_merge {
                        self.delete_sources(&entry.files);
                    }
                }
                Err(e) => {
                    tracing::warn!(identity = %entry.identity, error = %e, "skipping conflict");
                    if let Some(first) = entry.files.first() {
                        if let Ok(staged) = self.layout.staging_path_for(first) {
                            let _ = fs::remove_file(staged);
                        }
                    }
                    report.skipped.push(SkippedIdentity {
                        identity: entry.identity.clone(),
                        reason: e.to_string(),
                    });
                }
            }

            if let Some(callback) = &self.progress {
                callback(MergeProgress {
                    current: index + 1,
                    total,
                    identity: entry.identity.clone(),
                });
            }
        }

        for file in &job.copies {
            match self.copy_file(file) {
                Ok(staged) => {
                    report.merged_files.push(self.layout.display_path(&staged));
                    report.copied.push(file.identity());
                    if options.delete_sources_after_merge {
                        self.delete_sources(std::slice::from_ref(file));
                    }
                }
                Err(e) => {
                    tracing::warn!(identity = %file.identity(), mod_name = %file.mod_name, error = %e, "skipping copy");
                    report.skipped.push(SkippedIdentity {
                        identity: file.identity(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            merged = report.merged.len(),
            copied = report.copied.len(),
            skipped = report.skipped.len(),
            "merge finished"
        );
        Ok(report)
    }

    /// Merge all copies of one identity into its staging path. Returns the
    /// traced file list.
    fn merge_identity(
        &self,
        index: usize,
        entry: &MergeJobEntry,
        vanilla: &mut VanillaResolver,
    ) -> Result<Vec<String>> {
        let Some(first) = entry.files.first() else {
            return Ok(Vec::new());
        };
        let staged = self.layout.staging_path_for(first)?;
        let base = vanilla.extract_base(self.store, first)?;

        let mut copies = Vec::with_capacity(entry.files.len());
        for file in &entry.files {
            let dest = self.layout.path_for(file)?;
            self.store
                .extract_entry(&file.archive_path(), &file.logical_path, &dest)?;
            copies.push(dest);
        }

        let mut traced = Vec::new();
        let mut pending = copies.iter();
        let start: &Utf8Path = match &base {
            Some(base) => base,
            None => match pending.next() {
                Some(first_copy) => first_copy,
                None => return Ok(traced),
            },
        };
        fs::copy(start, &staged)?;
        traced.push(self.layout.display_path(start));

        for (step, overwrite) in pending.enumerate() {
            // The tool must not read and write the same file.
            let current = self.layout.step_path(index, step, first.file_name())?;
            fs::copy(&staged, &current)?;
            if step > 0 {
                traced.push(self.layout.display_path(&current));
            }
            traced.push(self.layout.display_path(overwrite));

            self.tool.merge(&current, overwrite, &staged)?;
        }

        traced.push(self.layout.display_path(&staged));
        tracing::debug!(
            identity = %entry.identity,
            base = base.is_some(),
            mods = entry.files.len(),
            "merged conflict"
        );
        Ok(traced)
    }

    fn copy_file(&self, file: &ModFile) -> Result<Utf8PathBuf> {
        let staged = self.layout.staging_path_for(file)?;
        self.store
            .extract_entry(&file.archive_path(), &file.logical_path, &staged)?;
        Ok(staged)
    }

    fn delete_sources(&self, files: &[ModFile]) {
        for file in files {
            if let Err(e) = file.delete(self.store) {
                tracing::warn!(
                    archive = %file.archive_path(),
                    entry = %file.logical_path,
                    error = %e,
                    "failed to delete merged source entry"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::write_zip;
    use crate::archive::ZipStore;
    use crate::discovery::{Mod, ModStatus};
    use crate::error::Error;
    use crate::manifest::ManifestRecord;
    use crate::vanilla::VanillaPathIndex;
    use std::collections::BTreeSet;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Appends the overwrite to the base, so the output shows the order.
    #[derive(Default)]
    struct ConcatTool {
        calls: Mutex<Vec<(Utf8PathBuf, Utf8PathBuf, Utf8PathBuf)>>,
    }

    impl MergeTool for ConcatTool {
        fn merge(&self, base: &Utf8Path, overwrite: &Utf8Path, output: &Utf8Path) -> Result<()> {
            let mut data = fs::read(base)?;
            data.extend(fs::read(overwrite)?);
            fs::write(output, data)?;
            self.calls
                .lock()
                .unwrap()
                .push((base.to_owned(), overwrite.to_owned(), output.to_owned()));
            Ok(())
        }
    }

    struct FailingTool;

    impl MergeTool for FailingTool {
        fn merge(&self, _: &Utf8Path, _: &Utf8Path, _: &Utf8Path) -> Result<()> {
            Err(Error::MergeTool {
                tool: "kdiff3".into(),
                message: "not installed".to_string(),
            })
        }
    }

    fn setup() -> (tempfile::TempDir, DirectoryLayout) {
        let dir = tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let layout = DirectoryLayout::new(root);
        layout.initialize().unwrap();
        (dir, layout)
    }

    fn data_mod(layout: &DirectoryLayout, name: &str, entries: &[(&str, &[u8])]) -> Mod {
        let archive = layout.mods_dir().join(name).join("Data/data.pak");
        write_zip(&archive, entries);
        Mod {
            name: name.to_string(),
            dir: layout.mods_dir().join(name),
            status: ModStatus::Enabled,
            manifest: ManifestRecord::for_folder(name),
            archives: vec![archive.clone()],
            files: entries
                .iter()
                .map(|(path, _)| ModFile::new(name, *path, &archive, false))
                .collect(),
            config_keys: BTreeSet::new(),
        }
    }

    fn files(mods: &[Mod]) -> Vec<ModFile> {
        mods.iter().flat_map(|m| m.files.clone()).collect()
    }

    #[test]
    fn test_plan_follows_priority_and_skips_config() {
        let (_dir, layout) = setup();
        let mut mods = vec![
            data_mod(&layout, "A", &[("libs/x.xml", b"a"), ("libs/only_a.xml", b"a")]),
            data_mod(&layout, "B", &[("libs/x.xml", b"b")]),
        ];
        mods[0].config_keys.insert("g_fov".to_string());
        mods[1].config_keys.insert("g_fov".to_string());
        let mut conflicts = ConflictSet::build(&mods);
        conflicts
            .reorder("libs/x.xml", vec!["B".into(), "A".into()])
            .unwrap();

        let job = MergeJob::plan(&conflicts, &files(&mods), &MergeOptions::default());
        assert_eq!(job.entries.len(), 1);
        let order: Vec<&str> = job.entries[0]
            .files
            .iter()
            .map(|f| f.mod_name.as_str())
            .collect();
        assert_eq!(order, vec!["B", "A"]);
        assert!(job.copies.is_empty());
        assert_eq!(job.config_conflicts, vec!["A", "B"]);

        let options = MergeOptions {
            copy_all_files: true,
            ..Default::default()
        };
        let job = MergeJob::plan(&conflicts, &files(&mods), &options);
        assert_eq!(job.copies.len(), 1);
        assert_eq!(job.copies[0].logical_path, "libs/only_a.xml");
    }

    #[test]
    fn test_three_mods_without_base_merge_in_order() {
        let (_dir, layout) = setup();
        let mods = vec![
            data_mod(&layout, "A", &[("libs/x.xml", b"a")]),
            data_mod(&layout, "B", &[("libs/x.xml", b"b")]),
            data_mod(&layout, "C", &[("libs/x.xml", b"c")]),
        ];
        let conflicts = ConflictSet::build(&mods);
        let job = MergeJob::plan(&conflicts, &files(&mods), &MergeOptions::default());

        let tool = ConcatTool::default();
        let mut vanilla = VanillaResolver::new(layout.clone(), VanillaPathIndex::default());
        let report = MergePipeline::new(&layout, &ZipStore, &tool)
            .run(&job, &mut vanilla, &MergeOptions::default())
            .unwrap();

        let staged = layout.staging_data_dir().join("libs/x.xml");
        assert_eq!(fs::read(&staged).unwrap(), b"abc");
        assert_eq!(report.merged, vec!["libs/x.xml"]);

        let calls = tool.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].1.as_str().contains("/B/"));
        assert!(calls[1].1.as_str().contains("/C/"));
        assert!(calls.iter().all(|(base, _, output)| base != output));

        assert_eq!(
            report.merged_files,
            vec![
                "TempFiles/A/Data/libs/x.xml",
                "TempFiles/B/Data/libs/x.xml",
                "TempFiles/Steps/0/1/x.xml",
                "TempFiles/C/Data/libs/x.xml",
                "MergedFiles/Data/libs/x.xml",
            ]
        );
    }

    #[test]
    fn test_vanilla_base_is_merged_with_every_mod() {
        let (_dir, layout) = setup();
        write_zip(
            &layout.game_data_dir().join("Tables.pak"),
            &[("libs/x.xml", b"v")],
        );
        let mods = vec![
            data_mod(&layout, "A", &[("libs/x.xml", b"a")]),
            data_mod(&layout, "B", &[("libs/x.xml", b"b")]),
        ];
        let conflicts = ConflictSet::build(&mods);
        let job = MergeJob::plan(&conflicts, &files(&mods), &MergeOptions::default());

        let tool = ConcatTool::default();
        let mut vanilla = VanillaResolver::new(layout.clone(), VanillaPathIndex::default());
        MergePipeline::new(&layout, &ZipStore, &tool)
            .run(&job, &mut vanilla, &MergeOptions::default())
            .unwrap();

        assert_eq!(tool.calls.lock().unwrap().len(), 2);
        assert_eq!(
            fs::read(layout.staging_data_dir().join("libs/x.xml")).unwrap(),
            b"vab"
        );
    }

    #[test]
    fn test_failing_identity_does_not_abort_run() {
        let (_dir, layout) = setup();
        let mut mods = vec![
            data_mod(&layout, "A", &[("libs/x.xml", b"a"), ("libs/y.xml", b"a")]),
            data_mod(&layout, "B", &[("libs/x.xml", b"b"), ("libs/y.xml", b"b")]),
        ];
        // Both claim an entry their archives do not have.
        let ghost_b = ModFile::new("B", "libs/ghost.xml", &mods[1].archives[0], false);
        mods[1].files.push(ghost_b);
        let ghost_a = ModFile::new("A", "libs/ghost.xml", &mods[0].archives[0], false);
        mods[0].files.push(ghost_a);

        let conflicts = ConflictSet::build(&mods);
        let job = MergeJob::plan(&conflicts, &files(&mods), &MergeOptions::default());

        let tool = ConcatTool::default();
        let mut vanilla = VanillaResolver::new(layout.clone(), VanillaPathIndex::default());
        let report = MergePipeline::new(&layout, &ZipStore, &tool)
            .run(&job, &mut vanilla, &MergeOptions::default())
            .unwrap();

        assert_eq!(report.merged, vec!["libs/x.xml", "libs/y.xml"]);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].identity, "libs/ghost.xml");
        assert!(!layout.staging_data_dir().join("libs/ghost.xml").exists());
    }

    #[test]
    fn test_tool_failure_skips_identity() {
        let (_dir, layout) = setup();
        let mods = vec![
            data_mod(&layout, "A", &[("libs/x.xml", b"a")]),
            data_mod(&layout, "B", &[("libs/x.xml", b"b")]),
        ];
        let conflicts = ConflictSet::build(&mods);
        let job = MergeJob::plan(&conflicts, &files(&mods), &MergeOptions::default());

        let mut vanilla = VanillaResolver::new(layout.clone(), VanillaPathIndex::default());
        let report = MergePipeline::new(&layout, &ZipStore, &FailingTool)
            .run(&job, &mut vanilla, &MergeOptions::default())
            .unwrap();

        assert!(report.merged.is_empty());
        assert_eq!(report.skipped.len(), 1);
        assert!(!layout.staging_data_dir().join("libs/x.xml").exists());
    }

    #[test]
    fn test_copy_all_and_delete_sources() {
        let (_dir, layout) = setup();
        let mods = vec![
            data_mod(&layout, "A", &[("libs/x.xml", b"a"), ("libs/solo.xml", b"solo")]),
            data_mod(&layout, "B", &[("libs/x.xml", b"b")]),
        ];
        let options = MergeOptions {
            copy_all_files: true,
            delete_sources_after_merge: true,
        };
        let conflicts = ConflictSet::build(&mods);
        let job = MergeJob::plan(&conflicts, &files(&mods), &options);

        let tool = ConcatTool::default();
        let mut vanilla = VanillaResolver::new(layout.clone(), VanillaPathIndex::default());
        let progress = Arc::new(Mutex::new(Vec::new()));
        let seen = progress.clone();
        let report = MergePipeline::new(&layout, &ZipStore, &tool)
            .with_progress(Arc::new(move |p: MergeProgress| seen.lock().unwrap().push(p.current)))
            .run(&job, &mut vanilla, &options)
            .unwrap();

        assert_eq!(report.copied, vec!["libs/solo.xml"]);
        assert_eq!(
            fs::read(layout.staging_data_dir().join("libs/solo.xml")).unwrap(),
            b"solo"
        );
        assert!(ZipStore.list_entries(&mods[0].archives[0]).unwrap().is_empty());
        assert!(ZipStore.list_entries(&mods[1].archives[0]).unwrap().is_empty());
        assert_eq!(*progress.lock().unwrap(), vec![1]);
    }

    fn loc_mod(layout: &DirectoryLayout, name: &str, entries: &[(&str, &[u8])]) -> Mod {
        let archive = layout.mods_dir().join(name).join("Localization/english_xml.pak");
        write_zip(&archive, entries);
        Mod {
            files: entries
                .iter()
                .map(|(path, _)| ModFile::new(name, *path, &archive, true))
                .collect(),
            archives: vec![archive],
            ..data_mod(layout, name, &[])
        }
    }

    #[test]
    fn test_flattened_localization_collision_is_skipped() {
        let (_dir, layout) = setup();
        let mods = vec![
            loc_mod(&layout, "A", &[("a/t.xml", b"a1"), ("b/t.xml", b"a2")]),
            loc_mod(&layout, "B", &[("a/t.xml", b"b1"), ("b/t.xml", b"b2")]),
        ];
        let conflicts = ConflictSet::build(&mods);
        let job = MergeJob::plan(&conflicts, &files(&mods), &MergeOptions::default());
        assert_eq!(job.entries.len(), 1);
        assert_eq!(job.entries[0].identity, "english_xml\\a/t.xml");
        assert_eq!(job.skipped.len(), 1);
        assert_eq!(job.skipped[0].identity, "english_xml\\b/t.xml");

        let tool = ConcatTool::default();
        let mut vanilla = VanillaResolver::new(layout.clone(), VanillaPathIndex::default());
        let report = MergePipeline::new(&layout, &ZipStore, &tool)
            .run(&job, &mut vanilla, &MergeOptions::default())
            .unwrap();

        assert_eq!(report.merged, vec!["english_xml\\a/t.xml"]);
        assert_eq!(report.skipped, job.skipped);
        assert_eq!(
            fs::read(layout.staging_localization_dir().join("english_xml/t.xml")).unwrap(),
            b"a1b1"
        );
    }

    #[test]
    fn test_entry_without_files_is_a_no_op() {
        let (_dir, layout) = setup();
        let job = MergeJob {
            entries: vec![MergeJobEntry {
                identity: "libs/x.xml".to_string(),
                files: Vec::new(),
            }],
            ..Default::default()
        };

        let tool = ConcatTool::default();
        let mut vanilla = VanillaResolver::new(layout.clone(), VanillaPathIndex::default());
        let report = MergePipeline::new(&layout, &ZipStore, &tool)
            .run(&job, &mut vanilla, &MergeOptions::default())
            .unwrap();

        assert_eq!(report.merged, vec!["libs/x.xml"]);
        assert!(report.merged_files.is_empty());
        assert!(tool.calls.lock().unwrap().is_empty());
    }
}
