//! The manager context object tying discovery, conflicts and merging together.
//!
//! A [`ModManager`] is created once per session and shared by handle. State
//! changes happen inside scans, toggles and merges; these run one at a time,
//! and listeners are notified after the state has settled. [`ModManager::shutdown`] must be called on
//! every exit path: it saves the vanilla index and removes the scratch tree.

use crate::archive::{ArchiveStore, ZipStore};
use crate::conflicts::{ConflictSet, PriorityMap};
use crate::discovery::{migrate_legacy_archives, Mod, ModDiscovery, ModStatus};
use crate::error::{Error, MutexResultExt, Result};
use crate::events::{EventBus, EventListener, ManagerEvent};
use crate::layout::{validate_game_root, DirectoryLayout, LockedDirectoryHandler};
use crate::merge_tool::MergeTool;
use crate::mod_file::ModFile;
use crate::normalize::ArchiveNormalizer;
use crate::packager::{PackResult, Packager};
use crate::pipeline::{
    MergeJob, MergeOptions, MergePipeline, MergeProgress, MergeReport, ProgressCallback,
};
use crate::vanilla::{VanillaResolver, INDEX_FILE};
use camino::Utf8PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Longest time [`ModManager::shutdown`] waits for background work.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Paths and collaborators for a [`ModManager`].
#[derive(Clone)]
pub struct ManagerOptions {
    pub game_root: Utf8PathBuf,
    /// Where the vanilla index is persisted.
    pub index_path: Utf8PathBuf,
    pub merge_tool: Arc<dyn MergeTool>,
    pub store: Arc<dyn ArchiveStore>,
    pub locked_handler: Option<Arc<dyn LockedDirectoryHandler>>,
    pub retry_delay: Option<Duration>,
    pub normalizer: Arc<ArchiveNormalizer>,
}

impl ManagerOptions {
    pub fn new(game_root: impl Into<Utf8PathBuf>, merge_tool: Arc<dyn MergeTool>) -> Self {
        let game_root = game_root.into();
        Self {
            index_path: game_root.join(INDEX_FILE),
            game_root,
            merge_tool,
            store: Arc::new(ZipStore),
            locked_handler: None,
            retry_delay: None,
            normalizer: Arc::new(ArchiveNormalizer::new()),
        }
    }

    pub fn with_index_path(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.index_path = path.into();
        self
    }

    pub fn with_store(mut self, store: Arc<dyn ArchiveStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_locked_handler(mut self, handler: Arc<dyn LockedDirectoryHandler>) -> Self {
        self.locked_handler = Some(handler);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    pub fn with_normalizer(mut self, normalizer: ArchiveNormalizer) -> Self {
        self.normalizer = Arc::new(normalizer);
        self
    }
}

/// Snapshot of the live mod state.
#[derive(Debug, Clone, Default)]
pub struct ModState {
    pub mods: Vec<Mod>,
    /// Files of all enabled mods.
    pub files: Vec<ModFile>,
    pub conflicts: ConflictSet,
}

#[derive(Debug, Clone)]
pub struct ScanSummary {
    pub mods: usize,
    pub conflicts: usize,
    pub migrated: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub report: MergeReport,
    /// `None` if nothing was staged.
    pub package: Option<PackResult>,
}

pub struct ModManager {
    layout: DirectoryLayout,
    store: Arc<dyn ArchiveStore>,
    merge_tool: Arc<dyn MergeTool>,
    normalizer: Arc<ArchiveNormalizer>,
    state: Mutex<ModState>,
    /// Held for the whole of a scan, status change or merge. All three touch
    /// the scratch tree or mod folders on disk.
    operation: Mutex<()>,
    vanilla: Mutex<VanillaResolver>,
    events: EventBus,
    running: AtomicUsize,
    shut_down: AtomicBool,
}

impl ModManager {
    /// Validate the game root and load the vanilla index. Does not scan.
    pub fn open(options: ManagerOptions) -> Result<Self> {
        validate_game_root(&options.game_root)?;

        let mut layout = DirectoryLayout::new(options.game_root.clone());
        if let Some(handler) = options.locked_handler {
            layout = layout.with_locked_handler(handler);
        }
        if let Some(delay) = options.retry_delay {
            layout = layout.with_retry_delay(delay);
        }

        let vanilla = VanillaResolver::open(layout.clone(), &options.index_path);
        tracing::info!(game_root = %options.game_root, "opened mod manager");

        Ok(Self {
            layout,
            store: options.store,
            merge_tool: options.merge_tool,
            normalizer: options.normalizer,
            state: Mutex::new(ModState::default()),
            operation: Mutex::new(()),
            vanilla: Mutex::new(vanilla),
            events: EventBus::default(),
            running: AtomicUsize::new(0),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn layout(&self) -> &DirectoryLayout {
        &self.layout
    }

    pub fn subscribe(&self, listener: EventListener) {
        self.events.subscribe(listener);
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> Result<ModState> {
        Ok(self.state.lock().mutex_err()?.clone())
    }

    pub fn mods(&self) -> Result<Vec<Mod>> {
        Ok(self.state.lock().mutex_err()?.mods.clone())
    }

    pub fn conflicts(&self) -> Result<ConflictSet> {
        Ok(self.state.lock().mutex_err()?.conflicts.clone())
    }

    /// Re-initialize the scratch tree, migrate legacy archives and rediscover
    /// every mod. The previous state is replaced wholesale; priority orders
    /// of buckets that still exist are kept.
    pub fn scan(&self) -> Result<ScanSummary> {
        let _operation = self.operation.lock().mutex_err()?;
        self.layout.initialize()?;
        let migrated = migrate_legacy_archives(&self.layout, crate::VERSION)?;

        let discovery = ModDiscovery::new(self.store.as_ref(), &self.normalizer);
        let mods = discovery.scan(&self.layout.mods_dir(), &self.layout.disabled_mods_dir())?;
        let files: Vec<ModFile> = mods
            .iter()
            .filter(|m| m.is_enabled())
            .flat_map(|m| m.files.iter().cloned())
            .collect();
        let mut conflicts = ConflictSet::build(&mods);

        let summary = {
            let mut state = self.state.lock().mutex_err()?;
            conflicts.apply_priorities(&state.conflicts.priorities());
            *state = ModState {
                mods,
                files,
                conflicts,
            };
            ScanSummary {
                mods: state.mods.len(),
                conflicts: state.conflicts.len(),
                migrated,
            }
        };

        tracing::info!(mods = summary.mods, conflicts = summary.conflicts, "scan complete");
        self.events.emit(ManagerEvent::ScanComplete {
            mods: summary.mods,
            conflicts: summary.conflicts,
        });
        self.events.emit(ManagerEvent::ConflictsChanged {
            conflicts: summary.conflicts,
        });
        Ok(summary)
    }

    /// Enable or disable a mod by moving its folder between `Mods` and
    /// `Disabled_Mods`, then update files and conflicts incrementally.
    pub fn change_mod_status(&self, mod_name: &str, status: ModStatus) -> Result<()> {
        let _operation = self.operation.lock().mutex_err()?;
        let conflicts = {
            let mut state = self.state.lock().mutex_err()?;
            let index = state
                .mods
                .iter()
                .position(|m| m.name == mod_name)
                .ok_or_else(|| Error::ModNotFound(mod_name.to_string()))?;

            if state.mods[index].status == status {
                tracing::debug!(mod_name, ?status, "mod already in requested state");
                return Ok(());
            }

            let target_dir = match status {
                ModStatus::Enabled => self.layout.mods_dir(),
                ModStatus::Disabled => self.layout.disabled_mods_dir(),
            }
            .join(mod_name);
            if target_dir.exists() {
                return Err(Error::Other(format!(
                    "cannot move {mod_name}: {target_dir} already exists"
                )));
            }
            self.layout.move_dir(&state.mods[index].dir, &target_dir)?;

            let discovery = ModDiscovery::new(self.store.as_ref(), &self.normalizer);
            let reloaded = discovery.load_mod(&target_dir, status)?;

            match status {
                ModStatus::Disabled => {
                    state.files.retain(|f| f.mod_name != mod_name);
                    state.conflicts.remove_mod(mod_name);
                }
                ModStatus::Enabled => {
                    state.files.extend(reloaded.files.iter().cloned());
                    let ModState {
                        files, conflicts, ..
                    } = &mut *state;
                    conflicts.add_mod(mod_name, &reloaded.files, files);
                }
            }

            state.mods[index] = reloaded;
            let ModState { mods, conflicts, .. } = &mut *state;
            conflicts.refresh_config_bucket(mods);
            conflicts.len()
        };

        tracing::info!(mod_name, ?status, "changed mod status");
        self.events
            .emit(ManagerEvent::ConflictsChanged { conflicts });
        Ok(())
    }

    /// Set the priority order of one conflict bucket.
    pub fn reorder_conflict(&self, identity: &str, order: Vec<String>) -> Result<()> {
        let conflicts = {
            let mut state = self.state.lock().mutex_err()?;
            state.conflicts.reorder(identity, order)?;
            state.conflicts.len()
        };
        self.events
            .emit(ManagerEvent::ConflictsChanged { conflicts });
        Ok(())
    }

    /// Apply saved priority orders to the current conflict set.
    pub fn apply_priorities(&self, saved: &PriorityMap) -> Result<()> {
        self.state
            .lock()
            .mutex_err()?
            .conflicts
            .apply_priorities(saved);
        Ok(())
    }

    pub fn priorities(&self) -> Result<PriorityMap> {
        Ok(self.state.lock().mutex_err()?.conflicts.priorities())
    }

    /// Merge all conflicts of the current state and install the result.
    pub fn merge(&self, options: MergeOptions) -> Result<MergeOutcome> {
        let _operation = self.operation.lock().mutex_err()?;
        let job = {
            let state = self.state.lock().mutex_err()?;
            MergeJob::plan(&state.conflicts, &state.files, &options)
        };

        self.layout.reset_staging()?;

        let report = {
            let mut vanilla = self.vanilla.lock().mutex_err()?;
            let report =
                MergePipeline::new(&self.layout, self.store.as_ref(), self.merge_tool.as_ref())
                    .with_progress(progress_callback(&self.events))
                    .run(&job, &mut vanilla, &options)?;
            if let Err(e) = vanilla.flush() {
                tracing::warn!(error = %e, "failed to save vanilla index");
            }
            report
        };

        let packager = Packager::new(&self.layout, crate::VERSION);
        let packed = packager.pack()?;
        let package = if packed.is_empty() {
            tracing::info!("nothing staged, merged mod left unchanged");
            None
        } else {
            Some(packager.install(&packed, &report.merged_files)?)
        };

        if options.delete_sources_after_merge && !report.merged.is_empty() {
            tracing::info!("source archives changed, rescan to refresh conflicts");
        }

        self.events.emit(ManagerEvent::MergeComplete {
            merged: report.merged.len(),
            skipped: report.skipped.len(),
            archives: package
                .as_ref()
                .map(|p| p.installed.clone())
                .unwrap_or_default(),
        });

        Ok(MergeOutcome { report, package })
    }

    /// Run [`ModManager::scan`] on a background thread. Waits for any
    /// running merge or status change to finish first.
    pub fn spawn_scan(self: &Arc<Self>) -> JoinHandle<Result<ScanSummary>> {
        let manager = Arc::clone(self);
        self.running.fetch_add(1, Ordering::SeqCst);
        std::thread::spawn(move || {
            let result = manager.scan();
            if let Err(e) = &result {
                tracing::error!(error = %e, "background scan failed");
            }
            manager.running.fetch_sub(1, Ordering::SeqCst);
            result
        })
    }

    /// Run [`ModManager::merge`] on a background thread. Waits for any
    /// running scan or status change to finish first.
    pub fn spawn_merge(self: &Arc<Self>, options: MergeOptions) -> JoinHandle<Result<MergeOutcome>> {
        let manager = Arc::clone(self);
        self.running.fetch_add(1, Ordering::SeqCst);
        std::thread::spawn(move || {
            let result = manager.merge(options);
            if let Err(e) = &result {
                tracing::error!(error = %e, "background merge failed");
            }
            manager.running.fetch_sub(1, Ordering::SeqCst);
            result
        })
    }

    /// Save the vanilla index and delete the scratch tree.
    ///
    /// Waits up to [`SHUTDOWN_GRACE`] for background work. Safe to call more
    /// than once; only the first call does anything.
    pub fn shutdown(&self) -> Result<()> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let started = Instant::now();
        while self.running.load(Ordering::SeqCst) > 0 && started.elapsed() < SHUTDOWN_GRACE {
            std::thread::sleep(Duration::from_millis(20));
        }
        if self.running.load(Ordering::SeqCst) > 0 {
            tracing::warn!("background work still running at shutdown");
        }

        let flushed = match self.vanilla.lock() {
            Ok(mut vanilla) => vanilla.flush(),
            Err(e) => Err(Error::StatePoisoned(e.to_string())),
        };
        let removed = self.layout.teardown();

        tracing::info!("mod manager shut down");
        flushed.and(removed)
    }
}

fn progress_callback(events: &EventBus) -> ProgressCallback {
    let events = events.clone();
    Arc::new(move |progress: MergeProgress| {
        events.emit(ManagerEvent::MergeProgress {
            current: progress.current,
            total: progress.total,
            identity: progress.identity,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::write_zip;
    use crate::manifest::{ManifestRecord, MANIFEST_FILE};
    use camino::Utf8Path;
    use std::fs;
    use std::io::Read;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use tempfile::tempdir;

    /// Writes the overwrite over the output, so the last mod in the order wins.
    struct OverwriteTool {
        calls: AtomicUsize,
    }

    impl MergeTool for OverwriteTool {
        fn merge(&self, _base: &Utf8Path, overwrite: &Utf8Path, output: &Utf8Path) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            fs::copy(overwrite, output)?;
            Ok(())
        }
    }

    /// Counts archive listings on top of the zip store.
    #[derive(Default)]
    struct CountingStore {
        inner: ZipStore,
        listings: AtomicUsize,
    }

    impl ArchiveStore for CountingStore {
        fn list_entries(&self, archive: &Utf8Path) -> Result<Vec<String>> {
            self.listings.fetch_add(1, Ordering::SeqCst);
            self.inner.list_entries(archive)
        }

        fn contains_entry(&self, archive: &Utf8Path, entry: &str) -> Result<bool> {
            self.inner.contains_entry(archive, entry)
        }

        fn extract_entry(&self, archive: &Utf8Path, entry: &str, dest: &Utf8Path) -> Result<()> {
            self.inner.extract_entry(archive, entry, dest)
        }

        fn read_entry(&self, archive: &Utf8Path, entry: &str) -> Result<Vec<u8>> {
            self.inner.read_entry(archive, entry)
        }

        fn delete_entry(&self, archive: &Utf8Path, entry: &str) -> Result<()> {
            self.inner.delete_entry(archive, entry)
        }

        fn create_or_replace_entry(
            &self,
            archive: &Utf8Path,
            entry: &str,
            source: &mut dyn Read,
        ) -> Result<()> {
            self.inner.create_or_replace_entry(archive, entry, source)
        }
    }

    fn game_root(dir: &tempfile::TempDir) -> Utf8PathBuf {
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        for sub in ["Mods", "Data", "Localization"] {
            fs::create_dir_all(root.join(sub)).unwrap();
        }
        root
    }

    fn install_mod(root: &Utf8Path, name: &str, archive: &str, entries: &[(&str, &[u8])]) {
        let dir = root.join("Mods").join(name);
        write_zip(&dir.join(archive), entries);
        fs::write(
            dir.join(MANIFEST_FILE),
            format!("<kcd_mod><info><name>{name}</name></info></kcd_mod>"),
        )
        .unwrap();
    }

    fn open(root: &Utf8Path) -> (ModManager, Arc<OverwriteTool>) {
        let tool = Arc::new(OverwriteTool {
            calls: AtomicUsize::new(0),
        });
        let options = ManagerOptions::new(root, tool.clone());
        (ModManager::open(options).unwrap(), tool)
    }

    #[test]
    fn test_open_rejects_non_game_dir() {
        let dir = tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let tool = Arc::new(OverwriteTool {
            calls: AtomicUsize::new(0),
        });
        let err = ModManager::open(ManagerOptions::new(root, tool))
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidGameDir(_)));
    }

    #[test]
    fn test_two_mods_without_vanilla_copy() {
        let dir = tempdir().unwrap();
        let root = game_root(&dir);
        install_mod(&root, "A", "Data/a.pak", &[("libs/table.xml", b"from a")]);
        install_mod(&root, "B", "Data/b.pak", &[("libs/table.xml", b"from b")]);
        let (manager, tool) = open(&root);

        let summary = manager.scan().unwrap();
        assert_eq!(summary.mods, 2);
        assert_eq!(summary.conflicts, 1);

        let outcome = manager.merge(MergeOptions::default()).unwrap();
        assert_eq!(outcome.report.merged, vec!["libs/table.xml"]);
        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);

        let installed = root.join("Mods/zzz_ModMerger/Data/data.pak");
        assert_eq!(
            ZipStore.read_entry(&installed, "libs/table.xml").unwrap(),
            b"from b"
        );

        let manifest = ManifestRecord::read(&root.join("Mods/zzz_ModMerger/mod.manifest"), "x").unwrap();
        assert!(manifest
            .merged_files
            .contains(&"TempFiles/A/Data/libs/table.xml".to_string()));
        assert!(manifest
            .merged_files
            .contains(&"TempFiles/B/Data/libs/table.xml".to_string()));

        manager.shutdown().unwrap();
    }

    #[test]
    fn test_localization_merge_with_vanilla_base() {
        let dir = tempdir().unwrap();
        let root = game_root(&dir);
        write_zip(
            &root.join("Localization/english_xml.pak"),
            &[("text/greeting.xml", b"vanilla")],
        );
        install_mod(
            &root,
            "A",
            "Localization/english_xml.pak",
            &[("text/greeting.xml", b"modded")],
        );
        install_mod(
            &root,
            "B",
            "Localization/english_xml.pak",
            &[("text/greeting.xml", b"modded b")],
        );
        let (manager, tool) = open(&root);
        manager.scan().unwrap();

        let vanilla = manager.layout().vanilla_dir();
        let outcome = manager.merge(MergeOptions::default()).unwrap();
        assert_eq!(outcome.report.merged, vec!["english_xml\\text/greeting.xml"]);
        assert_eq!(tool.calls.load(Ordering::SeqCst), 2);
        assert!(vanilla
            .join("Localization/english_xml/text/greeting.xml")
            .exists());

        let staged = manager
            .layout()
            .staging_localization_dir()
            .join("english_xml/greeting.xml");
        assert_eq!(fs::read(staged).unwrap(), b"modded b");

        manager.shutdown().unwrap();
    }

    #[test]
    fn test_disabling_mod_prunes_its_conflicts() {
        let dir = tempdir().unwrap();
        let root = game_root(&dir);
        install_mod(&root, "A", "Data/a.pak", &[("libs/table.xml", b"a")]);
        install_mod(&root, "B", "Data/b.pak", &[("libs/table.xml", b"b")]);
        let (manager, tool) = open(&root);
        manager.scan().unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        let seen = events.clone();
        manager.subscribe(Arc::new(move |event: &ManagerEvent| seen.lock().unwrap().push(event.clone())));

        manager.change_mod_status("B", ModStatus::Disabled).unwrap();
        assert!(manager.conflicts().unwrap().is_empty());
        assert!(root.join("Disabled_Mods/B/mod.manifest").exists());
        assert_eq!(
            *events.lock().unwrap(),
            vec![ManagerEvent::ConflictsChanged { conflicts: 0 }]
        );

        let outcome = manager.merge(MergeOptions::default()).unwrap();
        assert!(outcome.report.merged.is_empty());
        assert!(outcome.package.is_none());
        assert_eq!(tool.calls.load(Ordering::SeqCst), 0);

        manager.change_mod_status("B", ModStatus::Enabled).unwrap();
        let conflicts = manager.conflicts().unwrap();
        assert_eq!(conflicts.get("libs/table.xml").unwrap(), ["A", "B"]);

        manager.shutdown().unwrap();
    }

    #[test]
    fn test_unknown_mod_status_change() {
        let dir = tempdir().unwrap();
        let root = game_root(&dir);
        let (manager, _) = open(&root);
        manager.scan().unwrap();
        let err = manager
            .change_mod_status("Ghost", ModStatus::Disabled)
            .unwrap_err();
        assert!(err.is_not_found());
        manager.shutdown().unwrap();
    }

    #[test]
    fn test_vanilla_lookup_is_cached() {
        let dir = tempdir().unwrap();
        let root = game_root(&dir);
        for i in 0..3 {
            write_zip(
                &root.join(format!("Data/Tables{i}.pak")),
                &[(format!("libs/t{i}.xml").as_str(), b"t")],
            );
        }
        let layout = DirectoryLayout::new(root.clone());
        layout.initialize().unwrap();
        let store = CountingStore::default();
        let mut resolver = VanillaResolver::open(layout.clone(), &root.join(INDEX_FILE));

        let first = resolver
            .extract_base_path(&store, "libs/t2.xml", None)
            .unwrap();
        assert!(first.is_some());
        assert_eq!(store.listings.load(Ordering::SeqCst), 3);

        let second = resolver
            .extract_base_path(&store, "libs/t2.xml", None)
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(store.listings.load(Ordering::SeqCst), 3);
        assert!(root.join(INDEX_FILE).exists());
    }

    #[test]
    fn test_reorder_changes_merge_order_and_survives_rescan() {
        let dir = tempdir().unwrap();
        let root = game_root(&dir);
        install_mod(&root, "A", "Data/a.pak", &[("libs/table.xml", b"from a")]);
        install_mod(&root, "B", "Data/b.pak", &[("libs/table.xml", b"from b")]);
        let (manager, _) = open(&root);
        manager.scan().unwrap();

        manager
            .reorder_conflict("libs/table.xml", vec!["B".into(), "A".into()])
            .unwrap();
        manager.scan().unwrap();
        assert_eq!(
            manager.priorities().unwrap()["libs/table.xml"],
            vec!["B", "A"]
        );

        manager.merge(MergeOptions::default()).unwrap();
        let staged = manager.layout().staging_data_dir().join("libs/table.xml");
        assert_eq!(fs::read(staged).unwrap(), b"from a");

        manager.shutdown().unwrap();
    }

    #[test]
    fn test_shutdown_removes_scratch_and_is_idempotent() {
        let dir = tempdir().unwrap();
        let root = game_root(&dir);
        let manager = {
            let (manager, _) = open(&root);
            Arc::new(manager)
        };
        let events = Arc::new(Mutex::new(Vec::new()));
        let seen = events.clone();
        manager.subscribe(Arc::new(move |event: &ManagerEvent| seen.lock().unwrap().push(event.clone())));

        let summary = manager.spawn_scan().join().unwrap().unwrap();
        assert_eq!(summary.mods, 0);
        assert!(root.join("ModMerger/TempFiles/Vanilla/Data").is_dir());
        assert_eq!(
            events.lock().unwrap()[0],
            ManagerEvent::ScanComplete {
                mods: 0,
                conflicts: 0
            }
        );

        manager.shutdown().unwrap();
        assert!(!root.join("ModMerger").exists());
        manager.shutdown().unwrap();
    }

    /// Parks inside its first call until released, then overwrites.
    struct GatedTool {
        entered: Mutex<Option<mpsc::Sender<()>>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl MergeTool for GatedTool {
        fn merge(&self, _base: &Utf8Path, overwrite: &Utf8Path, output: &Utf8Path) -> Result<()> {
            if let Some(entered) = self.entered.lock().unwrap().take() {
                entered.send(()).unwrap();
                self.release.lock().unwrap().recv().unwrap();
            }
            fs::copy(overwrite, output)?;
            Ok(())
        }
    }

    #[test]
    fn test_scan_waits_for_running_merge() {
        let dir = tempdir().unwrap();
        let root = game_root(&dir);
        install_mod(&root, "A", "Data/a.pak", &[("libs/table.xml", b"from a")]);
        install_mod(&root, "B", "Data/b.pak", &[("libs/table.xml", b"from b")]);

        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let tool = Arc::new(GatedTool {
            entered: Mutex::new(Some(entered_tx)),
            release: Mutex::new(release_rx),
        });
        let manager = Arc::new(ModManager::open(ManagerOptions::new(&root, tool)).unwrap());
        manager.scan().unwrap();

        let merge = manager.spawn_merge(MergeOptions::default());
        entered_rx.recv().unwrap();

        let scan = manager.spawn_scan();
        std::thread::sleep(Duration::from_millis(100));
        assert!(!scan.is_finished());

        release_tx.send(()).unwrap();
        let outcome = merge.join().unwrap().unwrap();
        assert_eq!(outcome.report.merged, vec!["libs/table.xml"]);
        assert!(outcome.report.skipped.is_empty());
        assert_eq!(
            ZipStore
                .read_entry(&root.join("Mods/zzz_ModMerger/Data/data.pak"), "libs/table.xml")
                .unwrap(),
            b"from b"
        );

        assert_eq!(scan.join().unwrap().unwrap().mods, 2);
        manager.shutdown().unwrap();
    }
}
