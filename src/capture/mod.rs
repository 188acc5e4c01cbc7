//! Capture: walk a source tree and hand classified files downstream.
//!
//! The [`Capturer`] drives a [`Walkway`] over the virtual filesystem. Its
//! pre-visit hook classifies each directory and emits [`CaptureItem`]s:
//!
//! | Directory            | Emitted                                          |
//! |----------------------|--------------------------------------------------|
//! | assets only          | `CopyFile` per file                              |
//! | singles only         | branch header as a bundle, `ContentFile` per page |
//! | leaf bundle          | one `BundleGroup` with the whole subtree         |
//! | branch bundle        | `BundleGroup` of header + direct assets, pages as singles |
//! | not a bundle         | `ContentFile` or `CopyFile` per file             |
//!
//! Leaf bundles stop descent. Other directories recurse, either through the
//! walker itself or by fanning out onto rayon tasks when workers are
//! configured. A saturated pool never blocks: the caller recurses inline.
//!
//! [`PagesCollector`] wires a capture run to a [`PagesProcessor`] and
//! aggregates its errors.

pub mod bundle;
pub mod changes;

pub use bundle::{Bundle, BundleDirs, BundleGroup};
pub use changes::{ChangeResolver, ContentChangeMap, ResolvedChange};

use crate::classify::{
    BundleType, DirState, FileClassifier, classify_dir, sort_bundle_dir,
};
use crate::error::CaptureError;
use crate::fs::{Classifier, FileHandle, MetaFs, to_slash};
use crate::pipeline::{CaptureItem, ErrorCollector, PageSink, PagesProcessor, ProcessorOptions};
use crate::walk::{WalkAction, Walkway, WalkwayConfig, list_dir};
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

/// Receives captured items.
pub trait CaptureHandler: Send + Sync {
    fn handle(&self, item: CaptureItem) -> Result<(), CaptureError>;
}

impl<T: CaptureHandler + ?Sized> CaptureHandler for &T {
    fn handle(&self, item: CaptureItem) -> Result<(), CaptureError> {
        (**self).handle(item)
    }
}

impl<T: CaptureHandler + ?Sized> CaptureHandler for Arc<T> {
    fn handle(&self, item: CaptureItem) -> Result<(), CaptureError> {
        (**self).handle(item)
    }
}

impl<S: PageSink> CaptureHandler for PagesProcessor<S> {
    fn handle(&self, item: CaptureItem) -> Result<(), CaptureError> {
        self.process(item)
    }
}

/// Collects items in memory.
impl CaptureHandler for Mutex<Vec<CaptureItem>> {
    fn handle(&self, item: CaptureItem) -> Result<(), CaptureError> {
        self.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(item);
        Ok(())
    }
}

/// Released on drop.
struct Permit<'a>(&'a AtomicUsize);

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// One capture run. Not reusable across runs: the seen-set lives here.
pub struct Capturer<H: CaptureHandler> {
    fs: Arc<dyn MetaFs>,
    real_fs: Option<Arc<dyn MetaFs>>,
    policy: Arc<dyn FileClassifier>,
    handler: H,
    default_lang: String,
    root: String,
    num_workers: usize,
    permits: AtomicUsize,
    // To prevent symbolic link cycles: visit the same directory only once.
    seen: Mutex<HashSet<PathBuf>>,
    content_changes: Option<Arc<ContentChangeMap>>,
    // Limits the capture to these paths (partial builds).
    filenames: Vec<String>,
}

impl<H: CaptureHandler> Capturer<H> {
    pub fn new(fs: Arc<dyn MetaFs>, policy: Arc<dyn FileClassifier>, handler: H) -> Self {
        Self {
            fs,
            real_fs: None,
            policy,
            handler,
            default_lang: String::new(),
            root: String::new(),
            num_workers: 0,
            permits: AtomicUsize::new(0),
            seen: Mutex::new(HashSet::new()),
            content_changes: None,
            filenames: Vec::new(),
        }
    }

    pub fn real_fs(mut self, real_fs: Arc<dyn MetaFs>) -> Self {
        self.real_fs = Some(real_fs);
        self
    }

    pub fn default_lang(mut self, lang: impl Into<String>) -> Self {
        self.default_lang = lang.into();
        self
    }

    /// Virtual directory to capture from.
    pub fn root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }

    /// Size of the subdirectory fan-out pool. Zero walks sequentially.
    pub fn workers(mut self, n: usize) -> Self {
        self.num_workers = n;
        self.permits = AtomicUsize::new(n);
        self
    }

    pub fn content_changes(mut self, changes: Arc<ContentChangeMap>) -> Self {
        self.content_changes = Some(changes);
        self
    }

    /// Only recapture what owns these paths.
    pub fn filenames(mut self, filenames: Vec<String>) -> Self {
        self.filenames = filenames;
        self
    }

    pub fn capture(&self) -> Result<(), CaptureError> {
        if !self.filenames.is_empty() {
            return self.capture_partial();
        }

        let root = match self.fs.stat(Path::new(&self.root)) {
            Ok(fi) => fi,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(root = %self.root, "nothing to capture");
                return Ok(());
            }
            Err(e) => return Err(CaptureError::io(format!("capture root {}", self.root), e)),
        };
        self.mark_seen(&root);
        self.handle_dir(root)
    }

    fn capture_partial(&self) -> Result<(), CaptureError> {
        let mut filenames = self.filenames.clone();
        // Bundle headers first, so a bundle is rebuilt before its resources
        // are looked at.
        filenames.sort_by(|a, b| {
            let ha = self.policy.is_bundle_header(base_name(a));
            let hb = self.policy.is_bundle_header(base_name(b));
            hb.cmp(&ha).then_with(|| a.cmp(b))
        });

        let mut handled = HashSet::new();
        for filename in &filenames {
            let change = match &self.content_changes {
                Some(changes) => changes.resolve_and_remove(filename),
                None => ResolvedChange {
                    dir: parent_dir(filename).to_string(),
                    path: filename.trim_matches('/').to_string(),
                    bundle_type: BundleType::NotBundle,
                },
            };
            if !handled.insert(change.path.clone()) {
                // Resolving removed the owner this batch just registered again.
                if change.bundle_type != BundleType::NotBundle
                    && let Some(changes) = &self.content_changes
                {
                    changes.add(&change.dir, change.bundle_type);
                }
                continue;
            }

            let fi = match self.fs.stat(Path::new(&change.path)) {
                Ok(fi) => fi,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(path = %change.path, "deleted; skipped");
                    continue;
                }
                Err(e) => return Err(CaptureError::io(change.path, e)),
            };

            let result = match change.bundle_type {
                BundleType::LeafBundle => self.handle_dir(fi),
                BundleType::BranchBundle => self.handle_branch_dir(fi),
                BundleType::NotBundle if fi.is_dir() => self.handle_dir(fi),
                BundleType::NotBundle => self.handle_single(fi),
            };
            match result {
                Err(e) if e.is_not_found() => {
                    debug!(path = %change.path, "removed during capture; skipped");
                }
                other => other?,
            }
        }
        Ok(())
    }

    fn handle_dir(&self, dir: FileHandle) -> Result<(), CaptureError> {
        let mut cfg = WalkwayConfig::new(Arc::clone(&self.fs))
            .info(dir)
            .seen(&self.seen)
            .hook_pre(|dir, path, entries| self.pre_hook(dir, path, entries));
        if let Some(real_fs) = &self.real_fs {
            cfg = cfg.real_fs(Arc::clone(real_fs));
        }
        Walkway::new(cfg).walk()
    }

    /// Drop ignored names and classify the files of a listing.
    fn prepare(&self, entries: Vec<FileHandle>) -> Vec<FileHandle> {
        entries
            .into_iter()
            .filter(|fi| !self.policy.is_ignored(fi.name()))
            .map(|fi| {
                if fi.is_dir() {
                    fi
                } else {
                    let classifier = self.policy.classifier(fi.name());
                    fi.with_classifier(classifier)
                }
            })
            .collect()
    }

    fn pre_hook(
        &self,
        dir: &FileHandle,
        path: &str,
        entries: &mut Vec<FileHandle>,
    ) -> Result<WalkAction, CaptureError> {
        *entries = self.prepare(std::mem::take(entries));

        if dir.is_symlink()
            && let Some(changes) = &self.content_changes
        {
            changes.add_symbolic_link_mapping(&to_slash(dir.filename()), path);
        }

        let class = classify_dir(entries, &*self.policy);
        debug!(path, bundle_type = ?class.bundle_type, state = ?class.state, "classified");

        match (class.state, class.bundle_type) {
            (DirState::AssetsOnly, _) => {
                for fi in files(entries) {
                    self.handler.handle(CaptureItem::CopyFile(fi.clone()))?;
                }
            }
            (DirState::SinglesOnly, _) => self.handle_singles(dir, entries)?,
            (DirState::Default, BundleType::LeafBundle) => {
                self.handle_bundle_leaf(dir, entries)?;
                return Ok(WalkAction::SkipDir);
            }
            (DirState::Default, BundleType::BranchBundle) => {
                self.handle_bundle_branch(dir, entries)?
            }
            (DirState::Default, BundleType::NotBundle) => {
                for fi in files(entries) {
                    self.copy_or_handle_single(fi.clone())?;
                }
            }
        }

        self.descend(entries)
    }

    /// Recurse into the subdirectories of a listing.
    fn descend(&self, entries: &[FileHandle]) -> Result<WalkAction, CaptureError> {
        if self.num_workers == 0 {
            return Ok(WalkAction::Continue);
        }
        let dirs: Vec<FileHandle> = entries.iter().filter(|fi| fi.is_dir()).cloned().collect();
        self.handle_nested_dirs(dirs)?;
        Ok(WalkAction::SkipDir)
    }

    fn handle_nested_dirs(&self, dirs: Vec<FileHandle>) -> Result<(), CaptureError> {
        let first_err: Mutex<Option<CaptureError>> = Mutex::new(None);
        let record = |result: Result<(), CaptureError>| {
            if let Err(e) = result {
                let mut slot = first_err.lock().unwrap_or_else(PoisonError::into_inner);
                if slot.is_none() {
                    *slot = Some(e);
                }
            }
        };

        rayon::scope(|s| {
            for dir in dirs {
                if !self.mark_seen(&dir) {
                    continue;
                }
                match self.try_acquire() {
                    Some(permit) => s.spawn(move |_| {
                        let _permit = permit;
                        record(self.handle_dir(dir));
                    }),
                    // For deeply nested trees, waiting for a permit would deadlock.
                    None => record(self.handle_dir(dir)),
                }
            }
        });

        match first_err.into_inner().unwrap_or_else(PoisonError::into_inner) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn try_acquire(&self) -> Option<Permit<'_>> {
        self.permits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .ok()
            .map(|_| Permit(&self.permits))
    }

    /// Check and mark in one step. False if the directory was seen before.
    fn mark_seen(&self, dir: &FileHandle) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        if seen.insert(dir.filename().to_path_buf()) {
            return true;
        }
        info!(
            path = dir.path(),
            filename = %dir.filename().display(),
            "content dir already processed; skipped to avoid infinite recursion"
        );
        false
    }

    fn copy_or_handle_single(&self, fi: FileHandle) -> Result<(), CaptureError> {
        if fi.classifier() == Some(Classifier::Asset) {
            self.handler.handle(CaptureItem::CopyFile(fi))
        } else {
            self.handler.handle(CaptureItem::ContentFile(fi))
        }
    }

    fn handle_single(&self, fi: FileHandle) -> Result<(), CaptureError> {
        if self.policy.is_ignored(fi.name()) {
            return Ok(());
        }
        let classifier = self.policy.classifier(fi.name());
        self.copy_or_handle_single(fi.with_classifier(classifier))
    }

    fn emit_bundle(&self, dir: &FileHandle, dirs: BundleDirs) -> Result<(), CaptureError> {
        if dirs.is_empty() {
            return Ok(());
        }
        if let Some(changes) = &self.content_changes {
            changes.add(dir.path(), dirs.bundle_type());
        }
        self.handler.handle(CaptureItem::BundleGroup(dirs.into_group()))
    }

    /// A section with only content files: the header is a bundle of its
    /// own, every other file an independent page.
    fn handle_singles(&self, dir: &FileHandle, entries: &[FileHandle]) -> Result<(), CaptureError> {
        let mut dirs = BundleDirs::new(BundleType::BranchBundle, &self.default_lang);
        for fi in files(entries) {
            if fi.classifier() == Some(Classifier::BranchHeader) {
                dirs.add_bundle_header(fi.clone());
            } else {
                self.copy_or_handle_single(fi.clone())?;
            }
        }
        self.emit_bundle(dir, dirs)
    }

    /// Headers and shared assets of a section. Content files directly in
    /// the directory are pages of their own, and subdirectories are
    /// captured on their own.
    fn handle_bundle_branch(
        &self,
        dir: &FileHandle,
        entries: &[FileHandle],
    ) -> Result<(), CaptureError> {
        let mut dirs = BundleDirs::new(BundleType::BranchBundle, &self.default_lang);
        let mut shared = Vec::new();
        for fi in files(entries) {
            match fi.classifier() {
                Some(Classifier::BranchHeader) => dirs.add_bundle_header(fi.clone()),
                Some(Classifier::Asset) | None => shared.push(fi.clone()),
                Some(_) => self.copy_or_handle_single(fi.clone())?,
            }
        }
        for fi in shared {
            dirs.add_bundle_files(fi)?;
        }
        self.emit_bundle(dir, dirs)
    }

    /// Partial update of a branch bundle: only its headers and shared
    /// assets. Falls back to a full directory capture when the directory
    /// is no longer a branch bundle.
    fn handle_branch_dir(&self, dir: FileHandle) -> Result<(), CaptureError> {
        let entries = list_dir(&*self.fs, self.real_fs.as_deref(), &dir)
            .map_err(|e| CaptureError::io(dir.path(), e))?;
        let mut entries = self.prepare(entries);
        entries.sort_by(|a, b| a.name().cmp(b.name()));

        if classify_dir(&entries, &*self.policy).bundle_type != BundleType::BranchBundle {
            return self.handle_dir(dir);
        }

        let mut dirs = BundleDirs::new(BundleType::BranchBundle, &self.default_lang);
        let mut shared = Vec::new();
        for fi in files(&entries) {
            match fi.classifier() {
                Some(Classifier::BranchHeader) => dirs.add_bundle_header(fi.clone()),
                Some(Classifier::Asset) | None => shared.push(fi.clone()),
                Some(_) => {}
            }
        }
        for fi in shared {
            dirs.add_bundle_files(fi)?;
        }
        self.emit_bundle(&dir, dirs)
    }

    /// A page with everything below it as resources.
    fn handle_bundle_leaf(
        &self,
        dir: &FileHandle,
        entries: &mut [FileHandle],
    ) -> Result<(), CaptureError> {
        sort_bundle_dir(entries);
        let bundle_dir = dir.path().to_string();

        let mut collected = Vec::new();
        {
            let mut cfg = WalkwayConfig::new(Arc::clone(&self.fs))
                .info(dir.clone().with_ordered(true))
                .dir_entries(entries.to_vec())
                .seen(&self.seen)
                .hook_pre(|_, _, children| {
                    children.retain(|fi| !self.policy.is_ignored(fi.name()));
                    Ok(WalkAction::Continue)
                })
                .walk_fn(|fi| {
                    if !fi.is_dir() {
                        collected.push(fi.clone());
                    }
                    Ok(WalkAction::Continue)
                });
            if let Some(real_fs) = &self.real_fs {
                cfg = cfg.real_fs(Arc::clone(real_fs));
            }
            Walkway::new(cfg).walk()?;
        }

        // Only `index.*` directly in the bundle directory owns it. Anything
        // else is a content page or an asset of the bundle.
        let collected: Vec<FileHandle> = collected
            .into_iter()
            .map(|fi| {
                let owner = fi.dir() == bundle_dir
                    && fi.classifier() == Some(Classifier::LeafHeader);
                if owner {
                    return fi;
                }
                let classifier = if self.policy.classify(fi.name()).1 {
                    Classifier::Content
                } else {
                    Classifier::Asset
                };
                fi.with_classifier(classifier)
            })
            .collect();

        let mut dirs = BundleDirs::new(BundleType::LeafBundle, &self.default_lang);
        for fi in collected.iter().filter(|fi| fi.classifier() == Some(Classifier::LeafHeader)) {
            dirs.add_bundle_header(fi.clone());
        }
        for fi in collected.iter().filter(|fi| fi.classifier() == Some(Classifier::Content)) {
            dirs.add_bundle_content_file(fi.clone())?;
        }
        for fi in collected.iter().filter(|fi| fi.classifier() == Some(Classifier::Asset)) {
            dirs.add_bundle_files(fi.clone())?;
        }
        self.emit_bundle(dir, dirs)
    }
}

fn files(entries: &[FileHandle]) -> impl Iterator<Item = &FileHandle> {
    entries.iter().filter(|fi| !fi.is_dir())
}

fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn parent_dir(path: &str) -> &str {
    let path = path.trim_matches('/');
    match path.rfind('/') {
        Some(i) => &path[..i],
        None => "",
    }
}

// =============================================================================
// PagesCollector
// =============================================================================

/// Settings of a [`PagesCollector`].
#[derive(Debug, Clone)]
pub struct CollectorOptions {
    pub root: String,
    pub default_lang: String,
    pub num_workers: usize,
    pub processor: ProcessorOptions,
}

impl Default for CollectorOptions {
    fn default() -> Self {
        Self {
            root: String::new(),
            default_lang: "en".to_string(),
            num_workers: 0,
            processor: ProcessorOptions::default(),
        }
    }
}

/// Outcome of a collector run.
#[derive(Debug)]
pub struct CaptureReport<S> {
    pub sink: S,
    /// Per-item failures tolerated by a partial run.
    pub errors: Vec<CaptureError>,
}

/// Runs captures into a page sink. Keeps the change map between runs so
/// partial captures can find the owners of changed files.
pub struct PagesCollector {
    fs: Arc<dyn MetaFs>,
    real_fs: Option<Arc<dyn MetaFs>>,
    policy: Arc<dyn FileClassifier>,
    options: CollectorOptions,
    changes: Arc<ContentChangeMap>,
}

impl PagesCollector {
    pub fn new(
        fs: Arc<dyn MetaFs>,
        policy: Arc<dyn FileClassifier>,
        options: CollectorOptions,
    ) -> Self {
        let changes = Arc::new(ContentChangeMap::new(Arc::clone(&policy)));
        Self {
            fs,
            real_fs: None,
            policy,
            options,
            changes,
        }
    }

    pub fn real_fs(mut self, real_fs: Arc<dyn MetaFs>) -> Self {
        self.real_fs = Some(real_fs);
        self
    }

    pub fn changes(&self) -> &ContentChangeMap {
        &self.changes
    }

    /// Full one-shot capture. Any per-item failure fails the run.
    pub fn collect<S: PageSink>(&self, sink: S) -> Result<CaptureReport<S>, CaptureError> {
        let report = self.run(sink, Vec::new(), false)?;
        if !report.errors.is_empty() {
            return Err(CaptureError::Partial(report.errors));
        }
        Ok(report)
    }

    /// Recapture what owns `filenames`. Per-item failures are returned in
    /// the report alongside the updated sink.
    pub fn collect_partial<S: PageSink>(
        &self,
        sink: S,
        filenames: Vec<String>,
    ) -> Result<CaptureReport<S>, CaptureError> {
        self.run(sink, filenames, true)
    }

    fn run<S: PageSink>(
        &self,
        sink: S,
        filenames: Vec<String>,
        partial: bool,
    ) -> Result<CaptureReport<S>, CaptureError> {
        let errors = ErrorCollector::new();
        let processor = PagesProcessor::start(
            sink,
            errors.clone(),
            ProcessorOptions {
                partial_build: partial,
                ..self.options.processor.clone()
            },
        )?;

        let result = {
            let mut capturer = Capturer::new(Arc::clone(&self.fs), Arc::clone(&self.policy), &processor)
                .default_lang(&self.options.default_lang)
                .root(&self.options.root)
                .workers(self.options.num_workers)
                .content_changes(Arc::clone(&self.changes))
                .filenames(filenames);
            if let Some(real_fs) = &self.real_fs {
                capturer = capturer.real_fs(Arc::clone(real_fs));
            }
            capturer.capture()
        };
        if result.is_err() {
            processor.cancel();
        }
        processor.close();

        let sink = match (result, processor.wait()) {
            (Err(e), Err(CaptureError::Cancelled)) => return Err(e),
            (_, Err(fatal)) => return Err(fatal),
            (Err(e), Ok(_)) => return Err(e),
            (Ok(()), Ok(sink)) => sink,
        };
        let errors = errors.take();
        info!(errors = errors.len(), partial, "capture done");
        Ok(CaptureReport { sink, errors })
    }
}
