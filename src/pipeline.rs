//! Bounded capture pipeline.
//!
//! The capturer produces [`CaptureItem`]s on any number of threads; a
//! single consumer thread owns the [`PageSink`] and turns each item into
//! pages and resources:
//!
//! ```text
//! capturer ──process()──▶ bounded channel ──▶ consumer thread ──▶ PageSink
//!    (rayon)                 (capacity N)          │
//!                                                  └─▶ ErrorCollector (per item)
//! ```
//!
//! A full channel blocks producers. Producers also watch a cancel signal,
//! so a consumer that fails never leaves a producer stuck on a send.
//!
//! Per-item construction errors are collected and do not stop the run.
//! A sink error while registering a page is fatal: the consumer cancels
//! and [`PagesProcessor::wait`] returns it.

use crate::capture::bundle::{Bundle, BundleGroup};
use crate::error::CaptureError;
use crate::fs::{Classifier, FileHandle};
use crossbeam_channel::{Receiver, Sender, bounded, select};
use std::io::{self, Read};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::JoinHandle;
use thiserror::Error;
use tracing::{debug, warn};

/// Default capacity of the item channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 4;

/// A classified unit of work.
#[derive(Debug, Clone)]
pub enum CaptureItem {
    /// Published unchanged.
    CopyFile(FileHandle),
    /// Becomes one page.
    ContentFile(FileHandle),
    /// Becomes one page per language with attached resources.
    BundleGroup(BundleGroup),
}

impl CaptureItem {
    /// Virtual path identifying the item in logs.
    pub fn path(&self) -> &str {
        match self {
            CaptureItem::CopyFile(fi) | CaptureItem::ContentFile(fi) => fi.path(),
            CaptureItem::BundleGroup(group) => group.dir(),
        }
    }
}

/// Errors raised by a [`PageSink`].
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid content: {0}")]
    InvalidContent(String),
    #[error("page already exists: {0}")]
    DuplicatePage(String),
}

/// A child of a bundle page.
#[derive(Debug, Clone, PartialEq)]
pub enum BundledResource<P, R> {
    /// A content file nested in the bundle.
    Page(P),
    Resource(R),
}

/// Page and resource construction, implemented by the site model.
pub trait PageSink: Send + 'static {
    type Page: Send;
    type Resource: Send;

    /// Build a page. `owner` is set for content files nested in a bundle.
    fn new_page(
        &mut self,
        fi: &FileHandle,
        owner: Option<&Self::Page>,
        content: Box<dyn Read + Send>,
    ) -> Result<Self::Page, SinkError>;

    /// Build a bundle resource published under every target base path.
    fn new_resource(
        &mut self,
        fi: &FileHandle,
        owner: &Self::Page,
        target_base_paths: &[String],
    ) -> Result<Self::Resource, SinkError>;

    fn add_resources(
        &mut self,
        owner: &mut Self::Page,
        resources: Vec<BundledResource<Self::Page, Self::Resource>>,
    );

    /// Register a finished page. `replace` is set by partial builds.
    fn add_page(&mut self, page: Self::Page, replace: bool) -> Result<(), SinkError>;

    /// Write raw bytes to an output path.
    fn publish(&mut self, target: &str, content: Box<dyn Read + Send>) -> Result<(), SinkError>;
}

/// Per-item failures of a run, shared between the consumer and the caller.
#[derive(Debug, Clone, Default)]
pub struct ErrorCollector {
    errors: Arc<Mutex<Vec<CaptureError>>>,
}

impl ErrorCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, err: CaptureError) {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(err);
    }

    pub fn len(&self) -> usize {
        self.errors.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain the collected errors.
    pub fn take(&self) -> Vec<CaptureError> {
        std::mem::take(&mut *self.errors.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Processor settings.
#[derive(Debug, Clone)]
pub struct ProcessorOptions {
    pub channel_capacity: usize,
    /// Pages replace existing ones instead of being added.
    pub partial_build: bool,
    pub target_base_paths: Vec<String>,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            partial_build: false,
            target_base_paths: vec![String::new()],
        }
    }
}

impl ProcessorOptions {
    /// Target base paths with duplicates removed, first occurrence kept.
    fn unique_base_paths(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::with_capacity(self.target_base_paths.len());
        for p in &self.target_base_paths {
            if !out.contains(p) {
                out.push(p.clone());
            }
        }
        out
    }
}

/// Cancellation shared by producers and the consumer. Cancelling drops the
/// only sender, which wakes every receiver.
struct CancelToken {
    sender: Mutex<Option<Sender<()>>>,
    receiver: Receiver<()>,
}

impl CancelToken {
    fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            sender: Mutex::new(Some(tx)),
            receiver: rx,
        }
    }

    fn cancel(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn is_cancelled(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

/// The producer side of the pipeline.
pub struct PagesProcessor<S: PageSink> {
    sender: RwLock<Option<Sender<CaptureItem>>>,
    cancel: Arc<CancelToken>,
    consumer: JoinHandle<Result<S, CaptureError>>,
}

impl<S: PageSink> PagesProcessor<S> {
    /// Spawn the consumer thread. It owns `sink` until [`wait`](Self::wait).
    pub fn start(
        sink: S,
        errors: ErrorCollector,
        options: ProcessorOptions,
    ) -> Result<Self, CaptureError> {
        let (tx, rx) = bounded(options.channel_capacity.max(1));
        let cancel = Arc::new(CancelToken::new());
        let consumer = Consumer {
            sink,
            errors,
            partial_build: options.partial_build,
            target_base_paths: options.unique_base_paths(),
        };
        let token = Arc::clone(&cancel);
        let handle = std::thread::Builder::new()
            .name("page-consumer".into())
            .spawn(move || consumer.run(rx, token))
            .map_err(|e| CaptureError::io("spawn page consumer", e))?;

        Ok(Self {
            sender: RwLock::new(Some(tx)),
            cancel,
            consumer: handle,
        })
    }

    /// Hand an item to the consumer, blocking while the channel is full.
    pub fn process(&self, item: CaptureItem) -> Result<(), CaptureError> {
        if self.cancel.is_cancelled() {
            return Err(CaptureError::Cancelled);
        }
        let sender = self
            .sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(CaptureError::Cancelled)?;
        select! {
            send(sender, item) -> res => res.map_err(|_| CaptureError::Cancelled),
            recv(self.cancel.receiver) -> _ => Err(CaptureError::Cancelled),
        }
    }

    /// No more items. The consumer drains what is queued and stops.
    pub fn close(&self) {
        self.sender
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Stop the consumer at its next item and unblock producers.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the consumer and get the sink back, or the error that
    /// stopped it.
    pub fn wait(self) -> Result<S, CaptureError> {
        self.close();
        match self.consumer.join() {
            Ok(result) => result,
            Err(_) => Err(CaptureError::ConsumerPanicked),
        }
    }
}

struct Consumer<S: PageSink> {
    sink: S,
    errors: ErrorCollector,
    partial_build: bool,
    target_base_paths: Vec<String>,
}

impl<S: PageSink> Consumer<S> {
    fn run(mut self, items: Receiver<CaptureItem>, cancel: Arc<CancelToken>) -> Result<S, CaptureError> {
        loop {
            if cancel.is_cancelled() {
                return Err(CaptureError::Cancelled);
            }
            select! {
                recv(items) -> msg => match msg {
                    Ok(item) => {
                        if let Err(err) = self.handle(item) {
                            cancel.cancel();
                            return Err(err);
                        }
                    }
                    Err(_) => break,
                },
                recv(cancel.receiver) -> _ => return Err(CaptureError::Cancelled),
            }
        }
        if cancel.is_cancelled() {
            return Err(CaptureError::Cancelled);
        }
        Ok(self.sink)
    }

    /// Errors returned here are fatal; per-item failures are collected.
    fn handle(&mut self, item: CaptureItem) -> Result<(), CaptureError> {
        debug!(path = item.path(), "processing");
        match item {
            CaptureItem::CopyFile(fi) => {
                let result = fi
                    .open()
                    .map_err(SinkError::from)
                    .and_then(|content| self.sink.publish(fi.path(), content));
                if let Err(err) = result {
                    self.report(&fi, err);
                }
            }
            CaptureItem::ContentFile(fi) => match self.new_page(&fi, None) {
                Ok(page) => self.add_page(page)?,
                Err(err) => self.report(&fi, err),
            },
            CaptureItem::BundleGroup(group) => {
                for bundle in group.bundles.into_values() {
                    let header = bundle.header.clone();
                    match self.page_from_bundle(bundle) {
                        Ok(page) => self.add_page(page)?,
                        Err((fi, err)) => self.report(fi.as_ref().unwrap_or(&header), err),
                    }
                }
            }
        }
        Ok(())
    }

    fn new_page(&mut self, fi: &FileHandle, owner: Option<&S::Page>) -> Result<S::Page, SinkError> {
        let content = fi.open()?;
        self.sink.new_page(fi, owner, content)
    }

    /// On failure, the resource that failed (none for the header itself).
    fn page_from_bundle(
        &mut self,
        bundle: Bundle,
    ) -> Result<S::Page, (Option<FileHandle>, SinkError)> {
        let mut page = self
            .new_page(&bundle.header, None)
            .map_err(|e| (None, e))?;
        if bundle.resources.is_empty() {
            return Ok(page);
        }

        let mut resources = Vec::with_capacity(bundle.resources.len());
        for fi in bundle.resources {
            let resource = match fi.classifier() {
                Some(Classifier::Asset) | None => self
                    .sink
                    .new_resource(&fi, &page, &self.target_base_paths)
                    .map(BundledResource::Resource),
                Some(_) => self.new_page(&fi, Some(&page)).map(BundledResource::Page),
            };
            match resource {
                Ok(r) => resources.push(r),
                Err(e) => return Err((Some(fi), e)),
            }
        }
        self.sink.add_resources(&mut page, resources);
        Ok(page)
    }

    fn add_page(&mut self, page: S::Page) -> Result<(), CaptureError> {
        self.sink
            .add_page(page, self.partial_build)
            .map_err(CaptureError::Fatal)
    }

    fn report(&self, fi: &FileHandle, err: SinkError) {
        warn!(path = fi.path(), error = %err, "failed to build");
        self.errors.push(CaptureError::Sink {
            path: fi.path().to_string(),
            source: err,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::BundleType;
    use crate::fs::Opener;
    use std::collections::BTreeMap;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    struct TestPage {
        path: String,
        lang: String,
        body: String,
        nested: bool,
        children: Vec<String>,
    }

    /// Records everything; fails on demand.
    #[derive(Default)]
    struct RecordingSink {
        pages: Vec<(TestPage, bool)>,
        published: Vec<(String, String)>,
        fail_page: Option<String>,
        fail_add: bool,
        gate: Option<Arc<(Mutex<bool>, std::sync::Condvar)>>,
    }

    impl PageSink for RecordingSink {
        type Page = TestPage;
        type Resource = String;

        fn new_page(
            &mut self,
            fi: &FileHandle,
            owner: Option<&TestPage>,
            mut content: Box<dyn Read + Send>,
        ) -> Result<TestPage, SinkError> {
            if self.fail_page.as_deref() == Some(fi.path()) {
                return Err(SinkError::InvalidContent(fi.path().to_string()));
            }
            let mut body = String::new();
            content.read_to_string(&mut body)?;
            Ok(TestPage {
                path: fi.path().to_string(),
                lang: fi.lang().to_string(),
                body,
                nested: owner.is_some(),
                children: Vec::new(),
            })
        }

        fn new_resource(
            &mut self,
            fi: &FileHandle,
            _owner: &TestPage,
            target_base_paths: &[String],
        ) -> Result<String, SinkError> {
            Ok(format!("{}@{}", fi.path(), target_base_paths.join(",")))
        }

        fn add_resources(
            &mut self,
            owner: &mut TestPage,
            resources: Vec<BundledResource<TestPage, String>>,
        ) {
            for r in resources {
                owner.children.push(match r {
                    BundledResource::Page(p) => format!("page:{}", p.path),
                    BundledResource::Resource(r) => format!("res:{r}"),
                });
            }
        }

        fn add_page(&mut self, page: TestPage, replace: bool) -> Result<(), SinkError> {
            if let Some(gate) = &self.gate {
                let (lock, cvar) = &**gate;
                let mut open = lock.lock().unwrap();
                while !*open {
                    open = cvar.wait(open).unwrap();
                }
            }
            if self.fail_add {
                return Err(SinkError::DuplicatePage(page.path));
            }
            self.pages.push((page, replace));
            Ok(())
        }

        fn publish(
            &mut self,
            target: &str,
            mut content: Box<dyn Read + Send>,
        ) -> Result<(), SinkError> {
            let mut body = String::new();
            content.read_to_string(&mut body)?;
            self.published.push((target.to_string(), body));
            Ok(())
        }
    }

    fn opener(body: &'static str) -> Opener {
        Arc::new(move || -> io::Result<Box<dyn Read + Send>> { Ok(Box::new(Cursor::new(body))) })
    }

    fn handle(path: &str, lang: &str, classifier: Classifier, body: &'static str) -> FileHandle {
        let name = path.rsplit('/').next().unwrap_or(path);
        FileHandle::new(name, false, path, path)
            .with_lang(lang)
            .with_classifier(classifier)
            .with_opener(opener(body))
    }

    fn group() -> BundleGroup {
        let mut bundles = BTreeMap::new();
        for lang in ["de", "en"] {
            bundles.insert(
                lang.to_string(),
                Bundle {
                    header: handle("blog/index.md", lang, Classifier::LeafHeader, "header"),
                    resources: vec![
                        handle("blog/notes.md", lang, Classifier::Content, "notes"),
                        handle("blog/cover.jpg", lang, Classifier::Asset, "jpg"),
                    ],
                },
            );
        }
        BundleGroup {
            bundle_type: BundleType::LeafBundle,
            bundles,
        }
    }

    #[test]
    fn items_become_pages_and_copies() {
        let errors = ErrorCollector::new();
        let proc = PagesProcessor::start(
            RecordingSink::default(),
            errors.clone(),
            ProcessorOptions {
                target_base_paths: vec!["".into(), "amp".into(), "".into()],
                ..Default::default()
            },
        )
        .unwrap();

        proc.process(CaptureItem::CopyFile(handle("static/a.css", "en", Classifier::Asset, "css")))
            .unwrap();
        proc.process(CaptureItem::ContentFile(handle("about.md", "en", Classifier::Content, "about")))
            .unwrap();
        proc.process(CaptureItem::BundleGroup(group())).unwrap();
        proc.close();
        let sink = proc.wait().unwrap();

        assert!(errors.is_empty());
        assert_eq!(sink.published, vec![("static/a.css".to_string(), "css".to_string())]);
        assert_eq!(sink.pages.len(), 3);
        let (about, replace) = &sink.pages[0];
        assert_eq!(about.body, "about");
        assert!(!replace);

        let (de, _) = &sink.pages[1];
        assert_eq!(de.lang, "de");
        assert_eq!(
            de.children,
            vec!["page:blog/notes.md", "res:blog/cover.jpg@,amp"]
        );
    }

    #[test]
    fn per_item_errors_are_collected_not_fatal() {
        let errors = ErrorCollector::new();
        let sink = RecordingSink {
            fail_page: Some("bad.md".into()),
            ..Default::default()
        };
        let proc = PagesProcessor::start(sink, errors.clone(), ProcessorOptions::default()).unwrap();
        proc.process(CaptureItem::ContentFile(handle("bad.md", "en", Classifier::Content, "x")))
            .unwrap();
        proc.process(CaptureItem::ContentFile(handle("good.md", "en", Classifier::Content, "y")))
            .unwrap();
        let sink = proc.wait().unwrap();

        assert_eq!(sink.pages.len(), 1);
        let errs = errors.take();
        assert_eq!(errs.len(), 1);
        assert!(matches!(&errs[0], CaptureError::Sink { path, .. } if path == "bad.md"));
    }

    #[test]
    fn failing_bundle_resource_is_reported_against_the_resource() {
        let errors = ErrorCollector::new();
        let sink = RecordingSink {
            fail_page: Some("blog/notes.md".into()),
            ..Default::default()
        };
        let proc = PagesProcessor::start(sink, errors.clone(), ProcessorOptions::default()).unwrap();
        proc.process(CaptureItem::BundleGroup(group())).unwrap();
        let sink = proc.wait().unwrap();

        assert!(sink.pages.is_empty());
        let errs = errors.take();
        assert_eq!(errs.len(), 2);
        assert!(errs.iter().all(|e| matches!(e, CaptureError::Sink { path, .. } if path == "blog/notes.md")));
    }

    #[test]
    fn missing_opener_is_a_per_item_error() {
        let errors = ErrorCollector::new();
        let proc =
            PagesProcessor::start(RecordingSink::default(), errors.clone(), ProcessorOptions::default())
                .unwrap();
        let bare = FileHandle::new("x.png", false, "x.png", "x.png").with_classifier(Classifier::Asset);
        proc.process(CaptureItem::CopyFile(bare)).unwrap();
        proc.wait().unwrap();
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn partial_build_replaces_pages() {
        let proc = PagesProcessor::start(
            RecordingSink::default(),
            ErrorCollector::new(),
            ProcessorOptions {
                partial_build: true,
                ..Default::default()
            },
        )
        .unwrap();
        proc.process(CaptureItem::ContentFile(handle("a.md", "en", Classifier::Content, "a")))
            .unwrap();
        let sink = proc.wait().unwrap();
        assert!(sink.pages[0].1);
    }

    #[test]
    fn fatal_error_cancels_blocked_producers() {
        let gate = Arc::new((Mutex::new(false), std::sync::Condvar::new()));
        let sink = RecordingSink {
            fail_add: true,
            gate: Some(Arc::clone(&gate)),
            ..Default::default()
        };
        let proc = Arc::new(
            PagesProcessor::start(
                sink,
                ErrorCollector::new(),
                ProcessorOptions {
                    channel_capacity: 1,
                    ..Default::default()
                },
            )
            .unwrap(),
        );

        let done = Arc::new(AtomicBool::new(false));
        let producer = {
            let proc = Arc::clone(&proc);
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                let mut result = Ok(());
                for i in 0..10 {
                    let path = format!("p{i}.md");
                    let fi = FileHandle::new(path.clone(), false, path.clone(), path)
                        .with_classifier(Classifier::Content)
                        .with_opener(opener("x"));
                    result = proc.process(CaptureItem::ContentFile(fi));
                    if result.is_err() {
                        break;
                    }
                }
                done.store(true, Ordering::SeqCst);
                result
            })
        };

        // Let the consumer fail once the producer is likely blocked.
        std::thread::sleep(std::time::Duration::from_millis(50));
        {
            let (lock, cvar) = &*gate;
            *lock.lock().unwrap() = true;
            cvar.notify_all();
        }

        let produced = producer.join().unwrap();
        assert!(done.load(Ordering::SeqCst));
        assert!(matches!(produced, Err(CaptureError::Cancelled)));

        let proc = Arc::try_unwrap(proc).ok().unwrap();
        assert!(matches!(proc.wait(), Err(CaptureError::Fatal(SinkError::DuplicatePage(_)))));
    }

    #[test]
    fn process_after_close_is_cancelled() {
        let proc =
            PagesProcessor::start(RecordingSink::default(), ErrorCollector::new(), ProcessorOptions::default())
                .unwrap();
        proc.close();
        let item = CaptureItem::ContentFile(handle("a.md", "en", Classifier::Content, "a"));
        assert!(matches!(proc.process(item), Err(CaptureError::Cancelled)));
        proc.wait().unwrap();
    }

    #[test]
    fn external_cancel_stops_the_consumer() {
        let proc =
            PagesProcessor::start(RecordingSink::default(), ErrorCollector::new(), ProcessorOptions::default())
                .unwrap();
        proc.cancel();
        let item = CaptureItem::ContentFile(handle("a.md", "en", Classifier::Content, "a"));
        assert!(matches!(proc.process(item), Err(CaptureError::Cancelled)));
        assert!(matches!(proc.wait(), Err(CaptureError::Cancelled)));
    }
}
