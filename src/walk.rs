//! One-shot depth-first directory walker.
//!
//! A [`Walkway`] visits a virtual directory tree in sorted name order,
//! calling an optional pre-visit hook with each directory's listing and a
//! per-entry callback. The hook can reorder, filter or reclassify the
//! listing, and either of them can stop descent with
//! [`WalkAction::SkipDir`].
//!
//! Symlinks are followed only inside project-owned trees, and they are
//! listed through the real filesystem rather than the virtual one, since
//! overlay semantics do not apply outside the mounted roots. A seen-set of
//! resolved real directory paths caps symlink cycles at one visit per
//! directory.

use crate::error::CaptureError;
use crate::fs::{FileHandle, MetaFs, join_virtual};
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

/// What to do after a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkAction {
    Continue,
    /// Do not descend below this directory. Not an error.
    SkipDir,
}

/// Called for every visited entry, directories before their children.
pub type WalkFn<'a> = Box<dyn FnMut(&FileHandle) -> Result<WalkAction, CaptureError> + 'a>;

/// Called for every directory with its virtual path and sorted listing.
pub type HookPre<'a> = Box<
    dyn FnMut(&FileHandle, &str, &mut Vec<FileHandle>) -> Result<WalkAction, CaptureError> + 'a,
>;

/// Walker setup.
pub struct WalkwayConfig<'a> {
    fs: Arc<dyn MetaFs>,
    real_fs: Option<Arc<dyn MetaFs>>,
    root: String,
    info: Option<FileHandle>,
    dir_entries: Option<Vec<FileHandle>>,
    hook_pre: Option<HookPre<'a>>,
    walk_fn: Option<WalkFn<'a>>,
    seen: Option<&'a Mutex<HashSet<PathBuf>>>,
}

impl<'a> WalkwayConfig<'a> {
    pub fn new(fs: Arc<dyn MetaFs>) -> Self {
        Self {
            fs,
            real_fs: None,
            root: String::new(),
            info: None,
            dir_entries: None,
            hook_pre: None,
            walk_fn: None,
            seen: None,
        }
    }

    /// Filesystem used to list symlinked directories.
    pub fn real_fs(mut self, real_fs: Arc<dyn MetaFs>) -> Self {
        self.real_fs = Some(real_fs);
        self
    }

    /// Virtual path to start from, when no start handle is given.
    pub fn root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }

    /// Start from an existing directory handle.
    pub fn info(mut self, info: FileHandle) -> Self {
        self.info = Some(info);
        self
    }

    /// Listing of the start directory, used as is instead of reading it.
    pub fn dir_entries(mut self, entries: Vec<FileHandle>) -> Self {
        self.dir_entries = Some(entries);
        self
    }

    /// Share the visited directories with other walks of the same run.
    pub fn seen(mut self, seen: &'a Mutex<HashSet<PathBuf>>) -> Self {
        self.seen = Some(seen);
        self
    }

    pub fn hook_pre<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&FileHandle, &str, &mut Vec<FileHandle>) -> Result<WalkAction, CaptureError> + 'a,
    {
        self.hook_pre = Some(Box::new(hook));
        self
    }

    pub fn walk_fn<F>(mut self, walk_fn: F) -> Self
    where
        F: FnMut(&FileHandle) -> Result<WalkAction, CaptureError> + 'a,
    {
        self.walk_fn = Some(Box::new(walk_fn));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WalkState {
    Unstarted,
    Walking,
    Done,
}

enum Seen<'a> {
    Owned(HashSet<PathBuf>),
    Shared(&'a Mutex<HashSet<PathBuf>>),
}

impl Seen<'_> {
    /// False if `filename` was already marked.
    fn mark(&mut self, filename: &Path) -> bool {
        match self {
            Seen::Owned(set) => set.insert(filename.to_path_buf()),
            Seen::Shared(set) => set
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(filename.to_path_buf()),
        }
    }
}

pub struct Walkway<'a> {
    cfg: WalkwayConfig<'a>,
    state: WalkState,
    // We may traverse symbolic links and bite ourselves.
    seen: Seen<'a>,
}

impl<'a> Walkway<'a> {
    pub fn new(mut cfg: WalkwayConfig<'a>) -> Self {
        let seen = match cfg.seen.take() {
            Some(shared) => Seen::Shared(shared),
            None => Seen::Owned(HashSet::new()),
        };
        Self {
            cfg,
            state: WalkState::Unstarted,
            seen,
        }
    }

    /// Walk the tree. A walkway can only be walked once.
    pub fn walk(&mut self) -> Result<(), CaptureError> {
        if self.state != WalkState::Unstarted {
            return Err(CaptureError::WalkerReused);
        }
        self.state = WalkState::Walking;
        let result = self.walk_root();
        self.state = WalkState::Done;
        result
    }

    fn walk_root(&mut self) -> Result<(), CaptureError> {
        let info = match self.cfg.info.take() {
            Some(fi) => fi,
            None => self
                .cfg
                .fs
                .stat(Path::new(&self.cfg.root))
                .map_err(|e| CaptureError::io(format!("walk: {}", self.cfg.root), e))?,
        };
        if !info.is_dir() {
            return Err(CaptureError::NotADirectory(info.path().to_string()));
        }
        self.seen.mark(info.filename());
        let entries = self.cfg.dir_entries.take();
        self.walk_dir(info, entries)
    }

    fn walk_dir(
        &mut self,
        info: FileHandle,
        entries: Option<Vec<FileHandle>>,
    ) -> Result<(), CaptureError> {
        if let Some(walk_fn) = self.cfg.walk_fn.as_mut()
            && walk_fn(&info)? == WalkAction::SkipDir
        {
            return Ok(());
        }
        if !info.is_dir() {
            return Ok(());
        }

        let mut entries = match entries {
            Some(entries) => entries,
            None => {
                if info.is_symlink() && !info.is_project() {
                    debug!(path = info.path(), "not following symlink outside the project");
                    return Ok(());
                }
                let mut entries = list_dir(&*self.cfg.fs, self.cfg.real_fs.as_deref(), &info)
                    .map_err(|e| CaptureError::io(format!("walk: open {}", info.path()), e))?;
                if !info.is_ordered() {
                    entries.sort_by(|a, b| a.name().cmp(b.name()));
                }
                entries
            }
        };

        if let Some(hook) = self.cfg.hook_pre.as_mut()
            && hook(&info, info.path(), &mut entries)? == WalkAction::SkipDir
        {
            return Ok(());
        }

        for fi in entries {
            if fi.is_dir() && !self.seen.mark(fi.filename()) {
                info!(
                    path = fi.path(),
                    filename = %fi.filename().display(),
                    "directory already walked; skipped to avoid infinite recursion"
                );
                continue;
            }
            self.walk_dir(fi, None)?;
        }
        Ok(())
    }
}

/// List a directory handle. Symlinked directories are read through
/// `real_fs` when given, with their children placed under the link's
/// virtual path and inheriting its language and ownership.
pub fn list_dir(
    fs: &dyn MetaFs,
    real_fs: Option<&dyn MetaFs>,
    dir: &FileHandle,
) -> io::Result<Vec<FileHandle>> {
    match real_fs {
        Some(real) if dir.is_symlink() => Ok(real
            .read_dir(dir.filename())?
            .into_iter()
            .map(|fi| {
                let path = join_virtual(dir.path(), fi.name());
                let fi = fi.with_path(path).with_project(dir.is_project());
                if !fi.is_lang_explicit() && !dir.lang().is_empty() {
                    fi.with_lang(dir.lang().to_string())
                } else {
                    fi
                }
            })
            .collect()),
        _ => fs.read_dir(Path::new(dir.path())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{MemoryFs, RootMeta, SourceFs, decorate_dirs};
    use std::cell::RefCell;

    fn project_fs(mem: MemoryFs) -> Arc<dyn MetaFs> {
        let source: Arc<dyn MetaFs> = Arc::new(SourceFs::new(Arc::new(mem)));
        Arc::new(decorate_dirs(
            source,
            RootMeta {
                lang: String::new(),
                is_project: true,
            },
        ))
    }

    fn tree() -> MemoryFs {
        let mem = MemoryFs::new();
        mem.write_file("content/b.md", "b").unwrap();
        mem.write_file("content/a/x.md", "x").unwrap();
        mem.write_file("content/a/deep/y.md", "y").unwrap();
        mem.write_file("content/c/z.png", "z").unwrap();
        mem
    }

    fn visited(fs: Arc<dyn MetaFs>, root: &str) -> Vec<String> {
        let paths = RefCell::new(Vec::new());
        let mut w = Walkway::new(WalkwayConfig::new(fs).root(root).walk_fn(|fi| {
            paths.borrow_mut().push(fi.path().to_string());
            Ok(WalkAction::Continue)
        }));
        w.walk().unwrap();
        drop(w);
        paths.into_inner()
    }

    #[test]
    fn walks_depth_first_in_name_order() {
        let paths = visited(project_fs(tree()), "content");
        assert_eq!(
            paths,
            vec![
                "content",
                "content/a",
                "content/a/deep",
                "content/a/deep/y.md",
                "content/a/x.md",
                "content/b.md",
                "content/c",
                "content/c/z.png",
            ]
        );
    }

    #[test]
    fn walking_twice_fails() {
        let mut w = Walkway::new(WalkwayConfig::new(project_fs(tree())).root("content"));
        w.walk().unwrap();
        assert!(matches!(w.walk(), Err(CaptureError::WalkerReused)));
    }

    #[test]
    fn root_must_be_a_directory() {
        let mut w = Walkway::new(WalkwayConfig::new(project_fs(tree())).root("content/b.md"));
        assert!(matches!(w.walk(), Err(CaptureError::NotADirectory(p)) if p == "content/b.md"));
    }

    #[test]
    fn missing_root_is_io_error() {
        let mut w = Walkway::new(WalkwayConfig::new(project_fs(tree())).root("nope"));
        let err = w.walk().unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn hook_skip_dir_stops_descent() {
        let paths = RefCell::new(Vec::new());
        let mut w = Walkway::new(
            WalkwayConfig::new(project_fs(tree()))
                .root("content")
                .hook_pre(|dir, path, entries| {
                    assert_eq!(dir.path(), path);
                    if path == "content/a" {
                        assert_eq!(entries.len(), 2);
                        return Ok(WalkAction::SkipDir);
                    }
                    Ok(WalkAction::Continue)
                })
                .walk_fn(|fi| {
                    paths.borrow_mut().push(fi.path().to_string());
                    Ok(WalkAction::Continue)
                }),
        );
        w.walk().unwrap();
        drop(w);
        let paths = paths.into_inner();
        assert!(paths.contains(&"content/a".to_string()));
        assert!(!paths.iter().any(|p| p.starts_with("content/a/")));
        assert!(paths.contains(&"content/c/z.png".to_string()));
    }

    #[test]
    fn hook_can_filter_the_listing() {
        let paths = RefCell::new(Vec::new());
        let mut w = Walkway::new(
            WalkwayConfig::new(project_fs(tree()))
                .root("content")
                .hook_pre(|_, _, entries| {
                    entries.retain(|fi| fi.name() != "c");
                    Ok(WalkAction::Continue)
                })
                .walk_fn(|fi| {
                    paths.borrow_mut().push(fi.path().to_string());
                    Ok(WalkAction::Continue)
                }),
        );
        w.walk().unwrap();
        drop(w);
        assert!(!paths.into_inner().iter().any(|p| p.starts_with("content/c")));
    }

    #[test]
    fn callback_error_aborts_the_walk() {
        let mut count = 0;
        let mut w = Walkway::new(WalkwayConfig::new(project_fs(tree())).root("content").walk_fn(
            |fi| {
                count += 1;
                if fi.name() == "deep" {
                    return Err(CaptureError::Cancelled);
                }
                Ok(WalkAction::Continue)
            },
        ));
        assert!(matches!(w.walk(), Err(CaptureError::Cancelled)));
        drop(w);
        assert_eq!(count, 3);
    }

    #[test]
    fn walk_fn_skip_dir_is_not_an_error() {
        let paths = RefCell::new(Vec::new());
        let mut w = Walkway::new(WalkwayConfig::new(project_fs(tree())).root("content").walk_fn(
            |fi| {
                paths.borrow_mut().push(fi.path().to_string());
                if fi.name() == "a" {
                    return Ok(WalkAction::SkipDir);
                }
                Ok(WalkAction::Continue)
            },
        ));
        w.walk().unwrap();
        drop(w);
        assert_eq!(
            paths.into_inner(),
            vec!["content", "content/a", "content/b.md", "content/c", "content/c/z.png"]
        );
    }

    #[test]
    fn given_entries_keep_their_order() {
        let fs = project_fs(tree());
        let root = fs.stat(Path::new("content/a")).unwrap().with_ordered(true);
        let mut entries = fs.read_dir(Path::new("content/a")).unwrap();
        entries.sort_by(|a, b| b.name().cmp(a.name()));

        let paths = RefCell::new(Vec::new());
        let mut w = Walkway::new(
            WalkwayConfig::new(fs)
                .info(root)
                .dir_entries(entries)
                .walk_fn(|fi| {
                    paths.borrow_mut().push(fi.path().to_string());
                    Ok(WalkAction::Continue)
                }),
        );
        w.walk().unwrap();
        drop(w);
        assert_eq!(
            paths.into_inner(),
            vec![
                "content/a",
                "content/a/x.md",
                "content/a/deep",
                "content/a/deep/y.md"
            ]
        );
    }

    #[test]
    fn symlink_cycle_is_visited_once() {
        let mem = tree();
        mem.symlink("/content/a", "content/a/deep/loop").unwrap();
        let paths = visited(project_fs(mem), "content");

        assert_eq!(paths.iter().filter(|p| p.ends_with("x.md")).count(), 1);
        assert!(!paths.iter().any(|p| p.starts_with("content/a/deep/loop")));
    }

    #[test]
    fn shared_seen_set_skips_directories_walked_elsewhere() {
        let fs = project_fs(tree());
        let deep = fs.stat(Path::new("content/a/deep")).unwrap();
        let seen = Mutex::new(HashSet::from([deep.filename().to_path_buf()]));

        let paths = RefCell::new(Vec::new());
        let mut w = Walkway::new(WalkwayConfig::new(fs).root("content/a").seen(&seen).walk_fn(
            |fi| {
                paths.borrow_mut().push(fi.path().to_string());
                Ok(WalkAction::Continue)
            },
        ));
        w.walk().unwrap();
        drop(w);

        assert_eq!(paths.into_inner(), vec!["content/a", "content/a/x.md"]);
        assert_eq!(seen.into_inner().unwrap().len(), 2);
    }

    #[test]
    fn symlink_outside_project_is_not_followed() {
        let mem = tree();
        mem.write_file("theme/t.md", "t").unwrap();
        mem.symlink("/theme", "content/linked").unwrap();
        let fs: Arc<dyn MetaFs> = Arc::new(SourceFs::new(Arc::new(mem)));
        let paths = visited(fs, "content");

        assert!(paths.contains(&"content/linked".to_string()));
        assert!(!paths.contains(&"content/linked/t.md".to_string()));
    }

    #[test]
    fn project_symlink_is_read_through_real_fs() {
        let mem = Arc::new(tree());
        mem.write_file("shared/s.md", "s").unwrap();
        mem.symlink("/shared", "content/linked").unwrap();
        let real: Arc<dyn MetaFs> = Arc::new(SourceFs::new(mem.clone()));
        let source: Arc<dyn MetaFs> = Arc::new(SourceFs::new(mem));
        let fs: Arc<dyn MetaFs> = Arc::new(decorate_dirs(
            source,
            RootMeta {
                lang: "de".into(),
                is_project: true,
            },
        ));

        let found = RefCell::new(Vec::new());
        let mut w = Walkway::new(WalkwayConfig::new(fs).real_fs(real).root("content").walk_fn(
            |fi| {
                if fi.name() == "s.md" {
                    found.borrow_mut().push(fi.clone());
                }
                Ok(WalkAction::Continue)
            },
        ));
        w.walk().unwrap();
        drop(w);

        let found = found.into_inner();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path(), "content/linked/s.md");
        assert_eq!(found[0].filename(), Path::new("shared/s.md"));
        assert_eq!(found[0].lang(), "de");
    }
}
