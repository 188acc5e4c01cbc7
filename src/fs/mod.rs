//! Virtual filesystem layer.
//!
//! Two levels of abstraction:
//!
//! - [`Filesystem`] is the raw capability the core assumes already exists:
//!   stat (following or not following symlinks), list a directory, open a
//!   file and resolve a symlink target. [`OsFs`] is the on-disk version,
//!   [`MemoryFs`] an in-memory one with symlink support used by tests.
//! - [`MetaFs`] returns [`FileHandle`]s instead of raw metadata. [`SourceFs`]
//!   lifts a [`Filesystem`] into a [`MetaFs`]; the [`decorators`] and
//!   [`rootmapping`] modules stack further metadata on top.
//!
//! ```text
//! OsFs ─▶ SourceFs ─▶ BasePathFs ─▶ RootMappingFs ─▶ LanguageFs ─▶ walker
//! ```

pub mod decorators;
pub mod meta;
pub mod rootmapping;

pub use decorators::{BasePathFs, DecoratorFs, LanguageFs, decorate_dirs};
pub use meta::{Classifier, FileHandle, Opener};
pub use rootmapping::{RootMapping, RootMappingFs, RootMeta};

use std::collections::HashMap;
use std::io::{self, Cursor, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Raw metadata for one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawMetadata {
    pub is_dir: bool,
    pub is_symlink: bool,
    pub len: u64,
}

/// The underlying filesystem capability.
pub trait Filesystem: Send + Sync {
    /// Stat, following symlinks.
    fn metadata(&self, path: &Path) -> io::Result<RawMetadata>;

    /// Stat without following a trailing symlink.
    fn symlink_metadata(&self, path: &Path) -> io::Result<RawMetadata>;

    /// Names of the entries in a directory, unsorted.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<String>>;

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>>;

    /// Resolve all symlinks and relative components.
    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>;
}

/// A filesystem returning enriched [`FileHandle`]s.
pub trait MetaFs: Send + Sync {
    fn stat(&self, name: &Path) -> io::Result<FileHandle>;

    /// Entries of a directory, unsorted.
    fn read_dir(&self, name: &Path) -> io::Result<Vec<FileHandle>>;

    fn open(&self, name: &Path) -> io::Result<Box<dyn Read + Send>>;
}

/// Slash-separated rendering of a path, without leading or trailing slash.
pub fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Join two slash-separated virtual paths.
pub fn join_virtual(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), name)
    }
}

// =============================================================================
// OsFs
// =============================================================================

/// The operating system filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsFs;

fn raw_metadata(m: std::fs::Metadata) -> RawMetadata {
    RawMetadata {
        is_dir: m.is_dir(),
        is_symlink: m.file_type().is_symlink(),
        len: m.len(),
    }
}

impl Filesystem for OsFs {
    fn metadata(&self, path: &Path) -> io::Result<RawMetadata> {
        std::fs::metadata(path).map(raw_metadata)
    }

    fn symlink_metadata(&self, path: &Path) -> io::Result<RawMetadata> {
        std::fs::symlink_metadata(path).map(raw_metadata)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<String>> {
        std::fs::read_dir(path)?
            .map(|e| e.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect()
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(std::fs::File::open(path)?))
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        std::fs::canonicalize(path)
    }
}

// =============================================================================
// MemoryFs
// =============================================================================

const MAX_SYMLINK_HOPS: usize = 40;

#[derive(Debug, Clone)]
enum Entry {
    File(Vec<u8>),
    Directory,
    Symlink(PathBuf),
}

/// In-memory filesystem with symlinks.
///
/// Paths are relative to the filesystem root; a leading `/` is ignored.
/// Thread-safe via an internal `RwLock`.
#[derive(Debug)]
pub struct MemoryFs {
    entries: RwLock<HashMap<PathBuf, Entry>>,
}

impl Default for MemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFs {
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        entries.insert(PathBuf::new(), Entry::Directory);
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Remove `.`, `..` and root components.
    fn normalize(path: &Path) -> PathBuf {
        let mut result = PathBuf::new();
        for component in path.components() {
            match component {
                Component::ParentDir => {
                    result.pop();
                }
                Component::Normal(s) => result.push(s),
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            }
        }
        result
    }

    fn lock_err() -> io::Error {
        io::Error::other("lock poisoned")
    }

    fn not_found(path: &Path) -> io::Error {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("not found: {}", path.display()),
        )
    }

    /// Write a file, creating parent directories.
    pub fn write_file(&self, path: impl AsRef<Path>, data: impl AsRef<[u8]>) -> io::Result<()> {
        let path = Self::normalize(path.as_ref());
        self.insert(path, Entry::File(data.as_ref().to_vec()))
    }

    /// Create a directory and its parents.
    pub fn mkdir(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let path = Self::normalize(path.as_ref());
        self.insert(path, Entry::Directory)
    }

    /// Create a symlink at `link` pointing to `target`. A relative target is
    /// resolved against the link's directory.
    pub fn symlink(&self, target: impl AsRef<Path>, link: impl AsRef<Path>) -> io::Result<()> {
        let link = Self::normalize(link.as_ref());
        self.insert(link, Entry::Symlink(target.as_ref().to_path_buf()))
    }

    /// Remove a single entry.
    pub fn remove(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let path = Self::normalize(path.as_ref());
        let mut entries = self.entries.write().map_err(|_| Self::lock_err())?;
        entries
            .remove(&path)
            .map(|_| ())
            .ok_or_else(|| Self::not_found(&path))
    }

    fn insert(&self, path: PathBuf, entry: Entry) -> io::Result<()> {
        let mut entries = self.entries.write().map_err(|_| Self::lock_err())?;
        let mut current = PathBuf::new();
        for component in path.parent().into_iter().flat_map(|p| p.components()) {
            if let Component::Normal(s) = component {
                current.push(s);
                entries.entry(current.clone()).or_insert(Entry::Directory);
            }
        }
        if let (Some(Entry::Directory), Entry::File(_)) = (entries.get(&path), &entry) {
            return Err(io::Error::new(
                io::ErrorKind::IsADirectory,
                format!("is a directory: {}", path.display()),
            ));
        }
        entries.insert(path, entry);
        Ok(())
    }

    fn resolve(
        entries: &HashMap<PathBuf, Entry>,
        path: &Path,
        follow_last: bool,
        hops: &mut usize,
    ) -> io::Result<PathBuf> {
        let normalized = Self::normalize(path);
        let components: Vec<_> = normalized.components().collect();
        let mut current = PathBuf::new();
        for (i, component) in components.iter().enumerate() {
            current.push(component);
            let last = i + 1 == components.len();
            if last && !follow_last {
                break;
            }
            if let Some(Entry::Symlink(target)) = entries.get(&current) {
                *hops += 1;
                if *hops > MAX_SYMLINK_HOPS {
                    return Err(io::Error::other(format!(
                        "too many levels of symbolic links: {}",
                        path.display()
                    )));
                }
                let parent = current.parent().map(Path::to_path_buf).unwrap_or_default();
                let joined = if target.has_root() {
                    target.clone()
                } else {
                    parent.join(target)
                };
                current = Self::resolve(entries, &joined, true, hops)?;
            }
        }
        Ok(current)
    }

    fn lookup(&self, path: &Path, follow_last: bool) -> io::Result<(PathBuf, Entry)> {
        let entries = self.entries.read().map_err(|_| Self::lock_err())?;
        let resolved = Self::resolve(&entries, path, follow_last, &mut 0)?;
        let entry = entries
            .get(&resolved)
            .cloned()
            .ok_or_else(|| Self::not_found(path))?;
        Ok((resolved, entry))
    }

    fn raw(entry: &Entry) -> RawMetadata {
        match entry {
            Entry::File(data) => RawMetadata {
                is_dir: false,
                is_symlink: false,
                len: data.len() as u64,
            },
            Entry::Directory => RawMetadata {
                is_dir: true,
                is_symlink: false,
                len: 0,
            },
            Entry::Symlink(_) => RawMetadata {
                is_dir: false,
                is_symlink: true,
                len: 0,
            },
        }
    }
}

impl Filesystem for MemoryFs {
    fn metadata(&self, path: &Path) -> io::Result<RawMetadata> {
        self.lookup(path, true).map(|(_, e)| Self::raw(&e))
    }

    fn symlink_metadata(&self, path: &Path) -> io::Result<RawMetadata> {
        self.lookup(path, false).map(|(_, e)| Self::raw(&e))
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<String>> {
        let (resolved, entry) = self.lookup(path, true)?;
        if !matches!(entry, Entry::Directory) {
            return Err(io::Error::new(
                io::ErrorKind::NotADirectory,
                format!("not a directory: {}", path.display()),
            ));
        }
        let entries = self.entries.read().map_err(|_| Self::lock_err())?;
        Ok(entries
            .keys()
            .filter(|p| !p.as_os_str().is_empty() && p.parent() == Some(resolved.as_path()))
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect())
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        match self.lookup(path, true)? {
            (_, Entry::File(data)) => Ok(Box::new(Cursor::new(data))),
            _ => Err(io::Error::new(
                io::ErrorKind::IsADirectory,
                format!("is a directory: {}", path.display()),
            )),
        }
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        self.lookup(path, true).map(|(resolved, _)| resolved)
    }
}

// =============================================================================
// SourceFs
// =============================================================================

/// Lifts a raw [`Filesystem`] into a [`MetaFs`].
///
/// Every handle gets its real filename and an opener bound to that real
/// location. Symlinks are detected with a non-following stat and resolved
/// to their target; directories are canonicalized so that the walker's
/// seen-set compares like with like.
#[derive(Clone)]
pub struct SourceFs {
    fs: Arc<dyn Filesystem>,
}

impl SourceFs {
    pub fn new(fs: Arc<dyn Filesystem>) -> Self {
        Self { fs }
    }

    pub fn os() -> Self {
        Self::new(Arc::new(OsFs))
    }

    fn opener(&self, filename: PathBuf) -> Opener {
        let fs = Arc::clone(&self.fs);
        Arc::new(move || fs.open(&filename))
    }
}

impl MetaFs for SourceFs {
    fn stat(&self, name: &Path) -> io::Result<FileHandle> {
        let lstat = self.fs.symlink_metadata(name)?;
        let base = name
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let (is_dir, filename) = if lstat.is_symlink {
            let target = self.fs.canonicalize(name).map_err(|e| {
                io::Error::new(
                    e.kind(),
                    format!("cannot read symbolic link {}: {e}", name.display()),
                )
            })?;
            let meta = self.fs.metadata(&target)?;
            (meta.is_dir, target)
        } else if lstat.is_dir {
            let real = self
                .fs
                .canonicalize(name)
                .unwrap_or_else(|_| name.to_path_buf());
            (true, real)
        } else {
            (false, name.to_path_buf())
        };

        let opener = self.opener(filename.clone());
        Ok(FileHandle::new(base, is_dir, to_slash(name), filename)
            .with_symlink(lstat.is_symlink)
            .with_opener(opener))
    }

    fn read_dir(&self, name: &Path) -> io::Result<Vec<FileHandle>> {
        let mut out = Vec::new();
        for entry in self.fs.read_dir(name)? {
            match self.stat(&name.join(&entry)) {
                Ok(fi) => out.push(fi),
                // Deleted between listing and stat.
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    fn open(&self, name: &Path) -> io::Result<Box<dyn Read + Send>> {
        self.fs.open(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(mut r: Box<dyn Read + Send>) -> String {
        let mut s = String::new();
        r.read_to_string(&mut s).unwrap();
        s
    }

    #[test]
    fn memory_fs_creates_parent_dirs() {
        let fs = MemoryFs::new();
        fs.write_file("content/blog/index.md", "hello").unwrap();

        assert!(fs.metadata(Path::new("content")).unwrap().is_dir);
        assert!(fs.metadata(Path::new("content/blog")).unwrap().is_dir);
        let mut names = fs.read_dir(Path::new("content/blog")).unwrap();
        names.sort();
        assert_eq!(names, vec!["index.md"]);
    }

    #[test]
    fn memory_fs_follows_symlinks() {
        let fs = MemoryFs::new();
        fs.write_file("real/a.txt", "a").unwrap();
        fs.symlink("/real", "content/link").unwrap();

        assert!(fs.symlink_metadata(Path::new("content/link")).unwrap().is_symlink);
        assert!(fs.metadata(Path::new("content/link")).unwrap().is_dir);
        assert_eq!(
            fs.canonicalize(Path::new("content/link/a.txt")).unwrap(),
            PathBuf::from("real/a.txt")
        );
        assert_eq!(read_all(fs.open(Path::new("content/link/a.txt")).unwrap()), "a");
    }

    #[test]
    fn memory_fs_relative_symlink_to_ancestor() {
        let fs = MemoryFs::new();
        fs.mkdir("a/b").unwrap();
        fs.symlink("..", "a/b/up").unwrap();
        assert_eq!(
            fs.canonicalize(Path::new("a/b/up")).unwrap(),
            PathBuf::from("a")
        );
    }

    #[test]
    fn memory_fs_symlink_loop_is_an_error() {
        let fs = MemoryFs::new();
        fs.symlink("/b", "a").unwrap();
        fs.symlink("/a", "b").unwrap();
        assert!(fs.metadata(Path::new("a")).is_err());
    }

    #[test]
    fn source_fs_resolves_symlink_targets() {
        let mem = MemoryFs::new();
        mem.write_file("themes/t/data.json", "{}").unwrap();
        mem.symlink("/themes/t", "content/shared").unwrap();
        let fs = SourceFs::new(Arc::new(mem));

        let fi = fs.stat(Path::new("content/shared")).unwrap();
        assert!(fi.is_symlink());
        assert!(fi.is_dir());
        assert_eq!(fi.filename(), Path::new("themes/t"));
        assert_eq!(fi.path(), "content/shared");
    }

    #[test]
    fn source_fs_dangling_symlink_is_io_error() {
        let mem = MemoryFs::new();
        mem.symlink("/nowhere", "content/broken").unwrap();
        let fs = SourceFs::new(Arc::new(mem));

        let err = fs.stat(Path::new("content/broken")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(err.to_string().contains("cannot read symbolic link"));
    }

    #[test]
    fn source_fs_opener_reads_real_location() {
        let mem = MemoryFs::new();
        mem.write_file("real/page.md", "body").unwrap();
        mem.symlink("/real/page.md", "content/page.md").unwrap();
        let fs = SourceFs::new(Arc::new(mem));

        let fi = fs.stat(Path::new("content/page.md")).unwrap();
        assert_eq!(fi.filename(), Path::new("real/page.md"));
        assert_eq!(read_all(fi.open().unwrap()), "body");
    }

    #[test]
    fn repeated_stats_are_identical() {
        let mem = MemoryFs::new();
        mem.write_file("content/a.md", "a").unwrap();
        let fs = SourceFs::new(Arc::new(mem));

        let a = fs.stat(Path::new("content/a.md")).unwrap();
        let b = fs.stat(Path::new("content/a.md")).unwrap();
        assert_eq!(a.path(), b.path());
        assert_eq!(a.filename(), b.filename());
        assert_eq!(a.is_dir(), b.is_dir());
    }

    #[test]
    fn to_slash_drops_root_and_curdir() {
        assert_eq!(to_slash(Path::new("/a/./b/c.md")), "a/b/c.md");
        assert_eq!(join_virtual("", "a"), "a");
        assert_eq!(join_virtual("a/", "b"), "a/b");
    }
}
