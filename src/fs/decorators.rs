//! Metadata decorators over a [`MetaFs`].
//!
//! Each decorator adds one kind of metadata to every handle returned by
//! `stat` and `read_dir` and leaves `open` alone, so byte content is never
//! affected. Decorators compose by wrapping one another.

use super::{FileHandle, MetaFs, RootMeta, join_virtual, to_slash};
use std::collections::BTreeSet;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Builds a new handle from the one returned by the wrapped filesystem.
/// The second argument is the name the handle was looked up under.
pub type Decorator = Arc<dyn Fn(FileHandle, &Path) -> io::Result<FileHandle> + Send + Sync>;

/// A [`MetaFs`] applying a [`Decorator`] to everything it returns.
#[derive(Clone)]
pub struct DecoratorFs {
    fs: Arc<dyn MetaFs>,
    decorate: Decorator,
}

impl DecoratorFs {
    pub fn new(fs: Arc<dyn MetaFs>, decorate: Decorator) -> Self {
        Self { fs, decorate }
    }
}

impl MetaFs for DecoratorFs {
    fn stat(&self, name: &Path) -> io::Result<FileHandle> {
        let fi = self.fs.stat(name)?;
        (self.decorate)(fi, name)
    }

    fn read_dir(&self, name: &Path) -> io::Result<Vec<FileHandle>> {
        self.fs
            .read_dir(name)?
            .into_iter()
            .map(|fi| {
                let filename = name.join(fi.name());
                (self.decorate)(fi, &filename)
            })
            .collect()
    }

    fn open(&self, name: &Path) -> io::Result<Box<dyn Read + Send>> {
        self.fs.open(name)
    }
}

/// Attach mount metadata (language, project ownership) to directories.
/// Regular files are left as they are.
pub fn decorate_dirs(fs: Arc<dyn MetaFs>, meta: RootMeta) -> DecoratorFs {
    DecoratorFs::new(
        fs,
        Arc::new(move |fi, _| {
            if !fi.is_dir() {
                return Ok(fi);
            }
            Ok(meta.apply(fi))
        }),
    )
}

/// Serves a sub tree of another filesystem, with virtual paths relative to
/// the base directory.
#[derive(Clone)]
pub struct BasePathFs {
    fs: Arc<dyn MetaFs>,
    base: PathBuf,
}

impl BasePathFs {
    pub fn new(fs: Arc<dyn MetaFs>, base: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            base: base.into(),
        }
    }

    fn real_path(&self, name: &Path) -> PathBuf {
        let rel = to_slash(name);
        if rel.is_empty() {
            self.base.clone()
        } else {
            self.base.join(rel)
        }
    }
}

impl MetaFs for BasePathFs {
    fn stat(&self, name: &Path) -> io::Result<FileHandle> {
        Ok(self.fs.stat(&self.real_path(name))?.with_path(to_slash(name)))
    }

    fn read_dir(&self, name: &Path) -> io::Result<Vec<FileHandle>> {
        let dir = to_slash(name);
        Ok(self
            .fs
            .read_dir(&self.real_path(name))?
            .into_iter()
            .map(|fi| {
                let path = join_virtual(&dir, fi.name());
                fi.with_path(path)
            })
            .collect())
    }

    fn open(&self, name: &Path) -> io::Result<Box<dyn Read + Send>> {
        self.fs.open(&self.real_path(name))
    }
}

/// Resolves the language of every handle.
///
/// A file named `<base>.<lang>.<ext>` where `<lang>` is a configured
/// language gets that language, marked explicit. Anything else keeps the
/// language attached by a mount, or falls back to the default language.
#[derive(Clone)]
pub struct LanguageFs {
    fs: Arc<dyn MetaFs>,
    languages: Arc<BTreeSet<String>>,
    default_lang: String,
}

impl LanguageFs {
    pub fn new(
        fs: Arc<dyn MetaFs>,
        languages: impl IntoIterator<Item = String>,
        default_lang: impl Into<String>,
    ) -> Self {
        Self {
            fs,
            languages: Arc::new(languages.into_iter().collect()),
            default_lang: default_lang.into(),
        }
    }

    /// The explicit language suffix of a file name, if any.
    pub fn lang_suffix<'a>(&self, name: &'a str) -> Option<&'a str> {
        let mut parts = name.rsplitn(3, '.');
        let _ext = parts.next()?;
        let lang = parts.next()?;
        let base = parts.next()?;
        if base.is_empty() || !self.languages.contains(lang) {
            return None;
        }
        Some(lang)
    }

    pub fn decorate(&self, fi: FileHandle) -> FileHandle {
        if !fi.is_dir()
            && !fi.is_lang_explicit()
            && let Some(lang) = self.lang_suffix(fi.name())
        {
            let lang = lang.to_string();
            return fi.with_explicit_lang(lang);
        }
        if fi.lang().is_empty() {
            let lang = self.default_lang.clone();
            return fi.with_lang(lang);
        }
        fi
    }
}

impl MetaFs for LanguageFs {
    fn stat(&self, name: &Path) -> io::Result<FileHandle> {
        Ok(self.decorate(self.fs.stat(name)?))
    }

    fn read_dir(&self, name: &Path) -> io::Result<Vec<FileHandle>> {
        Ok(self
            .fs
            .read_dir(name)?
            .into_iter()
            .map(|fi| self.decorate(fi))
            .collect())
    }

    fn open(&self, name: &Path) -> io::Result<Box<dyn Read + Send>> {
        self.fs.open(name)
    }
}
