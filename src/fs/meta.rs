//! File handles enriched with virtual-filesystem metadata.
//!
//! A [`FileHandle`] is what every [`MetaFs`](super::MetaFs) returns from
//! `stat` and `read_dir`. Handles are plain values: each decoration step
//! builds a new handle with the merged metadata instead of writing into a
//! shared attribute map, so handles walked concurrently on different
//! branches can never alias each other's state.

use std::fmt;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Produces a fresh reader over a file's bytes, bound to its real location.
pub type Opener = Arc<dyn Fn() -> io::Result<Box<dyn Read + Send>> + Send + Sync>;

/// Role of a file inside a directory, assigned during classification.
///
/// The declaration order is the sort order used for bundle directories:
/// headers first, then content, then plain files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Classifier {
    /// `index.<ext>`: marks a leaf bundle.
    LeafHeader,
    /// `_index.<ext>`: marks a branch bundle.
    BranchHeader,
    /// Any other recognized content file.
    Content,
    /// Everything else (images, data files, ...).
    Asset,
}

impl Classifier {
    pub fn is_header(self) -> bool {
        matches!(self, Classifier::LeafHeader | Classifier::BranchHeader)
    }
}

/// An immutable file-or-directory reference with its metadata.
#[derive(Clone)]
pub struct FileHandle {
    name: String,
    is_dir: bool,
    path: String,
    filename: PathBuf,
    lang: String,
    explicit_lang: bool,
    classifier: Option<Classifier>,
    is_symlink: bool,
    is_ordered: bool,
    is_project: bool,
    opener: Option<Opener>,
}

impl FileHandle {
    /// A bare handle. `path` is the slash-separated virtual path and
    /// `filename` the location on the backing store.
    pub fn new(
        name: impl Into<String>,
        is_dir: bool,
        path: impl Into<String>,
        filename: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            is_dir,
            path: path.into(),
            filename: filename.into(),
            lang: String::new(),
            explicit_lang: false,
            classifier: None,
            is_symlink: false,
            is_ordered: false,
            is_project: false,
            opener: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    /// Virtual path, slash-separated.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Real filename on the backing store. For symlinks this is the
    /// resolved target.
    pub fn filename(&self) -> &Path {
        &self.filename
    }

    /// Language code; empty means "inherit the default".
    pub fn lang(&self) -> &str {
        &self.lang
    }

    /// True when the language came from a filename suffix such as `logo.de.png`.
    pub fn is_lang_explicit(&self) -> bool {
        self.explicit_lang
    }

    pub fn classifier(&self) -> Option<Classifier> {
        self.classifier
    }

    pub fn is_symlink(&self) -> bool {
        self.is_symlink
    }

    /// Children already sorted; the walker keeps their order.
    pub fn is_ordered(&self) -> bool {
        self.is_ordered
    }

    /// Owned by the project (not a theme); symlinks are only followed here.
    pub fn is_project(&self) -> bool {
        self.is_project
    }

    /// File extension without the dot, empty if none.
    pub fn ext(&self) -> &str {
        match self.name.rfind('.') {
            Some(i) if i > 0 => &self.name[i + 1..],
            _ => "",
        }
    }

    /// The file name without extension and without an explicit language
    /// suffix: `logo.de.png` → `logo`.
    pub fn translation_base_name(&self) -> &str {
        let stem = match self.name.rfind('.') {
            Some(i) if i > 0 => &self.name[..i],
            _ => self.name.as_str(),
        };
        if self.explicit_lang
            && let Some(base) = stem.strip_suffix(self.lang.as_str())
            && let Some(base) = base.strip_suffix('.')
        {
            return base;
        }
        stem
    }

    /// Virtual directory containing this entry (empty at the root).
    pub fn dir(&self) -> &str {
        match self.path.rfind('/') {
            Some(i) => &self.path[..i],
            None => "",
        }
    }

    /// Open the file through its opener.
    pub fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        match &self.opener {
            Some(open) => open(),
            None => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("no opener for {}", self.path),
            )),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = lang.into();
        self
    }

    /// Language taken from the file name itself.
    pub fn with_explicit_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = lang.into();
        self.explicit_lang = true;
        self
    }

    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_symlink(mut self, is_symlink: bool) -> Self {
        self.is_symlink = is_symlink;
        self
    }

    pub fn with_ordered(mut self, is_ordered: bool) -> Self {
        self.is_ordered = is_ordered;
        self
    }

    pub fn with_project(mut self, is_project: bool) -> Self {
        self.is_project = is_project;
        self
    }

    pub fn with_opener(mut self, opener: Opener) -> Self {
        self.opener = Some(opener);
        self
    }
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHandle")
            .field("path", &self.path)
            .field("filename", &self.filename)
            .field("is_dir", &self.is_dir)
            .field("lang", &self.lang)
            .field("classifier", &self.classifier)
            .field("is_symlink", &self.is_symlink)
            .finish_non_exhaustive()
    }
}
