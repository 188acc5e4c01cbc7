//! File and directory classification.
//!
//! Classification is a pure function of file names. A file named
//! `index.<ext>` is a leaf bundle header, `_index.<ext>` a branch bundle
//! header; any other file with a recognized content extension is content,
//! and everything else is an asset.
//!
//! ```text
//! blog/post/            LeafBundle    (index.md present)
//! ├── index.md          LeafHeader
//! ├── cover.jpg         Asset
//! └── notes.md          Content
//! docs/                 BranchBundle  (_index.md present)
//! ├── _index.md         BranchHeader
//! └── page1.md          Content
//! ```
//!
//! The rules live behind the [`FileClassifier`] trait so the policy can be
//! replaced without touching traversal.

use crate::fs::{Classifier, FileHandle};
use serde::Serialize;
use std::collections::BTreeSet;

/// What kind of bundle a directory is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum BundleType {
    #[default]
    NotBundle,
    LeafBundle,
    BranchBundle,
}

/// How a directory's files are handed downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirState {
    /// Classify by bundle type.
    Default,
    /// No content files: copy everything through.
    AssetsOnly,
    /// A branch header and only content files: every file is its own page.
    SinglesOnly,
}

/// Result of [`classify_dir`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirClassification {
    pub bundle_type: BundleType,
    pub state: DirState,
}

/// Filename policy used by classification and listing.
pub trait FileClassifier: Send + Sync {
    /// `(bundle type, is content file)` for a file name.
    fn classify(&self, name: &str) -> (BundleType, bool);

    /// Names that never take part in a capture.
    fn is_ignored(&self, name: &str) -> bool {
        let _ = name;
        false
    }

    fn classifier(&self, name: &str) -> Classifier {
        match self.classify(name) {
            (BundleType::LeafBundle, _) => Classifier::LeafHeader,
            (BundleType::BranchBundle, _) => Classifier::BranchHeader,
            (BundleType::NotBundle, true) => Classifier::Content,
            (BundleType::NotBundle, false) => Classifier::Asset,
        }
    }

    fn is_bundle_header(&self, name: &str) -> bool {
        self.classify(name).0 != BundleType::NotBundle
    }
}

pub const DEFAULT_CONTENT_EXTENSIONS: &[&str] = &[
    "md", "markdown", "mdown", "html", "htm", "adoc", "asciidoc", "ad", "org", "rst", "pdc",
    "pandoc",
];

/// The stock filename policy.
#[derive(Debug, Clone)]
pub struct ContentPolicy {
    content_extensions: BTreeSet<String>,
    ignore_files: Vec<String>,
}

impl Default for ContentPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_CONTENT_EXTENSIONS.iter().map(|s| s.to_string()),
            Vec::new(),
        )
    }
}

impl ContentPolicy {
    /// `ignore_files` entries match a whole name, or a suffix when written
    /// as `*<suffix>` (e.g. `*.tmp`).
    pub fn new(
        content_extensions: impl IntoIterator<Item = String>,
        ignore_files: Vec<String>,
    ) -> Self {
        Self {
            content_extensions: content_extensions
                .into_iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            ignore_files,
        }
    }

    pub fn is_content_file(&self, name: &str) -> bool {
        match name.rfind('.') {
            Some(i) if i > 0 => self
                .content_extensions
                .contains(&name[i + 1..].to_lowercase()),
            _ => false,
        }
    }
}

impl FileClassifier for ContentPolicy {
    fn classify(&self, name: &str) -> (BundleType, bool) {
        if !self.is_content_file(name) {
            return (BundleType::NotBundle, false);
        }
        if name.starts_with("_index.") {
            (BundleType::BranchBundle, true)
        } else if name.starts_with("index.") {
            (BundleType::LeafBundle, true)
        } else {
            (BundleType::NotBundle, true)
        }
    }

    fn is_ignored(&self, name: &str) -> bool {
        if name.starts_with('.') || name.starts_with('#') || name.ends_with('~') {
            return true;
        }
        self.ignore_files.iter().any(|pattern| match pattern.strip_prefix('*') {
            Some(suffix) => name.ends_with(suffix),
            None => name == pattern,
        })
    }
}

/// Classify a directory from its listing. Subdirectories are not looked at.
///
/// A leaf header wins over a branch header for the bundle type. A directory
/// with a branch header and no non-content files degrades to singles-only,
/// even when it also holds a leaf header, and a directory without content
/// files is assets-only.
pub fn classify_dir(entries: &[FileHandle], policy: &dyn FileClassifier) -> DirClassification {
    let (mut has_content, mut has_non_content) = (false, false);
    let (mut is_leaf, mut is_branch) = (false, false);

    for fi in entries.iter().filter(|fi| !fi.is_dir()) {
        let (tp, is_content) = policy.classify(fi.name());
        match tp {
            BundleType::LeafBundle => is_leaf = true,
            BundleType::BranchBundle => is_branch = true,
            BundleType::NotBundle => {}
        }
        if is_content {
            has_content = true;
        } else {
            has_non_content = true;
        }
    }

    let bundle_type = if is_leaf {
        BundleType::LeafBundle
    } else if is_branch {
        BundleType::BranchBundle
    } else {
        BundleType::NotBundle
    };

    let state = if !has_content {
        DirState::AssetsOnly
    } else if is_branch && !has_non_content {
        DirState::SinglesOnly
    } else {
        DirState::Default
    };

    DirClassification { bundle_type, state }
}

/// Sort a bundle directory so headers come first, then by name.
pub fn sort_bundle_dir(entries: &mut [FileHandle]) {
    entries.sort_by(|a, b| {
        let ca = a.classifier().unwrap_or(Classifier::Asset);
        let cb = b.classifier().unwrap_or(Classifier::Asset);
        ca.cmp(&cb).then_with(|| a.name().cmp(b.name()))
    });
}
