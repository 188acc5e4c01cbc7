//! Shared test utilities for the capture test suite.
//!
//! Provides fixture setup, an in-memory content stack, and lookup helpers
//! over capture items and sites that panic with the available keys on miss.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let mem = memory_tree(&[
//!     ("content/blog/post/index.md", "# Post"),
//!     ("content/blog/post/cover.jpg", "jpg"),
//! ]);
//! let items = capture_items(content_fs(mem, &["en"]), 0);
//!
//! let group = find_group(&items, "content/blog/post");
//! assert_eq!(group.get("en").unwrap().resources.len(), 1);
//! ```

use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use crate::capture::{BundleGroup, Capturer};
use crate::classify::ContentPolicy;
use crate::fs::{
    FileHandle, LanguageFs, MemoryFs, MetaFs, RootMapping, RootMappingFs, RootMeta, SourceFs,
};
use crate::pipeline::CaptureItem;
use crate::site::{Page, Site};

// =========================================================================
// Fixture setup
// =========================================================================

/// Copy `fixtures/site/` to a temp directory and return it.
///
/// Tests get an isolated copy they can mutate without affecting other tests
/// or the source fixtures.
pub fn setup_fixtures() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let fixtures = Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures/site");
    copy_dir_recursive(&fixtures, tmp.path()).unwrap();
    tmp
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if src_path.is_dir() {
            std::fs::create_dir_all(&dst_path)?;
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            std::fs::copy(&src_path, &dst_path)?;
        }
    }
    Ok(())
}

/// An in-memory tree with the given files.
pub fn memory_tree(files: &[(&str, &str)]) -> MemoryFs {
    let mem = MemoryFs::new();
    for (path, body) in files {
        mem.write_file(path, body).unwrap();
    }
    mem
}

/// `content` mounted onto itself as a project root, with languages.
pub fn content_fs(mem: MemoryFs, langs: &[&str]) -> Arc<dyn MetaFs> {
    let source: Arc<dyn MetaFs> = Arc::new(SourceFs::new(Arc::new(mem)));
    let mapped = RootMappingFs::new(
        source,
        vec![RootMapping::new(
            "content",
            "content",
            RootMeta {
                lang: String::new(),
                is_project: true,
            },
        )],
    )
    .unwrap()
    .default_lang("en");
    Arc::new(LanguageFs::new(
        Arc::new(mapped),
        langs.iter().map(|l| l.to_string()),
        "en",
    ))
}

/// Run a full capture of `content` and return what it emitted.
pub fn capture_items(fs: Arc<dyn MetaFs>, workers: usize) -> Vec<CaptureItem> {
    let items = Mutex::new(Vec::new());
    Capturer::new(fs, Arc::new(ContentPolicy::default()), &items)
        .default_lang("en")
        .root("content")
        .workers(workers)
        .capture()
        .unwrap();
    items.into_inner().unwrap()
}

// =========================================================================
// Item extractors
// =========================================================================

pub fn groups(items: &[CaptureItem]) -> Vec<&BundleGroup> {
    items
        .iter()
        .filter_map(|i| match i {
            CaptureItem::BundleGroup(g) => Some(g),
            _ => None,
        })
        .collect()
}

fn sorted_paths<'a>(handles: impl Iterator<Item = &'a FileHandle>) -> Vec<String> {
    let mut out: Vec<String> = handles.map(|fi| fi.path().to_string()).collect();
    out.sort();
    out
}

/// Paths of `ContentFile` items, sorted.
pub fn singles(items: &[CaptureItem]) -> Vec<String> {
    sorted_paths(items.iter().filter_map(|i| match i {
        CaptureItem::ContentFile(fi) => Some(fi),
        _ => None,
    }))
}

/// Paths of `CopyFile` items, sorted.
pub fn copies(items: &[CaptureItem]) -> Vec<String> {
    sorted_paths(items.iter().filter_map(|i| match i {
        CaptureItem::CopyFile(fi) => Some(fi),
        _ => None,
    }))
}

// =========================================================================
// Lookups: panic with the available keys on miss
// =========================================================================

/// Find the bundle group of a directory. Panics if not found.
pub fn find_group<'a>(items: &'a [CaptureItem], dir: &str) -> &'a BundleGroup {
    let groups = groups(items);
    groups
        .iter()
        .find(|g| g.dir() == dir)
        .copied()
        .unwrap_or_else(|| {
            let dirs: Vec<&str> = groups.iter().map(|g| g.dir()).collect();
            panic!("bundle group '{dir}' not found. Available: {dirs:?}")
        })
}

/// Find a page by language and source path. Panics if not found.
pub fn find_page<'a>(site: &'a Site, lang: &str, path: &str) -> &'a Page {
    site.page(lang, path).unwrap_or_else(|| {
        let keys: Vec<String> = site
            .pages()
            .map(|p| format!("{}:{}", p.lang, p.path))
            .collect();
        panic!("page '{lang}:{path}' not found. Available: {keys:?}")
    })
}

/// Titles of all pages of a language, in path order.
pub fn page_titles(site: &Site, lang: &str) -> Vec<String> {
    site.pages()
        .filter(|p| p.lang == lang)
        .map(|p| p.title.clone())
        .collect()
}
