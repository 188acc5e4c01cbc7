//! Reference page sink.
//!
//! [`Site`] is the model the pipeline builds into: pages keyed by language
//! and virtual path, resources with their publish targets, and the files
//! copied through unchanged. It serializes to the `manifest.json` written by
//! the `capture` command:
//!
//! ```json
//! {
//!   "languages": {
//!     "en": [
//!       { "path": "content/blog/post/index.md", "kind": "leaf", "title": "Post",
//!         "resources": [ { "path": "content/blog/post/cover.jpg", "targets": ["blog/post/cover.jpg"] } ] }
//!     ]
//!   },
//!   "published": [ { "source": "content/robots.txt", "target": "robots.txt", "bytes": 24 } ]
//! }
//! ```
//!
//! When an output directory is set, copies and resources are written below
//! it. Otherwise their bytes are only counted.

use crate::fs::{Classifier, FileHandle};
use crate::pipeline::{BundledResource, PageSink, SinkError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// How a page came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageKind {
    /// A content file outside any bundle.
    Single,
    /// The `index.*` of a leaf bundle.
    Leaf,
    /// The `_index.*` of a branch bundle.
    Branch,
    /// A content file inside a bundle.
    Nested,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub path: String,
    pub lang: String,
    /// Output paths, one per target base path.
    pub targets: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// Virtual path of the source file.
    pub path: String,
    pub lang: String,
    pub kind: PageKind,
    /// Title from front matter, the first `# heading`, or the file name.
    pub title: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<Resource>,
    /// Content pages nested in this bundle.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pages: Vec<Page>,
}

/// A file copied through unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Published {
    pub source: String,
    pub target: String,
    pub bytes: u64,
}

/// Serialized form of a [`Site`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub languages: BTreeMap<String, Vec<Page>>,
    pub published: Vec<Published>,
}

/// Pages grouped per language, in path order.
#[derive(Debug, Default)]
pub struct Site {
    content_root: String,
    output: Option<PathBuf>,
    pages: BTreeMap<(String, String), Page>,
    published: Vec<Published>,
}

impl Site {
    /// A site that keeps everything in memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Write copies and resources below `dir`.
    pub fn with_output(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output = Some(dir.into());
        self
    }

    /// Virtual directory stripped from source paths to form output paths.
    pub fn content_root(mut self, root: impl AsRef<str>) -> Self {
        self.content_root = root.as_ref().trim_matches('/').to_string();
        self
    }

    pub fn page(&self, lang: &str, path: &str) -> Option<&Page> {
        self.pages.get(&(lang.to_string(), path.to_string()))
    }

    /// All pages, ordered by language then path.
    pub fn pages(&self) -> impl Iterator<Item = &Page> {
        self.pages.values()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn published(&self) -> &[Published] {
        &self.published
    }

    pub fn languages(&self) -> Vec<&str> {
        let mut langs: Vec<&str> = self.pages.keys().map(|(lang, _)| lang.as_str()).collect();
        langs.dedup();
        langs
    }

    pub fn manifest(&self) -> Manifest {
        let mut languages: BTreeMap<String, Vec<Page>> = BTreeMap::new();
        for ((lang, _), page) in &self.pages {
            languages.entry(lang.clone()).or_default().push(page.clone());
        }
        Manifest {
            languages,
            published: self.published.clone(),
        }
    }

    /// Write `manifest.json` into `dir` and return its path.
    pub fn write_manifest(&self, dir: &Path) -> io::Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join("manifest.json");
        let json = serde_json::to_string_pretty(&self.manifest()).map_err(io::Error::other)?;
        fs::write(&path, json)?;
        Ok(path)
    }

    /// Output path of a source path: the content root is stripped.
    fn relative<'a>(&self, path: &'a str) -> &'a str {
        let path = path.trim_start_matches('/');
        if self.content_root.is_empty() {
            return path;
        }
        match path.strip_prefix(self.content_root.as_str()) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.trim_start_matches('/'),
            _ => path,
        }
    }

    /// Copy `content` to `target` below the output directory, or count it.
    fn write(&self, target: &str, mut content: Box<dyn Read + Send>) -> Result<u64, SinkError> {
        match &self.output {
            Some(dir) => {
                let dest = dir.join(target);
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent)?;
                }
                let mut file = fs::File::create(&dest)?;
                Ok(io::copy(&mut content, &mut file)?)
            }
            None => Ok(io::copy(&mut content, &mut io::sink())?),
        }
    }
}

fn page_kind(fi: &FileHandle, nested: bool) -> PageKind {
    match fi.classifier() {
        Some(Classifier::LeafHeader) if !nested => PageKind::Leaf,
        Some(Classifier::BranchHeader) if !nested => PageKind::Branch,
        _ if nested => PageKind::Nested,
        _ => PageKind::Single,
    }
}

/// The `title` of YAML (`---`) or TOML (`+++`) front matter.
fn front_matter_title(content: &str) -> Option<String> {
    let (fence, sep) = if content.starts_with("---") {
        ("---", ':')
    } else if content.starts_with("+++") {
        ("+++", '=')
    } else {
        return None;
    };
    content
        .lines()
        .skip(1)
        .take_while(|line| line.trim() != fence)
        .filter_map(|line| line.split_once(sep))
        .find(|(key, _)| key.trim() == "title")
        .map(|(_, value)| value.trim().trim_matches(|c| c == '"' || c == '\'').to_string())
        .filter(|title| !title.is_empty())
}

fn fallback_title(fi: &FileHandle) -> String {
    let name = match fi.classifier() {
        Some(c) if c.is_header() => fi.dir().rsplit('/').next().unwrap_or_default(),
        _ => fi.translation_base_name(),
    };
    let name = if name.is_empty() { fi.translation_base_name() } else { name };
    name.replace('-', " ")
}

pub fn extract_title(fi: &FileHandle, content: &str) -> String {
    front_matter_title(content)
        .or_else(|| {
            content
                .lines()
                .find(|line| line.starts_with("# "))
                .map(|line| line.trim_start_matches("# ").trim().to_string())
        })
        .unwrap_or_else(|| fallback_title(fi))
}

impl PageSink for Site {
    type Page = Page;
    type Resource = Resource;

    fn new_page(
        &mut self,
        fi: &FileHandle,
        owner: Option<&Page>,
        mut content: Box<dyn Read + Send>,
    ) -> Result<Page, SinkError> {
        let mut bytes = Vec::new();
        content.read_to_end(&mut bytes)?;
        let text = String::from_utf8(bytes)
            .map_err(|_| SinkError::InvalidContent(format!("{} is not valid UTF-8", fi.path())))?;
        Ok(Page {
            path: fi.path().to_string(),
            lang: owner.map_or_else(|| fi.lang().to_string(), |o| o.lang.clone()),
            kind: page_kind(fi, owner.is_some()),
            title: extract_title(fi, &text),
            resources: Vec::new(),
            pages: Vec::new(),
        })
    }

    fn new_resource(
        &mut self,
        fi: &FileHandle,
        owner: &Page,
        target_base_paths: &[String],
    ) -> Result<Resource, SinkError> {
        let rel = self.relative(fi.path()).to_string();
        let mut targets = Vec::with_capacity(target_base_paths.len());
        for base in target_base_paths {
            let base = base.trim_matches('/');
            let target = if base.is_empty() {
                rel.clone()
            } else {
                format!("{base}/{rel}")
            };
            self.write(&target, fi.open()?)?;
            targets.push(target);
        }
        Ok(Resource {
            path: fi.path().to_string(),
            lang: owner.lang.clone(),
            targets,
        })
    }

    fn add_resources(&mut self, owner: &mut Page, resources: Vec<BundledResource<Page, Resource>>) {
        for resource in resources {
            match resource {
                BundledResource::Page(page) => owner.pages.push(page),
                BundledResource::Resource(r) => owner.resources.push(r),
            }
        }
    }

    fn add_page(&mut self, page: Page, replace: bool) -> Result<(), SinkError> {
        let key = (page.lang.clone(), page.path.clone());
        if !replace && self.pages.contains_key(&key) {
            return Err(SinkError::DuplicatePage(format!("{} ({})", page.path, page.lang)));
        }
        self.pages.insert(key, page);
        Ok(())
    }

    fn publish(&mut self, target: &str, content: Box<dyn Read + Send>) -> Result<(), SinkError> {
        let rel = self.relative(target).to_string();
        let bytes = self.write(&rel, content)?;
        self.published.retain(|p| p.source != target);
        self.published.push(Published {
            source: target.to_string(),
            target: rel,
            bytes,
        });
        Ok(())
    }
}
