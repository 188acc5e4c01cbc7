//! Per-language bundle grouping.
//!
//! While one bundle directory is captured, its files are sorted into a
//! [`BundleDirs`]: one [`Bundle`] per language, each with a single header
//! and a map of resources. Headers are added first, then content files,
//! then shared non-content files, so a destination bundle always exists
//! before anything is attached.

use crate::classify::BundleType;
use crate::error::CaptureError;
use crate::fs::{Classifier, FileHandle, join_virtual};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// One language's view of a bundle.
#[derive(Debug, Clone)]
pub struct Bundle {
    pub header: FileHandle,
    /// Content files first, then other files, each group by path.
    pub resources: Vec<FileHandle>,
}

impl Bundle {
    pub fn resource(&self, path: &str) -> Option<&FileHandle> {
        self.resources.iter().find(|r| r.path() == path)
    }
}

/// A captured bundle directory: bundles keyed by language.
#[derive(Debug, Clone)]
pub struct BundleGroup {
    pub bundle_type: BundleType,
    pub bundles: BTreeMap<String, Bundle>,
}

impl BundleGroup {
    pub fn get(&self, lang: &str) -> Option<&Bundle> {
        self.bundles.get(lang)
    }

    pub fn langs(&self) -> impl Iterator<Item = &str> {
        self.bundles.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    /// Virtual directory of the bundle, taken from any header.
    pub fn dir(&self) -> &str {
        self.bundles
            .values()
            .next()
            .map(|b| b.header.dir())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
struct BundleDir {
    header: FileHandle,
    resources: BTreeMap<String, FileHandle>,
}

impl BundleDir {
    fn new(header: FileHandle) -> Self {
        Self {
            header,
            resources: BTreeMap::new(),
        }
    }
}

/// Builds the language map of one bundle directory.
#[derive(Debug)]
pub struct BundleDirs {
    tp: BundleType,
    default_lang: String,
    bundles: BTreeMap<String, BundleDir>,
    // Specificity of the file currently attached under `<lang>/<path>`.
    overrides: HashMap<String, u8>,
}

impl BundleDirs {
    pub fn new(tp: BundleType, default_lang: impl Into<String>) -> Self {
        Self {
            tp,
            default_lang: default_lang.into(),
            bundles: BTreeMap::new(),
            overrides: HashMap::new(),
        }
    }

    pub fn bundle_type(&self) -> BundleType {
        self.tp
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    fn lang_of<'a>(&'a self, fi: &'a FileHandle) -> &'a str {
        if fi.lang().is_empty() {
            &self.default_lang
        } else {
            fi.lang()
        }
    }

    /// Register a bundle header. The first header of a language is kept.
    pub fn add_bundle_header(&mut self, fi: FileHandle) {
        let lang = self.lang_of(&fi).to_string();
        if let Some(existing) = self.bundles.get(&lang) {
            debug!(
                kept = existing.header.path(),
                dropped = fi.path(),
                lang = %lang,
                "duplicate bundle header"
            );
            return;
        }
        self.bundles.insert(lang, BundleDir::new(fi));
    }

    /// Attach a content file to the bundle of its own language, creating
    /// that bundle from another language's header if needed.
    ///
    /// The header is taken from the default language, else from the
    /// lexicographically first language present.
    pub fn add_bundle_content_file(&mut self, fi: FileHandle) -> Result<(), CaptureError> {
        let lang = self.lang_of(&fi).to_string();
        if !self.bundles.contains_key(&lang) {
            let source = self
                .bundles
                .get(&self.default_lang)
                .or_else(|| self.bundles.values().next())
                .ok_or_else(|| CaptureError::MissingBundleHeader(fi.path().to_string()))?;
            let header = source.header.clone().with_lang(lang.clone());
            debug!(
                header = header.path(),
                lang = %lang,
                "synthesized bundle header for missing language"
            );
            self.bundles.insert(lang.clone(), BundleDir::new(header));
        }
        if let Some(dir) = self.bundles.get_mut(&lang) {
            dir.resources.insert(fi.path().to_string(), fi);
        }
        Ok(())
    }

    /// Attach a non-content file to every language bundle.
    ///
    /// Files are keyed by their translation base name, so `logo.de.png`
    /// and `logo.png` compete for the same slot. A more specific file is
    /// never replaced by a more generic one, whatever the arrival order.
    pub fn add_bundle_files(&mut self, fi: FileHandle) -> Result<(), CaptureError> {
        if self.bundles.is_empty() {
            return Err(CaptureError::MissingBundleHeader(fi.path().to_string()));
        }
        let name = match fi.ext() {
            "" => fi.translation_base_name().to_string(),
            ext => format!("{}.{}", fi.translation_base_name(), ext),
        };
        let path = join_virtual(fi.dir(), &name);
        let file_lang = self.lang_of(&fi).to_string();

        for (lang, dir) in self.bundles.iter_mut() {
            let key = format!("{lang}/{path}");
            let rank = specificity(&fi, &file_lang, lang);
            if let Some(&current) = self.overrides.get(&key)
                && current >= rank
            {
                continue;
            }
            dir.resources.insert(path.clone(), fi.clone());
            self.overrides.insert(key, rank);
        }
        Ok(())
    }

    pub fn into_group(self) -> BundleGroup {
        let bundles = self
            .bundles
            .into_iter()
            .map(|(lang, dir)| {
                let mut resources: Vec<FileHandle> = dir.resources.into_values().collect();
                resources.sort_by(|a, b| {
                    let ca = a.classifier().unwrap_or(Classifier::Asset);
                    let cb = b.classifier().unwrap_or(Classifier::Asset);
                    ca.cmp(&cb).then_with(|| a.path().cmp(b.path()))
                });
                (
                    lang,
                    Bundle {
                        header: dir.header,
                        resources,
                    },
                )
            })
            .collect();
        BundleGroup {
            bundle_type: self.tp,
            bundles,
        }
    }
}

/// How well a file fits a language slot: an explicit suffix for that
/// language beats a file that merely carries it, which beats any file of
/// another language.
fn specificity(fi: &FileHandle, file_lang: &str, lang: &str) -> u8 {
    match (fi.is_lang_explicit(), file_lang == lang) {
        (true, true) => 3,
        (false, true) => 2,
        (false, false) => 1,
        (true, false) => 0,
    }
}
