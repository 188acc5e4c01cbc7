//! Capture configuration.
//!
//! Handles loading, validating, and merging the `config.toml` in the site
//! root. Stock defaults are serialized to a TOML table and the user's file
//! is merged on top, so a config file only names what it overrides:
//!
//! ```toml
//! default_content_language = "de"
//! languages = ["de", "en"]
//! ```
//!
//! ## Configuration Options
//!
//! ```toml
//! content_dir = "content"
//! default_content_language = "en"
//! languages = ["en"]
//! content_extensions = ["md", "markdown", "html", ...]
//! ignore_files = []
//!
//! [[mounts]]
//! from = "content"        # virtual directory
//! to = "content"          # directory below the site root
//! lang = "en"             # optional, defaults to the default language
//! project = true          # symlinks are followed in project mounts only
//!
//! [processing]
//! max_workers = 4         # omit for auto, 0 for sequential
//! channel_capacity = 4
//!
//! [output]
//! target_base_paths = [""]
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::capture::CollectorOptions;
use crate::classify::{ContentPolicy, DEFAULT_CONTENT_EXTENSIONS};
use crate::fs::{BasePathFs, LanguageFs, MetaFs, RootMapping, RootMappingFs, RootMeta, SourceFs};
use crate::pipeline::{DEFAULT_CHANNEL_CAPACITY, ProcessorOptions};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Capture configuration loaded from `config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureConfig {
    /// Virtual directory holding the content tree.
    pub content_dir: String,
    pub default_content_language: String,
    /// Languages recognized as filename suffixes and mount languages.
    pub languages: Vec<String>,
    /// Extensions of files that become pages.
    pub content_extensions: Vec<String>,
    /// Names hidden from every listing; `*suffix` matches by suffix.
    pub ignore_files: Vec<String>,
    /// Source roots. Empty means `content_dir` mounted onto itself.
    pub mounts: Vec<MountConfig>,
    pub processing: ProcessingConfig,
    pub output: OutputConfig,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            content_dir: "content".to_string(),
            default_content_language: "en".to_string(),
            languages: vec!["en".to_string()],
            content_extensions: DEFAULT_CONTENT_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ignore_files: Vec::new(),
            mounts: Vec::new(),
            processing: ProcessingConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

/// One source root mounted into the virtual tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MountConfig {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub lang: String,
    #[serde(default = "default_project")]
    pub project: bool,
}

fn default_project() -> bool {
    true
}

/// Parallel processing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Directory fan-out workers. When absent, the number of CPU cores;
    /// `0` walks sequentially. Larger values are clamped to the core count.
    pub max_workers: Option<usize>,
    /// Items buffered between the capturer and the page consumer.
    pub channel_capacity: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_workers: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Resolve the effective fan-out worker count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_workers(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_workers.map(|n| n.min(cores)).unwrap_or(cores)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    /// Sub paths every bundle resource is published under.
    pub target_base_paths: Vec<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            target_base_paths: vec![String::new()],
        }
    }
}

/// The virtual filesystems a capture runs over.
pub struct SourceStack {
    /// Mounts and languages applied.
    pub fs: Arc<dyn MetaFs>,
    /// Real locations, used to list the targets of symlinks.
    pub real_fs: Arc<dyn MetaFs>,
}

impl CaptureConfig {
    /// Validate config values are consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.content_dir.trim_matches('/').is_empty() {
            return Err(ConfigError::Validation(
                "content_dir must not be empty".into(),
            ));
        }
        if !self.languages.contains(&self.default_content_language) {
            return Err(ConfigError::Validation(format!(
                "default_content_language {:?} is not in languages",
                self.default_content_language
            )));
        }
        if self.content_extensions.is_empty() {
            return Err(ConfigError::Validation(
                "content_extensions must not be empty".into(),
            ));
        }
        if self.processing.channel_capacity == 0 {
            return Err(ConfigError::Validation(
                "processing.channel_capacity must be at least 1".into(),
            ));
        }
        if self.output.target_base_paths.is_empty() {
            return Err(ConfigError::Validation(
                "output.target_base_paths must not be empty".into(),
            ));
        }
        for mount in &self.mounts {
            if mount.to.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "mount {:?} has an empty target",
                    mount.from
                )));
            }
            if !mount.lang.is_empty() && !self.languages.contains(&mount.lang) {
                return Err(ConfigError::Validation(format!(
                    "mount {:?} uses unknown language {:?}",
                    mount.from, mount.lang
                )));
            }
        }
        Ok(())
    }

    /// Mounts as root mappings, defaulting to the content directory.
    pub fn root_mappings(&self) -> Vec<RootMapping> {
        if self.mounts.is_empty() {
            let dir = self.content_dir.trim_matches('/');
            return vec![RootMapping::new(
                dir,
                dir,
                RootMeta {
                    lang: String::new(),
                    is_project: true,
                },
            )];
        }
        self.mounts
            .iter()
            .map(|m| {
                RootMapping::new(
                    &m.from,
                    &m.to,
                    RootMeta {
                        lang: m.lang.clone(),
                        is_project: m.project,
                    },
                )
            })
            .collect()
    }

    pub fn policy(&self) -> ContentPolicy {
        ContentPolicy::new(self.content_extensions.iter().cloned(), self.ignore_files.clone())
    }

    pub fn collector_options(&self) -> CollectorOptions {
        CollectorOptions {
            root: self.content_dir.trim_matches('/').to_string(),
            default_lang: self.default_content_language.clone(),
            num_workers: effective_workers(&self.processing),
            processor: ProcessorOptions {
                channel_capacity: self.processing.channel_capacity,
                partial_build: false,
                target_base_paths: self.output.target_base_paths.clone(),
            },
        }
    }

    /// Mount the configured roots below `source`.
    pub fn source_stack(&self, source: &Path) -> Result<SourceStack, ConfigError> {
        let os: Arc<dyn MetaFs> = Arc::new(SourceFs::os());
        let based: Arc<dyn MetaFs> = Arc::new(BasePathFs::new(Arc::clone(&os), source));
        let mappings = self.root_mappings();
        let mapped = RootMappingFs::new(based, mappings.clone())?
            .default_lang(&self.default_content_language);
        check_mount_coverage(&mapped, &mappings)?;
        let fs = LanguageFs::new(
            Arc::new(mapped),
            self.languages.iter().cloned(),
            &self.default_content_language,
        );
        let real_fs = LanguageFs::new(
            os,
            self.languages.iter().cloned(),
            &self.default_content_language,
        );
        Ok(SourceStack {
            fs: Arc::new(fs),
            real_fs: Arc::new(real_fs),
        })
    }
}

/// Every mounted virtual directory needs at least one existing source
/// directory.
fn check_mount_coverage(
    mapped: &RootMappingFs,
    mappings: &[RootMapping],
) -> Result<(), ConfigError> {
    let mut checked: Vec<&str> = Vec::new();
    for m in mappings {
        if checked.contains(&m.from.as_str()) {
            continue;
        }
        checked.push(&m.from);
        let dirs = mapped.dirs(Path::new(&m.from))?;
        if dirs.is_empty() {
            return Err(ConfigError::Validation(format!(
                "mount {:?} has no existing source directory",
                m.from
            )));
        }
        let langs: Vec<&str> = dirs.iter().map(|d| d.lang()).collect();
        debug!(from = %m.from, ?langs, "mount coverage");
    }
    Ok(())
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(CaptureConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a `config.toml` from a directory as a raw TOML value.
///
/// Returns `Ok(None)` if no `config.toml` exists in the directory.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let config_path = path.join("config.toml");
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&config_path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<CaptureConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: CaptureConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `config.toml` in the site root.
pub fn load_config(root: &Path) -> Result<CaptureConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_config(root)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `config.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Bundle Capture Configuration
# ============================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
# Unknown keys will cause an error.

# Virtual directory holding the content tree.
content_dir = "content"

# Language of files without a language suffix or mount language.
default_content_language = "en"

# Languages recognized in file names (page.de.md) and mounts.
languages = ["en"]

# Files with these extensions become pages; everything else is an asset.
content_extensions = ["md", "markdown", "mdown", "html", "htm", "adoc", "asciidoc", "ad", "org", "rst", "pdc", "pandoc"]

# Names hidden from listings. Use "*.ext" to match by suffix.
# Dotfiles and editor backups are always hidden.
ignore_files = []

# ---------------------------------------------------------------------------
# Mounts
# ---------------------------------------------------------------------------
# Each mount binds a directory below the site root to a virtual directory.
# Without any mount, content_dir is mounted onto itself.
#
# [[mounts]]
# from = "content"
# to = "content"
# lang = "en"        # optional
# project = true     # follow symlinks (theme mounts should set false)

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Directory fan-out workers.
# Omit to auto-detect (= number of CPU cores); 0 walks sequentially.
# max_workers = 4

# Items buffered between the directory scan and page construction.
channel_capacity = 4

# ---------------------------------------------------------------------------
# Output
# ---------------------------------------------------------------------------
[output]
# Sub paths every bundle resource is published under.
target_base_paths = [""]
"##
}
