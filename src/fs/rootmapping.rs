//! Overlay of several real directories into one virtual namespace.
//!
//! A [`RootMapping`] binds a virtual directory (`content/blog`) to a real
//! one (`themes/a/blog`). Several mappings may share a virtual directory;
//! listing it returns the union of their children, consulted in
//! registration order. Two children with the same name and language are a
//! collision and the earliest mapping wins. Children with the same name but
//! different languages are not: they are parallel per-language views of the
//! same directory.
//!
//! ```text
//! content/blog  ──▶  themes/a/mysvblog   (lang = sv)
//!               ──▶  themes/a/myenblog   (lang = en)
//! content/docs  ──▶  themes/a/mysvdocs   (lang = sv)
//! ```

use super::{FileHandle, MetaFs, join_virtual, to_slash};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Metadata a mount attaches to everything under it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootMeta {
    /// Language of the mounted tree; empty means the default language.
    #[serde(default)]
    pub lang: String,
    /// Project-owned trees follow symlinks, theme trees do not.
    #[serde(default)]
    pub is_project: bool,
}

impl RootMeta {
    /// A handle carrying this mount's metadata. A language already on the
    /// handle is kept.
    pub fn apply(&self, fi: FileHandle) -> FileHandle {
        let fi = if !self.lang.is_empty() && fi.lang().is_empty() {
            fi.with_lang(self.lang.clone())
        } else {
            fi
        };
        fi.with_project(self.is_project)
    }
}

/// One virtual → real directory binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootMapping {
    /// Virtual directory, slash-separated, no leading or trailing slash.
    pub from: String,
    /// Real directory in the wrapped filesystem.
    pub to: PathBuf,
    pub meta: RootMeta,
}

impl RootMapping {
    pub fn new(from: impl AsRef<str>, to: impl Into<PathBuf>, meta: RootMeta) -> Self {
        Self {
            from: from.as_ref().trim_matches('/').to_string(),
            to: to.into(),
            meta,
        }
    }

    /// The real location of `virt` under this mapping, if it covers it.
    fn real_path(&self, virt: &str) -> Option<PathBuf> {
        if virt == self.from {
            return Some(self.to.clone());
        }
        let rest = if self.from.is_empty() {
            virt
        } else {
            virt.strip_prefix(&self.from)?.strip_prefix('/')?
        };
        Some(self.to.join(rest))
    }
}

/// A [`MetaFs`] composing several mapped directories.
#[derive(Clone)]
pub struct RootMappingFs {
    fs: Arc<dyn MetaFs>,
    mappings: Vec<RootMapping>,
    default_lang: String,
}

impl RootMappingFs {
    pub fn new(fs: Arc<dyn MetaFs>, mappings: Vec<RootMapping>) -> io::Result<Self> {
        if let Some(bad) = mappings.iter().find(|m| m.to.as_os_str().is_empty()) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("root mapping {:?} has an empty target", bad.from),
            ));
        }
        Ok(Self {
            fs,
            mappings,
            default_lang: String::new(),
        })
    }

    /// Language given to files of mounts without one.
    pub fn default_lang(mut self, lang: impl Into<String>) -> Self {
        self.default_lang = lang.into();
        self
    }

    fn backing(&self, virt: &str) -> Vec<(&RootMapping, PathBuf)> {
        self.mappings
            .iter()
            .filter_map(|m| m.real_path(virt).map(|real| (m, real)))
            .collect()
    }

    fn apply(&self, m: &RootMapping, fi: FileHandle) -> FileHandle {
        let fi = m.meta.apply(fi);
        if fi.lang().is_empty() && !self.default_lang.is_empty() {
            let lang = self.default_lang.clone();
            return fi.with_lang(lang);
        }
        fi
    }

    /// Names of virtual directories directly below `virt` that exist only
    /// because a deeper mapping starts there.
    fn virtual_children(&self, virt: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for m in &self.mappings {
            let rest = if virt.is_empty() {
                Some(m.from.as_str())
            } else {
                m.from
                    .strip_prefix(virt)
                    .and_then(|r| r.strip_prefix('/'))
            };
            if let Some(child) = rest.and_then(|r| r.split('/').next())
                && !child.is_empty()
                && !out.iter().any(|c| c == child)
            {
                out.push(child.to_string());
            }
        }
        out
    }

    fn virtual_dir(virt: &str) -> FileHandle {
        let name = virt.rsplit('/').next().unwrap_or_default();
        FileHandle::new(name, true, virt, PathBuf::from(virt)).with_project(true)
    }

    /// Every existing real directory backing a virtual directory, tagged
    /// with its mapping's metadata.
    pub fn dirs(&self, name: &Path) -> io::Result<Vec<FileHandle>> {
        let virt = to_slash(name);
        let mut out = Vec::new();
        for (m, real) in self.backing(&virt) {
            match self.fs.stat(&real) {
                Ok(fi) if fi.is_dir() => out.push(self.apply(m, fi).with_path(virt.clone())),
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }
}

impl MetaFs for RootMappingFs {
    fn stat(&self, name: &Path) -> io::Result<FileHandle> {
        let virt = to_slash(name);
        for (m, real) in self.backing(&virt) {
            match self.fs.stat(&real) {
                Ok(fi) => {
                    let name = virt.rsplit('/').next().unwrap_or_default();
                    let fi = if fi.name() == name {
                        fi
                    } else {
                        // Mount roots are named after the virtual directory.
                        FileHandle::new(name, fi.is_dir(), virt.clone(), fi.filename())
                            .with_symlink(fi.is_symlink())
                    };
                    return Ok(self.apply(m, fi).with_path(virt));
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            }
        }
        if !self.virtual_children(&virt).is_empty() {
            return Ok(Self::virtual_dir(&virt));
        }
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("not found in root mappings: {virt}"),
        ))
    }

    fn read_dir(&self, name: &Path) -> io::Result<Vec<FileHandle>> {
        let virt = to_slash(name);
        let mut out = Vec::new();
        let mut seen: HashSet<(String, String)> = HashSet::new();

        let virtual_children = self.virtual_children(&virt);
        let mut found = !virtual_children.is_empty();
        for child in virtual_children {
            seen.insert((child.clone(), String::new()));
            out.push(Self::virtual_dir(&join_virtual(&virt, &child)));
        }

        for (m, real) in self.backing(&virt) {
            let children = match self.fs.read_dir(&real) {
                Ok(children) => children,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            found = true;
            for fi in children {
                let path = join_virtual(&virt, fi.name());
                let fi = self.apply(m, fi).with_path(path);
                // Directories are merged on listing, so one entry per name.
                let key = if fi.is_dir() {
                    (fi.name().to_string(), String::new())
                } else {
                    (fi.name().to_string(), fi.lang().to_string())
                };
                if seen.insert(key) {
                    out.push(fi);
                }
            }
        }

        if !found {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("not found in root mappings: {virt}"),
            ));
        }
        Ok(out)
    }

    fn open(&self, name: &Path) -> io::Result<Box<dyn Read + Send>> {
        let virt = to_slash(name);
        for (_, real) in self.backing(&virt) {
            match self.fs.open(&real) {
                Ok(r) => return Ok(r),
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            }
        }
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("not found in root mappings: {virt}"),
        ))
    }
}
