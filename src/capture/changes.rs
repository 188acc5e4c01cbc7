//! Change tracking for partial captures.
//!
//! A full capture registers every bundle directory it produced. When files
//! change, [`ChangeResolver::resolve_and_remove`] maps each changed path to
//! the unit that must be captured again: the owning leaf bundle, the
//! owning branch bundle, or just the file. The owner is forgotten until the
//! recapture registers it again.

use crate::classify::{BundleType, FileClassifier};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Where a changed path belongs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedChange {
    /// Directory owning the change.
    pub dir: String,
    /// Path to capture again: the bundle directory, or the file itself.
    pub path: String,
    pub bundle_type: BundleType,
}

/// Maps a changed path to its owning capture unit.
pub trait ChangeResolver: Send + Sync {
    fn resolve_and_remove(&self, path: &str) -> ResolvedChange;
}

#[derive(Debug, Default)]
struct ChangeState {
    leaf_dirs: BTreeSet<String>,
    branch_dirs: BTreeSet<String>,
    // Real directory -> virtual directory of a followed symlink.
    symlinks: BTreeMap<String, String>,
}

/// Bundle directories seen by the last capture.
pub struct ContentChangeMap {
    policy: Arc<dyn FileClassifier>,
    state: Mutex<ChangeState>,
}

impl ContentChangeMap {
    pub fn new(policy: Arc<dyn FileClassifier>) -> Self {
        Self {
            policy,
            state: Mutex::new(ChangeState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ChangeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a bundle directory. Plain directories are ignored.
    pub fn add(&self, dir: &str, bundle_type: BundleType) {
        let dir = dir.trim_matches('/').to_string();
        let mut state = self.state();
        match bundle_type {
            BundleType::LeafBundle => {
                state.leaf_dirs.insert(dir);
            }
            BundleType::BranchBundle => {
                state.branch_dirs.insert(dir);
            }
            BundleType::NotBundle => {}
        }
    }

    /// Remember that `real` is reachable as `virtual_dir` through a symlink,
    /// so changes reported under the real location resolve to the virtual one.
    pub fn add_symbolic_link_mapping(&self, real: &str, virtual_dir: &str) {
        let real = real.trim_matches('/').to_string();
        let virtual_dir = virtual_dir.trim_matches('/').to_string();
        if real != virtual_dir {
            self.state().symlinks.insert(real, virtual_dir);
        }
    }

    pub fn leaf_dirs(&self) -> Vec<String> {
        self.state().leaf_dirs.iter().cloned().collect()
    }

    pub fn branch_dirs(&self) -> Vec<String> {
        self.state().branch_dirs.iter().cloned().collect()
    }

    fn to_virtual(state: &ChangeState, path: &str) -> String {
        // Longest real prefix wins.
        for (real, virt) in state.symlinks.iter().rev() {
            if let Some(rest) = path.strip_prefix(real.as_str())
                && (rest.is_empty() || rest.starts_with('/'))
            {
                return format!("{virt}{rest}");
            }
        }
        path.to_string()
    }
}

impl ContentChangeMap {
    /// Where `path` belongs, without forgetting the owner.
    pub fn resolve(&self, path: &str) -> ResolvedChange {
        self.lookup(path, false)
    }

    fn lookup(&self, path: &str, remove: bool) -> ResolvedChange {
        let mut state = self.state();
        let path = Self::to_virtual(&state, path.trim_matches('/'));
        let (dir, name) = match path.rfind('/') {
            Some(i) => (path[..i].to_string(), &path[i + 1..]),
            None => (String::new(), path.as_str()),
        };
        let (file_type, is_content) = self.policy.classify(name);
        let take = |set: &mut BTreeSet<String>, d: &str| {
            if remove { set.remove(d) } else { set.contains(d) }
        };

        let resolved = |dir: String, bundle_type| ResolvedChange {
            path: dir.clone(),
            dir,
            bundle_type,
        };

        // Leaf bundles own their whole subtree, nested headers included.
        let mut candidate = Some(dir.as_str());
        while let Some(d) = candidate {
            if take(&mut state.leaf_dirs, d) {
                debug!(path = %path, owner = d, "change belongs to leaf bundle");
                return resolved(d.to_string(), BundleType::LeafBundle);
            }
            candidate = match d.rfind('/') {
                Some(i) => Some(&d[..i]),
                None if !d.is_empty() => Some(""),
                None => None,
            };
        }

        match file_type {
            BundleType::LeafBundle => {
                take(&mut state.leaf_dirs, &dir);
                return resolved(dir, BundleType::LeafBundle);
            }
            BundleType::BranchBundle => {
                take(&mut state.branch_dirs, &dir);
                return resolved(dir, BundleType::BranchBundle);
            }
            BundleType::NotBundle => {}
        }

        // Branch bundles only own the non-content files directly inside them.
        if !is_content && take(&mut state.branch_dirs, &dir) {
            debug!(path = %path, owner = %dir, "change belongs to branch bundle");
            return resolved(dir, BundleType::BranchBundle);
        }

        ResolvedChange {
            dir,
            path: path.clone(),
            bundle_type: BundleType::NotBundle,
        }
    }
}

impl ChangeResolver for ContentChangeMap {
    fn resolve_and_remove(&self, path: &str) -> ResolvedChange {
        self.lookup(path, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ContentPolicy;

    fn map() -> ContentChangeMap {
        let m = ContentChangeMap::new(Arc::new(ContentPolicy::default()));
        m.add("content/blog/post", BundleType::LeafBundle);
        m.add("content/docs", BundleType::BranchBundle);
        m
    }

    #[test]
    fn resource_resolves_to_leaf_bundle_and_is_forgotten() {
        let m = map();
        let r = m.resolve_and_remove("content/blog/post/images/cover.jpg");
        assert_eq!(r.dir, "content/blog/post");
        assert_eq!(r.path, "content/blog/post");
        assert_eq!(r.bundle_type, BundleType::LeafBundle);
        assert!(m.leaf_dirs().is_empty());

        let again = m.resolve_and_remove("content/blog/post/images/cover.jpg");
        assert_eq!(again.bundle_type, BundleType::NotBundle);
        assert_eq!(again.path, "content/blog/post/images/cover.jpg");
    }

    #[test]
    fn header_change_identifies_its_bundle() {
        let m = map();
        let r = m.resolve_and_remove("content/news/index.md");
        assert_eq!(r.bundle_type, BundleType::LeafBundle);
        assert_eq!(r.path, "content/news");

        let r = m.resolve_and_remove("content/docs/_index.md");
        assert_eq!(r.bundle_type, BundleType::BranchBundle);
        assert_eq!(r.path, "content/docs");
        assert!(m.branch_dirs().is_empty());
    }

    #[test]
    fn nested_header_resolves_to_enclosing_leaf_bundle() {
        let m = map();
        let r = m.resolve("content/blog/post/notes/index.md");
        assert_eq!(r.path, "content/blog/post");
        assert_eq!(r.bundle_type, BundleType::LeafBundle);

        let r = m.resolve_and_remove("content/blog/post/notes/_index.md");
        assert_eq!(r.path, "content/blog/post");
        assert_eq!(r.bundle_type, BundleType::LeafBundle);
        assert!(m.leaf_dirs().is_empty());
        assert_eq!(m.branch_dirs(), vec!["content/docs"]);
    }

    #[test]
    fn branch_owns_only_direct_non_content_files() {
        let m = map();
        let page = m.resolve_and_remove("content/docs/page1.md");
        assert_eq!(page.bundle_type, BundleType::NotBundle);
        assert_eq!(page.path, "content/docs/page1.md");

        let nested = m.resolve_and_remove("content/docs/sub/logo.png");
        assert_eq!(nested.bundle_type, BundleType::NotBundle);

        let asset = m.resolve_and_remove("content/docs/logo.png");
        assert_eq!(asset.bundle_type, BundleType::BranchBundle);
        assert_eq!(asset.path, "content/docs");
    }

    #[test]
    fn symlinked_locations_resolve_to_virtual_paths() {
        let m = map();
        m.add_symbolic_link_mapping("/shared/posts", "content/blog/post");
        let r = m.resolve_and_remove("/shared/posts/cover.jpg");
        assert_eq!(r.path, "content/blog/post");
        assert_eq!(r.bundle_type, BundleType::LeafBundle);
    }

    #[test]
    fn resolve_keeps_the_owner() {
        let m = map();
        let r = m.resolve("content/blog/post/cover.jpg");
        assert_eq!(r.path, "content/blog/post");
        assert_eq!(m.leaf_dirs(), vec!["content/blog/post"]);
        assert_eq!(
            m.resolve_and_remove("content/blog/post/cover.jpg").bundle_type,
            BundleType::LeafBundle
        );
    }

    #[test]
    fn unknown_file_resolves_to_itself() {
        let m = map();
        let r = m.resolve_and_remove("about.md");
        assert_eq!(r.dir, "");
        assert_eq!(r.path, "about.md");
        assert_eq!(r.bundle_type, BundleType::NotBundle);
    }
}
