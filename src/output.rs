//! CLI output formatting for capture results.
//!
//! # Information-First Display
//!
//! Output is **information-centric, not file-centric**. Every page is shown
//! by its positional index and title, with its kind in brackets; source and
//! output paths follow as indented context lines:
//!
//! ```text
//! Pages (en)
//! 001 First Post [leaf]
//!     Source: content/blog/first-post/index.md
//!     Resource: content/blog/first-post/cover.jpg → blog/first-post/cover.jpg
//!     001 Notes [nested]
//!         Source: content/blog/first-post/notes.md
//! 002 About [single]
//!     Source: content/about.md
//!
//! Published
//!     content/robots.txt → robots.txt (24 bytes)
//!
//! Captured 2 pages in 1 language, 1 resource, 1 copied file
//! ```
//!
//! A partial rebuild lists what each changed path resolved to:
//!
//! ```text
//! content/blog/first-post/cover.jpg → content/blog/first-post (leaf bundle)
//! ```
//!
//! # Architecture
//!
//! Each view has a `format_*` function (returns `Vec<String>`) for testability
//! and a `print_*` wrapper that writes to stdout. Format functions are pure:
//! no I/O, no side effects.

use crate::capture::ResolvedChange;
use crate::classify::BundleType;
use crate::error::CaptureError;
use crate::site::{Page, PageKind, Site};

// ============================================================================
// Shared entity display helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn kind_label(kind: PageKind) -> &'static str {
    match kind {
        PageKind::Single => "single",
        PageKind::Leaf => "leaf",
        PageKind::Branch => "branch",
        PageKind::Nested => "nested",
    }
}

/// Format an entity header: positional index + title + kind.
///
/// ```text
/// 001 First Post [leaf]
/// ```
fn entity_header(index: usize, title: &str, kind: PageKind) -> String {
    format!("{} {} [{}]", format_index(index), title, kind_label(kind))
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{n} {word}")
    } else {
        format!("{n} {word}s")
    }
}

fn bundle_label(tp: BundleType) -> &'static str {
    match tp {
        BundleType::LeafBundle => "leaf bundle",
        BundleType::BranchBundle => "branch bundle",
        BundleType::NotBundle => "file",
    }
}

// ============================================================================
// Page tree
// ============================================================================

fn format_page(page: &Page, index: usize, depth: usize, lines: &mut Vec<String>) {
    lines.push(format!(
        "{}{}",
        indent(depth),
        entity_header(index, &page.title, page.kind)
    ));
    lines.push(format!("{}Source: {}", indent(depth + 1), page.path));
    for resource in &page.resources {
        lines.push(format!(
            "{}Resource: {} → {}",
            indent(depth + 1),
            resource.path,
            resource.targets.join(", ")
        ));
    }
    for (i, child) in page.pages.iter().enumerate() {
        format_page(child, i + 1, depth + 1, lines);
    }
}

/// Format the captured site: pages per language, then copied files.
pub fn format_site(site: &Site) -> Vec<String> {
    let mut lines = Vec::new();
    let manifest = site.manifest();

    for (lang, pages) in &manifest.languages {
        if !lines.is_empty() {
            lines.push(String::new());
        }
        lines.push(format!("Pages ({lang})"));
        for (i, page) in pages.iter().enumerate() {
            format_page(page, i + 1, 0, &mut lines);
        }
    }

    if !manifest.published.is_empty() {
        if !lines.is_empty() {
            lines.push(String::new());
        }
        lines.push("Published".to_string());
        for p in &manifest.published {
            lines.push(format!(
                "{}{} → {} ({} bytes)",
                indent(1),
                p.source,
                p.target,
                p.bytes
            ));
        }
    }

    if !lines.is_empty() {
        lines.push(String::new());
    }
    lines.push(format_summary(site));
    lines
}

/// One-line totals of a capture.
pub fn format_summary(site: &Site) -> String {
    let resources: usize = site.pages().map(|p| p.resources.len()).sum();
    format!(
        "Captured {} in {}, {}, {}",
        plural(site.len(), "page"),
        plural(site.languages().len(), "language"),
        plural(resources, "resource"),
        plural(site.published().len(), "copied file"),
    )
}

/// Format per-item failures, one per line.
pub fn format_errors(errors: &[CaptureError]) -> Vec<String> {
    if errors.is_empty() {
        return Vec::new();
    }
    let mut lines = vec![format!("{} failed", plural(errors.len(), "file"))];
    for err in errors {
        lines.push(format!("{}{}", indent(1), err));
    }
    lines
}

/// Format where each changed path was resolved to.
pub fn format_changes(changes: &[(String, ResolvedChange)]) -> Vec<String> {
    changes
        .iter()
        .map(|(path, resolved)| {
            format!(
                "{} → {} ({})",
                path,
                resolved.path,
                bundle_label(resolved.bundle_type)
            )
        })
        .collect()
}

pub fn print_site(site: &Site) {
    for line in format_site(site) {
        println!("{}", line);
    }
}

pub fn print_errors(errors: &[CaptureError]) {
    for line in format_errors(errors) {
        println!("{}", line);
    }
}

pub fn print_changes(changes: &[(String, ResolvedChange)]) {
    for line in format_changes(changes) {
        println!("{}", line);
    }
}

// ============================================================================
// Tests
// ============================================================================
