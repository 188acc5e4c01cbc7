//! # Bundle Capture
//!
//! Content discovery for static site builds. A source tree is walked through
//! a stack of virtual filesystems, every directory is classified, and files
//! are grouped into bundles that are streamed to a page-construction sink.
//!
//! # Architecture: Three Layers
//!
//! ```text
//! 1. VFS       OsFs → SourceFs → BasePathFs → RootMappingFs → LanguageFs
//! 2. Capture   Walkway + classification → CaptureItem (CopyFile, ContentFile, BundleGroup)
//! 3. Pipeline  bounded channel → consumer thread → PageSink (Site)
//! ```
//!
//! - **VFS**: each layer adds metadata to immutable [`fs::FileHandle`]s:
//!   mount language, project ownership, language suffixes. Byte content is
//!   never altered.
//! - **Capture**: the walker visits each directory once, even through
//!   symlink cycles. Directories with `index.*` become leaf bundles holding
//!   their whole subtree; directories with `_index.*` become branch bundles
//!   owning only their direct assets.
//! - **Pipeline**: a single consumer owns the sink. Producers block when the
//!   channel is full and are released when the consumer fails.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`fs`] | Raw and metadata filesystems, decorators, root mappings |
//! | [`walk`] | `Walkway`: single-use, cycle-safe directory walker |
//! | [`classify`] | File and directory classification (`BundleType`, `ContentPolicy`) |
//! | [`capture`] | `Capturer`, bundle grouping, change tracking, `PagesCollector` |
//! | [`pipeline`] | `CaptureItem`, `PageSink`, bounded `PagesProcessor` |
//! | [`site`] | `Site`: reference sink collecting pages and published files |
//! | [`config`] | `config.toml` loading, merging and validation |
//! | [`error`] | `CaptureError` |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Immutable Handles
//!
//! A [`fs::FileHandle`] is a value. Decorators return new handles instead of
//! writing into shared metadata, so handles visited concurrently by the
//! fan-out workers never observe each other's changes.
//!
//! ## Language Attachment
//!
//! A shared resource (`cover.jpg`) is attached to every language of its
//! bundle. A resource for a specific language (`cover.de.jpg`) replaces it
//! in that language only, regardless of which one was seen first.
//!
//! ## Partial Captures
//!
//! A full capture records every bundle directory. A later partial capture
//! maps each changed path to its owning bundle and recaptures just that,
//! replacing the previous pages.

pub mod capture;
pub mod classify;
pub mod config;
pub mod error;
pub mod fs;
pub mod output;
pub mod pipeline;
pub mod site;
pub mod walk;

pub use error::CaptureError;

#[cfg(test)]
pub(crate) mod test_helpers;
