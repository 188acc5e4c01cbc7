use bundle_capture::capture::PagesCollector;
use bundle_capture::config::{self, CaptureConfig};
use bundle_capture::output;
use bundle_capture::site::Site;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn version_string() -> &'static str {
    let on_tag = env!("ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once at startup
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "bundle-capture")]
#[command(about = "Discover and capture content bundles for a static site build")]
#[command(long_about = "\
Discover and capture content bundles for a static site build

Directories holding an index file are leaf bundles: the page and every
file below it travel together. Directories holding an _index file are
branch bundles: their pages stay independent, their direct assets belong
to the section page.

Site structure:

  site/
  ├── config.toml                  # Capture config (optional)
  └── content/
      ├── about.md                 # Single page
      ├── robots.txt               # Copied unchanged
      ├── blog/
      │   ├── _index.md            # Branch bundle (section page)
      │   ├── banner.jpg           # Resource of the section page
      │   ├── first-post/
      │   │   ├── index.md         # Leaf bundle
      │   │   ├── index.de.md      # German translation (language suffix)
      │   │   ├── cover.jpg        # Shared by both languages
      │   │   └── notes/draft.md   # Nested page of the bundle
      │   └── second-post.md       # Single page in the section
      └── docs -> ../shared/docs   # Symlinks are followed in project mounts

Logging follows RUST_LOG; --verbose shows classification decisions.

Run 'bundle-capture gen-config' to generate a documented config.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Site root holding config.toml and the content tree
    #[arg(long, default_value = ".", global = true)]
    source: PathBuf,

    /// Output directory for copied files and resources
    #[arg(long, default_value = "public", global = true)]
    output: PathBuf,

    /// Directory for intermediate files (manifest)
    #[arg(long, default_value = ".bundle-capture-temp", global = true)]
    temp_dir: PathBuf,

    /// Log classification decisions
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Capture the content tree, publish files and write the manifest
    Capture,
    /// Capture without publishing and print the page tree
    Check,
    /// Capture, then recapture only what owns the given paths
    Rebuild {
        /// Changed virtual paths, e.g. content/blog/first-post/cover.jpg
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Print a stock config.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Capture => {
            let config = config::load_config(&cli.source)?;
            init_thread_pool(&config.processing);
            let collector = build_collector(&config, &cli.source)?;

            println!("==> Capturing {}", cli.source.display());
            let site = Site::new()
                .with_output(&cli.output)
                .content_root(&config.content_dir);
            let report = collector.collect(site)?;
            let manifest_path = report.sink.write_manifest(&cli.temp_dir)?;
            output::print_site(&report.sink);
            println!("==> Manifest: {}", manifest_path.display());
        }
        Command::Check => {
            let config = config::load_config(&cli.source)?;
            init_thread_pool(&config.processing);
            let collector = build_collector(&config, &cli.source)?;

            println!("==> Checking {}", cli.source.display());
            let report = collector.collect(Site::new().content_root(&config.content_dir))?;
            output::print_site(&report.sink);
            println!("==> Content is valid");
        }
        Command::Rebuild { paths } => {
            let config = config::load_config(&cli.source)?;
            init_thread_pool(&config.processing);
            let collector = build_collector(&config, &cli.source)?;

            println!("==> Capturing {}", cli.source.display());
            let site = Site::new()
                .with_output(&cli.output)
                .content_root(&config.content_dir);
            let report = collector.collect(site)?;
            println!("{}", output::format_summary(&report.sink));

            println!("==> Rebuilding {} path(s)", paths.len());
            let resolved: Vec<_> = paths
                .iter()
                .map(|p| (p.clone(), collector.changes().resolve(p)))
                .collect();
            output::print_changes(&resolved);
            let report = collector.collect_partial(report.sink, paths)?;
            output::print_errors(&report.errors);
            output::print_site(&report.sink);
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Install the tracing subscriber. `RUST_LOG` wins over `--verbose`.
fn init_logging(verbose: bool) {
    let fallback = if verbose { "bundle_capture=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Initialize the rayon thread pool based on processing config.
///
/// Caps at the number of available CPU cores. A config can lower it, not raise it.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_workers(processing).max(1);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}

fn build_collector(
    config: &CaptureConfig,
    source: &Path,
) -> Result<PagesCollector, config::ConfigError> {
    let stack = config.source_stack(source)?;
    Ok(
        PagesCollector::new(stack.fs, Arc::new(config.policy()), config.collector_options())
            .real_fs(stack.real_fs),
    )
}
