//! `concord-history`: inspect format-aware history and run headless merges.
//!
//! The `merge` subcommand fits git's merge driver protocol:
//!
//! ```text
//! [merge "concord"]
//!     driver = concord-history merge --ancestor %O --ours %A --theirs %B --path %P
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use concord_api::RevisionNumber;
use concord_core::backend::GitBackend;
use concord_core::config::{ConcordConfig, CONFIG_FILE_NAME};
use concord_core::inspector::RevisionInspector;
use concord_core::merge::MergeService;
use concord_core::notes::AnnotationCache;
use concord_handler_api::{ConflictHandling, MergeOrder, MergeSituation};

/// Format-aware history for collaboratively edited project files.
#[derive(Parser, Debug)]
#[command(name = "concord-history", version, about)]
struct Cli {
    /// Override the log level from the config file (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the change reports of one revision.
    Changes {
        /// Repository (or any path inside it).
        #[arg(long, default_value = ".")]
        repo: Utf8PathBuf,
        /// Configuration file; defaults to `concord.toml` at the repository root.
        #[arg(long)]
        config: Option<Utf8PathBuf>,
        /// Revision to inspect.
        #[arg(default_value = "HEAD")]
        revspec: String,
        /// Print the raw reports as JSON.
        #[arg(long)]
        json: bool,
    },
    /// List handlers in priority order.
    Handlers {
        /// Configuration file.
        #[arg(long)]
        config: Option<Utf8PathBuf>,
        /// Print the summaries as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Merge `theirs` into `ours` using `ancestor`, replacing `ours`.
    Merge {
        /// Local version; overwritten with the result.
        #[arg(long)]
        ours: Utf8PathBuf,
        /// Incoming version.
        #[arg(long)]
        theirs: Utf8PathBuf,
        /// Common ancestor.
        #[arg(long)]
        ancestor: Utf8PathBuf,
        /// Repository path of the merged file.
        #[arg(long)]
        path: String,
        /// Project root holding the annotation stores.
        #[arg(long, default_value = ".")]
        root: Utf8PathBuf,
        /// Configuration file; defaults to `concord.toml` under the root.
        #[arg(long)]
        config: Option<Utf8PathBuf>,
        /// Label of the local side.
        #[arg(long, default_value = "ours")]
        ours_label: String,
        /// Label of the incoming side.
        #[arg(long, default_value = "theirs")]
        theirs_label: String,
        /// Let the incoming side win conflicts.
        #[arg(long)]
        they_win: bool,
        /// Revision of the local side, named in recorded conflicts.
        #[arg(long, requires = "theirs_revision")]
        ours_revision: Option<String>,
        /// Revision of the incoming side, named in recorded conflicts.
        #[arg(long, requires = "ours_revision")]
        theirs_revision: Option<String>,
    },
    /// Print the annotations recorded for a file.
    Notes {
        /// Project root holding the annotation stores.
        #[arg(long, default_value = ".")]
        root: Utf8PathBuf,
        /// Annotated file, relative to the root.
        path: Utf8PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Changes {
            repo,
            config,
            revspec,
            json,
        } => {
            let backend = GitBackend::open(&repo)
                .with_context(|| format!("failed to open repository at {repo}"))?;
            let root = Utf8Path::from_path(backend.root())
                .map(Utf8Path::to_path_buf)
                .with_context(|| format!("repository root of {repo} is not UTF-8"))?;
            let config = load_config(config.as_deref(), &root)?;
            init_tracing(cli.log_level.as_deref(), &config);

            let revision = backend
                .revision(&revspec)
                .with_context(|| format!("failed to resolve {revspec}"))?;

            let inspector =
                RevisionInspector::new(Arc::new(backend), Arc::new(config.build_registry()));
            let reports = inspector
                .get_change_records(&revision)
                .with_context(|| format!("failed to inspect {revspec}"))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                println!("{} {}", revision.number.short(), revision.summary);
                for report in &reports {
                    println!("  {}", inspector.present(report));
                }
            }
            info!(reports = reports.len(), "done");
        }
        Command::Handlers { config, json } => {
            let config = load_config(config.as_deref(), Utf8Path::new("."))?;
            init_tracing(cli.log_level.as_deref(), &config);
            let summaries = config.build_registry().summaries();
            if json {
                println!("{}", serde_json::to_string_pretty(&summaries)?);
                return Ok(());
            }
            for summary in summaries {
                println!(
                    "{:<16} {:<32} {}",
                    summary.id,
                    summary.label,
                    summary.extensions.join(", ")
                );
            }
        }
        Command::Merge {
            ours,
            theirs,
            ancestor,
            path,
            root,
            config,
            ours_label,
            theirs_label,
            they_win,
            ours_revision,
            theirs_revision,
        } => {
            let config = load_config(config.as_deref(), &root)?;
            init_tracing(cli.log_level.as_deref(), &config);

            let handling = if they_win {
                ConflictHandling::TheyWin
            } else {
                ConflictHandling::WeWin
            };
            let mut situation = MergeSituation::new(&path, ours_label, theirs_label)
                .with_conflict_handling(handling);
            if let (Some(ours), Some(theirs)) = (ours_revision, theirs_revision) {
                situation = situation
                    .with_revisions(RevisionNumber::new(ours), RevisionNumber::new(theirs));
            }
            let order = MergeOrder::new(ours, theirs, ancestor, situation);

            let service = MergeService::new(
                Arc::new(config.build_registry()),
                Arc::new(AnnotationCache::new(root.as_std_path())),
            );
            let outcome = service
                .merge_file(&order)
                .with_context(|| format!("failed to merge {path}"))?;
            for conflict in &outcome.conflicts {
                println!(
                    "conflict in {} ({}): {}; kept {}",
                    conflict.path_in_repo, conflict.context, conflict.description, conflict.winner
                );
            }
        }
        Command::Notes { root, path } => {
            let config = load_config(None, &root)?;
            init_tracing(cli.log_level.as_deref(), &config);
            let cache = AnnotationCache::new(root.as_std_path());
            let notes = cache
                .get_repository(path.as_std_path())
                .with_context(|| format!("failed to open notes for {path}"))?;
            for annotation in notes.annotations() {
                let state = if annotation.resolved { "resolved" } else { "open" };
                println!(
                    "{:<8} {:<16} {}: {}",
                    state, annotation.class, annotation.target, annotation.message
                );
            }
        }
    }
    Ok(())
}

fn load_config(explicit: Option<&Utf8Path>, root: &Utf8Path) -> Result<ConcordConfig> {
    if let Some(path) = explicit {
        return ConcordConfig::load_from_file(path)
            .with_context(|| format!("failed to load configuration from {path}"));
    }
    let candidate = root.join(CONFIG_FILE_NAME);
    if candidate.is_file() {
        ConcordConfig::load_from_file(&candidate)
            .with_context(|| format!("failed to load configuration from {candidate}"))
    } else {
        Ok(ConcordConfig::default())
    }
}

fn init_tracing(override_level: Option<&str>, config: &ConcordConfig) {
    let level = override_level.unwrap_or(&config.engine.log_level);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
