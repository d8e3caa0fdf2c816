//! checkuser-jobs: maintenance jobs for a CheckUser store.
//!
//! Reads `config.toml` (or the path given with `--config`) plus
//! `CHECKUSER__*` environment overrides, opens the SQLite store and runs one
//! job:
//!
//! ```text
//! checkuser-jobs purge [--domain enwiki]
//! checkuser-jobs active-actors --since 2024-06-01T00:00:00Z
//! checkuser-jobs wiki-id enwiki
//! ```

use std::{
  collections::BTreeMap,
  io::Write as _,
  path::{Path, PathBuf},
};

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use checkuser_core::{
  client_hints::ClientHintsPurgeCounts, config::Settings, source::EventSource,
};
use checkuser_store_sqlite::{RetentionPurger, SqliteStore};
use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "CheckUser maintenance jobs")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Purge expired events and metadata, one batch at a time, until none
  /// remain.
  Purge {
    /// Domain to purge. Defaults to the configured domain.
    #[arg(long)]
    domain: Option<String>,
  },
  /// List actors active on any domain after a point in time.
  ActiveActors {
    /// RFC 3339 timestamp; activity strictly after it counts.
    #[arg(long)]
    since:      DateTime<Utc>,
    /// Rows fetched per round trip. Defaults to the configured batch size.
    #[arg(long)]
    batch_size: Option<usize>,
  },
  /// Print the central index id of a domain, assigning one if needed.
  WikiId { domain: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let settings: Settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("CHECKUSER").separator("__"))
    .build()
    .context("failed to read config file")?
    .try_deserialize()
    .context("failed to deserialise settings")?;

  let store_path = expand_tilde(&settings.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  match cli.command {
    Command::Purge { domain } => {
      let domain = domain.unwrap_or_else(|| settings.domain.clone());
      purge(store, &settings, &domain).await
    }
    Command::ActiveActors { since, batch_size } => {
      let batch_size =
        batch_size.unwrap_or(settings.central_index.lookup_batch_size);
      active_actors(&store, &settings, since, batch_size).await
    }
    Command::WikiId { domain } => {
      let index = store
        .central_index(settings.central_index.clone())
        .context("invalid central index configuration")?;
      let id = index
        .wiki_id_for(&domain)
        .await
        .with_context(|| format!("failed to look up wiki id for {domain}"))?;
      println!("{id}");
      Ok(())
    }
  }
}

async fn purge(store: SqliteStore, settings: &Settings, domain: &str) -> anyhow::Result<()> {
  let index = store
    .central_index(settings.central_index.clone())
    .context("invalid central index configuration")?;
  let purger = RetentionPurger::new(store.clone(), store, settings.retention.clone())
    .with_central_index(index);

  let mut runs = 0_usize;
  let mut skipped = false;
  let mut events: BTreeMap<EventSource, usize> = BTreeMap::new();
  let mut client_hints = ClientHintsPurgeCounts::default();
  let mut central_index = 0;

  loop {
    let report = purger
      .run(domain, Utc::now())
      .await
      .with_context(|| format!("purge run {} for {domain} failed", runs + 1))?;
    runs += 1;

    for (source, n) in &report.events_deleted {
      *events.entry(*source).or_default() += n;
    }
    client_hints.mappings_deleted += report.client_hints.mappings_deleted;
    client_hints.orphaned_mappings_deleted += report.client_hints.orphaned_mappings_deleted;
    client_hints.orphaned_values_deleted += report.client_hints.orphaned_values_deleted;
    central_index += report.central_index_deleted;

    if report.skipped {
      skipped = true;
      break;
    }
    if report.rows_removed() == 0 {
      break;
    }
  }

  let summary = serde_json::json!({
    "domain": domain,
    "runs": runs,
    "skipped": skipped,
    "events_deleted": events,
    "client_hints": client_hints,
    "central_index_deleted": central_index,
  });
  println!("{summary}");
  Ok(())
}

async fn active_actors(
  store: &SqliteStore,
  settings: &Settings,
  since: DateTime<Utc>,
  batch_size: usize,
) -> anyhow::Result<()> {
  let index = store
    .central_index(settings.central_index.clone())
    .context("invalid central index configuration")?;
  let mut actors = index.active_actors_since(since, batch_size);

  let mut total = 0_usize;
  let mut out = std::io::stdout().lock();
  while let Some(batch) = actors
    .next_batch()
    .await
    .with_context(|| format!("active actor lookup failed after {:?}", actors.position()))?
  {
    total += batch.len();
    for actor in batch {
      writeln!(out, "{actor}").context("failed to write to stdout")?;
    }
  }

  tracing::info!(%since, total, "active actor lookup complete");
  Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
