//! `recall` — maintenance CLI for the memory store.
//!
//! # Usage
//!
//! ```
//! recall append --role user --insight "hello world"
//! recall flush
//! recall search "role:user hello"
//! recall selfcheck
//! ```
//!
//! Results are printed to stdout as JSON; logs go to stderr.

use std::{collections::HashMap, path::PathBuf, process::ExitCode};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use recall_core::{
  config::{ConfigKey, ConfigResolver, MemoryConfig},
  health::SelfCheck,
  record::NewRecord,
  store::SearchOptions,
};
use recall_store_sqlite::SqliteStore;
use serde::Serialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// `selfcheck` found missing objects or an incoherent index.
const EXIT_INTEGRITY_WARNING: u8 = 2;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "recall", author, version, about = "Durable memory store for agents")]
struct Cli {
  /// YAML config file; overrides `MEMORY_CONFIG`.
  #[arg(short, long, value_name = "FILE")]
  config: Option<PathBuf>,

  /// Root directory for relative paths; overrides `MEMORY_ROOT`.
  #[arg(long, value_name = "DIR")]
  root: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Append one record to the buffer.
  Append {
    #[arg(long, default_value = "system")]
    role:    String,
    #[arg(long)]
    insight: String,
    #[arg(long)]
    raw:     Option<String>,
    /// May be repeated.
    #[arg(long = "tag")]
    tags:    Vec<String>,
    /// Unix seconds; defaults to now.
    #[arg(long)]
    ts:      Option<i64>,
  },

  /// Move buffered records into the store.
  Flush {
    /// Defaults to `FLUSH_BATCH`.
    #[arg(long)]
    max_lines: Option<usize>,
  },

  /// Keyword or phrase search; supports `role:` and `from:` filters.
  Search {
    query:    String,
    #[arg(long)]
    limit:    Option<usize>,
    #[arg(long)]
    days:     Option<u32>,
    #[arg(long)]
    no_cache: bool,
  },

  /// List the newest records.
  Recent {
    #[arg(long)]
    role:  Option<String>,
    #[arg(long, default_value_t = 20)]
    limit: usize,
  },

  /// Print store statistics.
  Stats,

  /// Probe the schema. Exits 0 when healthy, 2 on an integrity warning.
  Selfcheck,

  /// Recreate missing objects and rebuild the index, then probe.
  Heal,
}

// ─── Main ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  match run(cli).await {
    Ok(code) => code,
    Err(e) => {
      tracing::error!("{e:#}");
      ExitCode::FAILURE
    }
  }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
  let config = load_config(cli.config, cli.root)?;
  // Read-only reports must see the schema as it is, not as `open` leaves it.
  let opened = match cli.command {
    Command::Stats | Command::Selfcheck => SqliteStore::open_unhealed(config.clone()).await,
    _ => SqliteStore::open(config.clone()).await,
  };
  let store =
    opened.with_context(|| format!("failed to open store at {}", config.db_path.display()))?;

  match cli.command {
    Command::Append { role, insight, raw, tags, ts } => {
      let mut record = NewRecord::new(insight).with_role(role).with_tags(tags);
      if let Some(raw) = raw {
        record = record.with_raw(raw);
      }
      if let Some(ts) = ts {
        record = record.with_ts(ts);
      }
      let written = store.append(record).await.context("append failed")?;
      print_json(&written)?;
    }

    Command::Flush { max_lines } => {
      let report = store
        .flush_report(max_lines.unwrap_or(config.flush_batch))
        .await
        .context("flush failed")?;
      print_json(&report)?;
    }

    Command::Search { query, limit, days, no_cache } => {
      let options = SearchOptions { limit, days, use_cache: !no_cache };
      let hits = store.search(&query, options).await.context("search failed")?;
      print_json(&hits)?;
    }

    Command::Recent { role, limit } => {
      let hits = match role {
        Some(role) => store.by_role(&role, limit).await,
        None => store.recent(limit).await,
      }
      .context("listing failed")?;
      print_json(&hits)?;
    }

    Command::Stats => {
      let stats = store.stats().await.context("stats failed")?;
      print_json(&stats)?;
    }

    Command::Selfcheck => return report_check(&store.selfcheck().await),

    Command::Heal => {
      store.heal().await.context("heal failed")?;
      return report_check(&store.selfcheck().await);
    }
  }
  Ok(ExitCode::SUCCESS)
}

/// Environment, then `--root` / `--config` on top of it.
fn load_config(file: Option<PathBuf>, root: Option<PathBuf>) -> anyhow::Result<MemoryConfig> {
  let mut env: HashMap<String, String> = std::env::vars().collect();
  if let Some(root) = root {
    env.insert(
      ConfigKey::MemoryRoot.env_name().to_owned(),
      root.to_string_lossy().into_owned(),
    );
  }

  let mut builder = ConfigResolver::builder().env(env);
  if let Some(file) = file {
    builder = builder.file(file);
  }
  let config = builder
    .build()
    .context("failed to read configuration")?
    .resolve()
    .context("invalid configuration")?;
  tracing::debug!(?config, "configuration resolved");
  Ok(config)
}

fn report_check(check: &SelfCheck) -> anyhow::Result<ExitCode> {
  print_json(check)?;
  if check.error.is_some() {
    return Ok(ExitCode::FAILURE);
  }
  if !check.healthy() {
    tracing::warn!(missing = ?check.missing(), coherent = check.fts_coherent, "integrity warning");
    return Ok(ExitCode::from(EXIT_INTEGRITY_WARNING));
  }
  Ok(ExitCode::SUCCESS)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
  let out = serde_json::to_string_pretty(value).context("failed to serialise output")?;
  println!("{out}");
  Ok(())
}
