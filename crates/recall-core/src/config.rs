//! Configuration resolution.
//!
//! Every key is looked up in the process environment first, then in an
//! optional YAML file, then in the built-in defaults. The YAML file lives at
//! `$MEMORY_CONFIG`, or `<root>/configs/memory.yaml` when that is unset.
//! Path-valued keys default to fixed locations under the memory root and are
//! resolved against it when relative.

use std::{
  collections::HashMap,
  path::{Path, PathBuf},
  str::FromStr,
  time::Duration,
};

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Serialize;

use crate::{Error, Result};

/// Env var naming the YAML config file.
pub const CONFIG_PATH_ENV: &str = "MEMORY_CONFIG";

// ─── Keys ────────────────────────────────────────────────────────────────────

/// Every key the resolver knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
  MemoryRoot,
  BufferPath,
  DbPath,
  HealthPath,
  LockNamespace,
  RecentDays,
  KeywordMaxlen,
  FtsLimit,
  QueryCacheSize,
  QueryCacheTtl,
  FlushBatch,
  LockTtl,
}

impl ConfigKey {
  pub const ALL: [ConfigKey; 12] = [
    ConfigKey::MemoryRoot,
    ConfigKey::BufferPath,
    ConfigKey::DbPath,
    ConfigKey::HealthPath,
    ConfigKey::LockNamespace,
    ConfigKey::RecentDays,
    ConfigKey::KeywordMaxlen,
    ConfigKey::FtsLimit,
    ConfigKey::QueryCacheSize,
    ConfigKey::QueryCacheTtl,
    ConfigKey::FlushBatch,
    ConfigKey::LockTtl,
  ];

  /// Name of the environment variable.
  pub fn env_name(self) -> &'static str {
    match self {
      ConfigKey::MemoryRoot => "MEMORY_ROOT",
      ConfigKey::BufferPath => "MEMORY_BUFFER_PATH",
      ConfigKey::DbPath => "MEMORY_DB_PATH",
      ConfigKey::HealthPath => "HEALTH_PATH",
      ConfigKey::LockNamespace => "LOCK_NAMESPACE",
      ConfigKey::RecentDays => "RECENT_DAYS",
      ConfigKey::KeywordMaxlen => "KEYWORD_MAXLEN",
      ConfigKey::FtsLimit => "FTS_LIMIT",
      ConfigKey::QueryCacheSize => "QUERY_CACHE_SIZE",
      ConfigKey::QueryCacheTtl => "QUERY_CACHE_TTL",
      ConfigKey::FlushBatch => "FLUSH_BATCH",
      ConfigKey::LockTtl => "LOCK_TTL",
    }
  }

  /// Key as it appears in the YAML file (and as `config` stores it).
  pub fn file_key(self) -> String { self.env_name().to_ascii_lowercase() }

  /// Built-in default for keys that have a fixed one. Path keys are derived
  /// from the root instead (see [`ConfigKey::default_relative_path`]).
  fn default_value(self) -> Option<&'static str> {
    match self {
      ConfigKey::MemoryRoot => Some("."),
      ConfigKey::LockNamespace => Some("memory"),
      ConfigKey::RecentDays => Some("30"),
      ConfigKey::KeywordMaxlen => Some("24"),
      ConfigKey::FtsLimit => Some("50"),
      ConfigKey::QueryCacheSize => Some("256"),
      ConfigKey::QueryCacheTtl => Some("60"),
      ConfigKey::FlushBatch => Some("5000"),
      ConfigKey::LockTtl => Some("10"),
      ConfigKey::BufferPath | ConfigKey::DbPath | ConfigKey::HealthPath => None,
    }
  }

  fn default_relative_path(self) -> Option<&'static str> {
    match self {
      ConfigKey::BufferPath => Some("data/memory/memory_buffer.jsonl"),
      ConfigKey::DbPath => Some("data/memory/memory.db"),
      ConfigKey::HealthPath => Some("data/logs/system_health.json"),
      _ => None,
    }
  }
}

// ─── Resolved configuration ──────────────────────────────────────────────────

/// Fully resolved settings threaded into the journal, store and router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryConfig {
  pub root:             PathBuf,
  pub buffer_path:      PathBuf,
  pub db_path:          PathBuf,
  pub health_path:      PathBuf,
  pub lock_namespace:   String,
  pub recent_days:      u32,
  pub keyword_maxlen:   usize,
  pub fts_limit:        usize,
  pub query_cache_size: usize,
  /// Seconds.
  pub query_cache_ttl:  u64,
  pub flush_batch:      usize,
  /// Seconds.
  pub lock_ttl:         u64,
}

impl MemoryConfig {
  /// Built-in defaults with every path under `root`. Ignores the environment.
  pub fn with_root(root: impl Into<PathBuf>) -> Self {
    let root = root.into();
    Self {
      buffer_path:      root.join("data/memory/memory_buffer.jsonl"),
      db_path:          root.join("data/memory/memory.db"),
      health_path:      root.join("data/logs/system_health.json"),
      root,
      lock_namespace:   "memory".into(),
      recent_days:      30,
      keyword_maxlen:   24,
      fts_limit:        50,
      query_cache_size: 256,
      query_cache_ttl:  60,
      flush_batch:      5000,
      lock_ttl:         10,
    }
  }

  /// Fully-qualified advisory lock name, e.g. `memory/flush`.
  pub fn lock_name(&self, name: &str) -> String { format!("{}/{name}", self.lock_namespace) }

  pub fn lock_ttl(&self) -> Duration { Duration::from_secs(self.lock_ttl) }

  pub fn query_cache_ttl(&self) -> Duration { Duration::from_secs(self.query_cache_ttl) }
}

// ─── Resolver ────────────────────────────────────────────────────────────────

/// Three-tier key lookup: environment → YAML file → defaults.
pub struct ConfigResolver {
  settings: Config,
  root:     PathBuf,
  defaults: bool,
}

/// Builder for [`ConfigResolver`]; lets tests inject an environment.
pub struct ResolverBuilder {
  env:      Option<HashMap<String, String>>,
  file:     Option<PathBuf>,
  defaults: bool,
}

impl Default for ResolverBuilder {
  fn default() -> Self { Self { env: None, file: None, defaults: true } }
}

impl ResolverBuilder {
  /// Use `vars` instead of the process environment.
  pub fn env<I, K, V>(mut self, vars: I) -> Self
  where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
  {
    self.env = Some(vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect());
    self
  }

  /// Read this YAML file instead of the one named by the environment.
  pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
    self.file = Some(path.into());
    self
  }

  /// Skip the built-in defaults tier.
  pub fn without_defaults(mut self) -> Self {
    self.defaults = false;
    self
  }

  pub fn build(self) -> Result<ConfigResolver> {
    let env = self.env.unwrap_or_else(|| std::env::vars().collect());

    let root = env
      .get(ConfigKey::MemoryRoot.env_name())
      .map(PathBuf::from)
      .unwrap_or_else(|| PathBuf::from("."));
    let file = self
      .file
      .or_else(|| env.get(CONFIG_PATH_ENV).map(PathBuf::from))
      .unwrap_or_else(|| root.join("configs/memory.yaml"));

    // Only our own keys are taken from the environment so unrelated variables
    // never leak into the settings tree. Keys are handed over in file form.
    let ours: config::Map<String, String> = ConfigKey::ALL
      .iter()
      .filter_map(|k| env.get(k.env_name()).map(|v| (k.file_key(), v.clone())))
      .collect();

    let mut builder = Config::builder();
    if self.defaults {
      for key in ConfigKey::ALL {
        if let Some(value) = key.default_value() {
          builder = builder.set_default(key.file_key(), value)?;
        }
      }
    }
    let settings = builder
      .add_source(File::from(file).format(FileFormat::Yaml).required(false))
      .add_source(Environment::default().source(Some(ours)))
      .build()?;

    let mut resolver = ConfigResolver { settings, root, defaults: self.defaults };
    // The file may move the root; path defaults follow it.
    if let Ok(root) = resolver.settings.get_string(&ConfigKey::MemoryRoot.file_key()) {
      resolver.root = PathBuf::from(root);
    }
    Ok(resolver)
  }
}

impl ConfigResolver {
  pub fn builder() -> ResolverBuilder { ResolverBuilder::default() }

  /// Resolver over the real process environment.
  pub fn from_env() -> Result<Self> { Self::builder().build() }

  /// Resolved string value of one key.
  pub fn get(&self, key: ConfigKey) -> Result<String> {
    match self.settings.get_string(&key.file_key()) {
      Ok(value) => Ok(value),
      Err(ConfigError::NotFound(_)) => match key.default_relative_path() {
        Some(rel) if self.defaults => Ok(self.root.join(rel).to_string_lossy().into_owned()),
        _ => Err(Error::MissingConfig(key.env_name().to_owned())),
      },
      Err(e) => Err(e.into()),
    }
  }

  /// Resolve every key into a typed [`MemoryConfig`].
  pub fn resolve(&self) -> Result<MemoryConfig> {
    let root = PathBuf::from(self.get(ConfigKey::MemoryRoot)?);
    Ok(MemoryConfig {
      buffer_path:      self.path(ConfigKey::BufferPath, &root)?,
      db_path:          self.path(ConfigKey::DbPath, &root)?,
      health_path:      self.path(ConfigKey::HealthPath, &root)?,
      lock_namespace:   self.get(ConfigKey::LockNamespace)?,
      recent_days:      self.parse(ConfigKey::RecentDays)?,
      keyword_maxlen:   self.parse(ConfigKey::KeywordMaxlen)?,
      fts_limit:        self.parse(ConfigKey::FtsLimit)?,
      query_cache_size: self.parse(ConfigKey::QueryCacheSize)?,
      query_cache_ttl:  self.parse(ConfigKey::QueryCacheTtl)?,
      flush_batch:      self.parse(ConfigKey::FlushBatch)?,
      lock_ttl:         self.parse(ConfigKey::LockTtl)?,
      root,
    })
  }

  fn path(&self, key: ConfigKey, root: &Path) -> Result<PathBuf> {
    let value = PathBuf::from(self.get(key)?);
    if value.is_absolute() || value.starts_with(root) {
      return Ok(value);
    }
    Ok(root.join(value))
  }

  fn parse<T: FromStr>(&self, key: ConfigKey) -> Result<T> {
    let value = self.get(key)?;
    value
      .trim()
      .parse()
      .map_err(|_| Error::InvalidConfig { key: key.env_name().to_owned(), value })
  }
}
