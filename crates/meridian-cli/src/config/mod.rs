//! Configuration loading for Meridian.
//! Reads meridian.toml from `--config` / MERIDIAN_CONFIG, or the current directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use meridian_common::{AssociationPlan, RunConfig, SourceSettings};
use meridian_db::{DbError, DisabledStore, MemoryStore, PgStore, Store, StoreRole, UnreachableStore};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const DEFAULT_CONFIG_PATH: &str = "meridian.toml";
pub const DATABASE_URL_ENV: &str = "MERIDIAN_DATABASE_URL";

/// The whole file. `[run]` holds the scalar run settings; sources, stores
/// and association plans have their own sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub source: SourceSettings,
    #[serde(default)]
    pub stores: StoresConfig,
    #[serde(default)]
    pub associations: Vec<AssociationPlan>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoresConfig {
    #[serde(default = "default_primary")]
    pub primary: StoreConfig,
    #[serde(default = "default_secondary")]
    pub secondary: StoreConfig,
}

fn default_primary() -> StoreConfig {
    StoreConfig::Postgres { url: None, max_connections: default_max_connections() }
}
fn default_secondary() -> StoreConfig {
    StoreConfig::Memory { snapshot: None }
}

impl Default for StoresConfig {
    fn default() -> Self {
        Self {
            primary: default_primary(),
            secondary: default_secondary(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Falls back to MERIDIAN_DATABASE_URL when `url` is not set.
    Postgres {
        #[serde(default)]
        url: Option<String>,
        #[serde(default = "default_max_connections")]
        max_connections: usize,
    },
    Memory {
        #[serde(default)]
        snapshot: Option<PathBuf>,
    },
    /// Needs the `lance` feature.
    Lance { path: PathBuf },
    Disabled,
}

fn default_max_connections() -> usize { 8 }

/// Command-line values that win over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub types: Option<Vec<String>>,
    pub count: Option<usize>,
    pub seed: Option<u64>,
    pub parallelism: Option<usize>,
}

impl Config {
    /// Load from an explicit path, or from ./meridian.toml when present.
    /// Without either, every setting takes its default.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) if !p.exists() => bail!("Config file not found: {}", p.display()),
            Some(p) => p.to_path_buf(),
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => PathBuf::from(DEFAULT_CONFIG_PATH),
            None => {
                info!("No {DEFAULT_CONFIG_PATH} found, using defaults");
                return Ok(Self::default());
            }
        };

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config = Self::from_toml(&content).with_context(|| format!("parsing {}", path.display()))?;
        info!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.check_stores()?;
        Ok(config)
    }

    fn check_stores(&self) -> anyhow::Result<()> {
        if self.stores.primary == StoreConfig::Disabled && self.stores.secondary == StoreConfig::Disabled {
            bail!("both stores are disabled");
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, o: Overrides) {
        if let Some(types) = o.types {
            self.run.entity_types = types;
        }
        if let Some(count) = o.count {
            self.run.default_target_count = count;
            self.run.target_count_per_type.clear();
        }
        if o.seed.is_some() {
            self.run.seed = o.seed;
        }
        if let Some(p) = o.parallelism {
            self.run.parallelism = p;
        }
    }

    /// The run configuration handed to the pipeline.
    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            source: self.source.clone(),
            associations: self.associations.clone(),
            ..self.run.clone()
        }
    }
}

// ── Store opening ─────────────────────────────────────────────────────────────

/// An opened store, plus the memory store behind it when there is a snapshot to flush.
pub struct OpenedStore {
    pub store: Arc<dyn Store>,
    memory: Option<Arc<MemoryStore>>,
}

impl OpenedStore {
    fn plain(store: Arc<dyn Store>) -> Self {
        Self { store, memory: None }
    }

    /// Persist the memory snapshot, if any.
    pub async fn flush(&self) -> anyhow::Result<()> {
        if let Some(memory) = &self.memory {
            memory.flush().await.context("flushing memory store snapshot")?;
        }
        Ok(())
    }
}

impl StoreConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            StoreConfig::Postgres { .. } => "postgres",
            StoreConfig::Memory { .. }   => "memory",
            StoreConfig::Lance { .. }    => "lance",
            StoreConfig::Disabled        => "disabled",
        }
    }

    /// Open the configured backend. A backend that cannot be reached is
    /// replaced by an `UnreachableStore` so the run goes on with the other
    /// store; configuration mistakes are still errors.
    pub async fn open(&self, role: StoreRole) -> anyhow::Result<OpenedStore> {
        info!(role = %role, kind = self.kind(), "Opening store");
        match self.connect(role).await {
            Ok(opened) => Ok(opened),
            Err(e) if is_unreachable(&e) => {
                warn!(role = %role, kind = self.kind(), error = %format!("{e:#}"), "Store unreachable, continuing without it");
                Ok(OpenedStore::plain(Arc::new(UnreachableStore::new(role.to_string(), format!("{e:#}")))))
            }
            Err(e) => Err(e),
        }
    }

    async fn connect(&self, role: StoreRole) -> anyhow::Result<OpenedStore> {
        match self {
            StoreConfig::Postgres { url, max_connections } => {
                let url = resolve_database_url(url.as_deref(), std::env::var(DATABASE_URL_ENV).ok())?;
                let store = PgStore::connect(&url, *max_connections)
                    .await
                    .with_context(|| format!("connecting {role} PostgreSQL store"))?;
                Ok(OpenedStore::plain(Arc::new(store)))
            }
            StoreConfig::Memory { snapshot } => {
                let store = match snapshot {
                    Some(path) => MemoryStore::open(role.to_string(), path)
                        .await
                        .with_context(|| format!("opening snapshot {}", path.display()))?,
                    None => MemoryStore::new(role.to_string()),
                };
                let store = Arc::new(store);
                Ok(OpenedStore {
                    store: store.clone(),
                    memory: Some(store),
                })
            }
            StoreConfig::Lance { path } => Ok(OpenedStore::plain(open_lance(path).await?)),
            StoreConfig::Disabled => Ok(OpenedStore::plain(Arc::new(DisabledStore::new(format!(
                "{role} (disabled)"
            ))))),
        }
    }
}

fn is_unreachable(err: &anyhow::Error) -> bool {
    err.downcast_ref::<DbError>().is_some_and(DbError::is_unavailable)
}

/// The configured URL wins over the environment.
pub fn resolve_database_url(configured: Option<&str>, env: Option<String>) -> anyhow::Result<String> {
    match configured.map(str::to_string).or(env).filter(|u| !u.trim().is_empty()) {
        Some(url) => Ok(url),
        None => bail!("PostgreSQL store needs a url, or {DATABASE_URL_ENV} in the environment"),
    }
}

#[cfg(feature = "lance")]
async fn open_lance(path: &Path) -> anyhow::Result<Arc<dyn Store>> {
    let store = meridian_db::LanceStore::open(path)
        .await
        .with_context(|| format!("opening LanceDB at {}", path.display()))?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "lance"))]
async fn open_lance(path: &Path) -> anyhow::Result<Arc<dyn Store>> {
    bail!("LanceDB store at {} requested, but meridian was built without the `lance` feature", path.display())
}
