use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::{
    fs, io,
    path::PathBuf,
    sync::{Mutex, PoisonError},
    time::Duration,
};
use thiserror::Error;
use toml::{Table, Value};

const DEFAULT_CONFIG_PATH: &str = "config.toml";
const CONFIG_PATH_VAR: &str = "LUCKY_DNS_CONFIG";
const ENV_PREFIX: &str = "LUCKY_DNS";

const DEFAULT_CYCLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_RATE_LIMIT: u64 = 10;

/// Authoritative DNS provider used for the second provisioning stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthoritativeKind {
    Alidns,
    Dnspod,
}

impl std::fmt::Display for AuthoritativeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthoritativeKind::Alidns => f.write_str("alidns"),
            AuthoritativeKind::Dnspod => f.write_str("dnspod"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    pub url: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EdgeSettings {
    pub access_key_id: Option<String>,
    pub access_key_secret: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,

    pub site_id: Option<i64>,
    pub host_policy: Option<String>,
    pub biz_name: Option<String>,
    pub record_domain: Option<String>,

    pub target_suffix: Option<String>,
    pub target_template: Option<String>,

    pub secondary_analysis: bool,
    pub secondary_provider: Option<AuthoritativeKind>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AlidnsSettings {
    pub endpoint: Option<String>,
    pub domain: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DnspodSettings {
    pub secret_id: Option<String>,
    pub secret_key: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub domain: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub cron_expression: Option<String>,
    pub cycle_timeout: Option<String>,
    pub request_timeout: Option<String>,
    pub provider_rate_limit: Option<u64>,

    pub source: SourceSettings,
    pub edge: EdgeSettings,
    pub alidns: AlidnsSettings,
    pub dnspod: DnspodSettings,
}

impl Settings {
    pub fn cycle_timeout(&self) -> Result<Duration, SettingsError> {
        parse_duration("cycle_timeout", self.cycle_timeout.as_deref(), DEFAULT_CYCLE_TIMEOUT)
    }

    pub fn request_timeout(&self) -> Result<Duration, SettingsError> {
        parse_duration("request_timeout", self.request_timeout.as_deref(), DEFAULT_REQUEST_TIMEOUT)
    }

    /// Provider calls allowed per second.
    pub fn provider_rate_limit(&self) -> u64 {
        self.provider_rate_limit.filter(|n| *n > 0).unwrap_or(DEFAULT_RATE_LIMIT)
    }

    /// Authoritative zone for the given provider, falling back to the edge record domain.
    pub fn authoritative_domain(&self, kind: AuthoritativeKind) -> Option<&str> {
        let own = match kind {
            AuthoritativeKind::Alidns => self.alidns.domain.as_deref(),
            AuthoritativeKind::Dnspod => self.dnspod.domain.as_deref(),
        };
        non_empty(own).or_else(|| non_empty(self.edge.record_domain.as_deref()))
    }
}

fn parse_duration(
    field: &'static str,
    value: Option<&str>,
    default: Duration,
) -> Result<Duration, SettingsError> {
    match non_empty(value) {
        Some(value) => humantime::parse_duration(value)
            .map_err(|source| SettingsError::Duration { field, source }),
        None => Ok(default),
    }
}

/// Treats empty strings in the config the same as absent keys.
pub fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Durable configuration, re-read before every operation.
pub trait ConfigStore: Send + Sync {
    fn get(&self) -> Result<Settings, SettingsError>;

    /// Deep-merges `patch` into the stored configuration and returns the result.
    fn set(&self, patch: Table) -> Result<Settings, SettingsError>;
}

/// Whether a patch changes anything the scheduler depends on.
pub fn touches_schedule(patch: &Table) -> bool {
    patch.contains_key("cron_expression") || patch.contains_key("source")
}

/// TOML file layered under `LUCKY_DNS_*` environment variables.
#[derive(Debug)]
pub struct FileConfigStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileConfigStore {
    pub fn new(path: &str) -> Result<Self, SettingsError> {
        let path = shellexpand::full(path)?;
        Ok(Self {
            path: PathBuf::from(path.as_ref()),
            write_lock: Mutex::new(()),
        })
    }

    /// Uses `$LUCKY_DNS_CONFIG`, or `config.toml` in the working directory.
    pub fn from_env() -> Result<Self, SettingsError> {
        let path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_owned());
        Self::new(&path)
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn read_table(&self) -> Result<Table, SettingsError> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => Ok(toml::from_str(&raw)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Table::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl ConfigStore for FileConfigStore {
    fn get(&self) -> Result<Settings, SettingsError> {
        let path = self.path.to_string_lossy();
        let cfg = Config::builder()
            .add_source(File::new(&path, FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(cfg.try_deserialize()?)
    }

    fn set(&self, patch: Table) -> Result<Settings, SettingsError> {
        {
            let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

            let mut table = self.read_table()?;
            merge(&mut table, patch);

            // Reject patches that would leave an unreadable file behind.
            let _: Settings = Value::Table(table.clone()).try_into()?;

            fs::write(&self.path, toml::to_string_pretty(&table)?)?;
        }

        self.get()
    }
}

/// Recursively merges `patch` into `base`; tables merge, everything else replaces.
pub fn merge(base: &mut Table, patch: Table) {
    for (key, value) in patch {
        if let Value::Table(incoming) = value {
            if let Some(Value::Table(existing)) = base.get_mut(&key) {
                merge(existing, incoming);
                continue;
            }
            base.insert(key, Value::Table(incoming));
        } else {
            base.insert(key, value);
        }
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Parse(#[from] toml::de::Error),
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),
    #[error("cannot expand config path: {0}")]
    Expand(#[from] shellexpand::LookupError<std::env::VarError>),
    #[error("invalid duration for {field}: {source}")]
    Duration {
        field: &'static str,
        source: humantime::DurationError,
    },
}

#[cfg(test)]
pub use self::memory::MemoryConfigStore;
