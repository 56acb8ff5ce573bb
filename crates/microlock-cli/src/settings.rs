//! Layered CLI settings
//!
//! Sources, lowest priority first:
//! 1. built-in defaults
//! 2. the TOML file given by `--config` / `MICROLOCK_CONFIG`
//! 3. `MICROLOCK_*` environment variables, `__` between sections
//!    (e.g. `MICROLOCK_LOCK__TTL=10`, `MICROLOCK_ETCD__ENDPOINTS=http://a:2379,http://b:2379`)
//! 4. command line flags

use config::{Config, Environment, File, FileFormat, Map};
use microlock_core::LockConfig;
use microlock_etcd::EtcdClientConfig;
use serde::Deserialize;

use crate::cli::Cli;
use crate::error::CliError;

const ENV_PREFIX: &str = "MICROLOCK";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub lock: LockConfig,
    pub etcd: EtcdClientConfig,
}

impl Settings {
    /// Load settings from the process environment and the parsed flags.
    pub fn load(cli: &Cli) -> Result<Self, CliError> {
        Self::load_with_env(cli, None)
    }

    /// Like [`Settings::load`], reading variables from `env` instead of the
    /// process environment when given.
    pub fn load_with_env(
        cli: &Cli,
        env: Option<Map<String, String>>,
    ) -> Result<Self, CliError> {
        let mut builder = Config::builder();

        if let Some(path) = &cli.config {
            builder = builder.add_source(
                File::from(path.as_path())
                    .format(FileFormat::Toml)
                    .required(true),
            );
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("etcd.endpoints")
                .try_parsing(true)
                .source(env),
        );

        if !cli.endpoints.is_empty() {
            builder = builder.set_override("etcd.endpoints", cli.endpoints.clone())?;
        }
        if let Some(key) = &cli.key {
            builder = builder.set_override("lock.key", key.as_str())?;
        }
        if let Some(holder) = &cli.holder {
            builder = builder.set_override("lock.holder_id", holder.as_str())?;
        }
        if let Some(ttl) = &cli.ttl {
            builder = builder.set_override("lock.ttl", ttl.as_str())?;
        }

        let mut settings: Settings = builder.build()?.try_deserialize()?;
        if settings.lock.holder_id.as_deref().is_none_or(str::is_empty) {
            settings.lock.holder_id = Some(default_holder_id());
        }
        Ok(settings)
    }
}

/// `<hostname>-<8 random hex digits>`, unique per process.
pub fn default_holder_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "microlock".to_string());
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", host, &suffix[..8])
}
