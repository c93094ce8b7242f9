use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;

use crate::storage::SecretBackend;

const APP_DIR_NAME: &str = "davmirror";
const SESSION_FILE_NAME: &str = "session.json";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Root of the local mirror; remote account trees live below it.
    pub cache_root: PathBuf,
    pub config_dir: PathBuf,
    pub secret_backend: SecretBackend,
    pub request_timeout: Duration,
    pub probe_timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("home directory is unavailable")?;
        let cache_root = std::env::var("DAVMIRROR_CACHE_DIR")
            .ok()
            .map(|value| expand_with_home(&value, &home))
            .unwrap_or_else(default_cache_root);
        let config_dir = std::env::var("DAVMIRROR_CONFIG_DIR")
            .ok()
            .map(|value| expand_with_home(&value, &home))
            .unwrap_or_else(default_config_dir);
        let secret_backend = match std::env::var("DAVMIRROR_SECRET_BACKEND") {
            Ok(value) => parse_secret_backend(&value)?,
            Err(_) => SecretBackend::Keyring,
        };
        let request_timeout = Duration::from_secs(read_u64_env(
            "DAVMIRROR_TIMEOUT_SECS",
            DEFAULT_TIMEOUT_SECS,
        ));
        let probe_timeout = Duration::from_secs(read_u64_env(
            "DAVMIRROR_PROBE_TIMEOUT_SECS",
            DEFAULT_PROBE_TIMEOUT_SECS,
        ));

        Ok(Self {
            cache_root,
            config_dir,
            secret_backend,
            request_timeout,
            probe_timeout,
        })
    }

    pub fn session_path(&self) -> PathBuf {
        self.config_dir.join(SESSION_FILE_NAME)
    }
}

fn parse_secret_backend(value: &str) -> anyhow::Result<SecretBackend> {
    match value.trim().to_ascii_lowercase().as_str() {
        "keyring" | "" => Ok(SecretBackend::Keyring),
        "file" => Ok(SecretBackend::File),
        other => anyhow::bail!("unknown DAVMIRROR_SECRET_BACKEND: {other}"),
    }
}

fn default_cache_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR_NAME)
}

fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR_NAME)
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn read_u64_env(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}
