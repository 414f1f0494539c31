use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::sweep::probe::ProbeConfig;

const CONFIG_FILE: &str = "ipb";
const ENV_PREFIX: &str = "IPB";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database_path: PathBuf,
    pub source_url: String,
    pub http_timeout_secs: u64,
    pub source_timeout_secs: u64,
    pub probe_concurrency: usize,
    pub max_retries: u32,
    pub user_agent: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/igrejas.sqlite"),
            source_url: "https://www.icalvinus.app/consulta_ipb/anuario.php".into(),
            http_timeout_secs: 10,
            source_timeout_secs: 60,
            probe_concurrency: 8,
            max_retries: 1,
            user_agent: None,
        }
    }
}

impl Settings {
    /// Defaults, then `ipb.toml` (if present), then `IPB_*` variables.
    pub fn load() -> Result<Self> {
        Self::from_sources(
            File::with_name(CONFIG_FILE).required(false),
            Environment::with_prefix(ENV_PREFIX).try_parsing(true),
        )
    }

    fn from_sources<F, E>(file: F, env: E) -> Result<Self>
    where
        F: config::Source + Send + Sync + 'static,
        E: config::Source + Send + Sync + 'static,
    {
        Config::builder()
            .add_source(file)
            .add_source(env)
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    pub fn probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            max_retries: self.max_retries,
            user_agent: self.user_agent.clone(),
        }
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout_secs)
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::Map;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let map: Map<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Environment::with_prefix(ENV_PREFIX).try_parsing(true).source(Some(map))
    }

    fn no_file() -> File<config::FileSourceFile, config::FileFormat> {
        File::with_name("does-not-exist/ipb").required(false)
    }

    #[test]
    fn defaults_without_sources() {
        let s = Settings::from_sources(no_file(), env(&[])).unwrap();
        assert_eq!(s, Settings::default());
        assert_eq!(s.probe_config().timeout, Duration::from_secs(10));
    }

    #[test]
    fn environment_overrides() {
        let s = Settings::from_sources(
            no_file(),
            env(&[
                ("IPB_DATABASE_PATH", "/tmp/ipb.sqlite"),
                ("IPB_PROBE_CONCURRENCY", "32"),
                ("IPB_MAX_RETRIES", "0"),
                ("IPB_USER_AGENT", "ipb-bot/1.0"),
            ]),
        )
        .unwrap();
        assert_eq!(s.database_path(), Path::new("/tmp/ipb.sqlite"));
        assert_eq!(s.probe_concurrency, 32);
        assert_eq!(s.max_retries, 0);
        assert_eq!(s.user_agent.as_deref(), Some("ipb-bot/1.0"));
        assert_eq!(s.http_timeout_secs, 10);
    }

    #[test]
    fn file_then_environment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ipb.toml");
        std::fs::write(&path, "http_timeout_secs = 3\nprobe_concurrency = 2\n").unwrap();

        let s = Settings::from_sources(
            File::from(path.as_path()),
            env(&[("IPB_PROBE_CONCURRENCY", "4")]),
        )
        .unwrap();
        assert_eq!(s.source_timeout(), Duration::from_secs(60));
        assert_eq!(s.http_timeout_secs, 3);
        assert_eq!(s.probe_concurrency, 4);
    }

    #[test]
    fn bad_number_is_an_error() {
        let err = Settings::from_sources(no_file(), env(&[("IPB_HTTP_TIMEOUT_SECS", "soon")]));
        assert!(err.is_err());
    }
}
