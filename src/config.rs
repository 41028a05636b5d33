use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::BrokerError;

pub const DEFAULT_INGEST_URL: &str = "http://api.ingest.dev.data.humancellatlas.org";
pub const DEFAULT_STAGING_URL: &str = "http://staging.dev.data.humancellatlas.org";
pub const DEFAULT_DSS_URL: &str = "http://dss.dev.data.humancellatlas.org";
pub const DEFAULT_BUNDLE_SCHEMA_BASE_URL: &str = "https://schema.humancellatlas.org/bundle/";
pub const DEFAULT_SCHEMA_VERSION: &str = "5.1.0";
pub const DEFAULT_PAGE_SIZE: usize = 1000;
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 5 * 60;

const CONFIG_FILE_NAME: &str = "ingest-broker.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub ingest_url: Option<String>,
    #[serde(default)]
    pub staging_url: Option<String>,
    #[serde(default)]
    pub dss_url: Option<String>,
    #[serde(default)]
    pub bundle_schema_base_url: Option<String>,
    #[serde(default)]
    pub schema_version: Option<String>,
    #[serde(default)]
    pub page_size: Option<usize>,
    #[serde(default)]
    pub cache: Option<CacheConfig>,
    #[serde(default)]
    pub list_keys: Option<Vec<String>>,
    #[serde(default)]
    pub output_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub capacity: Option<usize>,
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub ingest_url: String,
    pub staging_url: String,
    pub dss_url: String,
    pub bundle_schema_base_url: String,
    pub schema_version: String,
    pub page_size: usize,
    pub cache_capacity: usize,
    pub cache_ttl: Duration,
    pub list_keys: Vec<String>,
    pub output_dir: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        ConfigLoader::resolve_config(Config::default(), &NoEnv)
    }
}

/// Source of environment overrides, swapped out in tests.
pub trait EnvSource {
    fn var(&self, key: &str) -> Option<String>;
}

pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }
}

pub struct NoEnv;

impl EnvSource for NoEnv {
    fn var(&self, _key: &str) -> Option<String> {
        None
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads the explicit path, else `ingest-broker.json` in the working directory,
    /// else the per-user config file, else defaults. Environment variables win over files.
    pub fn resolve(path: Option<&str>) -> Result<BrokerConfig, BrokerError> {
        let config = match Self::locate(path)? {
            Some(config_path) => {
                let content = fs::read_to_string(&config_path)
                    .map_err(|_| BrokerError::ConfigRead(config_path.clone()))?;
                serde_json::from_str::<Config>(&content)
                    .map_err(|err| BrokerError::ConfigParse(err.to_string()))?
            }
            None => Config::default(),
        };
        Ok(Self::resolve_config(config, &ProcessEnv))
    }

    fn locate(path: Option<&str>) -> Result<Option<PathBuf>, BrokerError> {
        if let Some(path) = path {
            let explicit = PathBuf::from(path);
            if !explicit.exists() {
                return Err(BrokerError::MissingConfig);
            }
            return Ok(Some(explicit));
        }
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Ok(Some(local));
        }
        Ok(ProjectDirs::from("org", "humancellatlas", "ingest-broker")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
            .filter(|candidate| candidate.exists()))
    }

    pub fn resolve_config(config: Config, env: &dyn EnvSource) -> BrokerConfig {
        let pick = |key: &str, file: Option<String>, default: &str| {
            env.var(key).or(file).unwrap_or_else(|| default.to_string())
        };
        let cache = config.cache.unwrap_or_default();

        BrokerConfig {
            ingest_url: pick("INGEST_API", config.ingest_url, DEFAULT_INGEST_URL),
            staging_url: pick("STAGING_API", config.staging_url, DEFAULT_STAGING_URL),
            dss_url: pick("DSS_API", config.dss_url, DEFAULT_DSS_URL),
            bundle_schema_base_url: pick(
                "BUNDLE_SCHEMA_BASE_URL",
                config.bundle_schema_base_url,
                DEFAULT_BUNDLE_SCHEMA_BASE_URL,
            ),
            schema_version: pick("SCHEMA_VERSION", config.schema_version, DEFAULT_SCHEMA_VERSION),
            page_size: config.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
            cache_capacity: cache.capacity.unwrap_or(DEFAULT_CACHE_CAPACITY),
            cache_ttl: Duration::from_secs(cache.ttl_secs.unwrap_or(DEFAULT_CACHE_TTL_SECS)),
            list_keys: config.list_keys.unwrap_or_else(default_list_keys),
            output_dir: config.output_dir,
        }
    }
}

/// Spreadsheet keys whose values are always lists.
pub fn default_list_keys() -> Vec<String> {
    vec!["seq.lanes".to_string()]
}
