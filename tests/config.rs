use std::time::Duration;

use assert_matches::assert_matches;

use ingest_broker::config::{
    Config, ConfigLoader, DEFAULT_DSS_URL, DEFAULT_SCHEMA_VERSION, EnvSource, NoEnv,
};
use ingest_broker::error::BrokerError;

struct FixedEnv(&'static [(&'static str, &'static str)]);

impl EnvSource for FixedEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.0
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, value)| value.to_string())
    }
}

#[test]
fn parse_config_file_with_partial_fields() {
    let config: Config = serde_json::from_str(
        r#"{
            "ingest_url": "http://localhost:8080",
            "page_size": 20,
            "cache": { "ttl_secs": 2 },
            "list_keys": ["seq.lanes", "keywords"]
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve_config(config, &NoEnv);
    assert_eq!(resolved.ingest_url, "http://localhost:8080");
    assert_eq!(resolved.dss_url, DEFAULT_DSS_URL);
    assert_eq!(resolved.schema_version, DEFAULT_SCHEMA_VERSION);
    assert_eq!(resolved.page_size, 20);
    assert_eq!(resolved.cache_ttl, Duration::from_secs(2));
    assert_eq!(resolved.cache_capacity, 10_000);
    assert_eq!(resolved.list_keys, vec!["seq.lanes", "keywords"]);
}

#[test]
fn environment_wins_over_file() {
    let config = Config {
        schema_version: Some("4.6.1".to_string()),
        staging_url: Some("http://staging.file".to_string()),
        ..Config::default()
    };
    let env = FixedEnv(&[("SCHEMA_VERSION", "5.2.0"), ("DSS_API", "http://dss.env")]);

    let resolved = ConfigLoader::resolve_config(config, &env);
    assert_eq!(resolved.schema_version, "5.2.0");
    assert_eq!(resolved.dss_url, "http://dss.env");
    assert_eq!(resolved.staging_url, "http://staging.file");
}

#[test]
fn explicit_missing_file_is_an_error() {
    assert_matches!(
        ConfigLoader::resolve(Some("/nonexistent/ingest-broker.json")),
        Err(BrokerError::MissingConfig)
    );
}

#[test]
fn unparsable_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ingest-broker.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(BrokerError::ConfigParse(_))
    );
}
