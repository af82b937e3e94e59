use hearth_entity::{EntityError, HearthConfig};
use pretty_assertions::assert_eq;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;

const FULL: &str = r#"
node_id = 12

[cache]
idle_expire_secs = 60
group_lock_timeout_ms = 250
distributed = true

[relational]
path = "/var/lib/hearth/relational"
shard_count = 8

[document]
path = "/var/lib/hearth/documents.duckdb"

[scheduler]
database_threads = 6
message_threads = 16
owner_idle_secs = 120
monitor_interval_ms = 500
block_threshold_ms = 2000
overflow_threshold = 5000

[transaction]
default_retry_count = 5
retry_backoff_ms = 10
"#;

// ── Parsing ──────────────────────────────────────────────────────

#[test]
fn empty_document_uses_defaults() {
    let config = HearthConfig::from_toml("").unwrap();
    assert_eq!(config, HearthConfig::default());
    assert_eq!(config.node_id, 0);
    assert_eq!(config.cache.idle_expire_secs, 300);
    assert_eq!(config.cache.group_lock_timeout_ms, 3000);
    assert!(!config.cache.distributed);
    assert_eq!(config.relational.path, None);
    assert_eq!(config.relational.shard_count, 1);
    assert_eq!(config.scheduler.database_threads, 4);
    assert_eq!(config.transaction.default_retry_count, 3);
    assert_eq!(config.transaction.retry_backoff_ms, 0);
}

#[test]
fn full_document_parses() {
    let config = HearthConfig::from_toml(FULL).unwrap();
    assert_eq!(config.node_id, 12);
    assert_eq!(config.cache.idle_expire(), Duration::from_secs(60));
    assert_eq!(config.cache.group_lock_timeout(), Duration::from_millis(250));
    assert!(config.cache.distributed);
    assert_eq!(config.relational.path, Some(PathBuf::from("/var/lib/hearth/relational")));
    assert_eq!(config.relational.shard_count, 8);
    assert_eq!(config.document.path, Some(PathBuf::from("/var/lib/hearth/documents.duckdb")));
    assert_eq!(config.scheduler.message_threads, 16);
    assert_eq!(config.transaction.default_retry_count, 5);
    assert_eq!(config.transaction.retry_backoff(), Duration::from_millis(10));
}

#[test]
fn partial_section_keeps_other_defaults() {
    let config = HearthConfig::from_toml("[relational]\nshard_count = 4\n").unwrap();
    assert_eq!(config.relational.shard_count, 4);
    assert_eq!(config.relational.path, None);
    assert_eq!(config.cache, HearthConfig::default().cache);
}

#[test]
fn scheduler_section_maps_to_pool_settings() {
    let config = HearthConfig::from_toml(FULL).unwrap();
    let pool = config.scheduler.pool(config.scheduler.database_threads);
    assert_eq!(pool.threads, 6);
    assert_eq!(pool.owner_idle_timeout, Duration::from_secs(120));
    assert_eq!(pool.monitor_interval, Duration::from_millis(500));
    assert_eq!(pool.block_threshold, Duration::from_secs(2));
    assert_eq!(pool.overflow_threshold, 5000);
}

#[test]
fn serialized_config_parses_back() {
    let config = HearthConfig::from_toml(FULL).unwrap();
    let text = toml::to_string(&config).unwrap();
    assert_eq!(HearthConfig::from_toml(&text).unwrap(), config);
}

// ── Validation ───────────────────────────────────────────────────

fn invalid(toml: &str) -> String {
    match HearthConfig::from_toml(toml) {
        Err(EntityError::Config(message)) => message,
        other => panic!("expected a validation error, got {other:?}"),
    }
}

#[test]
fn node_id_must_fit_in_generated_ids() {
    assert!(invalid("node_id = 16384").contains("node_id"));
    assert!(HearthConfig::from_toml("node_id = 16383").is_ok());
}

#[test]
fn shard_count_must_be_positive() {
    assert!(invalid("[relational]\nshard_count = 0").contains("relational.shard_count"));
}

#[test]
fn thread_counts_must_be_positive() {
    assert!(invalid("[scheduler]\ndatabase_threads = 0").contains("database_threads"));
    assert!(invalid("[scheduler]\nmessage_threads = 0").contains("message_threads"));
}

#[test]
fn cache_timeouts_must_be_positive() {
    assert!(invalid("[cache]\nidle_expire_secs = 0").contains("idle_expire_secs"));
    assert!(invalid("[cache]\ngroup_lock_timeout_ms = 0").contains("group_lock_timeout_ms"));
}

#[test]
fn malformed_toml_is_a_parse_error() {
    let err = HearthConfig::from_toml("node_id = \"twelve\"").unwrap_err();
    assert!(matches!(err, EntityError::ConfigParse(_)));
}

// ── Files ────────────────────────────────────────────────────────

#[test]
fn from_file_reads_and_validates() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(FULL.as_bytes()).unwrap();
    let config = HearthConfig::from_file(file.path()).unwrap();
    assert_eq!(config.node_id, 12);
}

#[test]
fn missing_file_names_the_path() {
    let err = HearthConfig::from_file(std::path::Path::new("/nonexistent/hearth.toml")).unwrap_err();
    match err {
        EntityError::ConfigRead { path, .. } => assert_eq!(path, PathBuf::from("/nonexistent/hearth.toml")),
        other => panic!("unexpected error: {other:?}"),
    }
}
