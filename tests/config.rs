use std::time::Duration;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use kira_unify::config::{
    Config, ConfigLoader, DEFAULT_READ_WORKERS, DEFAULT_RESOLVER_URL, MappingConfig,
};
use kira_unify::error::UnifyError;
use kira_unify::mapping::Transform;

#[test]
fn upper_case_keys_are_accepted() {
    let raw = r#"{
        "WORKING_DIR": "/data/unify",
        "FIELDS": ["sex", "age", "stage"]
    }"#;
    let config: Config = serde_json::from_str(raw).unwrap();
    let resolved = ConfigLoader::resolve_config(config).unwrap();

    assert_eq!(resolved.schema_version, 1);
    assert_eq!(
        resolved.datasets_dir,
        Utf8PathBuf::from("/data/unify/DataSets")
    );
    assert_eq!(resolved.fields, vec!["sex", "age", "stage"]);
    assert_eq!(resolved.read_workers, DEFAULT_READ_WORKERS);
    assert_eq!(resolved.resolver.base_url, DEFAULT_RESOLVER_URL);
    assert_eq!(resolved.resolver.species, "human");
}

#[test]
fn explicit_datasets_dir_wins_over_working_dir() {
    let raw = r#"{
        "working_dir": "/data/unify",
        "datasets_dir": "/mnt/sets",
        "fields": ["sex"],
        "species": "mouse",
        "read_workers": 0,
        "resolver": {"base_url": "http://localhost:8080", "timeout_secs": 5, "batch_size": 10}
    }"#;
    let config: Config = serde_json::from_str(raw).unwrap();
    let resolved = ConfigLoader::resolve_config(config).unwrap();

    assert_eq!(resolved.datasets_dir, Utf8PathBuf::from("/mnt/sets"));
    assert_eq!(resolved.read_workers, 1);
    assert_eq!(resolved.resolver.species, "mouse");
    assert_eq!(resolved.resolver.timeout, Duration::from_secs(5));
    assert_eq!(resolved.resolver.batch_size, 10);
}

#[test]
fn invalid_configs_are_rejected() {
    let no_root = Config {
        fields: vec!["sex".to_string()],
        ..Config::default()
    };
    assert_matches!(
        ConfigLoader::resolve_config(no_root),
        Err(UnifyError::ConfigParse(_))
    );

    let no_fields = Config {
        working_dir: Some("/data".to_string()),
        ..Config::default()
    };
    assert_matches!(
        ConfigLoader::resolve_config(no_fields),
        Err(UnifyError::ConfigParse(_))
    );

    let duplicated = Config {
        working_dir: Some("/data".to_string()),
        fields: vec!["sex".to_string(), "sex".to_string()],
        ..Config::default()
    };
    assert_matches!(
        ConfigLoader::resolve_config(duplicated),
        Err(UnifyError::ConfigParse(message)) if message.contains("sex")
    );
}

#[test]
fn resolve_reads_explicit_path() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("custom.json");
    std::fs::write(&path, r#"{"PATH_TO_DATASETS": "/sets", "FIELDS": ["age"]}"#).unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(resolved.datasets_dir, Utf8PathBuf::from("/sets"));

    let missing = temp.path().join("absent.json");
    assert_matches!(
        ConfigLoader::resolve(missing.to_str()),
        Err(UnifyError::ConfigRead(_))
    );
}

#[test]
fn mapping_config_entries() {
    let raw = r#"{
        "sex": {"MAP": "STR_MAP", "HEADER": "gender", "DATA": {"female": "F", "male": "M"}},
        "age": {"MAP": "NUM", "HEADER": "age_at_diagnosis"},
        "stage": {"MAP": "NAN"}
    }"#;
    let mapping = MappingConfig::parse(raw).unwrap();

    assert_eq!(mapping.len(), 3);
    assert_eq!(
        mapping.field_names().collect::<Vec<_>>(),
        vec!["age", "sex", "stage"]
    );
    assert_eq!(mapping.get("age").unwrap().transform, Transform::Numeric);
    assert_eq!(mapping.get("stage").unwrap().header, None);
}

#[test]
fn mapping_config_requires_header() {
    let raw = r#"{"age": {"MAP": "NUM"}}"#;
    assert_matches!(
        MappingConfig::parse(raw),
        Err(UnifyError::InvalidMapping { field, .. }) if field == "age"
    );

    let raw = r#"{"age": {"MAP": "LOG2", "HEADER": "age"}}"#;
    assert_matches!(
        MappingConfig::parse(raw),
        Err(UnifyError::UnknownTransform { name, .. }) if name == "LOG2"
    );
}

#[test]
fn missing_mapping_file_is_not_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(temp.path().join("md_config.json")).unwrap();
    assert_matches!(MappingConfig::load(&path), Ok(None));

    std::fs::write(path.as_std_path(), "{not json").unwrap();
    assert_matches!(MappingConfig::load(&path), Err(UnifyError::ConfigParse(_)));
}
