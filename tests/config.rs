use std::fs;
use std::time::Duration;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use dimsum_prep::config::ConfigLoader;
use dimsum_prep::error::PrepError;

fn write_config(dir: &tempfile::TempDir, content: &str) -> Utf8PathBuf {
    let path = Utf8PathBuf::from_path_buf(dir.path().join("dimsum-prep.json")).unwrap();
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn resolve_reads_config_file() {
    if std::env::var_os("DIMSUM_PREP_SHEET_ID").is_some()
        || std::env::var_os("DIMSUM_PREP_REGISTRY").is_some()
    {
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        r#"{
            "schema_version": 1,
            "sheet_id": "1AbCdEf",
            "registry": "/data/mlwh.sqlite",
            "cache_lifetime_secs": 30,
            "prefetch": ["Ben Lehner"],
            "sheets_base_url": "http://localhost:9000/v4"
        }"#,
    );

    let resolved = ConfigLoader::resolve(Some(path.as_str())).unwrap();
    assert_eq!(resolved.sheet_id, "1AbCdEf");
    assert_eq!(resolved.registry, Utf8PathBuf::from("/data/mlwh.sqlite"));
    assert_eq!(resolved.cache_lifetime, Duration::from_secs(30));
    assert_eq!(resolved.prefetch, vec!["Ben Lehner"]);
    assert_eq!(resolved.sheets_base_url, "http://localhost:9000/v4");
}

#[test]
fn resolve_rejects_malformed_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "{ \"sheet_id\": ");
    assert_matches!(
        ConfigLoader::resolve(Some(path.as_str())),
        Err(PrepError::ConfigParse(_))
    );
}

#[test]
fn resolve_reports_unreadable_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(dir.path().join("absent.json")).unwrap();
    assert_matches!(
        ConfigLoader::resolve(Some(path.as_str())),
        Err(PrepError::ConfigRead(read)) if read == path
    );
}
