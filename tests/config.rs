use std::fs;
use std::time::Duration;

use assert_matches::assert_matches;
use tempfile::TempDir;

use catalog_portal::config::{CONFIG_FILE_NAME, ConfigLoader};
use catalog_portal::error::PortalError;

fn write_config(dir: &TempDir, content: &str) -> String {
    let path = dir.path().join(CONFIG_FILE_NAME);
    fs::write(&path, content).unwrap();
    path.to_string_lossy().into_owned()
}

#[test]
fn explicit_path_is_resolved() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"{
            "facilityName": "LILS",
            "apiUrl": "https://catalog.example/api/",
            "downloadApiUrl": "https://download.example/",
            "debounceMs": 150,
            "defaultResults": 20,
            "cacheCapacity": 32,
            "requestTimeoutSecs": 5
        }"#,
    );

    let config = ConfigLoader::resolve(Some(&path)).unwrap();
    assert_eq!(config.facility_name, "LILS");
    assert_eq!(config.api_url, "https://catalog.example/api");
    assert_eq!(config.download_api_url, "https://download.example");
    assert_eq!(config.debounce, Duration::from_millis(150));
    assert_eq!(config.default_results.get(), 20);
    assert_eq!(config.cache_capacity, 32);
    assert_eq!(config.request_timeout, Duration::from_secs(5));
}

#[test]
fn missing_required_field_is_reported() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"{"facilityName": "LILS", "apiUrl": "https://catalog.example"}"#,
    );

    let err = ConfigLoader::resolve(Some(&path)).unwrap_err();
    assert_matches!(err, PortalError::ConfigParse(message) if message.contains("downloadApiUrl"));
}

#[test]
fn unsupported_page_size_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"{
            "facilityName": "LILS",
            "apiUrl": "https://catalog.example",
            "downloadApiUrl": "https://download.example",
            "defaultResults": 25
        }"#,
    );

    assert_matches!(
        ConfigLoader::resolve(Some(&path)),
        Err(PortalError::InvalidPageSize(_))
    );
}

#[test]
fn malformed_json_is_a_parse_error() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "{ not json");

    assert_matches!(
        ConfigLoader::resolve(Some(&path)),
        Err(PortalError::ConfigParse(_))
    );
}

#[test]
fn unreadable_path_is_a_read_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.json");

    assert_matches!(
        ConfigLoader::resolve(Some(&path.to_string_lossy())),
        Err(PortalError::ConfigRead(read)) if read == path
    );
}
