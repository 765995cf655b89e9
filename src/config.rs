use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::domain::PageSize;
use crate::error::PortalError;

pub const CONFIG_FILE_NAME: &str = "portal.json";
pub const SESSION_ENV: &str = "PORTAL_SESSION_ID";

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawConfig {
    #[serde(default)]
    pub facility_name: Option<String>,
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub download_api_url: Option<String>,
    #[serde(default)]
    pub debounce_ms: Option<u64>,
    #[serde(default)]
    pub default_results: Option<u32>,
    #[serde(default)]
    pub cache_capacity: Option<usize>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PortalConfig {
    pub facility_name: String,
    pub api_url: String,
    pub download_api_url: String,
    pub debounce: Duration,
    pub default_results: PageSize,
    pub cache_capacity: usize,
    pub request_timeout: Duration,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `portal.json` from `path`, the working directory or the
    /// platform config directory, in that order.
    pub fn resolve(path: Option<&str>) -> Result<PortalConfig, PortalError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => Self::locate().ok_or(PortalError::MissingConfig)?,
        };

        let content = fs::read_to_string(&config_path)
            .map_err(|_| PortalError::ConfigRead(config_path.clone()))?;
        let config: RawConfig = serde_json::from_str(&content)
            .map_err(|err| PortalError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: RawConfig) -> Result<PortalConfig, PortalError> {
        let facility_name = required(config.facility_name, "facilityName")?;
        let api_url = required(config.api_url, "apiUrl")?;
        let download_api_url = required(config.download_api_url, "downloadApiUrl")?;
        let default_results = match config.default_results {
            Some(value) => PageSize::try_from(value)?,
            None => PageSize::DEFAULT,
        };

        Ok(PortalConfig {
            facility_name,
            api_url: api_url.trim_end_matches('/').to_string(),
            download_api_url: download_api_url.trim_end_matches('/').to_string(),
            debounce: Duration::from_millis(config.debounce_ms.unwrap_or(300)),
            default_results,
            cache_capacity: config.cache_capacity.unwrap_or(256).max(1),
            request_timeout: Duration::from_secs(config.request_timeout_secs.unwrap_or(60)),
        })
    }

    fn locate() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Some(local);
        }
        ProjectDirs::from("org", "catalog-portal", "catalog-portal")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
            .filter(|path| path.exists())
    }
}

/// Session id for the download service, also sent as the catalog bearer
/// token. Empty when unset.
pub fn session_id() -> String {
    std::env::var(SESSION_ENV)
        .map(|value| value.trim().to_string())
        .unwrap_or_default()
}

fn required(value: Option<String>, field: &str) -> Result<String, PortalError> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| PortalError::ConfigParse(format!("missing field `{field}`")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_optional_fields() {
        let config = RawConfig {
            facility_name: Some("LILS".to_string()),
            api_url: Some("https://catalog.example/api/".to_string()),
            download_api_url: Some("https://download.example".to_string()),
            ..RawConfig::default()
        };

        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.api_url, "https://catalog.example/api");
        assert_eq!(resolved.debounce, Duration::from_millis(300));
        assert_eq!(resolved.default_results, PageSize::DEFAULT);
        assert_eq!(resolved.cache_capacity, 256);
        assert_eq!(resolved.request_timeout, Duration::from_secs(60));
    }
}
