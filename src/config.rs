use std::fs;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::PrepError;
use crate::sheets::DEFAULT_SHEETS_BASE_URL;

pub const DEFAULT_CONFIG_FILE: &str = "dimsum-prep.json";
pub const DEFAULT_CACHE_LIFETIME_SECS: u64 = 600;
const SUPPORTED_SCHEMA_VERSION: u32 = 1;

pub const SHEET_ID_ENV: &str = "DIMSUM_PREP_SHEET_ID";
pub const REGISTRY_ENV: &str = "DIMSUM_PREP_REGISTRY";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub sheet_id: Option<String>,
    #[serde(default)]
    pub registry: Option<Utf8PathBuf>,
    #[serde(default)]
    pub cache_lifetime_secs: Option<u64>,
    #[serde(default)]
    pub prefetch: Vec<String>,
    #[serde(default)]
    pub sheets_base_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub sheet_id: String,
    pub registry: Utf8PathBuf,
    pub cache_lifetime: Duration,
    pub prefetch: Vec<String>,
    pub sheets_base_url: String,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, PrepError> {
        let config_path = Utf8PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));

        if path.is_none() && !config_path.as_std_path().exists() {
            return Err(PrepError::MissingConfig);
        }

        let content = fs::read_to_string(config_path.as_std_path())
            .map_err(|_| PrepError::ConfigRead(config_path.clone()))?;
        let mut config: Config = serde_json::from_str(&content)
            .map_err(|err| PrepError::ConfigParse(err.to_string()))?;

        if let Some(sheet_id) = env_override(SHEET_ID_ENV) {
            config.sheet_id = Some(sheet_id);
        }
        if let Some(registry) = env_override(REGISTRY_ENV) {
            config.registry = Some(Utf8PathBuf::from(registry));
        }

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, PrepError> {
        let schema_version = config.schema_version.unwrap_or(SUPPORTED_SCHEMA_VERSION);
        if schema_version != SUPPORTED_SCHEMA_VERSION {
            return Err(PrepError::ConfigParse(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let sheet_id = config
            .sheet_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| PrepError::MissingConfigValue("sheet_id".to_string()))?;
        let registry = config
            .registry
            .filter(|path| !path.as_str().trim().is_empty())
            .ok_or_else(|| PrepError::MissingConfigValue("registry".to_string()))?;

        let prefetch = config
            .prefetch
            .into_iter()
            .map(|sponsor| sponsor.trim().to_string())
            .filter(|sponsor| !sponsor.is_empty())
            .collect();

        Ok(ResolvedConfig {
            sheet_id,
            registry,
            cache_lifetime: Duration::from_secs(
                config
                    .cache_lifetime_secs
                    .unwrap_or(DEFAULT_CACHE_LIFETIME_SECS),
            ),
            prefetch,
            sheets_base_url: config
                .sheets_base_url
                .unwrap_or_else(|| DEFAULT_SHEETS_BASE_URL.to_string()),
        })
    }
}

fn env_override(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
