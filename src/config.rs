use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::client::DEFAULT_USER_AGENT;
use crate::error::GeofabrikError;
use crate::resolver::DEFAULT_SIMILARITY_CUTOFF;
use crate::store::{default_cache_root, default_data_root};

pub const DEFAULT_CONFIG_FILE: &str = "geofabrik-fetch.json";
pub const DEFAULT_BASE_URL: &str = "https://download.geofabrik.de/";
pub const DEFAULT_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub cache_dir: Option<String>,
    #[serde(default)]
    pub interval_secs: Option<u64>,
    #[serde(default)]
    pub confirmation_required: Option<bool>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub similarity_cutoff: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub base_url: String,
    pub data_dir: Utf8PathBuf,
    pub cache_dir: Utf8PathBuf,
    pub interval: Duration,
    pub confirmation_required: bool,
    pub user_agent: String,
    pub timeout: Duration,
    pub similarity_cutoff: f64,
}

impl ResolvedConfig {
    pub fn download_index_url(&self) -> String {
        format!("{}index-v1.json", self.base_url)
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, GeofabrikError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| GeofabrikError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| GeofabrikError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, GeofabrikError> {
        let base_url = normalize_base_url(config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL))?;

        let data_dir = match config.data_dir {
            Some(dir) => Utf8PathBuf::from(dir),
            None => default_data_root()?,
        };
        let cache_dir = match config.cache_dir {
            Some(dir) => Utf8PathBuf::from(dir),
            None => default_cache_root()?,
        };

        let similarity_cutoff = config.similarity_cutoff.unwrap_or(DEFAULT_SIMILARITY_CUTOFF);
        if !(0.0..=1.0).contains(&similarity_cutoff) {
            return Err(GeofabrikError::ConfigParse(format!(
                "similarity_cutoff must be within 0..=1, got {similarity_cutoff}"
            )));
        }

        Ok(ResolvedConfig {
            base_url,
            data_dir,
            cache_dir,
            interval: Duration::from_secs(config.interval_secs.unwrap_or(DEFAULT_INTERVAL_SECS)),
            confirmation_required: config.confirmation_required.unwrap_or(true),
            user_agent: config
                .user_agent
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            timeout: Duration::from_secs(config.timeout_secs.unwrap_or(60)),
            similarity_cutoff,
        })
    }
}

fn normalize_base_url(raw: &str) -> Result<String, GeofabrikError> {
    let mut url = Url::parse(raw.trim()).map_err(|err| GeofabrikError::InvalidUrl(format!("{raw}: {err}")))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url.to_string())
}
