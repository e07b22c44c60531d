use crate::error::{ContentDeskError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

// Default cap on simultaneous transfers per queue
pub const DEFAULT_MAX_CONCURRENT_UPLOADS: usize = 3;

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

/// How a watch session treats notifications that arrive before its baseline read resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum PreBaselinePolicy {
    /// Hold them and evaluate once the baseline is known
    #[default]
    Buffer,
    /// Ignore them
    Drop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerSettings {
    #[serde(rename = "preBaselinePolicy", default)]
    pub pre_baseline_policy: PreBaselinePolicy,
    /// Ask the feed to filter by resource id. When false the subscription
    /// covers the whole collection and filtering happens client-side only.
    #[serde(rename = "serverSideIdFilter", default = "default_true")]
    pub server_side_id_filter: bool,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            pre_baseline_policy: PreBaselinePolicy::Buffer,
            server_side_id_filter: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentDeskConfig {
    #[serde(rename = "apiKey")]
    pub api_key: Option<String>,
    #[serde(rename = "serverUrl")]
    pub server_url: Option<String>,
    #[serde(rename = "uploadRoute", default = "default_upload_route")]
    pub upload_route: String,
    #[serde(rename = "filesRoute", default = "default_files_route")]
    pub files_route: String,
    /// `None` lets every enqueued file transfer at once
    #[serde(
        rename = "maxConcurrentUploads",
        default = "default_max_concurrent_uploads"
    )]
    pub max_concurrent_uploads: Option<usize>,
    #[serde(rename = "requestTimeoutSecs", default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub tracker: TrackerSettings,
}

fn default_true() -> bool {
    true
}

fn default_upload_route() -> String {
    "/storage/upload".to_string()
}

fn default_files_route() -> String {
    "/storage/files".to_string()
}

fn default_max_concurrent_uploads() -> Option<usize> {
    Some(DEFAULT_MAX_CONCURRENT_UPLOADS)
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl Default for ContentDeskConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            server_url: None,
            upload_route: default_upload_route(),
            files_route: default_files_route(),
            max_concurrent_uploads: default_max_concurrent_uploads(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            tracker: TrackerSettings::default(),
        }
    }
}

/// Resolved backend target handed to a transfer endpoint at construction.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub server_url: String,
    pub api_key: String,
    pub upload_route: String,
    pub files_route: String,
    pub timeout: Duration,
}

impl EndpointConfig {
    pub fn new(server_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            upload_route: default_upload_route(),
            files_route: default_files_route(),
            timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    pub fn from_config(config: &ContentDeskConfig) -> Result<Self> {
        let server_url = config
            .server_url
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ContentDeskError::Config("No server URL configured".to_string()))?;
        let api_key = config
            .api_key
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ContentDeskError::Config("No API key configured".to_string()))?;

        Ok(Self {
            upload_route: config.upload_route.clone(),
            files_route: config.files_route.clone(),
            timeout: Duration::from_secs(config.request_timeout_secs),
            ..Self::new(server_url, api_key)
        })
    }
}

pub fn get_config_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".contentdesk"))
        .ok_or_else(|| ContentDeskError::Config("Could not find home directory".to_string()))
}

pub fn get_config_file_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("config.json"))
}

pub fn get_logs_dir() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("logs"))
}

pub fn ensure_config_dir() -> Result<()> {
    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)?;

        // Owner-only access on Unix
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut permissions = fs::metadata(&config_dir)?.permissions();
            permissions.set_mode(0o700);
            fs::set_permissions(&config_dir, permissions)?;
        }
    }
    Ok(())
}

pub fn ensure_logs_dir() -> Result<()> {
    ensure_config_dir()?;
    let logs_dir = get_logs_dir()?;
    if !logs_dir.exists() {
        fs::create_dir_all(&logs_dir)?;
    }
    Ok(())
}

pub fn load_config() -> Result<ContentDeskConfig> {
    ensure_config_dir()?;

    let config_file = get_config_file_path()?;

    if config_file.exists() {
        let content = fs::read_to_string(config_file)?;
        Ok(serde_json::from_str(&content)?)
    } else {
        Ok(ContentDeskConfig::default())
    }
}

pub fn save_config(config: &ContentDeskConfig) -> Result<()> {
    ensure_config_dir()?;

    let config_file = get_config_file_path()?;
    let content = serde_json::to_string_pretty(config)?;

    fs::write(&config_file, content)?;

    // API key lives here; keep it owner-only
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut permissions = fs::metadata(&config_file)?.permissions();
        permissions.set_mode(0o600);
        fs::set_permissions(&config_file, permissions)?;
    }

    Ok(())
}

pub fn clear_config() -> Result<()> {
    save_config(&ContentDeskConfig::default())
}
