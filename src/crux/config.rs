use crate::crux::scope::Scope;
use crate::error::ArchiveError;
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

pub const DEFAULT_BIGQUERY_ENDPOINT: &str = "https://bigquery.googleapis.com/bigquery/v2";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    pub scopes: Vec<Scope>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            scopes: vec![Scope::Global],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BigQueryConfig {
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_endpoint() -> String {
    DEFAULT_BIGQUERY_ENDPOINT.to_string()
}

fn default_page_size() -> u32 {
    100_000
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

impl Default for BigQueryConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            endpoint: default_endpoint(),
            location: None,
            page_size: default_page_size(),
            request_timeout_secs: default_request_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CruxConfig {
    pub archive: ArchiveConfig,
    pub bigquery: BigQueryConfig,
    #[serde(skip)]
    pub inline_credentials: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialCruxConfig {
    archive: Option<ArchiveConfig>,
    bigquery: Option<BigQueryConfig>,
}

fn env_non_empty(var: &str) -> Option<String> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => None,
    }
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_u32(var: &str, fallback: u32) -> u32 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u32>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

pub fn parse_scope_list(raw: &str) -> Result<Vec<Scope>, ArchiveError> {
    let mut out = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let scope = part.parse::<Scope>()?;
        if !out.contains(&scope) {
            out.push(scope);
        }
    }
    Ok(out)
}

fn validate(cfg: &CruxConfig) -> Result<()> {
    if cfg.archive.scopes.is_empty() {
        return Err(ArchiveError::Configuration(
            "archive scopes cannot be empty".to_string(),
        )
        .into());
    }
    if cfg.bigquery.page_size == 0 {
        return Err(ArchiveError::Configuration(
            "bigquery page size must be >= 1".to_string(),
        )
        .into());
    }
    if cfg.bigquery.poll_interval_ms == 0 {
        return Err(ArchiveError::Configuration(
            "bigquery poll interval must be >= 1 ms".to_string(),
        )
        .into());
    }
    if cfg.bigquery.endpoint.trim().is_empty() {
        return Err(
            ArchiveError::Configuration("bigquery endpoint cannot be empty".to_string()).into(),
        );
    }
    Ok(())
}

pub fn config_home() -> Option<PathBuf> {
    let home = dirs::home_dir()?;
    Some(home.join(".config").join("crux-archiver"))
}

fn resolve_config_path() -> Option<PathBuf> {
    if let Some(custom) = env_non_empty("CRUX_CONFIG_PATH") {
        return Some(PathBuf::from(custom));
    }
    Some(config_home()?.join("config.toml"))
}

fn merge_file_config(base: &mut CruxConfig) -> Result<()> {
    let Some(path) = resolve_config_path() else {
        return Ok(());
    };
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(&path)?;
    let parsed: PartialCruxConfig = toml::from_str(&raw)
        .map_err(|err| anyhow!("failed to parse crux config {}: {err}", path.display()))?;
    if let Some(archive) = parsed.archive {
        base.archive = archive;
    }
    if let Some(bigquery) = parsed.bigquery {
        base.bigquery = bigquery;
    }
    Ok(())
}

pub fn load_config() -> Result<CruxConfig> {
    let mut cfg = CruxConfig::default();
    merge_file_config(&mut cfg)?;

    if let Some(raw) = env_non_empty("CRUX_SCOPES") {
        cfg.archive.scopes = parse_scope_list(&raw)?;
    }
    if let Some(project) = env_non_empty("CRUX_PROJECT_ID") {
        cfg.bigquery.project_id = Some(project);
    }
    if let Some(endpoint) = env_non_empty("CRUX_BIGQUERY_ENDPOINT") {
        cfg.bigquery.endpoint = endpoint;
    }
    if let Some(location) = env_non_empty("CRUX_BIGQUERY_LOCATION") {
        cfg.bigquery.location = Some(location);
    }
    cfg.bigquery.page_size = env_or_u32("CRUX_PAGE_SIZE", cfg.bigquery.page_size);
    cfg.bigquery.request_timeout_secs =
        env_or_u64("CRUX_REQUEST_TIMEOUT_SECS", cfg.bigquery.request_timeout_secs);
    cfg.bigquery.poll_interval_ms =
        env_or_u64("CRUX_POLL_INTERVAL_MS", cfg.bigquery.poll_interval_ms);
    cfg.inline_credentials = env_non_empty("CRUX_CREDENTIALS_JSON");

    validate(&cfg)?;
    Ok(cfg)
}
