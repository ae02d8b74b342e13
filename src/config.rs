//! Settings for the scout binaries, read from the process environment and an
//! optional `.env` file.

use anyhow::{Context, Result, anyhow};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_SCOUT_PORT: u16 = 3000;
pub const DEFAULT_SCOUT_HOST: &str = "127.0.0.1";
pub const DEFAULT_DOWNLOAD_ROOT: &str = "vids/scraped";
pub const DEFAULT_SEARCH_ENDPOINT: &str = "https://serpapi.com/search.json";
pub const DEFAULT_SCRAPER_ENDPOINT: &str = "https://api.apify.com/v2";
pub const DEFAULT_SCRAPER_ACTOR: &str = "GdWCkxBtKWOsKjdch";
pub const DEFAULT_YTDLP_PATH: &str = "yt-dlp";
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_SEARCH_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_SCRAPE_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 600;

/// Everything the binaries need to wire up the pipeline and the downloader.
#[derive(Clone)]
pub struct ScoutSettings {
    pub search_api_key: String,
    pub scraper_api_key: String,
    pub search_endpoint: String,
    pub scraper_endpoint: String,
    pub scraper_actor: String,
    pub download_root: PathBuf,
    pub ytdlp_path: PathBuf,
    pub scout_host: String,
    pub scout_port: u16,
    pub workers: usize,
    pub search_timeout: Duration,
    pub scrape_timeout: Duration,
    pub download_timeout: Duration,
}

// Keys stay out of debug output.
impl std::fmt::Debug for ScoutSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScoutSettings")
            .field("search_api_key", &"<redacted>")
            .field("scraper_api_key", &"<redacted>")
            .field("search_endpoint", &self.search_endpoint)
            .field("scraper_endpoint", &self.scraper_endpoint)
            .field("scraper_actor", &self.scraper_actor)
            .field("download_root", &self.download_root)
            .field("ytdlp_path", &self.ytdlp_path)
            .field("scout_host", &self.scout_host)
            .field("scout_port", &self.scout_port)
            .field("workers", &self.workers)
            .field("search_timeout", &self.search_timeout)
            .field("scrape_timeout", &self.scrape_timeout)
            .field("download_timeout", &self.download_timeout)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub download_root: Option<PathBuf>,
    pub scout_port: Option<u16>,
    pub scout_host: Option<String>,
    pub workers: Option<usize>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_settings(overrides: SettingsOverrides) -> Result<ScoutSettings> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_settings_with_overrides(&file_vars, env_var_string, overrides)
}

#[cfg(test)]
fn build_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<ScoutSettings> {
    build_settings_with_overrides(file_vars, env_lookup, SettingsOverrides::default())
}

fn build_settings_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: SettingsOverrides,
) -> Result<ScoutSettings> {
    let lookup = |key: &str| lookup_value(key, file_vars, &env_lookup);

    // Credentials have no fallback: a missing key must surface here rather
    // than as a 401 from the remote service.
    let search_api_key =
        lookup("SEARCH_API_KEY").ok_or_else(|| anyhow!("SEARCH_API_KEY not set"))?;
    let scraper_api_key =
        lookup("SCRAPER_API_KEY").ok_or_else(|| anyhow!("SCRAPER_API_KEY not set"))?;

    let download_root = overrides
        .download_root
        .map(|path| path.to_string_lossy().into_owned())
        .or_else(|| lookup("DOWNLOAD_ROOT"))
        .unwrap_or_else(|| DEFAULT_DOWNLOAD_ROOT.to_string());
    let scout_port = overrides
        .scout_port
        .or_else(|| lookup("SCOUT_PORT").and_then(|value| value.parse::<u16>().ok()))
        .unwrap_or(DEFAULT_SCOUT_PORT);
    let scout_host = overrides
        .scout_host
        .and_then(|value| {
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed)
            }
        })
        .or_else(|| lookup("SCOUT_HOST"))
        .unwrap_or_else(|| DEFAULT_SCOUT_HOST.to_string());
    let workers = overrides
        .workers
        .or_else(|| lookup("SCOUT_WORKERS").and_then(|value| value.parse::<usize>().ok()))
        .unwrap_or(DEFAULT_WORKERS)
        .max(1);

    Ok(ScoutSettings {
        search_api_key,
        scraper_api_key,
        search_endpoint: lookup("SEARCH_ENDPOINT")
            .unwrap_or_else(|| DEFAULT_SEARCH_ENDPOINT.to_string()),
        scraper_endpoint: lookup("SCRAPER_ENDPOINT")
            .unwrap_or_else(|| DEFAULT_SCRAPER_ENDPOINT.to_string()),
        scraper_actor: lookup("SCRAPER_ACTOR").unwrap_or_else(|| DEFAULT_SCRAPER_ACTOR.to_string()),
        download_root: PathBuf::from(download_root),
        ytdlp_path: PathBuf::from(
            lookup("YTDLP_PATH").unwrap_or_else(|| DEFAULT_YTDLP_PATH.to_string()),
        ),
        scout_host,
        scout_port,
        workers,
        search_timeout: seconds(lookup("SEARCH_TIMEOUT_SECS"), DEFAULT_SEARCH_TIMEOUT_SECS),
        scrape_timeout: seconds(lookup("SCRAPE_TIMEOUT_SECS"), DEFAULT_SCRAPE_TIMEOUT_SECS),
        download_timeout: seconds(
            lookup("DOWNLOAD_TIMEOUT_SECS"),
            DEFAULT_DOWNLOAD_TIMEOUT_SECS,
        ),
    })
}

fn seconds(raw: Option<String>, default: u64) -> Duration {
    let secs = raw
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(default);
    Duration::from_secs(secs)
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| non_blank(&value))
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| file_vars.get(key).and_then(|value| non_blank(value)))
}

/// Reads `KEY=value` pairs from an optional dotenv-style file. A missing file
/// is not an error.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}
