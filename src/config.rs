// src/config.rs
//! Configuration file parsing for genepool
//!
//! Supports TOML configuration files with the following sections:
//! - [cache] - Local cache root
//! - [[repository]] - Ordered list of gene repositories
//! - [download] - Retry, timeout and progress settings
//! - [worker] - Concurrency of the background worker
//!
//! Every section is optional; an empty file yields an offline pool rooted in
//! the platform cache directory.

use crate::progress::DEFAULT_PROGRESS_INTERVAL;
use crate::repository::{
    PartDownloadOptions, DEFAULT_IDLE_TIMEOUT, DEFAULT_REQUEST_TIMEOUT, DEFAULT_URL_EXPIRY_MARGIN,
};
use crate::resolution::{ResolverOptions, RetryPolicy};
use crate::worker::DEFAULT_CONCURRENCY;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Upper bound for `download.retry_rounds`
const MAX_RETRY_ROUNDS: u32 = 100;

/// TOML configuration file structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenePoolConfig {
    /// Cache settings
    #[serde(default)]
    pub cache: CacheSection,

    /// Repositories, queried in order
    #[serde(default, rename = "repository")]
    pub repositories: Vec<RepositorySection>,

    /// Download settings
    #[serde(default)]
    pub download: DownloadSection,

    /// Worker settings
    #[serde(default)]
    pub worker: WorkerSection,
}

/// Cache configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSection {
    /// Root directory of the local gene pool
    #[serde(default = "default_root")]
    pub root: PathBuf,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self { root: default_root() }
    }
}

fn default_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("genepool")
}

/// One gene repository
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepositorySection {
    /// Name used in logs and aggregate errors
    pub name: String,

    /// Base URL of the repository API
    pub url: String,

    /// Bearer token sent with manifest requests
    #[serde(default)]
    pub api_key: Option<String>,
}

impl std::fmt::Debug for RepositorySection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositorySection")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Download configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DownloadSection {
    /// Download rounds for missing parts, including the first
    #[serde(default = "default_retry_rounds")]
    pub retry_rounds: u32,

    /// Pause between rounds (e.g., "2s")
    #[serde(default = "default_retry_delay")]
    pub retry_delay: String,

    /// Timeout of a single manifest request
    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,

    /// Part transfers fail after this long without data
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: String,

    /// Download URLs expiring within this margin are refreshed first
    #[serde(default = "default_url_expiry_margin")]
    pub url_expiry_margin: String,

    /// Minimum time between progress reports
    #[serde(default = "default_progress_interval")]
    pub progress_interval: String,
}

impl Default for DownloadSection {
    fn default() -> Self {
        Self {
            retry_rounds: default_retry_rounds(),
            retry_delay: default_retry_delay(),
            request_timeout: default_request_timeout(),
            idle_timeout: default_idle_timeout(),
            url_expiry_margin: default_url_expiry_margin(),
            progress_interval: default_progress_interval(),
        }
    }
}

fn default_retry_rounds() -> u32 {
    RetryPolicy::default().rounds
}

fn format_secs(duration: Duration) -> String {
    format!("{}s", duration.as_secs())
}

fn default_retry_delay() -> String {
    format_secs(RetryPolicy::default().delay)
}

fn default_request_timeout() -> String {
    format_secs(DEFAULT_REQUEST_TIMEOUT)
}

fn default_idle_timeout() -> String {
    format_secs(DEFAULT_IDLE_TIMEOUT)
}

fn default_url_expiry_margin() -> String {
    format_secs(DEFAULT_URL_EXPIRY_MARGIN)
}

fn default_progress_interval() -> String {
    format_secs(DEFAULT_PROGRESS_INTERVAL)
}

/// Worker configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerSection {
    /// Distinct genes processed concurrently
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

impl GenePoolConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(config)
    }

    /// Parse and validate configuration text
    pub fn parse(content: &str) -> Result<Self> {
        let config: GenePoolConfig = toml::from_str(content).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Create a default (offline) configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for repository in &self.repositories {
            if repository.name.trim().is_empty() {
                anyhow::bail!("repository.name must not be empty");
            }
            if !names.insert(repository.name.as_str()) {
                anyhow::bail!("Duplicate repository name '{}'", repository.name);
            }
            repository.base_url()?;
        }

        if self.worker.concurrency == 0 {
            anyhow::bail!("worker.concurrency must be at least 1");
        }

        if self.download.retry_rounds == 0 || self.download.retry_rounds > MAX_RETRY_ROUNDS {
            anyhow::bail!(
                "download.retry_rounds must be between 1 and {}, got {}",
                MAX_RETRY_ROUNDS,
                self.download.retry_rounds
            );
        }

        self.resolver_options()?;
        Ok(())
    }

    /// Convert the download section to resolver options
    pub fn resolver_options(&self) -> Result<ResolverOptions> {
        let download = &self.download;
        let field = |name: &str, value: &str| {
            parse_duration(value).with_context(|| format!("Invalid download.{name}: {value}"))
        };

        Ok(ResolverOptions {
            retry: RetryPolicy {
                rounds: download.retry_rounds,
                delay: field("retry_delay", &download.retry_delay)?,
            },
            part: PartDownloadOptions {
                idle_timeout: field("idle_timeout", &download.idle_timeout)?,
                url_expiry_margin: field("url_expiry_margin", &download.url_expiry_margin)?,
            },
            request_timeout: field("request_timeout", &download.request_timeout)?,
            progress_interval: field("progress_interval", &download.progress_interval)?,
        })
    }

    /// Get the cache root directory
    pub fn cache_root(&self) -> &Path {
        &self.cache.root
    }
}

impl RepositorySection {
    /// Parse the configured URL
    pub fn base_url(&self) -> Result<Url> {
        let url = Url::parse(&self.url)
            .with_context(|| format!("Invalid URL for repository '{}': {}", self.name, self.url))?;
        if url.cannot_be_a_base() {
            anyhow::bail!("URL of repository '{}' cannot be a base: {}", self.name, self.url);
        }
        Ok(url)
    }
}

/// Parse a human-readable duration string (e.g., "30s", "5m", "1h", "1d")
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim().to_lowercase();

    let (num_str, multiplier) = if let Some(num) = s.strip_suffix('d') {
        (num, 24 * 60 * 60)
    } else if let Some(num) = s.strip_suffix('h') {
        (num, 60 * 60)
    } else if let Some(num) = s.strip_suffix('m') {
        (num, 60)
    } else if let Some(num) = s.strip_suffix('s') {
        (num, 1)
    } else {
        // Assume seconds
        (s.as_str(), 1)
    };

    let num: u64 = num_str
        .trim()
        .parse()
        .with_context(|| format!("Invalid duration number: {}", num_str))?;

    Ok(Duration::from_secs(num * multiplier))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86400));
        assert_eq!(parse_duration(" 2S ").unwrap(), Duration::from_secs(2));
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("-1s").is_err());
    }

    #[test]
    fn test_empty_config_is_offline() {
        let config = GenePoolConfig::parse("").unwrap();
        assert!(config.repositories.is_empty());
        assert!(config.cache_root().ends_with("genepool"));
        assert_eq!(config.worker.concurrency, DEFAULT_CONCURRENCY);

        let options = config.resolver_options().unwrap();
        assert_eq!(options.retry, RetryPolicy::default());
        assert_eq!(options.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(options.part.idle_timeout, DEFAULT_IDLE_TIMEOUT);
        assert_eq!(options.part.url_expiry_margin, DEFAULT_URL_EXPIRY_MARGIN);
        assert_eq!(options.progress_interval, DEFAULT_PROGRESS_INTERVAL);
    }

    #[test]
    fn test_full_config() {
        let config = GenePoolConfig::parse(
            r#"
            [cache]
            root = "/var/lib/genepool"

            [[repository]]
            name = "primary"
            url = "https://genepool.example.com/api/"
            api_key = "secret"

            [[repository]]
            name = "mirror"
            url = "https://mirror.example.com"

            [download]
            retry_rounds = 3
            retry_delay = "1s"
            idle_timeout = "2m"

            [worker]
            concurrency = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.cache_root(), Path::new("/var/lib/genepool"));
        let names: Vec<&str> = config.repositories.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["primary", "mirror"]);
        assert_eq!(config.repositories[0].api_key.as_deref(), Some("secret"));
        assert!(!format!("{:?}", config.repositories[0]).contains("secret"));

        let options = config.resolver_options().unwrap();
        assert_eq!(options.retry.rounds, 3);
        assert_eq!(options.retry.delay, Duration::from_secs(1));
        assert_eq!(options.part.idle_timeout, Duration::from_secs(120));
        assert_eq!(config.worker.concurrency, 4);
    }

    #[test]
    fn test_validation_errors() {
        let duplicate = r#"
            [[repository]]
            name = "a"
            url = "https://a.example.com"
            [[repository]]
            name = "a"
            url = "https://b.example.com"
        "#;
        assert!(GenePoolConfig::parse(duplicate).is_err());

        let bad_url = "[[repository]]\nname = \"a\"\nurl = \"not a url\"\n";
        assert!(GenePoolConfig::parse(bad_url).is_err());

        assert!(GenePoolConfig::parse("[worker]\nconcurrency = 0\n").is_err());
        assert!(GenePoolConfig::parse("[download]\nretry_rounds = 101\n").is_err());
        assert!(GenePoolConfig::parse("[download]\nretry_delay = \"later\"\n").is_err());
        assert!(GenePoolConfig::parse("[cache]\nsize = 1\n").is_err());
    }
}
