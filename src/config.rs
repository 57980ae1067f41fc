use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin the agent serves. Requests to any other origin pass through.
  pub origin: String,
  pub cache: CacheConfig,
  pub fetch: FetchConfig,
  pub budget: BudgetConfig,
  pub notifications: NotificationConfig,
  pub sync: SyncConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:3000".to_string(),
      cache: CacheConfig::default(),
      fetch: FetchConfig::default(),
      budget: BudgetConfig::default(),
      notifications: NotificationConfig::default(),
      sync: SyncConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Version tag baked into namespace names. Bump on deploy to rotate caches.
  pub version: String,
  /// Namespace name prefix
  pub prefix: String,
  /// SQLite database path (defaults to the user data directory)
  pub database: Option<PathBuf>,
  /// Document routes stored at install time
  pub precache: Vec<String>,
  /// Page served to document requests when the network is unreachable
  pub landing_page: String,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      version: "v1".to_string(),
      prefix: "outpost".to_string(),
      database: None,
      precache: vec![
        "/".to_string(),
        "/dashboard".to_string(),
        "/offline".to_string(),
      ],
      landing_page: "/".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
  pub timeout_secs: u64,
  /// Path fragments of dev-server traffic that is never intercepted
  pub dev_markers: Vec<String>,
  /// Path fragments identifying icon requests
  pub icon_markers: Vec<String>,
}

impl Default for FetchConfig {
  fn default() -> Self {
    Self {
      timeout_secs: 10,
      dev_markers: vec![
        "/@vite".to_string(),
        "/@react-refresh".to_string(),
        "/@fs/".to_string(),
        "/node_modules/".to_string(),
        "hot-update".to_string(),
      ],
      icon_markers: vec!["favicon".to_string(), "/icons/".to_string()],
    }
  }
}

impl FetchConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
  pub max_retries: u32,
  pub window_secs: u64,
}

impl Default for BudgetConfig {
  fn default() -> Self {
    Self {
      max_retries: 3,
      window_secs: 60,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  pub default_title: String,
  pub default_body: String,
  pub default_icon: String,
  pub default_badge: String,
  /// URL opened when a payload carries none
  pub default_url: String,
  /// A client window whose location contains this is reused for navigation
  pub home_marker: String,
  pub snooze_minutes: u64,
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      default_title: "New notification".to_string(),
      default_body: "You have a new update".to_string(),
      default_icon: "/icons/icon-192x192.png".to_string(),
      default_badge: "/icons/badge-72x72.png".to_string(),
      default_url: "/".to_string(),
      home_marker: "/dashboard".to_string(),
      snooze_minutes: 10,
    }
  }
}

impl NotificationConfig {
  pub fn snooze_delay(&self) -> Duration {
    Duration::from_secs(self.snooze_minutes * 60)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// The one sync tag that triggers a pending-write flush
  pub tag: String,
  /// Endpoint the pending write store is flushed to
  pub flush_url: Option<String>,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      tag: "sync-pending-writes".to_string(),
      flush_url: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./outpost.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/outpost/config.yaml
  ///
  /// Falls back to built-in defaults when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => {
        tracing::debug!("no config file found, using defaults");
        Config::default()
      }
    };

    config.origin_url()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("outpost.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("outpost").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    tracing::info!(path = %path.display(), "loaded config");
    Ok(config)
  }

  /// The configured origin as a parsed URL.
  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  /// Path of the cache database.
  pub fn database_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.cache.database {
      return Ok(path.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("outpost").join("cache.db"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn test_partial_yaml_keeps_defaults() {
    let yaml = r#"
origin: "https://app.example.com"
cache:
  version: "v7"
budget:
  max_retries: 5
"#;
    let config: Config = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(config.origin, "https://app.example.com");
    assert_eq!(config.cache.version, "v7");
    assert_eq!(config.cache.prefix, "outpost");
    assert_eq!(config.budget.max_retries, 5);
    assert_eq!(config.budget.window_secs, 60);
    assert_eq!(config.fetch.timeout(), Duration::from_secs(10));
    assert_eq!(config.notifications.snooze_delay(), Duration::from_secs(600));
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    let err = Config::load(Some(Path::new("/nonexistent/outpost.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }

  #[test]
  fn test_load_from_explicit_path() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "origin: \"http://127.0.0.1:8080\"").unwrap();
    writeln!(file, "sync:\n  tag: \"flush-now\"").unwrap();

    let config = Config::load(Some(file.path())).unwrap();
    assert_eq!(config.sync.tag, "flush-now");
    assert_eq!(config.origin_url().unwrap().port(), Some(8080));
  }

  #[test]
  fn test_invalid_origin_is_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "origin: \"not a url\"").unwrap();
    assert!(Config::load(Some(file.path())).is_err());
  }

  #[test]
  fn test_explicit_database_path() {
    let config = Config {
      cache: CacheConfig {
        database: Some(PathBuf::from("/tmp/outpost-test.db")),
        ..CacheConfig::default()
      },
      ..Config::default()
    };
    assert_eq!(
      config.database_path().unwrap(),
      PathBuf::from("/tmp/outpost-test.db")
    );
  }
}
