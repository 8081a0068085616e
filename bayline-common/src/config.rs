//! Configuration loading and data directory resolution
//!
//! Values resolve in priority order:
//! 1. Command-line argument (highest priority)
//! 2. `BAYLINE_*` environment variable
//! 3. TOML config file (`bayline/config.toml` under the platform config dir,
//!    or `/etc/bayline/config.toml` on Linux)
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Resolved runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the SQLite database file
    pub database_path: PathBuf,
    /// Name of the default shop (single-tenant deployment)
    pub shop_name: String,
    /// Import pipeline tuning
    pub import: ImportConfig,
}

/// Import pipeline tuning knobs
#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// Maximum files merged concurrently by the batch runner
    pub concurrency: usize,
    /// Bounded retry attempts for retryable merge failures
    pub retry_attempts: u32,
    /// Initial backoff between retry attempts (doubles per attempt)
    pub retry_backoff_ms: u64,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            retry_attempts: 3,
            retry_backoff_ms: 250,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_data_dir().join("bayline.db"),
            shop_name: "Default Shop".to_string(),
            import: ImportConfig::default(),
        }
    }
}

/// On-disk TOML shape; every field optional so partial files overlay defaults
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    database_path: Option<String>,
    shop_name: Option<String>,
    import: Option<FileImportConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct FileImportConfig {
    concurrency: Option<usize>,
    retry_attempts: Option<u32>,
    retry_backoff_ms: Option<u64>,
}

impl Config {
    /// Load configuration, applying the full priority order.
    ///
    /// `cli_database` is the optional `--database` argument; it outranks
    /// everything else for the database path. A missing config file is not
    /// an error; a malformed one is.
    pub fn load(cli_database: Option<PathBuf>) -> Result<Config> {
        let mut config = Config::default();

        if let Some(path) = config_file_path() {
            let content = std::fs::read_to_string(&path)?;
            let file: FileConfig = toml::from_str(&content)
                .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
            config.apply_file(file);
        }

        config.apply_env();

        if let Some(path) = cli_database {
            config.database_path = path;
        }

        Ok(config)
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(path) = file.database_path {
            self.database_path = PathBuf::from(path);
        }
        if let Some(name) = file.shop_name {
            self.shop_name = name;
        }
        if let Some(import) = file.import {
            if let Some(n) = import.concurrency {
                self.import.concurrency = n.max(1);
            }
            if let Some(n) = import.retry_attempts {
                self.import.retry_attempts = n;
            }
            if let Some(n) = import.retry_backoff_ms {
                self.import.retry_backoff_ms = n;
            }
        }
    }

    fn apply_env(&mut self) {
        if let Ok(path) = std::env::var("BAYLINE_DATABASE") {
            self.database_path = PathBuf::from(path);
        }
        if let Ok(name) = std::env::var("BAYLINE_SHOP_NAME") {
            self.shop_name = name;
        }
        if let Ok(value) = std::env::var("BAYLINE_IMPORT_CONCURRENCY") {
            if let Ok(n) = value.parse::<usize>() {
                self.import.concurrency = n.max(1);
            }
        }
    }
}

/// Locate the config file for the platform, if one exists
fn config_file_path() -> Option<PathBuf> {
    if cfg!(target_os = "linux") {
        // Try ~/.config/bayline/config.toml first, then /etc/bayline/config.toml
        if let Some(path) = dirs::config_dir().map(|d| d.join("bayline").join("config.toml")) {
            if path.exists() {
                return Some(path);
            }
        }
        let system_config = PathBuf::from("/etc/bayline/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
        None
    } else {
        dirs::config_dir()
            .map(|d| d.join("bayline").join("config.toml"))
            .filter(|p| p.exists())
    }
}

/// OS-dependent default data directory
fn default_data_dir() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/bayline (or /var/lib/bayline for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("bayline"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/bayline"))
    } else if cfg!(target_os = "macos") {
        // ~/Library/Application Support/bayline
        dirs::data_dir()
            .map(|d| d.join("bayline"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/bayline"))
    } else if cfg!(target_os = "windows") {
        // %LOCALAPPDATA%\bayline
        dirs::data_local_dir()
            .map(|d| d.join("bayline"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\bayline"))
    } else {
        PathBuf::from("./bayline_data")
    }
}
