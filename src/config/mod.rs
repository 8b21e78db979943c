//! Configuration management for veridock
//!
//! Settings come from `config.toml` in the base directory (`~/.veridock`,
//! or `$VERIDOCK_HOME`). The watched directories live in a separate plain
//! text watch list, one directory per line.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use crate::ocr::validate_language;
use crate::render::ThumbnailOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Environment variable overriding the base directory
pub const HOME_ENV: &str = "VERIDOCK_HOME";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Watch list file; defaults to `watch.list` in the base directory
    #[serde(default)]
    pub watch_list: Option<PathBuf>,

    /// Scan-and-convert pass
    #[serde(default)]
    pub scan: ScanConfig,

    /// OCR backlog pass
    #[serde(default)]
    pub ocr: OcrConfig,

    /// Thumbnail rendering
    #[serde(default)]
    pub render: RenderConfig,

    /// Daemon lifecycle
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// Scan-and-convert configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Seconds between ticks
    #[serde(default = "default_scan_interval")]
    pub interval_secs: u64,

    /// Minimum age of a PDF's mtime before it is picked up
    #[serde(default = "default_settle_secs")]
    pub settle_secs: u64,

    /// Render attempts per file per tick
    #[serde(default = "default_scan_max_attempts")]
    pub max_attempts: u32,

    /// Delay between render attempts (milliseconds)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Keep the source PDF after conversion
    #[serde(default)]
    pub keep_source: bool,

    /// Files converted in parallel
    #[serde(default = "default_scan_concurrency")]
    pub concurrency: usize,
}

/// OCR configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    /// Seconds between ticks
    #[serde(default = "default_ocr_interval")]
    pub interval_secs: u64,

    /// Tesseract language codes
    #[serde(default = "default_ocr_languages")]
    pub languages: Vec<String>,

    /// Rasterization resolution for recognition
    #[serde(default = "default_ocr_dpi")]
    pub dpi: u32,

    /// Minimum word confidence (0 - 100)
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,

    /// Tesseract executable
    #[serde(default = "default_tesseract_path")]
    pub tesseract_path: String,

    /// Tesseract OCR engine mode
    #[serde(default = "default_ocr_oem")]
    pub oem: u8,

    /// Tesseract page segmentation mode
    #[serde(default = "default_ocr_psm")]
    pub psm: u8,

    /// Recorded failures after which the daemon leaves a container alone
    #[serde(default = "default_ocr_max_attempts")]
    pub max_attempts: u32,

    /// Containers processed in parallel
    #[serde(default = "default_ocr_concurrency")]
    pub concurrency: usize,
}

/// Thumbnail grid configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    #[serde(default = "default_thumbnail_dpi")]
    pub thumbnail_dpi: u32,

    #[serde(default = "default_tile_width")]
    pub tile_width: u32,

    #[serde(default = "default_tile_height")]
    pub tile_height: u32,

    #[serde(default = "default_max_columns")]
    pub max_columns: u32,

    /// pdftoppm executable
    #[serde(default = "default_pdftoppm_path")]
    pub pdftoppm_path: String,
}

/// Daemon lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Seconds `stop` waits before giving up
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,

    /// Write `registry.json` after every tick
    #[serde(default = "default_registry_snapshot")]
    pub registry_snapshot: bool,
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for veridock state
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,

    /// Default watch list location
    pub watch_list: PathBuf,

    /// Daemon process state (pid, start identity, tick history)
    pub state_file: PathBuf,

    /// Registry snapshot
    pub registry_file: PathBuf,

    /// Output of a detached daemon
    pub log_file: PathBuf,
}

impl PathsConfig {
    fn under(base: PathBuf, config_file: PathBuf) -> Self {
        Self {
            config_file,
            watch_list: base.join("watch.list"),
            state_file: base.join("daemon.json"),
            registry_file: base.join("registry.json"),
            log_file: base.join("daemon.log"),
            base_dir: base,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            watch_list: None,
            scan: ScanConfig::default(),
            ocr: OcrConfig::default(),
            render: RenderConfig::default(),
            daemon: DaemonConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_scan_interval(),
            settle_secs: default_settle_secs(),
            max_attempts: default_scan_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            keep_source: false,
            concurrency: default_scan_concurrency(),
        }
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_ocr_interval(),
            languages: default_ocr_languages(),
            dpi: default_ocr_dpi(),
            min_confidence: default_min_confidence(),
            tesseract_path: default_tesseract_path(),
            oem: default_ocr_oem(),
            psm: default_ocr_psm(),
            max_attempts: default_ocr_max_attempts(),
            concurrency: default_ocr_concurrency(),
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            thumbnail_dpi: default_thumbnail_dpi(),
            tile_width: default_tile_width(),
            tile_height: default_tile_height(),
            max_columns: default_max_columns(),
            pdftoppm_path: default_pdftoppm_path(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            stop_timeout_secs: default_stop_timeout(),
            registry_snapshot: default_registry_snapshot(),
        }
    }
}

impl ScanConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }
}

impl OcrConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl RenderConfig {
    pub fn thumbnail_options(&self) -> ThumbnailOptions {
        ThumbnailOptions {
            dpi: self.thumbnail_dpi,
            tile_width: self.tile_width,
            tile_height: self.tile_height,
            max_columns: self.max_columns,
        }
    }
}

impl Config {
    /// Get the default base directory (`$VERIDOCK_HOME` or ~/.veridock)
    pub fn default_base_dir() -> PathBuf {
        if let Some(home) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
            return PathBuf::from(home);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".veridock")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    /// Initialize paths configuration
    fn init_paths(&mut self, base_dir: Option<PathBuf>) {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        let config_file = base.join("config.toml");
        self.paths = PathsConfig::under(base, config_file);
    }

    /// Default settings rooted at `base_dir`, without reading any file
    pub fn defaults_at(base_dir: Option<PathBuf>) -> Self {
        let mut config = Config::default();
        config.init_paths(base_dir);
        config
    }

    /// Load configuration from a specific file path
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        // State files sit next to the config file
        let base = config_path.parent().unwrap_or(Path::new(".")).to_path_buf();
        config.paths = PathsConfig::under(base, config_path.to_path_buf());

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific base directory, falling back to
    /// defaults when no config file exists yet
    pub fn load_from(base_dir: Option<PathBuf>) -> Result<Self> {
        let mut config = Config::defaults_at(base_dir);

        if config.paths.config_file.exists() {
            debug!("Loading config from {:?}", config.paths.config_file);
            let content = std::fs::read_to_string(&config.paths.config_file)?;
            let mut loaded: Config = toml::from_str(&content)?;
            loaded.paths = config.paths;
            config = loaded;
        } else {
            debug!("No config file found, using defaults");
        }

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    /// Effective watch list file
    pub fn watch_list_path(&self) -> PathBuf {
        self.watch_list
            .clone()
            .unwrap_or_else(|| self.paths.watch_list.clone())
    }

    /// Directories to watch, in watch list order. A missing watch list
    /// means nothing to watch.
    pub fn watch_dirs(&self) -> Result<Vec<PathBuf>> {
        let path = self.watch_list_path();
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(parse_watch_list(&content, dirs::home_dir().as_deref())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Watch list {} does not exist", path.display());
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write a watch list with the given entries (kept verbatim, `~` and all)
    pub fn save_watch_list(&self, entries: &[&str]) -> Result<()> {
        let path = self.watch_list_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut content = String::from("# Directories watched by veridock, one per line\n");
        for entry in entries {
            content.push_str(entry);
            content.push('\n');
        }
        std::fs::write(&path, content)?;
        info!("Saved watch list to {:?}", path);
        Ok(())
    }

    /// Check if veridock is initialized (config and watch list exist)
    pub fn is_initialized(&self) -> bool {
        self.paths.config_file.exists() && self.watch_list_path().exists()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.scan.interval_secs == 0 || self.ocr.interval_secs == 0 {
            return Err(Error::Config(
                "scan.interval_secs and ocr.interval_secs must be positive".to_string(),
            ));
        }

        if self.scan.max_attempts == 0 || self.ocr.max_attempts == 0 {
            return Err(Error::Config(
                "scan.max_attempts and ocr.max_attempts must be at least 1".to_string(),
            ));
        }

        if self.scan.concurrency == 0 || self.ocr.concurrency == 0 {
            return Err(Error::Config(
                "scan.concurrency and ocr.concurrency must be at least 1".to_string(),
            ));
        }

        for (name, dpi) in [
            ("render.thumbnail_dpi", self.render.thumbnail_dpi),
            ("ocr.dpi", self.ocr.dpi),
        ] {
            if !(10..=1200).contains(&dpi) {
                return Err(Error::Config(format!(
                    "{} must be between 10 and 1200",
                    name
                )));
            }
        }

        if self.render.tile_width == 0 || self.render.tile_height == 0 {
            return Err(Error::Config(
                "render.tile_width and render.tile_height must be positive".to_string(),
            ));
        }

        if self.render.max_columns == 0 {
            return Err(Error::Config(
                "render.max_columns must be at least 1".to_string(),
            ));
        }

        if !(0.0..=100.0).contains(&self.ocr.min_confidence) {
            return Err(Error::Config(
                "ocr.min_confidence must be between 0 and 100".to_string(),
            ));
        }

        if self.ocr.languages.is_empty() {
            return Err(Error::Config(
                "ocr.languages must list at least one language".to_string(),
            ));
        }
        for lang in &self.ocr.languages {
            validate_language(lang).map_err(|e| Error::Config(format!("ocr.languages: {}", e)))?;
        }

        Ok(())
    }
}

/// Expand a leading `~` or `~/` against `home`
pub fn expand_tilde(entry: &str, home: Option<&Path>) -> PathBuf {
    match (entry, home) {
        ("~", Some(home)) => home.to_path_buf(),
        (e, Some(home)) if e.starts_with("~/") => home.join(&e[2..]),
        (e, _) => PathBuf::from(e),
    }
}

/// Parse watch list content: one directory per line, `#` comments and blank
/// lines ignored, duplicates dropped keeping the first occurrence.
pub fn parse_watch_list(content: &str, home: Option<&Path>) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = Vec::new();
    for line in content.lines() {
        let entry = line.trim();
        if entry.is_empty() || entry.starts_with('#') {
            continue;
        }
        let path = expand_tilde(entry, home);
        if !dirs.contains(&path) {
            dirs.push(path);
        }
    }
    dirs
}
