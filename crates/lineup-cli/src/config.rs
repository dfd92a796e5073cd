use anyhow::{Context, Result};
use lineup_core::{LocatorParams, MatchConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// CLI configuration: optional TOML file, then `LINEUP_*` environment overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Haar cascade JSON file.
    pub cascade: PathBuf,
    /// Directory of reference images; each file stem is a record id.
    pub gallery_dir: PathBuf,
    pub locator: LocatorParams,
    pub matching: MatchConfig,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = data_dir();
        Self {
            cascade: data_dir.join("cascade.json"),
            gallery_dir: data_dir.join("gallery"),
            locator: LocatorParams::default(),
            matching: MatchConfig::default(),
        }
    }
}

impl Config {
    /// Load from `LINEUP_CONFIG` or the XDG config file if present, then
    /// apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var("LINEUP_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"));

        let config = if path.exists() {
            Self::from_file(&path)?
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Self::default()
        };
        Ok(config.with_env())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = Self::parse(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        tracing::info!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `LINEUP_*` environment variables over the current values.
    pub fn with_env(self) -> Self {
        self.with_vars(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `var`, a `LINEUP_*` name lookup. Values that do
    /// not parse, and non-finite numbers, leave the current setting in place.
    pub fn with_vars<F>(mut self, var: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = var("LINEUP_CASCADE") {
            self.cascade = PathBuf::from(v);
        }
        if let Some(v) = var("LINEUP_GALLERY_DIR") {
            self.gallery_dir = PathBuf::from(v);
        }
        self.matching.threshold = var_f64(var("LINEUP_THRESHOLD"), self.matching.threshold);
        self.matching.canonical_size =
            var_u32(var("LINEUP_CANONICAL_SIZE"), self.matching.canonical_size);
        self.locator.scale_factor = var_f32(var("LINEUP_SCALE_FACTOR"), self.locator.scale_factor);
        self.locator.min_neighbors = var_u32(var("LINEUP_MIN_NEIGHBORS"), self.locator.min_neighbors);
        self.locator.min_size = var_u32(var("LINEUP_MIN_FACE_SIZE"), self.locator.min_size);
        self
    }
}

fn data_dir() -> PathBuf {
    xdg_dir("XDG_DATA_HOME", ".local/share").join("lineup")
}

fn config_dir() -> PathBuf {
    xdg_dir("XDG_CONFIG_HOME", ".config").join("lineup")
}

fn xdg_dir(var: &str, fallback: &str) -> PathBuf {
    std::env::var(var).map(PathBuf::from).unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(home).join(fallback)
    })
}

fn var_f32(value: Option<String>, default: f32) -> f32 {
    value
        .and_then(|v| v.trim().parse::<f32>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}

fn var_f64(value: Option<String>, default: f64) -> f64 {
    value
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}

fn var_u32(value: Option<String>, default: u32) -> u32 {
    value
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
