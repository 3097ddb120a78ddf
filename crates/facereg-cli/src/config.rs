use facereg_core::{ConfidenceThreshold, DetectParams};
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use thiserror::Error;

const REGISTRY_FILE: &str = "data.json";
const DEFAULT_CASCADE: &str =
    "/usr/share/opencv4/haarcascades/haarcascade_frontalface_default.xml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

/// Application configuration.
///
/// Built once at startup (defaults, then an optional TOML file, then
/// `FACEREG_*` environment variables) and handed to each workflow by
/// reference.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory holding one folder per person plus the registry file.
    pub base_dir: PathBuf,
    /// V4L2 device path.
    pub camera_device: String,
    /// OpenCV Haar cascade XML used for face detection.
    pub cascade_path: PathBuf,
    /// TrueType font for on-frame captions; captions go to the window title without it.
    pub font_path: Option<PathBuf>,
    /// New face images to collect per registration session.
    pub photos_per_session: usize,
    /// Maximum LBPH distance accepted as a match.
    pub confidence_threshold: f64,
    /// Detection sensitivity while registering.
    #[serde(deserialize_with = "capture_table")]
    pub capture: DetectParams,
    /// Detection sensitivity while recognizing.
    #[serde(deserialize_with = "recognition_table")]
    pub recognition: DetectParams,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("faces"),
            camera_device: "/dev/video0".to_string(),
            cascade_path: PathBuf::from(DEFAULT_CASCADE),
            font_path: None,
            photos_per_session: 250,
            confidence_threshold: ConfidenceThreshold::default().0,
            capture: DetectParams {
                scale_factor: 1.1,
                min_neighbors: 3,
                min_size: (50, 50),
            },
            recognition: DetectParams {
                scale_factor: 1.2,
                min_neighbors: 5,
                min_size: (0, 0),
            },
        }
    }
}

impl Config {
    /// Load configuration: `file` (or `$FACEREG_CONFIG`) if any, then environment overrides.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let file = file
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("FACEREG_CONFIG").ok().map(PathBuf::from));

        let mut config = match file {
            Some(path) => Self::from_toml_file(&path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        tracing::info!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Override fields from `FACEREG_*` variables. Unparseable values are ignored.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("FACEREG_BASE_DIR") {
            self.base_dir = PathBuf::from(v);
        }
        if let Some(v) = var("FACEREG_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = var("FACEREG_CASCADE_PATH") {
            self.cascade_path = PathBuf::from(v);
        }
        if let Some(v) = var("FACEREG_FONT_PATH") {
            self.font_path = Some(PathBuf::from(v));
        }
        self.photos_per_session =
            env_parse(&var, "FACEREG_PHOTOS_PER_SESSION", self.photos_per_session);
        self.confidence_threshold =
            env_parse(&var, "FACEREG_CONFIDENCE_THRESHOLD", self.confidence_threshold);
    }

    /// Path to the JSON registry inside `base_dir`.
    pub fn registry_path(&self) -> PathBuf {
        self.base_dir.join(REGISTRY_FILE)
    }

    pub fn threshold(&self) -> ConfidenceThreshold {
        ConfidenceThreshold(self.confidence_threshold)
    }
}

/// A `[capture]` / `[recognition]` table; keys left out keep that table's defaults.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DetectTable {
    scale_factor: Option<f64>,
    min_neighbors: Option<u32>,
    min_size: Option<(u32, u32)>,
}

impl DetectTable {
    fn over(self, base: DetectParams) -> DetectParams {
        DetectParams {
            scale_factor: self.scale_factor.unwrap_or(base.scale_factor),
            min_neighbors: self.min_neighbors.unwrap_or(base.min_neighbors),
            min_size: self.min_size.unwrap_or(base.min_size),
        }
    }
}

fn capture_table<'de, D: Deserializer<'de>>(d: D) -> Result<DetectParams, D::Error> {
    Ok(DetectTable::deserialize(d)?.over(Config::default().capture))
}

fn recognition_table<'de, D: Deserializer<'de>>(d: D) -> Result<DetectParams, D::Error> {
    Ok(DetectTable::deserialize(d)?.over(Config::default().recognition))
}

fn env_parse<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    match var(key) {
        Some(v) => v.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %v, "ignoring unparseable environment value");
            default
        }),
        None => default,
    }
}
