use serde::Deserialize;
use std::path::PathBuf;

/// Daemon configuration.
///
/// Loaded from a TOML file (path in `VIGIL_CONFIG`, default
/// `/etc/vigil/vigild.toml`); a missing file falls back to defaults.
/// Scalar `VIGIL_*` environment variables override the file, so secrets
/// can stay out of it.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address for the HTTP interface.
    pub listen_addr: String,
    pub camera: CameraConfig,
    pub models: ModelConfig,
    pub registry: RegistryConfig,
    pub facts: FactsConfig,
    pub store: StoreConfig,
    pub snapshots: SnapshotConfig,
    pub interview: InterviewConfig,
    pub generation: GenerationConfig,
    pub alert: AlertConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// V4L2 device path.
    pub device: String,
    /// Frames to discard at startup for AGC/AE stabilization.
    pub warmup_frames: usize,
    /// Apply CLAHE contrast enhancement before detection.
    pub enhance_contrast: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Directory containing the ONNX model files.
    pub dir: PathBuf,
    /// Confidence threshold for face detection.
    pub detect_confidence: f32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Directory of reference photos; filename stem = identity name.
    pub photos_dir: PathBuf,
    /// Cosine similarity threshold for a positive identity match.
    pub match_threshold: f32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FactsConfig {
    /// JSON household fact base.
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database for the session log.
    pub db_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Directory for annotated PNG snapshots.
    pub dir: PathBuf,
    /// Number of snapshots to retain.
    pub keep: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InterviewConfig {
    /// Number of verification questions to request.
    pub question_count: usize,
    /// Seconds to wait for each answer before giving up.
    pub answer_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// OpenAI-compatible chat-completions base URL.
    pub base_url: String,
    /// API key; usually supplied via `VIGIL_GENERATION_API_KEY`.
    pub api_key: String,
    /// Model identifier.
    pub model: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Twilio-compatible API base URL.
    pub base_url: String,
    /// Account SID; usually supplied via `VIGIL_ALERT_ACCOUNT_SID`.
    pub account_sid: String,
    /// Auth token; usually supplied via `VIGIL_ALERT_AUTH_TOKEN`.
    pub auth_token: String,
    /// Sender phone number.
    pub from_number: String,
    /// Recipient phone number.
    pub to_number: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8321".to_string(),
            camera: CameraConfig::default(),
            models: ModelConfig::default(),
            registry: RegistryConfig::default(),
            facts: FactsConfig::default(),
            store: StoreConfig::default(),
            snapshots: SnapshotConfig::default(),
            interview: InterviewConfig::default(),
            generation: GenerationConfig::default(),
            alert: AlertConfig::default(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            warmup_frames: 4,
            enhance_contrast: true,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            dir: data_dir().join("models"),
            detect_confidence: 0.5,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            photos_dir: data_dir().join("known_faces"),
            match_threshold: 0.40,
        }
    }
}

impl Default for FactsConfig {
    fn default() -> Self {
        Self {
            path: data_dir().join("household.json"),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: data_dir().join("session_log.db"),
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            dir: data_dir().join("snapshots"),
            keep: 50,
        }
    }
}

impl Default for InterviewConfig {
    fn default() -> Self {
        Self {
            question_count: 3,
            answer_timeout_secs: 120,
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com/v1beta/openai".to_string(),
            api_key: String::new(),
            model: "gemini-1.5-flash".to_string(),
            timeout_secs: 60,
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.twilio.com".to_string(),
            account_sid: String::new(),
            auth_token: String::new(),
            from_number: String::new(),
            to_number: String::new(),
            timeout_secs: 30,
        }
    }
}

impl Config {
    /// Load the config file and apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("VIGIL_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/etc/vigil/vigild.toml"));

        let mut config = match std::fs::read_to_string(&path) {
            Ok(text) => toml::from_str(&text).map_err(|source| ConfigError::BadToml {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file; using defaults");
                Config::default()
            }
            Err(source) => return Err(ConfigError::Unreadable { path, source }),
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        override_string("VIGIL_LISTEN_ADDR", &mut self.listen_addr);
        override_string("VIGIL_CAMERA_DEVICE", &mut self.camera.device);
        override_path("VIGIL_MODEL_DIR", &mut self.models.dir);
        override_path("VIGIL_PHOTOS_DIR", &mut self.registry.photos_dir);
        override_f32("VIGIL_MATCH_THRESHOLD", &mut self.registry.match_threshold);
        override_path("VIGIL_FACTS_PATH", &mut self.facts.path);
        override_path("VIGIL_DB_PATH", &mut self.store.db_path);
        override_path("VIGIL_SNAPSHOT_DIR", &mut self.snapshots.dir);
        override_f32("VIGIL_DETECT_CONFIDENCE", &mut self.models.detect_confidence);
        override_u64(
            "VIGIL_ANSWER_TIMEOUT_SECS",
            &mut self.interview.answer_timeout_secs,
        );
        override_string("VIGIL_GENERATION_BASE_URL", &mut self.generation.base_url);
        override_string("VIGIL_GENERATION_API_KEY", &mut self.generation.api_key);
        override_string("VIGIL_GENERATION_MODEL", &mut self.generation.model);
        override_string("VIGIL_ALERT_ACCOUNT_SID", &mut self.alert.account_sid);
        override_string("VIGIL_ALERT_AUTH_TOKEN", &mut self.alert.auth_token);
        override_string("VIGIL_ALERT_FROM", &mut self.alert.from_number);
        override_string("VIGIL_ALERT_TO", &mut self.alert.to_number);
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.models
            .dir
            .join("det_10g.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace signature model.
    pub fn arcface_model_path(&self) -> String {
        self.models
            .dir
            .join("w600k_r50.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Unreadable {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    BadToml {
        path: PathBuf,
        source: toml::de::Error,
    },
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("vigil")
}

fn override_string(key: &str, target: &mut String) {
    if let Ok(value) = std::env::var(key) {
        *target = value;
    }
}

fn override_path(key: &str, target: &mut PathBuf) {
    if let Ok(value) = std::env::var(key) {
        *target = PathBuf::from(value);
    }
}

fn override_f32(key: &str, target: &mut f32) {
    if let Some(value) = std::env::var(key).ok().and_then(|v| v.parse().ok()) {
        *target = value;
    }
}

fn override_u64(key: &str, target: &mut u64) {
    if let Some(value) = std::env::var(key).ok().and_then(|v| v.parse().ok()) {
        *target = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.interview.question_count, 3);
        assert!((config.models.detect_confidence - 0.5).abs() < 1e-6);
        assert!((config.registry.match_threshold - 0.40).abs() < 1e-6);
        assert!(config.scrfd_model_path().ends_with("det_10g.onnx"));
        assert!(config.arcface_model_path().ends_with("w600k_r50.onnx"));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            listen_addr = "0.0.0.0:9000"

            [camera]
            device = "/dev/video7"

            [generation]
            model = "gemini-2.0-flash"
            "#,
        )
        .unwrap();

        assert_eq!(config.listen_addr, "0.0.0.0:9000");
        assert_eq!(config.camera.device, "/dev/video7");
        assert_eq!(config.camera.warmup_frames, 4);
        assert_eq!(config.generation.model, "gemini-2.0-flash");
        assert_eq!(config.interview.question_count, 3);
    }
}
