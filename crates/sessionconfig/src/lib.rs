use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use accumulate::{
    AccumulationStrategy, CameraBasis, ControllerSettings, Options, Viewport, MAX_SUBDIVS,
};
use glam::Vec3;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// One interactive rendering session, as read from `session.toml`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SessionConfig {
    pub version: u32,
    /// WGSL program to render; the built-in preview program when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shader: Option<PathBuf>,
    #[serde(default)]
    pub canvas: CanvasConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub options: Options,
    #[serde(default)]
    pub accumulation: AccumulationConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CanvasConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CameraConfig {
    pub eye: [f32; 3],
    pub look: [f32; 3],
    pub up: [f32; 3],
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            eye: [2.0, 1.5, 2.0],
            look: [0.0, 0.5, 0.0],
            up: [0.0, 1.0, 0.0],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AccumulationConfig {
    #[serde(default)]
    pub strategy: AccumulationStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_frames: Option<u32>,
    #[serde(default)]
    pub start_running: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(
        default = "default_stats_interval",
        deserialize_with = "deserialize_duration_opt",
        serialize_with = "serialize_duration_opt"
    )]
    pub stats_interval: Option<Duration>,
}

impl Default for AccumulationConfig {
    fn default() -> Self {
        Self {
            strategy: AccumulationStrategy::default(),
            max_frames: None,
            start_running: false,
            seed: None,
            stats_interval: default_stats_interval(),
        }
    }
}

fn default_stats_interval() -> Option<Duration> {
    Some(Duration::from_secs(5))
}

fn deserialize_duration_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Option<Duration>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if matches!(v.trim(), "off" | "none") {
                return Ok(None);
            }
            humantime::parse_duration(v)
                .map(Some)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(Duration::from_secs(v)))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_secs(v as u64)))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.is_nan() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_secs_f64(v)))
        }
    }

    deserializer.deserialize_any(Visitor)
}

fn serialize_duration_opt<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(duration) => {
            serializer.serialize_str(&humantime::format_duration(*duration).to_string())
        }
        None => serializer.serialize_str("off"),
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            version: 1,
            shader: None,
            canvas: CanvasConfig::default(),
            camera: CameraConfig::default(),
            options: Options::default(),
            accumulation: AccumulationConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: SessionConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&text)?;
        if let Some(shader) = &config.shader {
            if shader.is_relative() {
                if let Some(parent) = path.parent() {
                    config.shader = Some(parent.join(shader));
                }
            }
        }
        Ok(config)
    }

    pub fn viewport(&self) -> Viewport {
        Viewport::new(self.canvas.width, self.canvas.height)
    }

    pub fn camera_basis(&self) -> Result<CameraBasis, ConfigError> {
        let CameraConfig { eye, look, up } = self.camera;
        CameraBasis::look_at(Vec3::from(eye), Vec3::from(look), Vec3::from(up)).ok_or_else(|| {
            ConfigError::Invalid(
                "camera eye, look and up must span a non-degenerate frame".into(),
            )
        })
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            strategy: self.accumulation.strategy,
            max_frames: self.accumulation.max_frames,
            seed: self.accumulation.seed,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }

        if self.canvas.width == 0 || self.canvas.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "canvas must be at least 1x1 (got {}x{})",
                self.canvas.width, self.canvas.height
            )));
        }

        self.camera_basis()?;

        let options = &self.options;
        if !(options.gamma.is_finite() && options.gamma > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "options.gamma must be > 0 (got {})",
                options.gamma
            )));
        }

        if !options.camera_constant.is_finite() || options.camera_constant <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "options.camera_constant must be > 0 (got {})",
                options.camera_constant
            )));
        }

        if options.subpixel_count == 0 || options.subpixel_count > MAX_SUBDIVS {
            return Err(ConfigError::Invalid(format!(
                "options.subpixel_count must be within 1..={MAX_SUBDIVS} (got {})",
                options.subpixel_count
            )));
        }

        if options.jitters_per_frame == 0 {
            return Err(ConfigError::Invalid(
                "options.jitters_per_frame must be >= 1".into(),
            ));
        }

        if self.accumulation.max_frames == Some(0) {
            return Err(ConfigError::Invalid(
                "accumulation.max_frames must be > 0 when set".into(),
            ));
        }

        Ok(())
    }
}
