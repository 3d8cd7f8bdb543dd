use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use accumulate::{CameraBasis, ControllerSettings, Options};

use crate::gpu::scene::{EmptyScene, SceneSource};

/// Number of shading variants the built-in preview program understands.
pub const BUILTIN_SELECTOR_VARIANTS: u32 = 3;

/// Adapter selection hint forwarded to wgpu.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GpuPowerPreference {
    Low,
    #[default]
    High,
}

/// What we learned about the adapter at start-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterProfile {
    pub name: String,
    pub backend: wgpu::Backend,
    pub device_type: wgpu::DeviceType,
    /// Whether pass durations can be measured with timestamp queries.
    pub timestamps: bool,
}

impl AdapterProfile {
    pub(crate) fn from_wgpu(info: &wgpu::AdapterInfo, timestamps: bool) -> Self {
        Self {
            name: info.name.clone(),
            backend: info.backend,
            device_type: info.device_type,
            timestamps,
        }
    }
}

/// Immutable configuration passed to the renderer at start-up.
///
/// Mirrors the session file merged with CLI overrides: which WGSL program to
/// run, the initial window size, and the state the accumulation controller
/// starts from.
#[derive(Clone)]
pub struct RendererConfig {
    /// Window size in physical pixels.
    pub surface_size: (u32, u32),
    /// WGSL program; the built-in preview scene when `None`.
    pub shader_source: Option<PathBuf>,
    pub options: Options,
    pub camera: CameraBasis,
    pub settings: ControllerSettings,
    /// Begin in continuous mode instead of rendering a single frame.
    pub start_running: bool,
    /// Period of the `render stats` log line; disabled when `None`.
    pub stats_interval: Option<Duration>,
    /// Values the selector keys cycle through.
    pub selector_variants: u32,
    pub gpu_power: GpuPowerPreference,
    pub scene: Arc<dyn SceneSource>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            surface_size: (512, 512),
            shader_source: None,
            options: Options::default(),
            camera: CameraBasis::default(),
            settings: ControllerSettings::default(),
            start_running: false,
            stats_interval: Some(Duration::from_secs(5)),
            selector_variants: BUILTIN_SELECTOR_VARIANTS,
            gpu_power: GpuPowerPreference::default(),
            scene: Arc::new(EmptyScene),
        }
    }
}

impl fmt::Debug for RendererConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RendererConfig")
            .field("surface_size", &self.surface_size)
            .field("shader_source", &self.shader_source)
            .field("options", &self.options)
            .field("camera", &self.camera)
            .field("settings", &self.settings)
            .field("start_running", &self.start_running)
            .field("stats_interval", &self.stats_interval)
            .field("selector_variants", &self.selector_variants)
            .field("gpu_power", &self.gpu_power)
            .field("scene", &self.scene.label())
            .finish()
    }
}
