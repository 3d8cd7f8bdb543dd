use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Number of shader selectors carried by default (plane, triangle, sphere).
pub const DEFAULT_SELECTOR_COUNT: usize = 3;

/// How the device program addresses texture coordinates outside `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextureEdgeMode {
    #[default]
    Repeat,
    Clamp,
}

impl TextureEdgeMode {
    pub fn as_u32(self) -> u32 {
        match self {
            TextureEdgeMode::Repeat => 0,
            TextureEdgeMode::Clamp => 1,
        }
    }

    pub fn from_u32(value: u32) -> Self {
        if value == 1 {
            TextureEdgeMode::Clamp
        } else {
            TextureEdgeMode::Repeat
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextureInterpolation {
    Nearest,
    #[default]
    Linear,
}

impl TextureInterpolation {
    pub fn as_u32(self) -> u32 {
        match self {
            TextureInterpolation::Nearest => 0,
            TextureInterpolation::Linear => 1,
        }
    }

    pub fn from_u32(value: u32) -> Self {
        if value == 0 {
            TextureInterpolation::Nearest
        } else {
            TextureInterpolation::Linear
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextureOptions {
    pub enabled: bool,
    pub edge_mode: TextureEdgeMode,
    pub interpolation: TextureInterpolation,
    pub scaling: f32,
}

impl Default for TextureOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            edge_mode: TextureEdgeMode::default(),
            interpolation: TextureInterpolation::default(),
            scaling: 1.0,
        }
    }
}

/// Snapshot of every user-adjustable render parameter.
///
/// The UI layer owns the live values and hands the controller a fresh
/// `Options` whenever something changes; the controller never mutates it.
/// Selector indices are passed through untouched: their meaning (and what
/// happens when one is out of range) belongs to the device program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    pub gamma: f32,
    pub camera_constant: f32,
    pub shader_selectors: Vec<u32>,
    pub subpixel_count: u32,
    pub jitters_per_frame: u32,
    pub background_enabled: bool,
    pub texture: TextureOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            gamma: 1.0,
            camera_constant: 1.0,
            shader_selectors: vec![0; DEFAULT_SELECTOR_COUNT],
            subpixel_count: 1,
            jitters_per_frame: 1,
            background_enabled: false,
            texture: TextureOptions::default(),
        }
    }
}

/// Canvas dimensions in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
        }
    }

    pub fn aspect(&self) -> f32 {
        self.width.max(1) as f32 / self.height.max(1) as f32
    }

    /// Height of one pixel in normalised image-plane units.
    pub fn pixel_size(&self) -> f32 {
        1.0 / self.height.max(1) as f32
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Orthonormal pinhole camera frame handed to the device program.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraBasis {
    pub eye: Vec3,
    pub basis_x: Vec3,
    pub basis_y: Vec3,
    pub view_dir: Vec3,
}

impl CameraBasis {
    /// Builds the frame from an eye point, a look-at point and an up hint.
    ///
    /// Returns `None` when the view direction is degenerate or parallel to `up`.
    pub fn look_at(eye: Vec3, look: Vec3, up: Vec3) -> Option<Self> {
        let view_dir = (look - eye).try_normalize()?;
        let basis_x = view_dir.cross(up).try_normalize()?;
        let basis_y = basis_x.cross(view_dir).try_normalize()?;
        Some(Self {
            eye,
            basis_x,
            basis_y,
            view_dir,
        })
    }
}

impl Default for CameraBasis {
    fn default() -> Self {
        Self {
            eye: Vec3::new(2.0, 1.5, 2.0),
            basis_x: Vec3::X,
            basis_y: Vec3::Y,
            view_dir: Vec3::NEG_Z,
        }
    }
}
