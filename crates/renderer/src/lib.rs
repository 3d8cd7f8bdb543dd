//! Windowed front end for progressive sample accumulation.
//!
//! The crate glues a `winit` preview window and a `wgpu` device backend to the
//! [`accumulate`] controller and the [`scheduler`] loop. The overall flow is:
//!
//! ```text
//!   pathview CLI
//!          │ RendererConfig
//!          ▼
//!   Renderer::run ──▶ GpuState ──▶ AccumulationController
//!                                        ▲        │ tick()
//!        keys / resize ──▶ LoopHandle ───┘        ▼
//!                          RenderLoopScheduler ◀─ RedrawRequested
//! ```
//!
//! [`GpuState`] implements [`accumulate::RenderDevice`]: every tick draws one
//! full-screen pass that writes the displayed colour to the swapchain and the
//! linear running average to an `Rgba32Float` image, reading the previous
//! average back through binding slot 4. Shading programs are WGSL files with
//! `main_vs`/`main_fs` entry points bound against the group 0 layout in
//! [`slot`]; [`BUILTIN_SHADER`] is used when none is configured.

mod compile;
mod controls;
mod gpu;
mod types;
mod window;

use anyhow::Result;

pub use compile::{
    validate_program, ProgramSummary, ShaderProgram, UniformInterface, FRAGMENT_ENTRY, VERTEX_ENTRY,
};
pub use controls::{Control, PreviewControls};
pub use gpu::pipeline::{slot, BUILTIN_SHADER};
pub use gpu::scene::{
    interleave_attributes, pack_materials, EmptyScene, Material, MeshData, MeshLoader, MeshScene,
    SceneData, SceneSource, SpatialIndex, SpatialIndexBuilder,
};
pub use gpu::{DeviceError, GpuImage, GpuState};
pub use types::{AdapterProfile, GpuPowerPreference, RendererConfig, BUILTIN_SELECTOR_VARIANTS};

/// High-level entry point that owns the chosen configuration.
pub struct Renderer {
    config: RendererConfig,
}

impl Renderer {
    pub fn new(config: RendererConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Opens the preview window and blocks until it is closed.
    ///
    /// Fails before the window appears when the program does not compile or
    /// no adapter can present to the window.
    pub fn run(&mut self) -> Result<()> {
        window::run_window(self.config.clone())
    }
}
