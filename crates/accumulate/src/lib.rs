//! Progressive sample accumulation.
//!
//! Each tick renders one jittered sample per pixel into an off-screen image
//! and folds it into a running average, so a still scene converges towards
//! its anti-aliased, noise-free appearance the longer it is left alone. Any
//! change to the options, camera, or canvas restarts the average.
//!
//! The crate is backend agnostic: [`AccumulationController`] sequences the
//! work through the [`RenderDevice`] trait. `renderer` implements it on top
//! of wgpu and [`reference::ReferenceDevice`] implements it on the CPU.

pub mod controller;
pub mod device;
pub mod jitter;
pub mod options;
pub mod reference;
pub mod uniforms;

pub use controller::{
    AccumulationController, AccumulationState, AccumulationStrategy, ControllerSettings, RunState,
    TickReport,
};
pub use device::RenderDevice;
pub use jitter::{JitterTable, MAX_SUBDIVS};
pub use options::{
    CameraBasis, Options, TextureEdgeMode, TextureInterpolation, TextureOptions, Viewport,
};
pub use uniforms::{CodecError, UniformBlock, UniformLayout, UniformRecord};
