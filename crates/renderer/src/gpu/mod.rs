//! wgpu side of the accumulation renderer.
//!
//! - `context` owns instance/adapter/device/surface wiring and knows how to
//!   reconfigure the swapchain when the window resizes or the surface is lost.
//! - `pipeline` builds the two-target render pipeline and the group 0 layout
//!   every shading program binds against.
//! - `scene` uploads mesh and acceleration arrays into their storage slots.
//! - `timing` reads back timestamp queries around the accumulation pass.
//! - `state` glues everything together as [`GpuState`], the
//!   [`accumulate::RenderDevice`] the controller drives.

mod context;
pub(crate) mod pipeline;
pub mod scene;
mod state;
mod timing;

pub use state::{DeviceError, GpuImage, GpuState};
