use std::time::Duration;

use accumulate::options::DEFAULT_SELECTOR_COUNT;
use accumulate::{JitterTable, RenderDevice, UniformBlock, UniformLayout, Viewport};
use anyhow::{Context, Result};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use thiserror::Error;
use tracing::{debug, info};
use winit::dpi::PhysicalSize;

use crate::compile::ShaderProgram;
use crate::types::{AdapterProfile, RendererConfig};

use super::context::GpuContext;
use super::pipeline::{jitter_buffer, AccumulationPipeline, ACCUMULATION_FORMAT};
use super::scene::SceneBuffers;
use super::timing::GpuTimer;

/// Bind groups differ only by the image bound at slot 4, and there are two images.
const BIND_GROUP_CACHE: usize = 2;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("surface unavailable: {0}")]
    Surface(#[from] wgpu::SurfaceError),
    #[error("{0} called outside of a frame")]
    NoFrame(&'static str),
    #[error("a frame is already being recorded")]
    FrameInProgress,
    #[error("image is {image:?} but the surface is {surface:?}")]
    SurfaceMismatch {
        image: (u32, u32),
        surface: (u32, u32),
    },
    #[error("cannot copy a {from:?} image into a {to:?} image")]
    CopyMismatch { from: (u32, u32), to: (u32, u32) },
    #[error("{width}x{height} exceeds the device texture limit of {limit}")]
    TooLarge { width: u32, height: u32, limit: u32 },
}

/// One off-screen accumulation target.
#[derive(Debug)]
pub struct GpuImage {
    id: u64,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    size: (u32, u32),
}

impl GpuImage {
    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    fn extent(&self) -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: self.size.0,
            height: self.size.1,
            depth_or_array_layers: 1,
        }
    }
}

struct FrameInFlight {
    encoder: wgpu::CommandEncoder,
    surface: wgpu::SurfaceTexture,
    view: wgpu::TextureView,
}

/// wgpu backend for the accumulation controller.
///
/// Each frame draws into two targets at once: the swapchain image (display
/// colour) and the accumulation image (linear running average).
pub struct GpuState {
    context: GpuContext,
    pipeline: AccumulationPipeline,
    uniforms: wgpu::Buffer,
    uniforms_len: usize,
    jitter: wgpu::Buffer,
    scene: SceneBuffers,
    bind_groups: Vec<(u64, wgpu::BindGroup)>,
    next_image_id: u64,
    timer: GpuTimer,
    frame: Option<FrameInFlight>,
}

impl GpuState {
    pub fn new<T>(target: &T, size: PhysicalSize<u32>, config: &RendererConfig) -> Result<Self>
    where
        T: HasDisplayHandle + HasWindowHandle,
    {
        let context = GpuContext::new(target, size, config.gpu_power)?;

        let program = ShaderProgram::load(config.shader_source.as_deref())?;
        context
            .device
            .push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = AccumulationPipeline::new(
            &context.device,
            context.surface_format,
            &program.source,
            &program.label,
        );
        if let Some(err) = pollster::block_on(context.device.pop_error_scope()) {
            anyhow::bail!("failed to build pipeline for {}: {err}", program.label);
        }

        let scene_data = config
            .scene
            .build()
            .with_context(|| format!("failed to build scene {}", config.scene.label()))?;
        let scene = SceneBuffers::upload(&context.device, &scene_data);

        let uniforms_len = UniformLayout::new(DEFAULT_SELECTOR_COUNT).len();
        let uniforms = uniform_buffer(&context.device, uniforms_len);
        let jitter = jitter_buffer(&context.device);
        let timer = GpuTimer::new(&context.device, &context.queue);

        info!(
            adapter = %context.adapter_profile.name,
            program = %program.label,
            scene = %config.scene.label(),
            timing = timer.is_enabled(),
            "GPU ready"
        );

        Ok(Self {
            context,
            pipeline,
            uniforms,
            uniforms_len,
            jitter,
            scene,
            bind_groups: Vec::with_capacity(BIND_GROUP_CACHE),
            next_image_id: 0,
            timer,
            frame: None,
        })
    }

    pub fn adapter_profile(&self) -> &AdapterProfile {
        &self.context.adapter_profile
    }

    pub fn surface_size(&self) -> PhysicalSize<u32> {
        self.context.size
    }

    /// Reconfigures the swapchain. Accumulation images follow separately
    /// through the controller's resize.
    pub fn resize_surface(&mut self, new_size: PhysicalSize<u32>) {
        self.context.resize(new_size);
    }

    fn acquire(&mut self) -> Result<wgpu::SurfaceTexture, DeviceError> {
        match self.context.surface.get_current_texture() {
            Ok(frame) => Ok(frame),
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                debug!("surface lost or outdated; reconfiguring");
                self.context.reconfigure();
                Ok(self.context.surface.get_current_texture()?)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn bind_group_for(&mut self, image: &GpuImage) -> wgpu::BindGroup {
        if let Some((_, group)) = self.bind_groups.iter().find(|(id, _)| *id == image.id) {
            return group.clone();
        }
        let group = self.pipeline.bind_group(
            &self.context.device,
            &self.uniforms,
            &self.jitter,
            &self.scene,
            &image.view,
        );
        if self.bind_groups.len() >= BIND_GROUP_CACHE {
            self.bind_groups.remove(0);
        }
        self.bind_groups.push((image.id, group.clone()));
        group
    }
}

impl RenderDevice for GpuState {
    type Image = GpuImage;
    type Error = DeviceError;

    fn create_image(
        &mut self,
        viewport: Viewport,
        label: &'static str,
    ) -> Result<GpuImage, DeviceError> {
        let limit = self.context.device.limits().max_texture_dimension_2d;
        if viewport.width > limit || viewport.height > limit {
            return Err(DeviceError::TooLarge {
                width: viewport.width,
                height: viewport.height,
                limit,
            });
        }

        let texture = self.context.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: viewport.width,
                height: viewport.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: ACCUMULATION_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let id = self.next_image_id;
        self.next_image_id += 1;
        debug!(id, label, width = viewport.width, height = viewport.height, "created accumulation image");

        Ok(GpuImage {
            id,
            texture,
            view,
            size: (viewport.width, viewport.height),
        })
    }

    fn write_uniforms(&mut self, block: &UniformBlock) -> Result<(), DeviceError> {
        if block.len() != self.uniforms_len {
            debug!(from = self.uniforms_len, to = block.len(), "resizing uniform buffer");
            self.uniforms = uniform_buffer(&self.context.device, block.len());
            self.uniforms_len = block.len();
            self.bind_groups.clear();
        }
        self.context
            .queue
            .write_buffer(&self.uniforms, 0, block.as_bytes());
        Ok(())
    }

    fn write_jitter(&mut self, table: &JitterTable) -> Result<(), DeviceError> {
        self.context
            .queue
            .write_buffer(&self.jitter, 0, &table.to_device_bytes());
        Ok(())
    }

    fn clear_image(&mut self, image: &GpuImage) -> Result<(), DeviceError> {
        let mut encoder =
            self.context
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("clear accumulation"),
                });
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("clear accumulation"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &image.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
        self.context.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn begin_frame(&mut self) -> Result<(), DeviceError> {
        if self.frame.is_some() {
            return Err(DeviceError::FrameInProgress);
        }
        let surface = self.acquire()?;
        let view = surface
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let encoder =
            self.context
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("accumulation frame"),
                });
        self.frame = Some(FrameInFlight {
            encoder,
            surface,
            view,
        });
        Ok(())
    }

    fn draw(&mut self, target: &GpuImage, accumulated: &GpuImage) -> Result<(), DeviceError> {
        let surface = (self.context.config.width, self.context.config.height);
        if target.size != surface {
            return Err(DeviceError::SurfaceMismatch {
                image: target.size,
                surface,
            });
        }
        if self.frame.is_none() {
            return Err(DeviceError::NoFrame("draw"));
        }

        let bind_group = self.bind_group_for(accumulated);
        let Some(frame) = self.frame.as_mut() else {
            return Err(DeviceError::NoFrame("draw"));
        };
        let mut pass = frame.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("accumulation pass"),
            color_attachments: &[
                Some(wgpu::RenderPassColorAttachment {
                    view: &frame.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                }),
                Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                }),
            ],
            depth_stencil_attachment: None,
            timestamp_writes: self.timer.timestamp_writes(),
            occlusion_query_set: None,
        });
        pass.set_pipeline(&self.pipeline.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(0..4, 0..1);
        Ok(())
    }

    fn copy_image(&mut self, source: &GpuImage, dest: &GpuImage) -> Result<(), DeviceError> {
        if source.size != dest.size {
            return Err(DeviceError::CopyMismatch {
                from: source.size,
                to: dest.size,
            });
        }
        let frame = self
            .frame
            .as_mut()
            .ok_or(DeviceError::NoFrame("copy_image"))?;
        frame.encoder.copy_texture_to_texture(
            source.texture.as_image_copy(),
            dest.texture.as_image_copy(),
            source.extent(),
        );
        Ok(())
    }

    fn submit(&mut self) -> Result<(), DeviceError> {
        let mut frame = self.frame.take().ok_or(DeviceError::NoFrame("submit"))?;
        self.timer.resolve(&mut frame.encoder);
        self.context.queue.submit(Some(frame.encoder.finish()));
        frame.surface.present();
        self.timer.after_submit();
        Ok(())
    }

    fn abort_frame(&mut self) {
        if self.frame.take().is_some() {
            debug!("dropping partially recorded frame");
        }
        self.timer.discard_encoded();
    }

    fn take_gpu_time(&mut self) -> Option<Duration> {
        self.timer.poll(&self.context.device)
    }
}

fn uniform_buffer(device: &wgpu::Device, len: usize) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("accumulation uniforms"),
        size: len as u64,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_describe_sizes() {
        let err = DeviceError::SurfaceMismatch {
            image: (640, 480),
            surface: (800, 600),
        };
        assert_eq!(err.to_string(), "image is (640, 480) but the surface is (800, 600)");
        assert_eq!(
            DeviceError::NoFrame("draw").to_string(),
            "draw called outside of a frame"
        );
    }

    #[test]
    fn default_uniform_buffer_matches_builtin_program() {
        assert_eq!(UniformLayout::new(DEFAULT_SELECTOR_COUNT).len(), 144);
    }
}
