//! CPU implementation of [`RenderDevice`].
//!
//! Mirrors what the device program does with the uniform block: one primary
//! ray per jitter entry per pixel, the per-pixel average folded into the
//! accumulation image as `(prev * f + sample) / (f + 1)`, and a
//! gamma-corrected copy written to the screen buffer. Useful for tests and for
//! headless checks on machines without an adapter.

use std::time::{Duration, Instant};

use glam::{Vec2, Vec3, Vec4};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::device::RenderDevice;
use crate::jitter::JitterTable;
use crate::options::Viewport;
use crate::uniforms::{self, CodecError, UniformLayout, UniformRecord};

#[derive(Debug, thiserror::Error)]
pub enum ReferenceError {
    #[error("image {0} was never created")]
    UnknownImage(usize),
    #[error("{0} called outside begin_frame/submit")]
    NoFrame(&'static str),
    #[error("draw issued before any uniforms were written")]
    MissingUniforms,
    #[error("images differ in size ({0:?} vs {1:?})")]
    SizeMismatch(Viewport, Viewport),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Handle to one CPU image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageId(usize);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrimaryRay {
    pub pixel: [u32; 2],
    pub origin: Vec3,
    pub direction: Vec3,
}

/// Per-sample shading callback: `(ray, uniforms, rng) -> radiance`.
pub type SampleFn = dyn FnMut(&PrimaryRay, &UniformRecord, &mut StdRng) -> Vec3 + Send;

struct Image {
    viewport: Viewport,
    texels: Vec<Vec4>,
}

enum Command {
    Draw { target: ImageId, read: ImageId },
    Copy { source: ImageId, dest: ImageId },
}

pub struct ReferenceDevice {
    program: Box<SampleFn>,
    rng: StdRng,
    images: Vec<Image>,
    uniforms: Option<(Vec<u8>, UniformLayout)>,
    jitter: Vec<Vec2>,
    pending: Option<Vec<Command>>,
    screen: Vec<Vec3>,
    draws: u64,
    last_time: Option<Duration>,
}

impl ReferenceDevice {
    pub fn new<F>(seed: u64, program: F) -> Self
    where
        F: FnMut(&PrimaryRay, &UniformRecord, &mut StdRng) -> Vec3 + Send + 'static,
    {
        Self {
            program: Box::new(program),
            rng: StdRng::seed_from_u64(seed),
            images: Vec::new(),
            uniforms: None,
            jitter: vec![Vec2::ZERO],
            pending: None,
            screen: Vec::new(),
            draws: 0,
            last_time: None,
        }
    }

    /// Texels of `image` in row-major order, top row first.
    pub fn texels(&self, image: &ImageId) -> Option<&[Vec4]> {
        self.images.get(image.0).map(|img| img.texels.as_slice())
    }

    /// Gamma-corrected output of the most recent draw.
    pub fn screen(&self) -> &[Vec3] {
        &self.screen
    }

    pub fn draw_count(&self) -> u64 {
        self.draws
    }

    fn image(&self, id: ImageId) -> Result<&Image, ReferenceError> {
        self.images
            .get(id.0)
            .ok_or(ReferenceError::UnknownImage(id.0))
    }

    fn record(&mut self, command: Command, what: &'static str) -> Result<(), ReferenceError> {
        match self.pending.as_mut() {
            Some(commands) => {
                commands.push(command);
                Ok(())
            }
            None => Err(ReferenceError::NoFrame(what)),
        }
    }

    fn execute_draw(&mut self, target: ImageId, read: ImageId) -> Result<(), ReferenceError> {
        let (bytes, layout) = self
            .uniforms
            .as_ref()
            .ok_or(ReferenceError::MissingUniforms)?;
        let record = uniforms::decode(bytes, *layout)?;

        let viewport = self.image(target)?.viewport;
        let read_viewport = self.image(read)?.viewport;
        if viewport != read_viewport {
            return Err(ReferenceError::SizeMismatch(viewport, read_viewport));
        }
        let previous = self.image(read)?.texels.clone();

        let frame = record.frame_index as f32;
        let gamma = if record.gamma > 0.0 { record.gamma } else { 1.0 };
        let mut texels = Vec::with_capacity(viewport.pixel_count());
        let mut screen = Vec::with_capacity(viewport.pixel_count());

        for y in 0..viewport.height {
            for x in 0..viewport.width {
                let mut sum = Vec3::ZERO;
                for offset in &self.jitter {
                    let ray = primary_ray(&record, viewport, x, y, *offset);
                    sum += (self.program)(&ray, &record, &mut self.rng);
                }
                let sample = sum / self.jitter.len() as f32;
                let index = (y * viewport.width + x) as usize;
                let prev = previous[index].truncate();
                let average = (prev * frame + sample) / (frame + 1.0);
                texels.push(average.extend(1.0));
                screen.push(average.max(Vec3::ZERO).powf(1.0 / gamma));
            }
        }

        self.images[target.0].texels = texels;
        self.screen = screen;
        self.draws += 1;
        Ok(())
    }

    fn execute_copy(&mut self, source: ImageId, dest: ImageId) -> Result<(), ReferenceError> {
        let texels = self.image(source)?.texels.clone();
        let source_viewport = self.image(source)?.viewport;
        let dest_viewport = self.image(dest)?.viewport;
        if source_viewport != dest_viewport {
            return Err(ReferenceError::SizeMismatch(source_viewport, dest_viewport));
        }
        self.images[dest.0].texels = texels;
        Ok(())
    }
}

fn primary_ray(record: &UniformRecord, viewport: Viewport, x: u32, y: u32, jitter: Vec2) -> PrimaryRay {
    let ndc = Vec2::new(
        (x as f32 + 0.5) / viewport.width as f32 * 2.0 - 1.0,
        1.0 - (y as f32 + 0.5) / viewport.height as f32 * 2.0,
    );
    let plane = Vec2::new(ndc.x * record.aspect * 0.5, ndc.y * 0.5) + jitter;
    let direction = (plane.x * record.basis_x
        + plane.y * record.basis_y
        + record.camera_constant * record.view_dir)
        .normalize_or_zero();
    PrimaryRay {
        pixel: [x, y],
        origin: record.eye,
        direction,
    }
}

impl RenderDevice for ReferenceDevice {
    type Image = ImageId;
    type Error = ReferenceError;

    fn create_image(
        &mut self,
        viewport: Viewport,
        _label: &'static str,
    ) -> Result<ImageId, ReferenceError> {
        self.images.push(Image {
            viewport,
            texels: vec![Vec4::ZERO; viewport.pixel_count()],
        });
        Ok(ImageId(self.images.len() - 1))
    }

    fn write_uniforms(&mut self, block: &uniforms::UniformBlock) -> Result<(), ReferenceError> {
        self.uniforms = Some((block.as_bytes().to_vec(), block.layout()));
        Ok(())
    }

    fn write_jitter(&mut self, table: &JitterTable) -> Result<(), ReferenceError> {
        self.jitter = table.offsets().iter().map(|o| Vec2::from_array(*o)).collect();
        if self.jitter.is_empty() {
            self.jitter.push(Vec2::ZERO);
        }
        Ok(())
    }

    fn clear_image(&mut self, image: &ImageId) -> Result<(), ReferenceError> {
        let img = self
            .images
            .get_mut(image.0)
            .ok_or(ReferenceError::UnknownImage(image.0))?;
        img.texels.fill(Vec4::ZERO);
        Ok(())
    }

    fn begin_frame(&mut self) -> Result<(), ReferenceError> {
        self.pending = Some(Vec::new());
        Ok(())
    }

    fn draw(&mut self, target: &ImageId, accumulated: &ImageId) -> Result<(), ReferenceError> {
        self.record(
            Command::Draw {
                target: *target,
                read: *accumulated,
            },
            "draw",
        )
    }

    fn copy_image(&mut self, source: &ImageId, dest: &ImageId) -> Result<(), ReferenceError> {
        self.record(
            Command::Copy {
                source: *source,
                dest: *dest,
            },
            "copy_image",
        )
    }

    fn submit(&mut self) -> Result<(), ReferenceError> {
        let commands = self.pending.take().ok_or(ReferenceError::NoFrame("submit"))?;
        let started = Instant::now();
        for command in commands {
            match command {
                Command::Draw { target, read } => self.execute_draw(target, read)?,
                Command::Copy { source, dest } => self.execute_copy(source, dest)?,
            }
        }
        self.last_time = Some(started.elapsed());
        Ok(())
    }

    fn abort_frame(&mut self) {
        self.pending = None;
    }

    fn take_gpu_time(&mut self) -> Option<Duration> {
        self.last_time.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{CameraBasis, Options};
    use crate::uniforms::encode;

    fn constant(value: f32) -> ReferenceDevice {
        ReferenceDevice::new(0, move |_, _, _| Vec3::splat(value))
    }

    #[test]
    fn draw_outside_frame_is_rejected() {
        let mut device = constant(1.0);
        let viewport = Viewport::new(2, 2);
        let a = device.create_image(viewport, "a").expect("image");
        let b = device.create_image(viewport, "b").expect("image");
        assert!(matches!(
            device.draw(&a, &b),
            Err(ReferenceError::NoFrame("draw"))
        ));
    }

    #[test]
    fn draw_without_uniforms_fails_on_submit() {
        let mut device = constant(1.0);
        let viewport = Viewport::new(2, 2);
        let a = device.create_image(viewport, "a").expect("image");
        let b = device.create_image(viewport, "b").expect("image");
        device.begin_frame().expect("begin");
        device.draw(&a, &b).expect("record");
        assert!(matches!(
            device.submit(),
            Err(ReferenceError::MissingUniforms)
        ));
    }

    #[test]
    fn screen_applies_gamma() {
        let mut device = constant(0.25);
        let viewport = Viewport::new(3, 2);
        let a = device.create_image(viewport, "a").expect("image");
        let b = device.create_image(viewport, "b").expect("image");
        let options = Options {
            gamma: 2.0,
            ..Options::default()
        };
        device
            .write_uniforms(&encode(&options, &CameraBasis::default(), viewport, 0))
            .expect("uniforms");
        device.begin_frame().expect("begin");
        device.draw(&a, &b).expect("draw");
        device.submit().expect("submit");

        let texels = device.texels(&a).expect("texels");
        assert!(texels.iter().all(|t| (t.x - 0.25).abs() < 1e-6));
        assert!(device.screen().iter().all(|s| (s.x - 0.5).abs() < 1e-6));
        assert_eq!(device.draw_count(), 1);
    }

    #[test]
    fn aborted_frame_is_discarded() {
        let mut device = constant(1.0);
        let viewport = Viewport::new(1, 1);
        let a = device.create_image(viewport, "a").expect("image");
        let b = device.create_image(viewport, "b").expect("image");
        device.begin_frame().expect("begin");
        device.copy_image(&a, &b).expect("copy");
        device.abort_frame();
        assert!(device.submit().is_err());
    }

    #[test]
    fn center_pixel_looks_down_view_direction() {
        let viewport = Viewport::new(1, 1);
        let record = crate::uniforms::UniformRecord::new(
            &Options::default(),
            &CameraBasis::default(),
            viewport,
            0,
        );
        let ray = primary_ray(&record, viewport, 0, 0, Vec2::ZERO);
        assert!((ray.direction - Vec3::NEG_Z).length() < 1e-6);
        assert_eq!(ray.origin, CameraBasis::default().eye);
    }
}
