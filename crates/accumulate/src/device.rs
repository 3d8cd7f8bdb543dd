use std::time::Duration;

use crate::jitter::JitterTable;
use crate::options::Viewport;
use crate::uniforms::UniformBlock;

/// Device-side operations the accumulation controller sequences.
///
/// Calls within one frame arrive in submission order:
/// `write_uniforms`, `begin_frame`, `draw`, optionally `copy_image`, then
/// `submit`. Implementations may record into a command encoder and only hand
/// work to the queue in `submit`; the queue is expected to execute it in that
/// order.
pub trait RenderDevice {
    /// Handle to one off-screen accumulation image.
    type Image;
    type Error: std::error::Error + Send + Sync + 'static;

    fn create_image(
        &mut self,
        viewport: Viewport,
        label: &'static str,
    ) -> Result<Self::Image, Self::Error>;

    /// Replaces the whole uniform buffer contents.
    fn write_uniforms(&mut self, block: &UniformBlock) -> Result<(), Self::Error>;

    fn write_jitter(&mut self, table: &JitterTable) -> Result<(), Self::Error>;

    /// Zeroes an accumulation image outside of any frame.
    fn clear_image(&mut self, image: &Self::Image) -> Result<(), Self::Error>;

    fn begin_frame(&mut self) -> Result<(), Self::Error>;

    /// Renders one sample pass into `target`, reading the running average
    /// from `accumulated`.
    fn draw(&mut self, target: &Self::Image, accumulated: &Self::Image)
        -> Result<(), Self::Error>;

    fn copy_image(&mut self, source: &Self::Image, dest: &Self::Image) -> Result<(), Self::Error>;

    fn submit(&mut self) -> Result<(), Self::Error>;

    /// Drops any partially recorded frame after a failure.
    fn abort_frame(&mut self) {}

    /// Most recent draw duration measured on the device, if timing is
    /// available and a measurement has resolved since the last call.
    fn take_gpu_time(&mut self) -> Option<Duration> {
        None
    }
}
