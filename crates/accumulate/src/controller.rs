//! Progressive accumulation control loop.
//!
//! The device cannot sample an image while it is bound as a render target, so
//! the controller keeps two images: every tick renders into `source` while the
//! device program reads the running average from `dest`, and the result is
//! then made visible to the next tick either by copying `source → dest`
//! ([`AccumulationStrategy::Copy`]) or by swapping the two handles
//! ([`AccumulationStrategy::Swap`]).
//!
//! ```text
//!            start()                 stop()
//!  Stopped ───────────▶ Running ───────────▶ Stopped
//!     │ reset()             ▲
//!     ▼                     │ start()
//!  AwaitingReset ───────────┘
//!     │ tick()
//!     ▼
//!  Stopped
//! ```

use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::device::RenderDevice;
use crate::jitter::{self, JitterTable};
use crate::options::{CameraBasis, Options, Viewport};
use crate::uniforms::{self, UniformBlock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Running,
    /// Accumulation was restarted while stopped; one tick is owed.
    AwaitingReset,
}

/// How a finished tick's image becomes the next tick's readable input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccumulationStrategy {
    /// Copy the freshly written image over the read image after each draw.
    Copy,
    /// Swap which image is written and which is read; no copy is issued.
    #[default]
    Swap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControllerSettings {
    pub strategy: AccumulationStrategy,
    /// Stop continuous rendering once this many frames have accumulated.
    pub max_frames: Option<u32>,
    /// Seed for jitter generation; entropy when absent.
    pub seed: Option<u64>,
}

/// Frame counter plus the two accumulation images.
#[derive(Debug)]
pub struct AccumulationState<I> {
    frame_index: u32,
    source: I,
    dest: I,
}

impl<I> AccumulationState<I> {
    pub fn frame_index(&self) -> u32 {
        self.frame_index
    }

    /// Image the next draw renders into.
    pub fn source(&self) -> &I {
        &self.source
    }

    /// Image holding the latest running average.
    pub fn dest(&self) -> &I {
        &self.dest
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    /// Ordinal the frame was rendered with (0 for the first frame).
    pub frame_index: u32,
    /// Frames accumulated after this tick.
    pub accumulated: u32,
    pub gpu_time: Option<Duration>,
    /// Continuous rendering stopped because the frame limit was reached.
    pub reached_limit: bool,
}

pub struct AccumulationController<D: RenderDevice> {
    device: D,
    state: AccumulationState<D::Image>,
    run_state: RunState,
    single_shot: bool,
    options: Options,
    camera: CameraBasis,
    viewport: Viewport,
    settings: ControllerSettings,
    block: UniformBlock,
    jitter: JitterTable,
    jitter_uploaded: bool,
    rng: StdRng,
    last_gpu_time: Option<Duration>,
}

impl<D: RenderDevice> AccumulationController<D> {
    pub fn new(
        mut device: D,
        viewport: Viewport,
        camera: CameraBasis,
        options: Options,
        settings: ControllerSettings,
    ) -> Result<Self, D::Error> {
        let source = device.create_image(viewport, "accumulation source")?;
        let dest = device.create_image(viewport, "accumulation dest")?;
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let block = uniforms::encode(&options, &camera, viewport, 0);
        debug!(
            width = viewport.width,
            height = viewport.height,
            strategy = ?settings.strategy,
            max_frames = ?settings.max_frames,
            "accumulation controller ready"
        );

        Ok(Self {
            device,
            state: AccumulationState {
                frame_index: 0,
                source,
                dest,
            },
            run_state: RunState::Stopped,
            single_shot: false,
            options,
            camera,
            viewport,
            settings,
            block,
            jitter: JitterTable::centered(viewport.pixel_size()),
            jitter_uploaded: false,
            rng,
            last_gpu_time: None,
        })
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn state(&self) -> &AccumulationState<D::Image> {
        &self.state
    }

    pub fn frame_index(&self) -> u32 {
        self.state.frame_index
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    pub fn is_running(&self) -> bool {
        self.run_state == RunState::Running
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn camera(&self) -> &CameraBasis {
        &self.camera
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    pub fn jitter(&self) -> &JitterTable {
        &self.jitter
    }

    pub fn last_gpu_time(&self) -> Option<Duration> {
        self.last_gpu_time
    }

    /// True when the next repaint should render a frame.
    pub fn wants_tick(&self) -> bool {
        self.is_running() || self.single_shot
    }

    pub fn start(&mut self) {
        if self.run_state != RunState::Running {
            debug!(from = ?self.run_state, frame = self.state.frame_index, "accumulation started");
            self.run_state = RunState::Running;
        }
    }

    pub fn stop(&mut self) {
        if self.run_state == RunState::Running {
            debug!(frame = self.state.frame_index, "accumulation stopped");
            self.run_state = RunState::Stopped;
        }
    }

    /// Asks for one frame while stopped. Ignored while running.
    pub fn request_render(&mut self) {
        if !self.is_running() {
            self.single_shot = true;
        }
    }

    /// Restarts accumulation from frame zero and discards accumulated samples.
    ///
    /// While stopped this owes one tick so the restart becomes visible.
    pub fn reset(&mut self) -> Result<(), D::Error> {
        self.device.clear_image(&self.state.source)?;
        self.device.clear_image(&self.state.dest)?;
        self.state.frame_index = 0;
        if self.run_state != RunState::Running {
            self.run_state = RunState::AwaitingReset;
            self.single_shot = true;
        }
        debug!(state = ?self.run_state, "accumulation reset");
        Ok(())
    }

    /// Installs a new options snapshot and restarts accumulation.
    pub fn set_options(&mut self, options: Options) -> Result<(), D::Error> {
        self.options = options;
        self.reset()
    }

    pub fn set_camera(&mut self, camera: CameraBasis) -> Result<(), D::Error> {
        self.camera = camera;
        self.reset()
    }

    /// Reallocates both images for a new canvas size.
    pub fn resize(&mut self, viewport: Viewport) -> Result<(), D::Error> {
        if viewport == self.viewport {
            return Ok(());
        }
        self.state.source = self.device.create_image(viewport, "accumulation source")?;
        self.state.dest = self.device.create_image(viewport, "accumulation dest")?;
        self.viewport = viewport;
        self.reset()
    }

    /// Renders one frame and folds it into the running average.
    ///
    /// On failure nothing is retried and the frame counter is left unchanged.
    pub fn tick(&mut self) -> Result<TickReport, D::Error> {
        self.refresh_jitter()?;

        let frame_index = self.state.frame_index;
        self.block
            .encode_into(&self.options, &self.camera, self.viewport, frame_index);
        self.device.write_uniforms(&self.block)?;

        if let Err(err) = self.record_frame() {
            self.device.abort_frame();
            return Err(err);
        }

        self.state.frame_index = frame_index.saturating_add(1);
        self.single_shot = false;
        if self.run_state == RunState::AwaitingReset {
            self.run_state = RunState::Stopped;
        }

        let gpu_time = self.device.take_gpu_time();
        if gpu_time.is_some() {
            self.last_gpu_time = gpu_time;
        }

        let mut reached_limit = false;
        if let Some(limit) = self.settings.max_frames {
            if self.is_running() && self.state.frame_index >= limit {
                info!(frames = self.state.frame_index, "frame limit reached; stopping");
                self.run_state = RunState::Stopped;
                reached_limit = true;
            }
        }

        trace!(
            frame = frame_index,
            gpu_ms = gpu_time.map(|time| time.as_secs_f64() * 1000.0),
            "tick"
        );

        Ok(TickReport {
            frame_index,
            accumulated: self.state.frame_index,
            gpu_time,
            reached_limit,
        })
    }

    fn record_frame(&mut self) -> Result<(), D::Error> {
        self.device.begin_frame()?;
        self.device.draw(&self.state.source, &self.state.dest)?;
        if self.settings.strategy == AccumulationStrategy::Copy {
            self.device
                .copy_image(&self.state.source, &self.state.dest)?;
        }
        self.device.submit()?;
        if self.settings.strategy == AccumulationStrategy::Swap {
            std::mem::swap(&mut self.state.source, &mut self.state.dest);
        }
        Ok(())
    }

    fn refresh_jitter(&mut self) -> Result<(), D::Error> {
        let subdivs = jitter::clamp_subdivs(self.options.subpixel_count);
        let pixel_size = self.viewport.pixel_size();
        if self.jitter_uploaded
            && self.jitter.subdivs() == subdivs
            && self.jitter.pixel_size() == pixel_size
        {
            return Ok(());
        }
        let table = jitter::generate_with(pixel_size, subdivs, &mut self.rng);
        self.device.write_jitter(&table)?;
        self.jitter = table;
        self.jitter_uploaded = true;
        debug!(subdivs, pixel_size, "jitter table regenerated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Create(&'static str),
        Uniforms(u32),
        Jitter(u32),
        Clear(usize),
        Begin,
        Draw { target: usize, read: usize },
        Copy { source: usize, dest: usize },
        Submit,
        Abort,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("scripted device failure")]
    struct Failure;

    #[derive(Default)]
    struct RecordingDevice {
        calls: Vec<Call>,
        images: usize,
        fail_draw: bool,
        fail_jitter: bool,
        fail_clear: bool,
        gpu_time: Option<Duration>,
    }

    impl RenderDevice for RecordingDevice {
        type Image = usize;
        type Error = Failure;

        fn create_image(&mut self, _: Viewport, label: &'static str) -> Result<usize, Failure> {
            self.calls.push(Call::Create(label));
            self.images += 1;
            Ok(self.images - 1)
        }

        fn write_uniforms(&mut self, block: &UniformBlock) -> Result<(), Failure> {
            self.calls.push(Call::Uniforms(block.record().frame_index));
            Ok(())
        }

        fn write_jitter(&mut self, table: &JitterTable) -> Result<(), Failure> {
            if std::mem::take(&mut self.fail_jitter) {
                return Err(Failure);
            }
            self.calls.push(Call::Jitter(table.subdivs()));
            Ok(())
        }

        fn clear_image(&mut self, image: &usize) -> Result<(), Failure> {
            if self.fail_clear {
                return Err(Failure);
            }
            self.calls.push(Call::Clear(*image));
            Ok(())
        }

        fn begin_frame(&mut self) -> Result<(), Failure> {
            self.calls.push(Call::Begin);
            Ok(())
        }

        fn draw(&mut self, target: &usize, accumulated: &usize) -> Result<(), Failure> {
            if self.fail_draw {
                return Err(Failure);
            }
            self.calls.push(Call::Draw {
                target: *target,
                read: *accumulated,
            });
            Ok(())
        }

        fn copy_image(&mut self, source: &usize, dest: &usize) -> Result<(), Failure> {
            self.calls.push(Call::Copy {
                source: *source,
                dest: *dest,
            });
            Ok(())
        }

        fn submit(&mut self) -> Result<(), Failure> {
            self.calls.push(Call::Submit);
            Ok(())
        }

        fn abort_frame(&mut self) {
            self.calls.push(Call::Abort);
        }

        fn take_gpu_time(&mut self) -> Option<Duration> {
            self.gpu_time.take()
        }
    }

    fn controller(settings: ControllerSettings) -> AccumulationController<RecordingDevice> {
        AccumulationController::new(
            RecordingDevice::default(),
            Viewport::new(16, 8),
            CameraBasis::default(),
            Options::default(),
            ControllerSettings {
                seed: Some(1),
                ..settings
            },
        )
        .expect("controller")
    }

    fn frame_calls(ctl: &mut AccumulationController<RecordingDevice>) -> Vec<Call> {
        std::mem::take(&mut ctl.device_mut().calls)
    }

    #[test]
    fn starts_stopped_at_frame_zero() {
        let ctl = controller(ControllerSettings::default());
        assert_eq!(ctl.run_state(), RunState::Stopped);
        assert_eq!(ctl.frame_index(), 0);
        assert!(!ctl.wants_tick());
    }

    #[test]
    fn single_shot_ticks_count_exactly() {
        let mut ctl = controller(ControllerSettings::default());
        for expected in 1..=7 {
            ctl.request_render();
            assert!(ctl.wants_tick());
            ctl.tick().expect("tick");
            assert_eq!(ctl.frame_index(), expected);
            assert!(!ctl.wants_tick());
        }
        assert_eq!(ctl.run_state(), RunState::Stopped);
    }

    #[test]
    fn copy_strategy_draws_then_copies() {
        let mut ctl = controller(ControllerSettings {
            strategy: AccumulationStrategy::Copy,
            ..Default::default()
        });
        frame_calls(&mut ctl);

        ctl.tick().expect("first tick");
        assert_eq!(
            frame_calls(&mut ctl),
            vec![
                Call::Jitter(1),
                Call::Uniforms(0),
                Call::Begin,
                Call::Draw { target: 0, read: 1 },
                Call::Copy { source: 0, dest: 1 },
                Call::Submit,
            ]
        );

        ctl.tick().expect("second tick");
        assert_eq!(
            frame_calls(&mut ctl),
            vec![
                Call::Uniforms(1),
                Call::Begin,
                Call::Draw { target: 0, read: 1 },
                Call::Copy { source: 0, dest: 1 },
                Call::Submit,
            ]
        );
    }

    #[test]
    fn swap_strategy_alternates_images() {
        let mut ctl = controller(ControllerSettings::default());
        frame_calls(&mut ctl);

        let mut draws = Vec::new();
        for _ in 0..3 {
            ctl.tick().expect("tick");
            draws.extend(
                frame_calls(&mut ctl)
                    .into_iter()
                    .filter(|call| matches!(call, Call::Draw { .. } | Call::Copy { .. })),
            );
        }
        assert_eq!(
            draws,
            vec![
                Call::Draw { target: 0, read: 1 },
                Call::Draw { target: 1, read: 0 },
                Call::Draw { target: 0, read: 1 },
            ]
        );
        assert_eq!(*ctl.state().dest(), 0);
    }

    #[test]
    fn reset_zeroes_counter_and_clears_images() {
        let mut ctl = controller(ControllerSettings::default());
        ctl.start();
        for _ in 0..5 {
            ctl.tick().expect("tick");
        }
        frame_calls(&mut ctl);

        ctl.reset().expect("reset");
        assert_eq!(ctl.frame_index(), 0);
        assert_eq!(ctl.run_state(), RunState::Running);
        let clears: Vec<_> = frame_calls(&mut ctl);
        assert_eq!(clears.len(), 2);
        assert!(clears.iter().all(|call| matches!(call, Call::Clear(_))));
    }

    #[test]
    fn reset_while_stopped_owes_one_tick() {
        let mut ctl = controller(ControllerSettings::default());
        ctl.request_render();
        ctl.tick().expect("tick");
        ctl.reset().expect("reset");
        assert_eq!(ctl.run_state(), RunState::AwaitingReset);
        assert!(ctl.wants_tick());

        let report = ctl.tick().expect("tick");
        assert_eq!(report.frame_index, 0);
        assert_eq!(ctl.run_state(), RunState::Stopped);
        assert!(!ctl.wants_tick());
    }

    #[test]
    fn stop_while_stopped_is_noop_and_start_is_idempotent() {
        let mut ctl = controller(ControllerSettings::default());
        ctl.stop();
        assert_eq!(ctl.run_state(), RunState::Stopped);
        ctl.start();
        ctl.start();
        assert_eq!(ctl.run_state(), RunState::Running);
        ctl.stop();
        ctl.stop();
        assert_eq!(ctl.run_state(), RunState::Stopped);
    }

    #[test]
    fn start_leaves_awaiting_reset() {
        let mut ctl = controller(ControllerSettings::default());
        ctl.reset().expect("reset");
        ctl.stop();
        assert_eq!(ctl.run_state(), RunState::AwaitingReset);
        ctl.start();
        assert_eq!(ctl.run_state(), RunState::Running);
    }

    #[test]
    fn failed_frame_keeps_counter() {
        let mut ctl = controller(ControllerSettings::default());
        ctl.tick().expect("tick");
        ctl.device_mut().fail_draw = true;
        assert!(ctl.tick().is_err());
        assert_eq!(ctl.frame_index(), 1);
        assert!(ctl.device().calls.contains(&Call::Abort));
    }

    #[test]
    fn frame_limit_stops_continuous_rendering() {
        let mut ctl = controller(ControllerSettings {
            max_frames: Some(3),
            ..Default::default()
        });
        ctl.start();
        let mut reports = Vec::new();
        while ctl.wants_tick() {
            reports.push(ctl.tick().expect("tick"));
        }
        assert_eq!(reports.len(), 3);
        assert!(reports[2].reached_limit);
        assert_eq!(ctl.run_state(), RunState::Stopped);
    }

    #[test]
    fn jitter_follows_subpixel_option() {
        let mut ctl = controller(ControllerSettings::default());
        ctl.tick().expect("tick");
        assert_eq!(ctl.jitter().len(), 1);

        ctl.set_options(Options {
            subpixel_count: 4,
            ..Options::default()
        })
        .expect("options");
        frame_calls(&mut ctl);
        ctl.tick().expect("tick");
        assert_eq!(ctl.jitter().len(), 16);
        assert_eq!(frame_calls(&mut ctl)[0], Call::Jitter(4));

        ctl.tick().expect("tick");
        assert!(!frame_calls(&mut ctl)
            .iter()
            .any(|call| matches!(call, Call::Jitter(_))));
    }

    #[test]
    fn failed_jitter_upload_is_retried_next_tick() {
        let mut ctl = controller(ControllerSettings::default());
        ctl.tick().expect("tick");
        ctl.set_options(Options {
            subpixel_count: 4,
            ..Options::default()
        })
        .expect("options");
        frame_calls(&mut ctl);

        ctl.device_mut().fail_jitter = true;
        assert!(ctl.tick().is_err());
        assert_eq!(ctl.frame_index(), 0);
        assert_eq!(ctl.jitter().subdivs(), 1);

        ctl.tick().expect("retry");
        assert_eq!(frame_calls(&mut ctl)[0], Call::Jitter(4));
        assert_eq!(ctl.jitter().subdivs(), 4);
        assert_eq!(ctl.frame_index(), 1);
    }

    #[test]
    fn failed_clear_keeps_accumulated_frames() {
        let mut ctl = controller(ControllerSettings::default());
        for _ in 0..3 {
            ctl.request_render();
            ctl.tick().expect("tick");
        }
        ctl.device_mut().fail_clear = true;
        assert!(ctl.reset().is_err());
        assert_eq!(ctl.frame_index(), 3);
        assert_eq!(ctl.run_state(), RunState::Stopped);

        ctl.device_mut().fail_clear = false;
        ctl.reset().expect("reset");
        assert_eq!(ctl.frame_index(), 0);
        assert_eq!(ctl.run_state(), RunState::AwaitingReset);
    }

    #[test]
    fn resize_reallocates_and_restarts() {
        let mut ctl = controller(ControllerSettings::default());
        ctl.tick().expect("tick");
        ctl.resize(Viewport::new(32, 32)).expect("resize");
        assert_eq!(ctl.frame_index(), 0);
        assert_eq!(ctl.viewport(), Viewport::new(32, 32));
        assert_eq!(ctl.device().images, 4);
    }

    #[test]
    fn gpu_time_is_recorded_when_available() {
        let mut ctl = controller(ControllerSettings::default());
        let report = ctl.tick().expect("tick");
        assert_eq!(report.gpu_time, None);
        ctl.device_mut().gpu_time = Some(Duration::from_micros(1500));
        let report = ctl.tick().expect("tick");
        assert_eq!(report.gpu_time, Some(Duration::from_micros(1500)));
        ctl.tick().expect("tick");
        assert_eq!(ctl.last_gpu_time(), Some(Duration::from_micros(1500)));
    }
}
