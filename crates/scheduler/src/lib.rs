//! Repaint-driven render loop.
//!
//! UI code talks to the loop through a cloneable [`LoopHandle`]; the window
//! thread owns the [`RenderLoopScheduler`] and calls [`RenderLoopScheduler::pump`]
//! whenever it is idle and [`RenderLoopScheduler::on_repaint`] from its redraw
//! callback. Repaints are requested through [`RepaintHost`] and at most one
//! request is outstanding at any time.

use std::time::{Duration, Instant};

use accumulate::{
    AccumulationController, CameraBasis, Options, RenderDevice, TickReport, Viewport,
};
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("render loop has shut down")]
    Disconnected,
}

/// Requests delivered to the render loop.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopCommand {
    Start,
    Stop,
    Reset,
    RenderOnce,
    OptionsChanged(Options),
    CameraChanged(CameraBasis),
    Resize(Viewport),
}

/// Whatever can schedule a repaint callback (a window, a test harness).
pub trait RepaintHost {
    fn request_repaint(&mut self);
}

#[derive(Debug, Clone)]
pub struct LoopHandle {
    tx: Sender<LoopCommand>,
}

impl LoopHandle {
    pub fn send(&self, command: LoopCommand) -> Result<(), SchedulerError> {
        self.tx
            .send(command)
            .map_err(|_| SchedulerError::Disconnected)
    }

    pub fn start(&self) -> Result<(), SchedulerError> {
        self.send(LoopCommand::Start)
    }

    pub fn stop(&self) -> Result<(), SchedulerError> {
        self.send(LoopCommand::Stop)
    }

    pub fn reset(&self) -> Result<(), SchedulerError> {
        self.send(LoopCommand::Reset)
    }

    pub fn render_once(&self) -> Result<(), SchedulerError> {
        self.send(LoopCommand::RenderOnce)
    }

    pub fn set_options(&self, options: Options) -> Result<(), SchedulerError> {
        self.send(LoopCommand::OptionsChanged(options))
    }

    pub fn set_camera(&self, camera: CameraBasis) -> Result<(), SchedulerError> {
        self.send(LoopCommand::CameraChanged(camera))
    }

    pub fn resize(&self, viewport: Viewport) -> Result<(), SchedulerError> {
        self.send(LoopCommand::Resize(viewport))
    }
}

/// Counters kept across repaints.
#[derive(Debug, Clone, Default)]
pub struct LoopStats {
    pub ticks: u64,
    pub failures: u64,
    pub last: Option<TickReport>,
}

pub struct RenderLoopScheduler {
    rx: Receiver<LoopCommand>,
    repaint_pending: bool,
    stats: LoopStats,
    stats_interval: Option<Duration>,
    window_start: Instant,
    window_ticks: u64,
}

/// Creates a connected handle/scheduler pair.
pub fn channel() -> (LoopHandle, RenderLoopScheduler) {
    let (tx, rx) = unbounded();
    (
        LoopHandle { tx },
        RenderLoopScheduler {
            rx,
            repaint_pending: false,
            stats: LoopStats::default(),
            stats_interval: None,
            window_start: Instant::now(),
            window_ticks: 0,
        },
    )
}

impl RenderLoopScheduler {
    /// Emits a `render stats` debug line at most once per `interval`.
    pub fn with_stats_interval(mut self, interval: Option<Duration>) -> Self {
        self.stats_interval = interval.filter(|interval| !interval.is_zero());
        self
    }

    pub fn is_repaint_pending(&self) -> bool {
        self.repaint_pending
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    /// Requests one repaint unless one is already outstanding.
    ///
    /// Returns whether a new request was issued.
    pub fn schedule_next_tick<H>(&mut self, host: &mut H) -> bool
    where
        H: RepaintHost + ?Sized,
    {
        if self.repaint_pending {
            return false;
        }
        self.repaint_pending = true;
        host.request_repaint();
        true
    }

    /// Applies every queued command and returns how many were handled.
    pub fn pump<D, H>(&mut self, controller: &mut AccumulationController<D>, host: &mut H) -> usize
    where
        D: RenderDevice,
        H: RepaintHost + ?Sized,
    {
        let mut handled = 0;
        loop {
            match self.rx.try_recv() {
                Ok(command) => {
                    self.apply(command, controller);
                    handled += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        if handled > 0 && controller.wants_tick() {
            self.schedule_next_tick(host);
        }
        handled
    }

    /// Repaint callback: renders a frame if one is wanted and keeps the loop
    /// going while the controller is running.
    pub fn on_repaint<D, H>(
        &mut self,
        controller: &mut AccumulationController<D>,
        host: &mut H,
    ) -> Option<TickReport>
    where
        D: RenderDevice,
        H: RepaintHost + ?Sized,
    {
        self.repaint_pending = false;
        let mut report = None;
        if controller.wants_tick() {
            match controller.tick() {
                Ok(tick) => {
                    self.stats.ticks += 1;
                    self.stats.last = Some(tick);
                    self.window_ticks += 1;
                    report = Some(tick);
                }
                Err(err) => {
                    self.stats.failures += 1;
                    tracing::warn!(
                        error = %err,
                        frame = controller.frame_index(),
                        "frame failed; skipping"
                    );
                }
            }
        }
        if controller.is_running() {
            self.schedule_next_tick(host);
        }
        self.log_stats(controller.frame_index());
        report
    }

    fn apply<D: RenderDevice>(
        &mut self,
        command: LoopCommand,
        controller: &mut AccumulationController<D>,
    ) {
        tracing::trace!(?command, "render loop command");
        let result = match command {
            LoopCommand::Start => {
                controller.start();
                Ok(())
            }
            LoopCommand::Stop => {
                controller.stop();
                Ok(())
            }
            LoopCommand::Reset => controller.reset(),
            LoopCommand::RenderOnce => {
                controller.request_render();
                Ok(())
            }
            LoopCommand::OptionsChanged(options) => controller.set_options(options),
            LoopCommand::CameraChanged(camera) => controller.set_camera(camera),
            LoopCommand::Resize(viewport) => controller.resize(viewport),
        };
        if let Err(err) = result {
            tracing::warn!(error = %err, "render loop command failed");
        }
    }

    fn log_stats(&mut self, frame_index: u32) {
        let Some(interval) = self.stats_interval else {
            return;
        };
        let elapsed = self.window_start.elapsed();
        if elapsed < interval {
            return;
        }
        let fps = self.window_ticks as f64 / elapsed.as_secs_f64();
        tracing::debug!(
            fps = format_args!("{fps:.1}"),
            frame = frame_index,
            gpu_ms = self
                .stats
                .last
                .and_then(|tick| tick.gpu_time)
                .map(|time| time.as_secs_f64() * 1000.0),
            failures = self.stats.failures,
            "render stats"
        );
        self.window_start = Instant::now();
        self.window_ticks = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accumulate::reference::ReferenceDevice;
    use accumulate::{ControllerSettings, RunState};
    use glam::Vec3;

    #[derive(Default)]
    struct CountingHost {
        requests: usize,
    }

    impl RepaintHost for CountingHost {
        fn request_repaint(&mut self) {
            self.requests += 1;
        }
    }

    fn controller(max_frames: Option<u32>) -> AccumulationController<ReferenceDevice> {
        AccumulationController::new(
            ReferenceDevice::new(0, |_, _, _| Vec3::ONE),
            Viewport::new(4, 4),
            CameraBasis::default(),
            Options::default(),
            ControllerSettings {
                max_frames,
                seed: Some(2),
                ..Default::default()
            },
        )
        .expect("controller")
    }

    /// Delivers outstanding repaints the way a window event loop would.
    fn drive(
        scheduler: &mut RenderLoopScheduler,
        ctl: &mut AccumulationController<ReferenceDevice>,
        host: &mut CountingHost,
        max_repaints: usize,
    ) -> usize {
        let mut delivered = 0;
        while scheduler.is_repaint_pending() && delivered < max_repaints {
            scheduler.on_repaint(ctl, host);
            delivered += 1;
        }
        delivered
    }

    #[test]
    fn only_one_repaint_outstanding() {
        let (handle, mut scheduler) = channel();
        let mut ctl = controller(None);
        let mut host = CountingHost::default();

        handle.start().unwrap();
        handle.render_once().unwrap();
        handle.reset().unwrap();
        scheduler.pump(&mut ctl, &mut host);
        assert!(!scheduler.schedule_next_tick(&mut host));
        assert_eq!(host.requests, 1);
    }

    #[test]
    fn start_keeps_ticking_until_stop() {
        let (handle, mut scheduler) = channel();
        let mut ctl = controller(None);
        let mut host = CountingHost::default();

        handle.start().unwrap();
        scheduler.pump(&mut ctl, &mut host);
        assert_eq!(drive(&mut scheduler, &mut ctl, &mut host, 5), 5);
        assert_eq!(ctl.frame_index(), 5);

        // The outstanding repaint is still delivered but renders nothing.
        handle.stop().unwrap();
        scheduler.pump(&mut ctl, &mut host);
        assert!(scheduler.is_repaint_pending());
        scheduler.on_repaint(&mut ctl, &mut host);
        assert!(!scheduler.is_repaint_pending());
        assert_eq!(ctl.frame_index(), 5);
        assert_eq!(ctl.run_state(), RunState::Stopped);
    }

    #[test]
    fn options_while_stopped_render_exactly_once() {
        let (handle, mut scheduler) = channel();
        let mut ctl = controller(None);
        let mut host = CountingHost::default();

        handle.render_once().unwrap();
        scheduler.pump(&mut ctl, &mut host);
        drive(&mut scheduler, &mut ctl, &mut host, 10);
        assert_eq!(ctl.frame_index(), 1);

        handle
            .set_options(Options {
                gamma: 2.2,
                ..Options::default()
            })
            .unwrap();
        scheduler.pump(&mut ctl, &mut host);
        assert_eq!(drive(&mut scheduler, &mut ctl, &mut host, 10), 1);
        assert_eq!(ctl.frame_index(), 1);
        assert_eq!(ctl.options().gamma, 2.2);
        assert_eq!(ctl.run_state(), RunState::Stopped);
    }

    #[test]
    fn frame_limit_ends_the_loop() {
        let (handle, mut scheduler) = channel();
        let mut ctl = controller(Some(8));
        let mut host = CountingHost::default();

        handle.start().unwrap();
        scheduler.pump(&mut ctl, &mut host);
        assert_eq!(drive(&mut scheduler, &mut ctl, &mut host, 100), 8);
        assert_eq!(scheduler.stats().ticks, 8);
        assert!(scheduler.stats().last.expect("last tick").reached_limit);
    }

    #[test]
    fn resize_restarts_from_zero() {
        let (handle, mut scheduler) = channel();
        let mut ctl = controller(None);
        let mut host = CountingHost::default();

        handle.start().unwrap();
        scheduler.pump(&mut ctl, &mut host);
        drive(&mut scheduler, &mut ctl, &mut host, 3);
        handle.resize(Viewport::new(8, 2)).unwrap();
        scheduler.pump(&mut ctl, &mut host);
        assert_eq!(ctl.frame_index(), 0);
        assert_eq!(ctl.viewport(), Viewport::new(8, 2));
    }

    #[test]
    fn idle_pump_requests_nothing() {
        let (_handle, mut scheduler) = channel();
        let mut ctl = controller(None);
        let mut host = CountingHost::default();
        assert_eq!(scheduler.pump(&mut ctl, &mut host), 0);
        assert_eq!(host.requests, 0);
        assert!(scheduler.on_repaint(&mut ctl, &mut host).is_none());
    }

    #[test]
    fn send_fails_after_scheduler_drops() {
        let (handle, scheduler) = channel();
        drop(scheduler);
        assert!(matches!(handle.start(), Err(SchedulerError::Disconnected)));
    }
}
