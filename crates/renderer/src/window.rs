use std::sync::Arc;

use accumulate::{AccumulationController, TickReport, Viewport};
use anyhow::{anyhow, Context, Result};
use scheduler::{LoopCommand, LoopHandle, RepaintHost};
use tracing::{debug, info, warn};
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, Event, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowBuilder};

use crate::controls::{Control, PreviewControls};
use crate::gpu::GpuState;
use crate::types::RendererConfig;

const WINDOW_TITLE: &str = "pathview";

/// Repaints are winit redraw requests.
struct WindowHost {
    window: Arc<Window>,
}

impl RepaintHost for WindowHost {
    fn request_repaint(&mut self) {
        self.window.request_redraw();
    }
}

pub(crate) fn run_window(config: RendererConfig) -> Result<()> {
    let event_loop =
        EventLoop::new().map_err(|err| anyhow!("failed to create event loop: {err}"))?;

    let window_size = PhysicalSize::new(config.surface_size.0, config.surface_size.1);
    let window = WindowBuilder::new()
        .with_title(WINDOW_TITLE)
        .with_inner_size(window_size)
        .build(&event_loop)
        .map_err(|err| anyhow!("failed to create preview window: {err}"))?;
    let window = Arc::new(window);

    let gpu = GpuState::new(window.as_ref(), window.inner_size(), &config)
        .context("failed to initialise window renderer")?;
    let surface = gpu.surface_size();
    let mut controller = AccumulationController::new(
        gpu,
        Viewport::new(surface.width, surface.height),
        config.camera,
        config.options.clone(),
        config.settings,
    )
    .context("failed to create accumulation images")?;

    let (handle, scheduler) = scheduler::channel();
    let mut scheduler = scheduler.with_stats_interval(config.stats_interval);
    let mut host = WindowHost {
        window: window.clone(),
    };
    let mut controls = PreviewControls::new(config.options.clone(), config.selector_variants);

    if config.start_running {
        handle.start()?;
    } else {
        handle.render_once()?;
    }
    info!(
        width = surface.width,
        height = surface.height,
        running = config.start_running,
        "preview window ready"
    );

    let run_result = event_loop.run(move |event, elwt| {
        elwt.set_control_flow(ControlFlow::Wait);
        match event {
            Event::WindowEvent { window_id, event } if window_id == window.id() => match event {
                WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                    elwt.exit();
                }
                WindowEvent::Resized(new_size) => {
                    if new_size.width == 0 || new_size.height == 0 {
                        return;
                    }
                    controller.device_mut().resize_surface(new_size);
                    forward(
                        &handle,
                        LoopCommand::Resize(Viewport::new(new_size.width, new_size.height)),
                    );
                }
                WindowEvent::KeyboardInput { event, .. } => {
                    if event.state != ElementState::Pressed || event.repeat {
                        return;
                    }
                    if matches!(event.logical_key, Key::Named(NamedKey::Escape)) {
                        elwt.exit();
                        return;
                    }
                    let Some(control) = control_for_key(&event.logical_key) else {
                        return;
                    };
                    if let Some(command) = controls.apply(control, controller.is_running()) {
                        forward(&handle, command);
                    }
                }
                WindowEvent::RedrawRequested => {
                    // A resize may have queued while this redraw was in flight.
                    scheduler.pump(&mut controller, &mut host);
                    if let Some(report) = scheduler.on_repaint(&mut controller, &mut host) {
                        window.set_title(&title_for(&report, controller.is_running()));
                    }
                }
                _ => {}
            },
            Event::AboutToWait => {
                scheduler.pump(&mut controller, &mut host);
            }
            _ => {}
        }
    });

    run_result.map_err(|err| anyhow!("window event loop error: {err}"))
}

fn forward(handle: &LoopHandle, command: LoopCommand) {
    debug!(?command, "forwarding input");
    if let Err(err) = handle.send(command) {
        warn!(error = %err, "dropping input");
    }
}

/// Preview key bindings.
///
/// | key          | control                         |
/// |--------------|---------------------------------|
/// | Space        | start / stop continuous render  |
/// | Enter        | render one frame                |
/// | `r`          | reset accumulation              |
/// | `g` / `G`    | gamma up / down                 |
/// | Up / Down    | zoom in / out                   |
/// | `]` / `[`    | more / fewer subpixels          |
/// | `1`-`9`      | cycle shading of object 1-9     |
/// | `b`          | background                      |
/// | `t`          | texture                         |
/// | `e`          | texture edge mode               |
/// | `f`          | texture filtering               |
fn control_for_key(key: &Key) -> Option<Control> {
    match key {
        Key::Named(NamedKey::Space) => Some(Control::ToggleRun),
        Key::Named(NamedKey::Enter) => Some(Control::RenderOnce),
        Key::Named(NamedKey::ArrowUp) => Some(Control::ZoomIn),
        Key::Named(NamedKey::ArrowDown) => Some(Control::ZoomOut),
        Key::Character(text) => {
            let mut chars = text.chars();
            let ch = chars.next()?;
            if chars.next().is_some() {
                return None;
            }
            match ch {
                ' ' => Some(Control::ToggleRun),
                'r' | 'R' => Some(Control::Reset),
                'g' => Some(Control::GammaUp),
                'G' => Some(Control::GammaDown),
                ']' => Some(Control::MoreSubpixels),
                '[' => Some(Control::FewerSubpixels),
                'b' | 'B' => Some(Control::ToggleBackground),
                't' | 'T' => Some(Control::ToggleTexture),
                'e' | 'E' => Some(Control::ToggleEdgeMode),
                'f' | 'F' => Some(Control::ToggleInterpolation),
                '1'..='9' => Some(Control::CycleSelector(ch as usize - '1' as usize)),
                _ => None,
            }
        }
        _ => None,
    }
}

fn title_for(report: &TickReport, running: bool) -> String {
    let mut title = format!("{WINDOW_TITLE}: {} frames", report.accumulated);
    if let Some(gpu_time) = report.gpu_time {
        title.push_str(&format!(", {:.2} ms", gpu_time.as_secs_f64() * 1000.0));
    }
    if !running {
        title.push_str(" (paused)");
    }
    title
}
