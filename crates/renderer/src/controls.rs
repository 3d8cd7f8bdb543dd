//! Keyboard-driven edits to the live render options.
//!
//! The preview window maps keys to [`Control`]s; [`PreviewControls`] keeps its
//! own copy of the options and turns each control into the loop command that
//! carries the change to the controller.

use accumulate::{Options, TextureEdgeMode, TextureInterpolation, MAX_SUBDIVS};
use scheduler::LoopCommand;

const GAMMA_STEP: f32 = 0.1;
const MIN_GAMMA: f32 = 0.1;
const ZOOM_FACTOR: f32 = 1.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    ToggleRun,
    RenderOnce,
    Reset,
    GammaUp,
    GammaDown,
    ZoomIn,
    ZoomOut,
    MoreSubpixels,
    FewerSubpixels,
    /// Advances the shading variant of one scene object.
    CycleSelector(usize),
    ToggleBackground,
    ToggleTexture,
    ToggleEdgeMode,
    ToggleInterpolation,
}

pub struct PreviewControls {
    options: Options,
    selector_variants: u32,
}

impl PreviewControls {
    pub fn new(options: Options, selector_variants: u32) -> Self {
        Self {
            options,
            selector_variants: selector_variants.max(1),
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Returns the command to forward, or `None` when the control changes nothing.
    pub fn apply(&mut self, control: Control, running: bool) -> Option<LoopCommand> {
        let options = &mut self.options;
        match control {
            Control::ToggleRun if running => return Some(LoopCommand::Stop),
            Control::ToggleRun => return Some(LoopCommand::Start),
            Control::RenderOnce => return Some(LoopCommand::RenderOnce),
            Control::Reset => return Some(LoopCommand::Reset),
            Control::GammaUp => options.gamma += GAMMA_STEP,
            Control::GammaDown => {
                let lowered = (options.gamma - GAMMA_STEP).max(MIN_GAMMA);
                if lowered == options.gamma {
                    return None;
                }
                options.gamma = lowered;
            }
            Control::ZoomIn => options.camera_constant *= ZOOM_FACTOR,
            Control::ZoomOut => options.camera_constant /= ZOOM_FACTOR,
            Control::MoreSubpixels | Control::FewerSubpixels => {
                let current = options.subpixel_count;
                let next = if control == Control::MoreSubpixels {
                    current.saturating_add(1).min(MAX_SUBDIVS)
                } else {
                    current.saturating_sub(1).max(1)
                };
                if next == current {
                    return None;
                }
                options.subpixel_count = next;
            }
            Control::CycleSelector(index) => {
                let selector = options.shader_selectors.get_mut(index)?;
                let variants = self.selector_variants;
                *selector = (*selector % variants + 1) % variants;
            }
            Control::ToggleBackground => options.background_enabled = !options.background_enabled,
            Control::ToggleTexture => options.texture.enabled = !options.texture.enabled,
            Control::ToggleEdgeMode => {
                options.texture.edge_mode = match options.texture.edge_mode {
                    TextureEdgeMode::Repeat => TextureEdgeMode::Clamp,
                    TextureEdgeMode::Clamp => TextureEdgeMode::Repeat,
                };
            }
            Control::ToggleInterpolation => {
                options.texture.interpolation = match options.texture.interpolation {
                    TextureInterpolation::Nearest => TextureInterpolation::Linear,
                    TextureInterpolation::Linear => TextureInterpolation::Nearest,
                };
            }
        }
        Some(LoopCommand::OptionsChanged(self.options.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn changed(command: Option<LoopCommand>) -> Options {
        match command {
            Some(LoopCommand::OptionsChanged(options)) => options,
            other => panic!("expected options change, got {other:?}"),
        }
    }

    #[test]
    fn toggle_run_depends_on_state() {
        let mut controls = PreviewControls::new(Options::default(), 3);
        assert!(matches!(controls.apply(Control::ToggleRun, false), Some(LoopCommand::Start)));
        assert!(matches!(controls.apply(Control::ToggleRun, true), Some(LoopCommand::Stop)));
    }

    #[test]
    fn gamma_never_drops_below_floor() {
        let mut controls = PreviewControls::new(
            Options {
                gamma: 0.15,
                ..Options::default()
            },
            3,
        );
        let options = changed(controls.apply(Control::GammaDown, false));
        assert!((options.gamma - MIN_GAMMA).abs() < 1e-6);
        assert!(controls.apply(Control::GammaDown, false).is_none());
    }

    #[test]
    fn subpixels_stay_in_range() {
        let mut controls = PreviewControls::new(Options::default(), 3);
        assert!(controls.apply(Control::FewerSubpixels, false).is_none());
        for _ in 0..20 {
            controls.apply(Control::MoreSubpixels, false);
        }
        assert_eq!(controls.options().subpixel_count, MAX_SUBDIVS);
        assert!(controls.apply(Control::MoreSubpixels, false).is_none());
    }

    #[test]
    fn selectors_wrap_and_ignore_missing_slots() {
        let mut controls = PreviewControls::new(Options::default(), 3);
        for expected in [1, 2, 0] {
            let options = changed(controls.apply(Control::CycleSelector(2), false));
            assert_eq!(options.shader_selectors[2], expected);
        }
        assert!(controls.apply(Control::CycleSelector(7), false).is_none());
    }

    #[test]
    fn out_of_range_selector_cycles_back_into_range() {
        let options = Options {
            shader_selectors: vec![u32::MAX, 0, 0],
            ..Options::default()
        };
        let mut controls = PreviewControls::new(options, 3);
        let options = changed(controls.apply(Control::CycleSelector(0), false));
        assert_eq!(options.shader_selectors[0], (u32::MAX % 3 + 1) % 3);
        assert!(options.shader_selectors[0] < 3);
    }

    #[test]
    fn zoom_scales_camera_constant() {
        let mut controls = PreviewControls::new(Options::default(), 3);
        controls.apply(Control::ZoomIn, false);
        let options = changed(controls.apply(Control::ZoomOut, false));
        assert!((options.camera_constant - 1.0).abs() < 1e-5);
    }

    #[test]
    fn texture_toggles_flip_flags() {
        let mut controls = PreviewControls::new(Options::default(), 3);
        let before = controls.options().texture;
        let options = changed(controls.apply(Control::ToggleTexture, false));
        assert_ne!(options.texture.enabled, before.enabled);
        let options = changed(controls.apply(Control::ToggleEdgeMode, false));
        assert_ne!(options.texture.edge_mode, before.edge_mode);
        let options = changed(controls.apply(Control::ToggleInterpolation, false));
        assert_ne!(options.texture.interpolation, before.interpolation);
    }
}
