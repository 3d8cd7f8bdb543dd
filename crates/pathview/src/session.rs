use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use renderer::{GpuPowerPreference, RendererConfig};
use sessionconfig::SessionConfig;

use crate::cli::RunArgs;
use crate::paths::AppPaths;

/// Session after file discovery and command-line overrides.
#[derive(Debug, Clone)]
pub struct ResolvedSession {
    pub config: SessionConfig,
    /// File the session was read from; `None` when running on defaults.
    pub source: Option<PathBuf>,
}

/// Loads `explicit`, else `--config`, else the default session file when it
/// exists, then layers the CLI overrides on top.
pub fn resolve(args: &RunArgs, explicit: Option<&Path>, paths: &AppPaths) -> Result<ResolvedSession> {
    let (mut config, source) = match explicit.or(args.config.as_deref()) {
        Some(path) => (
            SessionConfig::load(path)
                .with_context(|| format!("failed to load session {}", path.display()))?,
            Some(path.to_path_buf()),
        ),
        None => {
            let default_file = paths.session_file();
            if default_file.is_file() {
                let config = SessionConfig::load(&default_file).with_context(|| {
                    format!("failed to load session {}", default_file.display())
                })?;
                (config, Some(default_file))
            } else {
                tracing::debug!(
                    path = %default_file.display(),
                    "no session file found; using defaults"
                );
                (SessionConfig::default(), None)
            }
        }
    };

    apply_overrides(&mut config, args);
    config
        .validate()
        .context("session is invalid after command-line overrides")?;
    Ok(ResolvedSession { config, source })
}

pub fn apply_overrides(config: &mut SessionConfig, args: &RunArgs) {
    if let Some(shader) = &args.shader {
        config.shader = Some(shader.clone());
    }
    if let Some((width, height)) = args.size {
        config.canvas.width = width;
        config.canvas.height = height;
    }
    if let Some(subpixels) = args.subpixels {
        config.options.subpixel_count = subpixels;
    }
    if let Some(strategy) = args.strategy {
        config.accumulation.strategy = strategy;
    }
    if let Some(max_frames) = args.max_frames {
        config.accumulation.max_frames = Some(max_frames);
    }
    if let Some(seed) = args.seed {
        config.accumulation.seed = Some(seed);
    }
    if args.running {
        config.accumulation.start_running = true;
    }
}

pub fn renderer_config(session: &ResolvedSession, args: &RunArgs) -> Result<RendererConfig> {
    let config = &session.config;
    Ok(RendererConfig {
        surface_size: (config.canvas.width, config.canvas.height),
        shader_source: config.shader.clone(),
        options: config.options.clone(),
        camera: config.camera_basis()?,
        settings: config.controller_settings(),
        start_running: config.accumulation.start_running,
        stats_interval: config.accumulation.stats_interval,
        gpu_power: if args.low_power {
            GpuPowerPreference::Low
        } else {
            GpuPowerPreference::High
        },
        ..RendererConfig::default()
    })
}

#[cfg(test)]
mod tests {
    use accumulate::AccumulationStrategy;

    use super::*;

    #[test]
    fn overrides_replace_session_values() {
        let mut config = SessionConfig::default();
        let args = RunArgs {
            shader: Some(PathBuf::from("scene.wgsl")),
            size: Some((64, 32)),
            subpixels: Some(4),
            strategy: Some(AccumulationStrategy::Copy),
            max_frames: Some(10),
            seed: Some(7),
            running: true,
            ..RunArgs::default()
        };
        apply_overrides(&mut config, &args);

        assert_eq!(config.shader, Some(PathBuf::from("scene.wgsl")));
        assert_eq!((config.canvas.width, config.canvas.height), (64, 32));
        assert_eq!(config.options.subpixel_count, 4);
        assert_eq!(config.accumulation.strategy, AccumulationStrategy::Copy);
        assert_eq!(config.accumulation.max_frames, Some(10));
        assert_eq!(config.accumulation.seed, Some(7));
        assert!(config.accumulation.start_running);
    }

    #[test]
    fn absent_flags_leave_session_alone() {
        let mut config = SessionConfig::default();
        config.accumulation.start_running = true;
        apply_overrides(&mut config, &RunArgs::default());
        assert_eq!(config, {
            let mut expected = SessionConfig::default();
            expected.accumulation.start_running = true;
            expected
        });
    }

    #[test]
    fn renderer_config_carries_session() {
        let session = ResolvedSession {
            config: SessionConfig::default(),
            source: None,
        };
        let args = RunArgs {
            low_power: true,
            ..RunArgs::default()
        };
        let config = renderer_config(&session, &args).expect("renderer config");
        assert_eq!(config.surface_size, (512, 512));
        assert_eq!(config.gpu_power, GpuPowerPreference::Low);
        assert!(config.shader_source.is_none());
        assert!(!config.start_running);
    }
}
