use anyhow::{Context, Result};
use renderer::{validate_program, Renderer, ShaderProgram};
use tracing_subscriber::EnvFilter;

use crate::cli::RunArgs;
use crate::paths::AppPaths;
use crate::session::{self, ResolvedSession};

pub fn run(args: RunArgs) -> Result<()> {
    let paths = AppPaths::discover()?;
    tracing::debug!(config = %paths.config_dir().display(), "resolved pathview paths");

    let session = session::resolve(&args, None, &paths)?;
    log_session(&session);

    // Catch program errors before a window and device exist.
    let program = ShaderProgram::load(session.config.shader.as_deref())?;
    let summary = validate_program(&program)?;
    summary
        .check_selector_count(session.config.options.shader_selectors.len())
        .with_context(|| format!("session does not match {}", program.label))?;
    if !summary.reads_accumulation {
        tracing::warn!(
            program = %program.label,
            "program never reads binding 4; frames will not accumulate"
        );
    }

    let config = session::renderer_config(&session, &args)?;
    let mut renderer = Renderer::new(config);
    renderer.run().context("preview window failed")
}

fn log_session(session: &ResolvedSession) {
    let config = &session.config;
    tracing::info!(
        source = %session
            .source
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "defaults".into()),
        width = config.canvas.width,
        height = config.canvas.height,
        subpixels = config.options.subpixel_count,
        strategy = ?config.accumulation.strategy,
        max_frames = ?config.accumulation.max_frames,
        "starting pathview session"
    );
}

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
