mod cli;
mod paths;
mod run;
mod session;

use std::path::PathBuf;

use anyhow::{Context, Result};
use cli::{Command, RunArgs};
use paths::AppPaths;
use renderer::{validate_program, ShaderProgram};

fn main() -> Result<()> {
    let cli = cli::parse();
    run::initialise_tracing();

    match cli.command {
        Some(Command::Check(check)) => run_check(&cli.run, check.file),
        None => run::run(cli.run),
    }
}

/// Resolves the session and validates its program; nothing touches the GPU.
fn run_check(args: &RunArgs, file: Option<PathBuf>) -> Result<()> {
    let paths = AppPaths::discover()?;
    let session = session::resolve(args, file.as_deref(), &paths)?;
    let program = ShaderProgram::load(session.config.shader.as_deref())?;
    let summary = validate_program(&program)?;
    summary
        .check_selector_count(session.config.options.shader_selectors.len())
        .with_context(|| format!("session does not match {}", program.label))?;

    let report = serde_json::json!({
        "source": session.source.as_ref().map(|path| path.display().to_string()),
        "session": serde_json::to_value(&session.config)?,
        "program": {
            "label": program.label,
            "bindings": summary.bindings,
            "reads_accumulation": summary.reads_accumulation,
            "uniform_bytes": summary.uniforms.map(|uniforms| uniforms.size),
        },
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
