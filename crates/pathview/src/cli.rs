use std::path::PathBuf;

use accumulate::AccumulationStrategy;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "pathview",
    author,
    version,
    about = "Progressive sample-accumulation preview",
    arg_required_else_help = false
)]
pub struct Cli {
    #[command(flatten)]
    pub run: RunArgs,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Parser, Debug, Default)]
pub struct RunArgs {
    /// Session file; defaults to `session.toml` in the config directory.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// WGSL program to render instead of the configured one.
    #[arg(long, value_name = "FILE")]
    pub shader: Option<PathBuf>,

    /// Override the canvas resolution (e.g. `1280x720`).
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_size)]
    pub size: Option<(u32, u32)>,

    /// Jitter grid resolution per axis (1-10).
    #[arg(long, value_name = "N")]
    pub subpixels: Option<u32>,

    /// How finished frames feed the next one: `swap` or `copy`.
    #[arg(long, value_name = "MODE", value_parser = parse_strategy)]
    pub strategy: Option<AccumulationStrategy>,

    /// Stop continuous rendering after this many frames.
    #[arg(long, value_name = "FRAMES")]
    pub max_frames: Option<u32>,

    /// Seed jitter generation for reproducible sample patterns.
    #[arg(long, value_name = "SEED")]
    pub seed: Option<u64>,

    /// Start rendering continuously instead of drawing a single frame.
    #[arg(long)]
    pub running: bool,

    /// Prefer an integrated / low-power adapter.
    #[arg(long)]
    pub low_power: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate a session and its program without opening a window; prints
    /// the resolved session as JSON.
    Check(CheckArgs),
}

#[derive(Parser, Debug)]
pub struct CheckArgs {
    /// Session file to check (takes precedence over `--config`).
    #[arg(value_name = "FILE")]
    pub file: Option<PathBuf>,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_size(value: &str) -> Result<(u32, u32), String> {
    let trimmed = value.trim();
    let (width, height) = trimmed
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("invalid size '{trimmed}'; expected WIDTHxHEIGHT"))?;
    let width: u32 = width
        .trim()
        .parse()
        .map_err(|_| format!("invalid width in '{trimmed}'"))?;
    let height: u32 = height
        .trim()
        .parse()
        .map_err(|_| format!("invalid height in '{trimmed}'"))?;
    if width == 0 || height == 0 {
        return Err(format!("size must be at least 1x1 (got {trimmed})"));
    }
    Ok((width, height))
}

pub fn parse_strategy(value: &str) -> Result<AccumulationStrategy, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "swap" => Ok(AccumulationStrategy::Swap),
        "copy" => Ok(AccumulationStrategy::Copy),
        other => Err(format!("unknown strategy '{other}' (expected swap or copy)")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_accepts_either_separator() {
        assert_eq!(parse_size("1280x720"), Ok((1280, 720)));
        assert_eq!(parse_size(" 64X32 "), Ok((64, 32)));
    }

    #[test]
    fn size_rejects_malformed_values() {
        assert!(parse_size("1280").is_err());
        assert!(parse_size("0x10").is_err());
        assert!(parse_size("widexhigh").is_err());
    }

    #[test]
    fn strategy_names_are_case_insensitive() {
        assert_eq!(parse_strategy("Copy"), Ok(AccumulationStrategy::Copy));
        assert_eq!(parse_strategy("swap"), Ok(AccumulationStrategy::Swap));
        assert!(parse_strategy("blend").is_err());
    }

    #[test]
    fn overrides_parse_before_subcommand() {
        let cli = Cli::try_parse_from([
            "pathview",
            "--size",
            "64x32",
            "--strategy",
            "copy",
            "check",
            "session.toml",
        ])
        .expect("parse");
        assert_eq!(cli.run.size, Some((64, 32)));
        assert_eq!(cli.run.strategy, Some(AccumulationStrategy::Copy));
        let Some(Command::Check(check)) = cli.command else {
            panic!("expected check subcommand");
        };
        assert_eq!(check.file, Some(PathBuf::from("session.toml")));
    }
}
