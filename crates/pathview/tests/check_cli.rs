use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;
use tempfile::TempDir;

const MINIMAL_PROGRAM: &str = r"
@group(0) @binding(0) var<uniform> frame: vec4u;
@group(0) @binding(4) var accumulated: texture_2d<f32>;

@vertex
fn main_vs(@builtin(vertex_index) index: u32) -> @builtin(position) vec4f {
    return vec4f(f32(index & 1u) * 2.0 - 1.0, f32(index >> 1u) * 2.0 - 1.0, 0.0, 1.0);
}

struct Out {
    @location(0) color: vec4f,
    @location(1) average: vec4f,
};

@fragment
fn main_fs(@builtin(position) position: vec4f) -> Out {
    var out: Out;
    out.average = textureLoad(accumulated, vec2u(position.xy), 0) + vec4f(f32(frame.x));
    out.color = out.average;
    return out;
}
";

fn pathview(config_dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_pathview"))
        .env("PATHVIEW_CONFIG_DIR", config_dir)
        .env("RUST_LOG", "warn")
        .args(args)
        .output()
        .expect("failed to run pathview")
}

fn report(output: &Output) -> Value {
    assert!(
        output.status.success(),
        "pathview check failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("check prints JSON")
}

#[test]
fn check_without_session_uses_defaults() {
    let root = TempDir::new().unwrap();

    let report = report(&pathview(root.path(), &["check"]));

    assert_eq!(report["source"], Value::Null);
    assert_eq!(report["session"]["canvas"]["width"], 512);
    assert_eq!(report["session"]["accumulation"]["strategy"], "swap");
    assert_eq!(report["program"]["label"], "built-in preview");
    assert_eq!(report["program"]["bindings"], serde_json::json!([0, 1, 4]));
    assert_eq!(report["program"]["uniform_bytes"], 144);
}

#[test]
fn check_reads_default_session_file() {
    let root = TempDir::new().unwrap();
    fs::write(
        root.path().join("session.toml"),
        "version = 1\n[canvas]\nwidth = 320\nheight = 200\n",
    )
    .unwrap();

    let report = report(&pathview(root.path(), &["check"]));

    assert!(report["source"].as_str().unwrap().ends_with("session.toml"));
    assert_eq!(report["session"]["canvas"]["width"], 320);
    assert_eq!(report["session"]["canvas"]["height"], 200);
}

#[test]
fn command_line_overrides_win() {
    let root = TempDir::new().unwrap();
    let session = root.path().join("custom.toml");
    fs::write(
        &session,
        "version = 1\n[options]\nsubpixel_count = 2\n[accumulation]\nstrategy = \"swap\"\nstats_interval = \"off\"\n",
    )
    .unwrap();

    let report = report(&pathview(
        root.path(),
        &[
            "--size",
            "64x32",
            "--subpixels",
            "4",
            "--strategy",
            "copy",
            "--max-frames",
            "100",
            "check",
            session.to_str().unwrap(),
        ],
    ));

    let session = &report["session"];
    assert_eq!(session["canvas"]["width"], 64);
    assert_eq!(session["canvas"]["height"], 32);
    assert_eq!(session["options"]["subpixel_count"], 4);
    assert_eq!(session["accumulation"]["strategy"], "copy");
    assert_eq!(session["accumulation"]["max_frames"], 100);
    assert_eq!(session["accumulation"]["stats_interval"], "off");
}

#[test]
fn relative_shader_resolves_next_to_session() {
    let root = TempDir::new().unwrap();
    fs::create_dir_all(root.path().join("shaders")).unwrap();
    fs::write(root.path().join("shaders/flat.wgsl"), MINIMAL_PROGRAM).unwrap();
    let session = root.path().join("session.toml");
    fs::write(&session, "version = 1\nshader = \"shaders/flat.wgsl\"\n").unwrap();

    let report = report(&pathview(root.path(), &["check", session.to_str().unwrap()]));

    assert!(report["program"]["label"]
        .as_str()
        .unwrap()
        .ends_with("flat.wgsl"));
    assert_eq!(report["program"]["bindings"], serde_json::json!([0, 4]));
    assert_eq!(report["program"]["reads_accumulation"], true);
}

#[test]
fn invalid_session_fails() {
    let root = TempDir::new().unwrap();
    let session = root.path().join("session.toml");
    fs::write(&session, "version = 2\n").unwrap();

    let output = pathview(root.path(), &["check", session.to_str().unwrap()]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("unsupported config version"));
}

#[test]
fn selector_count_must_match_program() {
    let root = TempDir::new().unwrap();
    let session = root.path().join("session.toml");
    fs::write(&session, "version = 1\n[options]\nshader_selectors = [1]\n").unwrap();

    let output = pathview(root.path(), &["check", session.to_str().unwrap()]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("declares 3 shader selectors"), "{stderr}");
}

#[test]
fn out_of_range_override_fails() {
    let root = TempDir::new().unwrap();

    let output = pathview(root.path(), &["--subpixels", "11", "check"]);

    assert!(!output.status.success());
}

#[test]
fn broken_program_fails() {
    let root = TempDir::new().unwrap();
    let shader = root.path().join("broken.wgsl");
    fs::write(&shader, "fn main_fs( {").unwrap();

    let output = pathview(root.path(), &["--shader", shader.to_str().unwrap(), "check"]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("failed to parse"));
}
