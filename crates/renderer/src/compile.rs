use std::path::Path;

use accumulate::UniformLayout;
use anyhow::{Context, Result};
use wgpu::naga::{self, AddressSpace, ScalarKind, ShaderStage, TypeInner};

use crate::gpu::pipeline::{slot, BUILTIN_SHADER};

pub const VERTEX_ENTRY: &str = "main_vs";
pub const FRAGMENT_ENTRY: &str = "main_fs";

/// WGSL source plus the label used in diagnostics and GPU object names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderProgram {
    pub label: String,
    pub source: String,
}

impl ShaderProgram {
    pub fn builtin() -> Self {
        Self {
            label: "built-in preview".into(),
            source: BUILTIN_SHADER.into(),
        }
    }

    /// Reads `path`, or falls back to the built-in preview program.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::builtin());
        };
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read shader {}", path.display()))?;
        Ok(Self {
            label: path.display().to_string(),
            source,
        })
    }
}

/// What validation found in a program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramSummary {
    /// Group 0 slots the program declares, ascending.
    pub bindings: Vec<u32>,
    /// Whether slot 4 (the running average) is read at all.
    pub reads_accumulation: bool,
    /// Shape of the uniform declared at slot 0, if any.
    pub uniforms: Option<UniformInterface>,
}

/// How the program declares the uniform block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformInterface {
    /// Bytes the bound buffer must cover.
    pub size: u32,
    /// Selector count implied by a `u32` member at the selector offset.
    pub selector_count: Option<usize>,
}

impl ProgramSummary {
    /// Fails when a block with `selector_count` selectors would be too small
    /// for the program or would shift the fields it reads.
    pub fn check_selector_count(&self, selector_count: usize) -> Result<()> {
        let Some(uniforms) = self.uniforms else {
            return Ok(());
        };
        if let Some(declared) = uniforms.selector_count {
            if declared != selector_count {
                anyhow::bail!(
                    "program declares {declared} shader selectors but the session sets {selector_count}"
                );
            }
        }
        let block_len = UniformLayout::new(selector_count).len();
        if block_len < uniforms.size as usize {
            anyhow::bail!(
                "{selector_count} shader selectors give a {block_len}-byte uniform block; the program reads {} bytes",
                uniforms.size
            );
        }
        Ok(())
    }
}

/// Parses and validates a program against the accumulation pipeline's
/// interface without touching a GPU.
pub fn validate_program(program: &ShaderProgram) -> Result<ProgramSummary> {
    let module = naga::front::wgsl::parse_str(&program.source).map_err(|err| {
        anyhow::anyhow!(
            "{} failed to parse:\n{}",
            program.label,
            err.emit_to_string(&program.source)
        )
    })?;

    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|err| {
        anyhow::anyhow!(
            "{} failed validation:\n{}",
            program.label,
            err.emit_to_string(&program.source)
        )
    })?;

    for (name, stage) in [(VERTEX_ENTRY, ShaderStage::Vertex), (FRAGMENT_ENTRY, ShaderStage::Fragment)] {
        let found = module
            .entry_points
            .iter()
            .any(|entry| entry.name == name && entry.stage == stage);
        if !found {
            anyhow::bail!("{} has no {stage:?} entry point named `{name}`", program.label);
        }
    }

    let mut bindings = Vec::new();
    let mut uniforms = None;
    for (_, global) in module.global_variables.iter() {
        let Some(binding) = &global.binding else {
            continue;
        };
        if binding.group == 0
            && binding.binding == slot::UNIFORMS
            && global.space == AddressSpace::Uniform
        {
            uniforms = Some(uniform_interface(&module, global.ty));
        }
        if binding.group != 0 || binding.binding > slot::LIGHT_INDICES {
            anyhow::bail!(
                "{} declares @group({}) @binding({}), only group 0 slots 0-{} exist",
                program.label,
                binding.group,
                binding.binding,
                slot::LIGHT_INDICES
            );
        }
        bindings.push(binding.binding);
    }
    bindings.sort_unstable();
    bindings.dedup();

    Ok(ProgramSummary {
        reads_accumulation: bindings.contains(&slot::ACCUMULATED),
        bindings,
        uniforms,
    })
}

fn uniform_interface(module: &naga::Module, ty: naga::Handle<naga::Type>) -> UniformInterface {
    let inner = &module.types[ty].inner;
    let selectors_offset = UniformLayout::new(0).selectors_offset() as u32;
    let selector_count = match inner {
        TypeInner::Struct { members, .. } => members
            .iter()
            .find(|member| member.offset == selectors_offset)
            .and_then(|member| match &module.types[member.ty].inner {
                TypeInner::Scalar(scalar) if scalar.kind == ScalarKind::Uint => Some(1),
                TypeInner::Vector { size, scalar } if scalar.kind == ScalarKind::Uint => {
                    Some(*size as usize)
                }
                _ => None,
            }),
        _ => None,
    };
    UniformInterface {
        size: inner.size(module.to_ctx()),
        selector_count,
    }
}
