//! Storage buffers behind binding slots 2, 3 and 5-10.
//!
//! Mesh parsing and spatial index construction live outside this crate; a
//! [`SceneSource`] only has to hand back flat arrays, which are uploaded
//! verbatim. Programs that never touch the mesh (the built-in preview, most
//! procedural scenes) run on [`EmptyScene`].

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use wgpu::util::DeviceExt;

/// Smallest storage binding we create; empty arrays are padded up to this.
const MIN_STORAGE_BYTES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Material {
    pub emission: [f32; 4],
    pub color: [f32; 4],
}

/// Flat mesh arrays as produced by a [`MeshLoader`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MeshData {
    pub positions: Vec<[f32; 4]>,
    pub normals: Vec<[f32; 4]>,
    /// Triangle vertex indices; `w` carries the material index.
    pub indices: Vec<[u32; 4]>,
    pub materials: Vec<Material>,
    /// Triangles whose material emits light.
    pub light_indices: Vec<u32>,
}

/// Acceleration arrays as produced by a [`SpatialIndexBuilder`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpatialIndex {
    /// Scene bounds as `[min, max]`.
    pub aabb: [[f32; 4]; 2],
    pub primitive_ids: Vec<u32>,
    pub tree_nodes: Vec<[u32; 4]>,
    pub split_planes: Vec<f32>,
}

pub trait MeshLoader: Send + Sync {
    fn load(&self, path: &Path, scale: f32, ccw: bool) -> Result<MeshData>;
}

pub trait SpatialIndexBuilder: Send + Sync {
    fn build(&self, mesh: &MeshData) -> Result<SpatialIndex>;
}

/// Host copies of every scene storage buffer, in binding order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SceneData {
    pub attributes: Vec<[f32; 4]>,
    pub indices: Vec<[u32; 4]>,
    pub materials: Vec<[f32; 4]>,
    pub aabb: [[f32; 4]; 2],
    pub primitive_ids: Vec<u32>,
    pub tree_nodes: Vec<[u32; 4]>,
    pub split_planes: Vec<f32>,
    pub light_indices: Vec<u32>,
}

pub trait SceneSource: Send + Sync {
    fn label(&self) -> String;
    fn build(&self) -> Result<SceneData>;
}

/// Zero-length placeholders for every scene slot.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyScene;

impl SceneSource for EmptyScene {
    fn label(&self) -> String {
        "empty".into()
    }

    fn build(&self) -> Result<SceneData> {
        Ok(SceneData::default())
    }
}

/// A mesh file plus the collaborators that turn it into buffers.
pub struct MeshScene<L, B> {
    path: PathBuf,
    scale: f32,
    ccw: bool,
    loader: L,
    builder: B,
}

impl<L, B> MeshScene<L, B>
where
    L: MeshLoader,
    B: SpatialIndexBuilder,
{
    pub fn new(path: impl Into<PathBuf>, loader: L, builder: B) -> Self {
        Self {
            path: path.into(),
            scale: 1.0,
            ccw: true,
            loader,
            builder,
        }
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_winding(mut self, ccw: bool) -> Self {
        self.ccw = ccw;
        self
    }
}

impl<L, B> SceneSource for MeshScene<L, B>
where
    L: MeshLoader,
    B: SpatialIndexBuilder,
{
    fn label(&self) -> String {
        self.path.display().to_string()
    }

    fn build(&self) -> Result<SceneData> {
        let mesh = self
            .loader
            .load(&self.path, self.scale, self.ccw)
            .with_context(|| format!("failed to load mesh {}", self.path.display()))?;
        let index = self
            .builder
            .build(&mesh)
            .with_context(|| format!("failed to index mesh {}", self.path.display()))?;
        tracing::debug!(
            mesh = %self.path.display(),
            vertices = mesh.positions.len(),
            triangles = mesh.indices.len(),
            materials = mesh.materials.len(),
            lights = mesh.light_indices.len(),
            "scene loaded"
        );

        Ok(SceneData {
            attributes: interleave_attributes(&mesh.positions, &mesh.normals)?,
            indices: mesh.indices,
            materials: pack_materials(&mesh.materials),
            aabb: index.aabb,
            primitive_ids: index.primitive_ids,
            tree_nodes: index.tree_nodes,
            split_planes: index.split_planes,
            light_indices: mesh.light_indices,
        })
    }
}

/// Two `vec4` per material: emission, then colour.
pub fn pack_materials(materials: &[Material]) -> Vec<[f32; 4]> {
    materials
        .iter()
        .flat_map(|material| [material.emission, material.color])
        .collect()
}

/// Interleaves position and normal per vertex.
pub fn interleave_attributes(positions: &[[f32; 4]], normals: &[[f32; 4]]) -> Result<Vec<[f32; 4]>> {
    if !normals.is_empty() && normals.len() != positions.len() {
        anyhow::bail!(
            "mesh has {} positions but {} normals",
            positions.len(),
            normals.len()
        );
    }
    Ok(positions
        .iter()
        .enumerate()
        .flat_map(|(index, position)| {
            let normal = normals.get(index).copied().unwrap_or([0.0; 4]);
            [*position, normal]
        })
        .collect())
}

/// Device buffers for every scene slot.
pub(crate) struct SceneBuffers {
    pub attributes: wgpu::Buffer,
    pub indices: wgpu::Buffer,
    pub materials: wgpu::Buffer,
    pub aabb: wgpu::Buffer,
    pub primitive_ids: wgpu::Buffer,
    pub tree_nodes: wgpu::Buffer,
    pub split_planes: wgpu::Buffer,
    pub light_indices: wgpu::Buffer,
}

impl SceneBuffers {
    pub fn upload(device: &wgpu::Device, data: &SceneData) -> Self {
        Self {
            attributes: storage(device, "scene attributes", bytemuck::cast_slice(&data.attributes)),
            indices: storage(device, "scene indices", bytemuck::cast_slice(&data.indices)),
            materials: storage(device, "scene materials", bytemuck::cast_slice(&data.materials)),
            aabb: storage(device, "scene aabb", bytemuck::cast_slice(&data.aabb)),
            primitive_ids: storage(
                device,
                "scene primitive ids",
                bytemuck::cast_slice(&data.primitive_ids),
            ),
            tree_nodes: storage(device, "scene tree nodes", bytemuck::cast_slice(&data.tree_nodes)),
            split_planes: storage(
                device,
                "scene split planes",
                bytemuck::cast_slice(&data.split_planes),
            ),
            light_indices: storage(
                device,
                "scene light indices",
                bytemuck::cast_slice(&data.light_indices),
            ),
        }
    }
}

fn storage(device: &wgpu::Device, label: &str, contents: &[u8]) -> wgpu::Buffer {
    let mut padded = contents.to_vec();
    if padded.len() < MIN_STORAGE_BYTES {
        padded.resize(MIN_STORAGE_BYTES, 0);
    }
    padded.resize(padded.len().next_multiple_of(4), 0);
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: &padded,
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
    })
}
