//! Host/device parameter block.
//!
//! The byte layout below is a contract with the shading program; both sides
//! must change together.
//!
//! ```text
//! offset  field
//!      0  aspect, camera_constant, gamma, texture_scaling        f32 x4
//!     16  texture_enabled, texture_edge_mode, interpolation, 0   u32 x4
//!     32  eye.xyz, pad                                           f32 x4
//!     48  basis_x.xyz, pad                                       f32 x4
//!     64  basis_y.xyz, pad                                       f32 x4
//!     80  view_dir.xyz, pad                                      f32 x4
//!     96  shader_selectors[n], frame_index, subpixel_count,
//!         canvas_width, canvas_height, jitters_per_frame,
//!         background_enabled, zero pad to a 16 byte multiple     u32 x (n+6+pad)
//! ```

use glam::Vec3;

use crate::options::{
    CameraBasis, Options, TextureEdgeMode, TextureInterpolation, TextureOptions, Viewport,
};

/// Minimum addressable alignment unit of a uniform binding.
pub const BLOCK_ALIGNMENT: usize = 16;

const WORD: usize = std::mem::size_of::<u32>();
const SCALARS_OFFSET: usize = 0;
const FLAGS_OFFSET: usize = 16;
const EYE_OFFSET: usize = 32;
const BASIS_X_OFFSET: usize = 48;
const BASIS_Y_OFFSET: usize = 64;
const VIEW_DIR_OFFSET: usize = 80;
const TAIL_OFFSET: usize = 96;
/// Counters following the selectors in the tail group.
const TAIL_COUNTERS: usize = 6;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("uniform block is {actual} bytes; layout with {selectors} selectors expects {expected}")]
    Length {
        actual: usize,
        expected: usize,
        selectors: usize,
    },
}

/// Byte offsets for a block carrying `selector_count` shader selectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformLayout {
    selector_count: usize,
}

impl UniformLayout {
    pub fn new(selector_count: usize) -> Self {
        Self { selector_count }
    }

    pub fn selector_count(&self) -> usize {
        self.selector_count
    }

    pub fn selectors_offset(&self) -> usize {
        TAIL_OFFSET
    }

    pub fn frame_index_offset(&self) -> usize {
        TAIL_OFFSET + self.selector_count * WORD
    }

    /// Total block size, padded to [`BLOCK_ALIGNMENT`].
    pub fn len(&self) -> usize {
        let unpadded = TAIL_OFFSET + (self.selector_count + TAIL_COUNTERS) * WORD;
        unpadded.div_ceil(BLOCK_ALIGNMENT) * BLOCK_ALIGNMENT
    }
}

/// Decoded view of a uniform block, field for field.
#[derive(Debug, Clone, PartialEq)]
pub struct UniformRecord {
    pub aspect: f32,
    pub camera_constant: f32,
    pub gamma: f32,
    pub texture: TextureOptions,
    pub eye: Vec3,
    pub basis_x: Vec3,
    pub basis_y: Vec3,
    pub view_dir: Vec3,
    pub shader_selectors: Vec<u32>,
    pub frame_index: u32,
    pub subpixel_count: u32,
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub jitters_per_frame: u32,
    pub background_enabled: bool,
}

impl UniformRecord {
    pub fn new(
        options: &Options,
        camera: &CameraBasis,
        viewport: Viewport,
        frame_index: u32,
    ) -> Self {
        Self {
            aspect: viewport.aspect(),
            camera_constant: options.camera_constant,
            gamma: options.gamma,
            texture: options.texture,
            eye: camera.eye,
            basis_x: camera.basis_x,
            basis_y: camera.basis_y,
            view_dir: camera.view_dir,
            shader_selectors: options.shader_selectors.clone(),
            frame_index,
            subpixel_count: options.subpixel_count,
            canvas_width: viewport.width,
            canvas_height: viewport.height,
            jitters_per_frame: options.jitters_per_frame,
            background_enabled: options.background_enabled,
        }
    }

    pub fn layout(&self) -> UniformLayout {
        UniformLayout::new(self.shader_selectors.len())
    }

    fn write_words(&self, words: &mut [u32]) {
        words.fill(0);
        put_f32x4(
            words,
            SCALARS_OFFSET,
            [
                self.aspect,
                self.camera_constant,
                self.gamma,
                self.texture.scaling,
            ],
        );
        put_u32s(
            words,
            FLAGS_OFFSET,
            &[
                self.texture.enabled as u32,
                self.texture.edge_mode.as_u32(),
                self.texture.interpolation.as_u32(),
                0,
            ],
        );
        put_vec3(words, EYE_OFFSET, self.eye);
        put_vec3(words, BASIS_X_OFFSET, self.basis_x);
        put_vec3(words, BASIS_Y_OFFSET, self.basis_y);
        put_vec3(words, VIEW_DIR_OFFSET, self.view_dir);
        put_u32s(words, TAIL_OFFSET, &self.shader_selectors);
        put_u32s(
            words,
            self.layout().frame_index_offset(),
            &[
                self.frame_index,
                self.subpixel_count,
                self.canvas_width,
                self.canvas_height,
                self.jitters_per_frame,
                self.background_enabled as u32,
            ],
        );
    }

    fn read_words(words: &[u32], layout: UniformLayout) -> Self {
        let [aspect, camera_constant, gamma, scaling] = get_f32x4(words, SCALARS_OFFSET);
        let flags = get_u32s::<4>(words, FLAGS_OFFSET);
        let selectors_start = layout.selectors_offset() / WORD;
        let shader_selectors =
            words[selectors_start..selectors_start + layout.selector_count()].to_vec();
        let [frame_index, subpixel_count, canvas_width, canvas_height, jitters_per_frame, background] =
            get_u32s::<TAIL_COUNTERS>(words, layout.frame_index_offset());

        Self {
            aspect,
            camera_constant,
            gamma,
            texture: TextureOptions {
                enabled: flags[0] != 0,
                edge_mode: TextureEdgeMode::from_u32(flags[1]),
                interpolation: TextureInterpolation::from_u32(flags[2]),
                scaling,
            },
            eye: get_vec3(words, EYE_OFFSET),
            basis_x: get_vec3(words, BASIS_X_OFFSET),
            basis_y: get_vec3(words, BASIS_Y_OFFSET),
            view_dir: get_vec3(words, VIEW_DIR_OFFSET),
            shader_selectors,
            frame_index,
            subpixel_count,
            canvas_width,
            canvas_height,
            jitters_per_frame,
            background_enabled: background != 0,
        }
    }
}

/// Encoded parameter block, ready for a queue write.
#[derive(Debug, Clone, PartialEq)]
pub struct UniformBlock {
    layout: UniformLayout,
    words: Vec<u32>,
}

impl UniformBlock {
    pub fn from_record(record: &UniformRecord) -> Self {
        let layout = record.layout();
        let mut block = Self {
            layout,
            words: vec![0; layout.len() / WORD],
        };
        record.write_words(&mut block.words);
        block
    }

    /// Re-encodes every field in place. Storage is only reallocated when the
    /// selector count changes.
    pub fn encode_into(
        &mut self,
        options: &Options,
        camera: &CameraBasis,
        viewport: Viewport,
        frame_index: u32,
    ) {
        let record = UniformRecord::new(options, camera, viewport, frame_index);
        let layout = record.layout();
        if layout != self.layout {
            self.layout = layout;
            self.words.resize(layout.len() / WORD, 0);
        }
        record.write_words(&mut self.words);
    }

    pub fn layout(&self) -> UniformLayout {
        self.layout
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.words)
    }

    pub fn len(&self) -> usize {
        self.words.len() * WORD
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn record(&self) -> UniformRecord {
        UniformRecord::read_words(&self.words, self.layout)
    }
}

/// Encodes a full block for one frame.
pub fn encode(
    options: &Options,
    camera: &CameraBasis,
    viewport: Viewport,
    frame_index: u32,
) -> UniformBlock {
    UniformBlock::from_record(&UniformRecord::new(options, camera, viewport, frame_index))
}

/// Decodes raw bytes laid out for `layout`.
pub fn decode(bytes: &[u8], layout: UniformLayout) -> Result<UniformRecord, CodecError> {
    if bytes.len() != layout.len() {
        return Err(CodecError::Length {
            actual: bytes.len(),
            expected: layout.len(),
            selectors: layout.selector_count(),
        });
    }
    let words: Vec<u32> = bytemuck::pod_collect_to_vec(bytes);
    Ok(UniformRecord::read_words(&words, layout))
}

fn put_u32s(words: &mut [u32], offset: usize, values: &[u32]) {
    let start = offset / WORD;
    words[start..start + values.len()].copy_from_slice(values);
}

fn put_f32x4(words: &mut [u32], offset: usize, values: [f32; 4]) {
    put_u32s(words, offset, &values.map(f32::to_bits));
}

fn put_vec3(words: &mut [u32], offset: usize, value: Vec3) {
    put_f32x4(words, offset, value.extend(0.0).to_array());
}

fn get_u32s<const N: usize>(words: &[u32], offset: usize) -> [u32; N] {
    let start = offset / WORD;
    let mut out = [0u32; N];
    out.copy_from_slice(&words[start..start + N]);
    out
}

fn get_f32x4(words: &[u32], offset: usize) -> [f32; 4] {
    get_u32s::<4>(words, offset).map(f32::from_bits)
}

fn get_vec3(words: &[u32], offset: usize) -> Vec3 {
    let [x, y, z, _] = get_f32x4(words, offset);
    Vec3::new(x, y, z)
}
