//! Stratified sub-pixel jitter tables.
//!
//! A pixel footprint is split into a `subdivs × subdivs` grid and one random
//! offset is drawn inside every cell. The device program reads the table as a
//! fixed-size array sized for [`MAX_SUBDIVS`], so callers always upload
//! [`JitterTable::to_device_bytes`] and the tail past `subdivs²` entries is
//! ignored.

use rand::Rng;

/// Largest grid resolution the device-side table can hold.
pub const MAX_SUBDIVS: u32 = 10;

/// Number of `(dx, dy)` pairs the device-side table reserves.
pub const DEVICE_CAPACITY: usize = (MAX_SUBDIVS * MAX_SUBDIVS) as usize;

/// Byte size of the device-side jitter buffer.
pub const DEVICE_BYTES: usize = DEVICE_CAPACITY * 2 * std::mem::size_of::<f32>();

#[derive(Debug, Clone, PartialEq)]
pub struct JitterTable {
    subdivs: u32,
    pixel_size: f32,
    offsets: Vec<[f32; 2]>,
}

impl JitterTable {
    /// Single centred sample, used before the first generation.
    pub fn centered(pixel_size: f32) -> Self {
        Self {
            subdivs: 1,
            pixel_size,
            offsets: vec![[0.0, 0.0]],
        }
    }

    pub fn subdivs(&self) -> u32 {
        self.subdivs
    }

    pub fn pixel_size(&self) -> f32 {
        self.pixel_size
    }

    pub fn offsets(&self) -> &[[f32; 2]] {
        &self.offsets
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Packs the table into the fixed device layout, zero-filling unused slots.
    pub fn to_device_bytes(&self) -> Vec<u8> {
        let mut flat = [0.0f32; DEVICE_CAPACITY * 2];
        for (slot, offset) in flat.chunks_exact_mut(2).zip(&self.offsets) {
            slot.copy_from_slice(offset);
        }
        bytemuck::cast_slice(&flat[..]).to_vec()
    }
}

/// Clamps a requested grid resolution into the supported range.
pub fn clamp_subdivs(subdivs: u32) -> u32 {
    subdivs.clamp(1, MAX_SUBDIVS)
}

/// Generates a stratified table with the thread-local generator.
pub fn generate(pixel_size: f32, subdivs: u32) -> JitterTable {
    generate_with(pixel_size, subdivs, &mut rand::thread_rng())
}

/// Generates a stratified table drawing from `rng`.
///
/// Entries are row-major: entry `i * subdivs + j` lies in grid row `i`,
/// column `j`, with `dx` following the column and `dy` the row.
pub fn generate_with<R>(pixel_size: f32, subdivs: u32, rng: &mut R) -> JitterTable
where
    R: Rng + ?Sized,
{
    if subdivs < 2 {
        return JitterTable::centered(pixel_size);
    }

    let subdivs = clamp_subdivs(subdivs);
    let step = pixel_size / subdivs as f32;
    let half = pixel_size * 0.5;
    let mut offsets = Vec::with_capacity((subdivs * subdivs) as usize);
    for i in 0..subdivs {
        for j in 0..subdivs {
            let dx = (rng.gen::<f32>() + j as f32) * step - half;
            let dy = (rng.gen::<f32>() + i as f32) * step - half;
            offsets.push([dx, dy]);
        }
    }

    JitterTable {
        subdivs,
        pixel_size,
        offsets,
    }
}
