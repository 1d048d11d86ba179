//! 16-bit packed voxels.
//!
//! Bit layout, MSB to LSB: `WWWW MMMMMMM LLLLL` — 4 bits of quantized signed
//! weight, 7 bits of material id, 5 bits of sunlight. The weight maps the
//! packed range 0..=15 linearly onto `[-0.5, +0.5]`; positive weight is solid
//! interior, negative is air, and the zero crossing is the reconstructed
//! surface.

pub const WEIGHT_SHIFT: u16 = 12;
pub const MATERIAL_SHIFT: u16 = 5;

pub const WEIGHT_STEPS: u16 = 15;
pub const MATERIAL_MAX: u8 = 127;
pub const LIGHT_MAX: u8 = 31;

/// Smallest weight bit pattern that counts as solid. `weight_bits >= 8` is
/// the hot-path solidity predicate shared by meshing, lighting and
/// visibility.
pub const SOLID_WEIGHT_BITS: u16 = 8;

pub const WEIGHT_MIN: f32 = -0.5;
pub const WEIGHT_MAX: f32 = 0.5;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Default)]
#[repr(transparent)]
pub struct Voxel(pub u16);

pub const AIR: Voxel = Voxel(0);

impl Voxel {
    /// Pack a weight/material/light triple, saturating each field to its
    /// representable range. Packing is lossy only in weight (step 1/15).
    pub fn pack(weight: f32, material: u8, light: u8) -> Voxel {
        let weight_bits = pack_weight(weight);
        let material = material.min(MATERIAL_MAX) as u16;
        let light = light.min(LIGHT_MAX) as u16;
        Voxel(weight_bits << WEIGHT_SHIFT | material << MATERIAL_SHIFT | light)
    }

    pub fn unpack(self) -> (f32, u8, u8) {
        (self.weight(), self.material(), self.light())
    }

    #[inline(always)]
    pub fn bits(self) -> u16 {
        self.0
    }

    #[inline(always)]
    pub fn weight_bits(self) -> u16 {
        self.0 >> WEIGHT_SHIFT
    }

    #[inline(always)]
    pub fn weight(self) -> f32 {
        unpack_weight(self.weight_bits())
    }

    #[inline(always)]
    pub fn material(self) -> u8 {
        (self.0 >> MATERIAL_SHIFT & MATERIAL_MAX as u16) as u8
    }

    #[inline(always)]
    pub fn light(self) -> u8 {
        (self.0 & LIGHT_MAX as u16) as u8
    }

    #[inline(always)]
    pub fn is_solid(self) -> bool {
        self.weight_bits() >= SOLID_WEIGHT_BITS
    }

    #[must_use]
    pub fn with_weight(self, weight: f32) -> Voxel {
        Voxel(self.0 & !(WEIGHT_STEPS << WEIGHT_SHIFT) | pack_weight(weight) << WEIGHT_SHIFT)
    }

    #[must_use]
    pub fn with_material(self, material: u8) -> Voxel {
        let material = material.min(MATERIAL_MAX) as u16;
        Voxel(self.0 & !((MATERIAL_MAX as u16) << MATERIAL_SHIFT) | material << MATERIAL_SHIFT)
    }

    #[must_use]
    pub fn with_light(self, light: u8) -> Voxel {
        Voxel(self.0 & !(LIGHT_MAX as u16) | light.min(LIGHT_MAX) as u16)
    }
}

impl From<u16> for Voxel {
    fn from(bits: u16) -> Self {
        Voxel(bits)
    }
}

fn pack_weight(weight: f32) -> u16 {
    let clamped = weight.max(WEIGHT_MIN).min(WEIGHT_MAX);
    ((clamped - WEIGHT_MIN) * WEIGHT_STEPS as f32).round() as u16
}

fn unpack_weight(bits: u16) -> f32 {
    bits as f32 / WEIGHT_STEPS as f32 + WEIGHT_MIN
}
