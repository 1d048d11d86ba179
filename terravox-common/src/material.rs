//! The global material registry: per-id color, type and repeat scale,
//! loaded once from a JSON manifest and immutable afterwards. The hot paths
//! (meshing, lighting, visibility) go through the 128-byte type LUT instead
//! of the full entries.

use serde_derive::Deserialize;
use std::{collections::HashMap, fs::File, path::Path, sync::Arc};

use crate::prelude::*;

pub const MATERIAL_SLOTS: usize = 128;

pub const AIR_MATERIAL: u8 = 0;

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MaterialType {
    Solid = 0,
    Transparent = 1,
    Liquid = 2,
}

impl MaterialType {
    pub fn is_opaque(self) -> bool {
        matches!(self, MaterialType::Solid)
    }
}

/// id -> type lookup table; one byte per material slot.
#[derive(Clone)]
pub struct MaterialTypeLut([u8; MATERIAL_SLOTS]);

impl MaterialTypeLut {
    #[inline(always)]
    pub fn material_type(&self, id: u8) -> MaterialType {
        match self.0[id as usize & (MATERIAL_SLOTS - 1)] {
            1 => MaterialType::Transparent,
            2 => MaterialType::Liquid,
            _ => MaterialType::Solid,
        }
    }

    /// Whether a *solid* voxel of this material blocks light completely.
    #[inline(always)]
    pub fn is_opaque(&self, id: u8) -> bool {
        self.material_type(id).is_opaque()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MaterialEntry {
    name: String,
    color: [f32; 3],
    material_type: MaterialType,
    repeat_scale: Option<f32>,
}

pub struct MaterialRegistry {
    entries: Vec<MaterialEntry>,
    name_map: HashMap<String, u8>,
    lut: MaterialTypeLut,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ManifestTypes {
    #[serde(default)]
    solid: Vec<String>,
    #[serde(default)]
    transparent: Vec<String>,
    #[serde(default)]
    liquid: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RegistryManifest {
    materials: Vec<String>,
    colors: Vec<String>,
    types: ManifestTypes,
    #[serde(default)]
    repeat_scale: HashMap<String, f32>,
}

pub fn load_registry<P: AsRef<Path>>(path: P) -> Result<Arc<MaterialRegistry>> {
    let manifest: RegistryManifest = serde_json::from_reader(File::open(path)?)?;
    let registry = MaterialRegistry::from_manifest(manifest)?;
    log::debug!("registered {} materials", registry.len());
    Ok(Arc::new(registry))
}

fn parse_hex_color(hex: &str) -> Result<[f32; 3]> {
    let digits = hex.strip_prefix('#').unwrap_or(hex);
    if digits.len() != 6 {
        bail!("malformed color '{}'", hex);
    }
    let value = u32::from_str_radix(digits, 16)?;
    Ok([
        (value >> 16 & 0xff) as f32 / 255.0,
        (value >> 8 & 0xff) as f32 / 255.0,
        (value & 0xff) as f32 / 255.0,
    ])
}

impl MaterialRegistry {
    fn from_manifest(manifest: RegistryManifest) -> Result<Self> {
        if manifest.materials.len() > MATERIAL_SLOTS {
            bail!(
                "manifest declares {} materials, at most {} are addressable",
                manifest.materials.len(),
                MATERIAL_SLOTS
            );
        }
        if manifest.colors.len() != manifest.materials.len() {
            bail!("manifest color count does not match material count");
        }

        let type_of = |name: &str| {
            if manifest.types.transparent.iter().any(|n| n == name) {
                MaterialType::Transparent
            } else if manifest.types.liquid.iter().any(|n| n == name) {
                MaterialType::Liquid
            } else {
                MaterialType::Solid
            }
        };

        let mut entries = Vec::with_capacity(manifest.materials.len());
        let mut name_map = HashMap::new();
        for (id, name) in manifest.materials.iter().enumerate() {
            name_map.insert(name.clone(), id as u8);
            entries.push(MaterialEntry {
                name: name.clone(),
                color: parse_hex_color(&manifest.colors[id])?,
                // air never renders, but a sensible type keeps the LUT total
                material_type: if id == AIR_MATERIAL as usize {
                    MaterialType::Transparent
                } else {
                    type_of(name)
                },
                repeat_scale: manifest.repeat_scale.get(name).copied(),
            });
        }

        let mut lut = [0u8; MATERIAL_SLOTS];
        for (id, entry) in entries.iter().enumerate() {
            lut[id] = entry.material_type as u8;
        }
        // unregistered slots default to transparent so stray ids never block
        // light or visibility
        for slot in lut.iter_mut().skip(entries.len()) {
            *slot = MaterialType::Transparent as u8;
        }

        Ok(Self {
            entries,
            name_map,
            lut: MaterialTypeLut(lut),
        })
    }

    /// The built-in material set, used by tests and as the fallback when no
    /// manifest is deployed next to the server.
    pub fn with_default_materials() -> Arc<MaterialRegistry> {
        let manifest = RegistryManifest {
            materials: [
                "air", "grass", "dirt", "stone", "sand", "wood", "leaves", "brick", "glass",
                "water",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            colors: [
                "#000000", "#4caf50", "#795548", "#9e9e9e", "#fff59d", "#8d6e63", "#388e3c",
                "#d84315", "#b3e5fc", "#2196f3",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            types: ManifestTypes {
                solid: vec![
                    "grass".into(),
                    "dirt".into(),
                    "stone".into(),
                    "sand".into(),
                    "wood".into(),
                    "brick".into(),
                ],
                transparent: vec!["leaves".into(), "glass".into()],
                liquid: vec!["water".into()],
            },
            repeat_scale: HashMap::new(),
        };
        Arc::new(Self::from_manifest(manifest).expect("built-in manifest is valid"))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_registered(&self, id: u8) -> bool {
        (id as usize) < self.entries.len()
    }

    pub fn id_for_name(&self, name: &str) -> Option<u8> {
        self.name_map.get(name).copied()
    }

    #[inline(always)]
    pub fn material_type(&self, id: u8) -> MaterialType {
        self.lut.material_type(id)
    }

    #[inline(always)]
    pub fn color(&self, id: u8) -> [f32; 3] {
        self.entries[id as usize].color
    }

    #[inline(always)]
    pub fn name(&self, id: u8) -> &str {
        &self.entries[id as usize].name
    }

    #[inline(always)]
    pub fn repeat_scale(&self, id: u8) -> Option<f32> {
        self.entries[id as usize].repeat_scale
    }

    pub fn type_lut(&self) -> &MaterialTypeLut {
        &self.lut
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_types_land_in_the_lut() {
        let registry = MaterialRegistry::with_default_materials();
        let stone = registry.id_for_name("stone").unwrap();
        let glass = registry.id_for_name("glass").unwrap();
        let water = registry.id_for_name("water").unwrap();

        assert_eq!(registry.material_type(stone), MaterialType::Solid);
        assert_eq!(registry.material_type(glass), MaterialType::Transparent);
        assert_eq!(registry.material_type(water), MaterialType::Liquid);

        let lut = registry.type_lut();
        assert!(lut.is_opaque(stone));
        assert!(!lut.is_opaque(glass));
        assert!(!lut.is_opaque(water));
    }

    #[test]
    fn unregistered_slots_never_block_light() {
        let registry = MaterialRegistry::with_default_materials();
        assert!(!registry.is_registered(100));
        assert!(!registry.type_lut().is_opaque(100));
    }

    #[test]
    fn hex_colors_parse() {
        assert_eq!(parse_hex_color("#ff0000").unwrap(), [1.0, 0.0, 0.0]);
        assert_eq!(parse_hex_color("00ff00").unwrap(), [0.0, 1.0, 0.0]);
        assert!(parse_hex_color("#12345").is_err());
        assert!(parse_hex_color("zzzzzz").is_err());
    }
}
