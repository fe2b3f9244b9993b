//! Small procedural world so the viewer has something to show offline

use crate::map::buildings::BuildingPlacement;
use crate::map::coords::{LandClass, PaletteIndex, TileCoord};
use crate::map::overlay::ZoneGrid;
use crate::map::roads::RoadSegment;
use crate::map::terrain::TerrainGrid;

/// Land type code for trees and rocks
const SPECIAL_TYPE: u8 = 13;
/// Spacing of the road grid
const BLOCK: i32 = 12;

pub struct DemoWorld {
    pub terrain: TerrainGrid,
    pub segments: Vec<RoadSegment>,
    pub buildings: Vec<BuildingPlacement>,
}

/// Cheap deterministic hash for per-tile variation
fn noise(row: i32, col: i32) -> u32 {
    let mut h = (row as u32).wrapping_mul(0x9E37_79B1) ^ (col as u32).wrapping_mul(0x85EB_CA77);
    h ^= h >> 15;
    h = h.wrapping_mul(0xC2B2_AE3D);
    h ^ (h >> 13)
}

/// Square world with a lake in one quadrant, a road grid and a few buildings
pub fn demo_world(size: u32) -> DemoWorld {
    let size = size.max(16);
    let lake_center = (size as f64 * 0.7, size as f64 * 0.3);
    let lake_radius = size as f64 * 0.15;

    let mut indices = Vec::with_capacity((size * size) as usize);
    for row in 0..size as i32 {
        for col in 0..size as i32 {
            let dr = row as f64 - lake_center.0;
            let dc = col as f64 - lake_center.1;
            let h = noise(row, col);
            let index = if (dr * dr + dc * dc).sqrt() < lake_radius {
                PaletteIndex::from_parts(LandClass::Water, 0, (h % 4) as u8)
            } else {
                let class = match h % 7 {
                    0 | 1 => LandClass::MidGrass,
                    2 => LandClass::DryGround,
                    _ => LandClass::Grass,
                };
                let land_type = if h % 11 == 0 { SPECIAL_TYPE } else { 0 };
                PaletteIndex::from_parts(class, land_type, (h >> 8) as u8 % 4)
            };
            indices.push(index.0);
        }
    }
    let terrain = TerrainGrid::new(size, size, indices);

    let last = size as i32 - 1;
    let mut segments = Vec::new();
    let mut line = BLOCK / 2;
    while line < last {
        segments.push(RoadSegment::new(0, line, last, line));
        segments.push(RoadSegment::new(line, 0, line, last));
        line += BLOCK;
    }

    let mut buildings = Vec::new();
    let mut block_row = BLOCK / 2 + 2;
    while block_row + 3 < last {
        let mut block_col = BLOCK / 2 + 2;
        while block_col + 3 < last {
            let h = noise(block_row, block_col);
            let footprint = BuildingPlacement::new(block_col, block_row, "", 1, 1);
            let dry = footprint
                .footprint()
                .all(|t| !terrain.is_water(t) && !terrain.is_water(TileCoord::new(t.row + 3, t.col + 3)));
            if dry && h % 3 != 0 {
                let (class, side) = match h % 4 {
                    0 => ("office", 3),
                    1 => ("shop", 2),
                    _ => ("house", 2),
                };
                buildings.push(BuildingPlacement::new(block_col, block_row, class, side, side));
            }
            block_col += BLOCK;
        }
        block_row += BLOCK;
    }

    log::info!(
        "Demo world: {}x{} tiles, {} road segments, {} buildings",
        size,
        size,
        segments.len(),
        buildings.len()
    );

    DemoWorld {
        terrain,
        segments,
        buildings,
    }
}

/// Zone ids for a tile rectangle, derived from the road grid blocks
pub fn demo_zones(min_row: i32, min_col: i32, max_row: i32, max_col: i32) -> ZoneGrid {
    let width = (max_col - min_col + 1).max(0) as u32;
    let height = (max_row - min_row + 1).max(0) as u32;
    let mut zones = Vec::with_capacity((width * height) as usize);
    for row in min_row..=max_row {
        for col in min_col..=max_col {
            let block = noise(row.div_euclid(BLOCK), col.div_euclid(BLOCK));
            zones.push((block % 5) as u8);
        }
    }
    ZoneGrid::new(width, height, min_col, min_row, zones)
}
