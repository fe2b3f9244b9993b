//! Pavement and water platforms derived from building footprints

use std::collections::{HashMap, HashSet};

use super::buildings::BuildingPlacement;
use super::coords::{tile_bottom_vertex, TileCoord};
use super::pool::{ElementKey, LayerBatch, Placement, SceneLayer};
use super::sort_key::{tile_sort_key, LayerPriority};
use super::terrain::TerrainGrid;
use super::LayerContext;

/// Pavement piece chosen from the 4-neighbor occupancy pattern.
///
/// Edges are named after the open side, corners after the screen half whose
/// two sides are open.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum ConcreteVariant {
    Center,
    EdgeNW,
    EdgeNE,
    EdgeSE,
    EdgeSW,
    CornerN,
    CornerE,
    CornerS,
    CornerW,
}

impl ConcreteVariant {
    fn name(self) -> &'static str {
        match self {
            ConcreteVariant::Center => "Center",
            ConcreteVariant::EdgeNW => "EdgeNW",
            ConcreteVariant::EdgeNE => "EdgeNE",
            ConcreteVariant::EdgeSE => "EdgeSE",
            ConcreteVariant::EdgeSW => "EdgeSW",
            ConcreteVariant::CornerN => "CornerN",
            ConcreteVariant::CornerE => "CornerE",
            ConcreteVariant::CornerS => "CornerS",
            ConcreteVariant::CornerW => "CornerW",
        }
    }

    /// Pick a variant from which neighbors are paved (screen directions)
    pub fn from_neighbors(nw: bool, ne: bool, se: bool, sw: bool) -> Self {
        match (nw, ne, se, sw) {
            (false, true, true, true) => ConcreteVariant::EdgeNW,
            (true, false, true, true) => ConcreteVariant::EdgeNE,
            (true, true, false, true) => ConcreteVariant::EdgeSE,
            (true, true, true, false) => ConcreteVariant::EdgeSW,
            (false, false, true, true) => ConcreteVariant::CornerN,
            (true, false, false, true) => ConcreteVariant::CornerE,
            (true, true, false, false) => ConcreteVariant::CornerS,
            (false, true, true, false) => ConcreteVariant::CornerW,
            _ => ConcreteVariant::Center,
        }
    }
}

/// Artwork for a paved tile; water tiles get platform pieces
pub fn concrete_texture_file(variant: ConcreteVariant, on_water: bool) -> String {
    if on_water {
        format!("Platform{}.bmp", variant.name())
    } else {
        format!("Concrete{}.bmp", variant.name())
    }
}

/// Per-tile pavement derived from buildings; rebuilt as a unit
#[derive(Default)]
pub struct ConcreteGrid {
    occupancy: HashMap<TileCoord, u32>,
    tiles: HashMap<TileCoord, (ConcreteVariant, bool)>,
}

impl ConcreteGrid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recompute occupancy and variants from scratch.
    ///
    /// Each building paves its footprint plus a one-tile apron along its two
    /// front faces (row - 1 and col - 1). Road tiles are never paved but count
    /// as paved neighbors so sidewalks run into the road.
    pub fn rebuild(
        &mut self,
        buildings: &[BuildingPlacement],
        roads: &HashSet<TileCoord>,
        terrain: Option<&TerrainGrid>,
    ) {
        self.occupancy.clear();
        self.tiles.clear();

        for b in buildings {
            let (mut r0, mut r1) = (b.y.saturating_sub(1), b.max_row());
            let (mut c0, mut c1) = (b.x.saturating_sub(1), b.max_col());
            if let Some(grid) = terrain {
                r0 = r0.max(0);
                c0 = c0.max(0);
                r1 = r1.min(grid.rows() as i32 - 1);
                c1 = c1.min(grid.cols() as i32 - 1);
            }
            for row in r0..=r1 {
                for col in c0..=c1 {
                    *self.occupancy.entry(TileCoord::new(row, col)).or_insert(0) += 1;
                }
            }
        }

        let paved = |tile: TileCoord| self.occupancy.contains_key(&tile) || roads.contains(&tile);
        let mut tiles = HashMap::with_capacity(self.occupancy.len());
        for &tile in self.occupancy.keys() {
            if roads.contains(&tile) {
                continue;
            }
            if let Some(grid) = terrain {
                if !tile.in_bounds(grid.rows(), grid.cols()) {
                    continue;
                }
            }
            let variant = ConcreteVariant::from_neighbors(
                paved(tile.offset(1, 0)),
                paved(tile.offset(0, 1)),
                paved(tile.offset(-1, 0)),
                paved(tile.offset(0, -1)),
            );
            let on_water = terrain.is_some_and(|grid| grid.is_water(tile));
            tiles.insert(tile, (variant, on_water));
        }
        self.tiles = tiles;
    }

    /// Number of buildings whose apron covers `tile`
    pub fn occupancy(&self, tile: TileCoord) -> u32 {
        self.occupancy.get(&tile).copied().unwrap_or(0)
    }

    pub fn occupied_tiles(&self) -> impl Iterator<Item = &TileCoord> {
        self.occupancy.keys()
    }

    pub fn variant(&self, tile: TileCoord) -> Option<ConcreteVariant> {
        self.tiles.get(&tile).map(|(variant, _)| *variant)
    }

    pub fn texture_file(&self, tile: TileCoord) -> Option<String> {
        self.tiles
            .get(&tile)
            .map(|(variant, water)| concrete_texture_file(*variant, *water))
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    fn get(&self, tile: TileCoord) -> Option<(ConcreteVariant, bool)> {
        self.tiles.get(&tile).copied()
    }
}

/// Pavement layer
pub struct PavementLayer {
    batch: LayerBatch,
}

impl PavementLayer {
    pub fn new() -> Self {
        Self {
            batch: LayerBatch::new(SceneLayer::World),
        }
    }

    pub fn update(&mut self, ctx: &mut LayerContext, grid: &ConcreteGrid, rows: u32, cols: u32) -> bool {
        self.batch.begin_frame();
        let zoom = ctx.camera.zoom;
        let scale = zoom.texture_scale() as f32;

        for tile in ctx.bounds.tiles() {
            let Some((variant, water)) = grid.get(tile) else {
                continue;
            };
            let file = concrete_texture_file(variant, water);
            let Some(texture) = ctx.cache.concrete_sync(ctx.source, &file) else {
                continue;
            };
            let (bx, by) = tile_bottom_vertex(tile.row, tile.col, rows, cols, &zoom);
            let placement =
                Placement::at(bx, by, tile_sort_key(tile.row, tile.col, LayerPriority::Pavement)).with_scale(scale);
            self.batch
                .set_element(ctx.pool, ElementKey::tile(tile.row, tile.col), &texture, placement);
        }

        self.batch.end_frame(ctx.pool)
    }

    pub fn element_count(&self) -> usize {
        self.batch.len()
    }
}

impl Default for PavementLayer {
    fn default() -> Self {
        Self::new()
    }
}
