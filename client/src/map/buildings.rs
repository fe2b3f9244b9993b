//! Building placements, chunked spatial index and the building layer

use std::collections::{HashMap, HashSet};

use super::camera::ViewportBounds;
use super::cache::TextureHandle;
use super::coords::{tile_bottom_vertex, TileCoord};
use super::pool::{ElementKey, LayerBatch, Placement, SceneLayer};
use super::sort_key::{sort_key, LayerPriority};
use super::LayerContext;

/// Fallback diamond color for buildings without artwork
pub const BUILDING_COLOR: [f32; 4] = [0.55, 0.55, 0.6, 1.0];
/// Fallback diamond color for the hovered building
pub const BUILDING_HOVER_COLOR: [f32; 4] = [0.95, 0.8, 0.35, 1.0];
/// Tint applied to textured buildings under the pointer
const HOVER_TINT: [f32; 4] = [1.0, 0.92, 0.7, 1.0];

/// One placed building; `x` is the column, `y` the row of the near corner
#[derive(Clone, Debug, PartialEq)]
pub struct BuildingPlacement {
    pub x: i32,
    pub y: i32,
    /// Visual class key used to look up artwork
    pub class: String,
    pub xsize: u32,
    pub ysize: u32,
}

impl BuildingPlacement {
    /// Footprint sizes below 1 are raised to 1
    pub fn new(x: i32, y: i32, class: impl Into<String>, xsize: u32, ysize: u32) -> Self {
        Self {
            x,
            y,
            class: class.into(),
            xsize: xsize.max(1),
            ysize: ysize.max(1),
        }
    }

    /// Last row covered by the footprint, saturating at `i32::MAX`
    pub fn max_row(&self) -> i32 {
        (self.y as i64 + self.ysize as i64 - 1).min(i32::MAX as i64) as i32
    }

    /// Last column covered by the footprint, saturating at `i32::MAX`
    pub fn max_col(&self) -> i32 {
        (self.x as i64 + self.xsize as i64 - 1).min(i32::MAX as i64) as i32
    }

    /// The part of the footprint inside a `rows` x `cols` map; `None` when
    /// the footprint misses the map
    pub fn clipped(&self, rows: u32, cols: u32) -> Option<BuildingPlacement> {
        let (r0, r1) = (self.y as i64, self.y as i64 + self.ysize as i64 - 1);
        let (c0, c1) = (self.x as i64, self.x as i64 + self.xsize as i64 - 1);
        if r1 < 0 || c1 < 0 || r0 >= rows as i64 || c0 >= cols as i64 {
            return None;
        }
        let (r0, r1) = (r0.max(0), r1.min(rows as i64 - 1));
        let (c0, c1) = (c0.max(0), c1.min(cols as i64 - 1));
        Some(BuildingPlacement {
            x: c0 as i32,
            y: r0 as i32,
            class: self.class.clone(),
            xsize: (c1 - c0 + 1) as u32,
            ysize: (r1 - r0 + 1) as u32,
        })
    }

    pub fn contains(&self, tile: TileCoord) -> bool {
        tile.row >= self.y && tile.row <= self.max_row() && tile.col >= self.x && tile.col <= self.max_col()
    }

    pub fn footprint(&self) -> impl Iterator<Item = TileCoord> + '_ {
        (self.y..=self.max_row()).flat_map(move |row| (self.x..=self.max_col()).map(move |col| TileCoord::new(row, col)))
    }

    pub fn overlaps(&self, bounds: &ViewportBounds) -> bool {
        bounds.intersects(self.y, self.x, self.max_row(), self.max_col())
    }

    /// Draw-order key; the far corner acts as the diagonal proxy
    pub fn sort_key(&self) -> i64 {
        let far_row = self.y as i64 + self.ysize as i64;
        let far_col = self.x as i64 + self.xsize as i64;
        sort_key(far_row + far_col, far_col, LayerPriority::Building)
    }
}

/// Tiles covered by any footprint
pub fn footprint_tiles(buildings: &[BuildingPlacement]) -> HashSet<TileCoord> {
    buildings.iter().flat_map(|b| b.footprint()).collect()
}

/// Tiles within one tile of any footprint, footprints included
pub fn urban_tiles(buildings: &[BuildingPlacement]) -> HashSet<TileCoord> {
    let mut tiles = HashSet::new();
    for b in buildings {
        for row in b.y.saturating_sub(1)..=b.max_row().saturating_add(1) {
            for col in b.x.saturating_sub(1)..=b.max_col().saturating_add(1) {
                tiles.insert(TileCoord::new(row, col));
            }
        }
    }
    tiles
}

/// Coarse buckets of building indices keyed by chunk coordinates
pub struct BuildingIndex {
    chunk_size: i32,
    buckets: HashMap<(i32, i32), Vec<usize>>,
}

impl BuildingIndex {
    pub fn new(chunk_size: u32) -> Self {
        Self {
            chunk_size: chunk_size.max(1) as i32,
            buckets: HashMap::new(),
        }
    }

    /// Re-index every building
    pub fn rebuild(&mut self, buildings: &[BuildingPlacement]) {
        self.buckets.clear();
        for (index, b) in buildings.iter().enumerate() {
            let (r0, c0) = self.chunk_of(b.y, b.x);
            let (r1, c1) = self.chunk_of(b.max_row(), b.max_col());
            for cr in r0..=r1 {
                for cc in c0..=c1 {
                    self.buckets.entry((cr, cc)).or_default().push(index);
                }
            }
        }
    }

    fn chunk_of(&self, row: i32, col: i32) -> (i32, i32) {
        (row.div_euclid(self.chunk_size), col.div_euclid(self.chunk_size))
    }

    /// Indices of buildings whose footprint overlaps `bounds`, ascending
    pub fn query(&self, buildings: &[BuildingPlacement], bounds: &ViewportBounds) -> Vec<usize> {
        let (r0, c0) = self.chunk_of(bounds.min_row, bounds.min_col);
        let (r1, c1) = self.chunk_of(bounds.max_row, bounds.max_col);

        let mut found: Vec<usize> = Vec::new();
        for cr in r0..=r1 {
            for cc in c0..=c1 {
                if let Some(bucket) = self.buckets.get(&(cr, cc)) {
                    found.extend_from_slice(bucket);
                }
            }
        }
        found.sort_unstable();
        found.dedup();
        // Buckets are only a broad phase
        found.retain(|&i| buildings.get(i).is_some_and(|b| b.overlaps(bounds)));
        found
    }

    /// Building whose footprint covers `tile`
    pub fn building_at(&self, buildings: &[BuildingPlacement], tile: TileCoord) -> Option<usize> {
        let chunk = self.chunk_of(tile.row, tile.col);
        self.buckets
            .get(&chunk)?
            .iter()
            .copied()
            .find(|&i| buildings.get(i).is_some_and(|b| b.contains(tile)))
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

/// Building layer
pub struct BuildingLayer {
    batch: LayerBatch,
}

impl BuildingLayer {
    pub fn new() -> Self {
        Self {
            batch: LayerBatch::new(SceneLayer::World),
        }
    }

    pub fn update(
        &mut self,
        ctx: &mut LayerContext,
        buildings: &[BuildingPlacement],
        index: &BuildingIndex,
        hovered: Option<usize>,
        rows: u32,
        cols: u32,
    ) -> bool {
        self.batch.begin_frame();
        let zoom = ctx.camera.zoom;
        let scale = zoom.texture_scale() as f32;

        for i in index.query(buildings, &ctx.bounds) {
            let b = &buildings[i];
            let is_hovered = hovered == Some(i);
            let key = b.sort_key();

            match ctx.cache.building_sync(ctx.source, &b.class) {
                Some(texture) => {
                    let (bx, by) = tile_bottom_vertex(b.y, b.x, rows, cols, &zoom);
                    // The near corner sits ysize/(xsize+ysize) across the artwork
                    let anchor_x = b.ysize as f32 / (b.xsize + b.ysize) as f32;
                    let mut placement = Placement::at(bx, by, key)
                        .with_scale(scale)
                        .with_anchor([anchor_x, 1.0]);
                    if is_hovered {
                        placement = placement.with_tint(HOVER_TINT);
                    }
                    self.batch
                        .set_element(ctx.pool, ElementKey::with_slot(b.y, b.x, 0), &texture, placement);
                }
                None => {
                    let color = if is_hovered { BUILDING_HOVER_COLOR } else { BUILDING_COLOR };
                    let diamond = TextureHandle::diamond(color);
                    for (slot, tile) in b.footprint().enumerate() {
                        let (bx, by) = tile_bottom_vertex(tile.row, tile.col, rows, cols, &zoom);
                        let placement = Placement::at(bx, by, key).with_scale(scale);
                        self.batch.set_element(
                            ctx.pool,
                            ElementKey::with_slot(b.y, b.x, slot as u16 + 1),
                            &diamond,
                            placement,
                        );
                    }
                }
            }
        }

        self.batch.end_frame(ctx.pool)
    }

    pub fn element_count(&self) -> usize {
        self.batch.len()
    }
}

impl Default for BuildingLayer {
    fn default() -> Self {
        Self::new()
    }
}
