//! Terrain grid and the terrain layer

use std::collections::HashSet;

use super::coords::{tile_bottom_vertex, LandType, PaletteIndex, TileCoord, ZoomConfig};
use super::pool::{ElementKey, LayerBatch, Placement, SceneLayer};
use super::sort_key::{tile_sort_key, LayerPriority};
use super::LayerContext;

/// Row-major grid of palette indices
#[derive(Clone, Debug)]
pub struct TerrainGrid {
    pub width: u32,
    pub height: u32,
    indices: Vec<u8>,
}

impl TerrainGrid {
    /// Build a grid; a short `indices` buffer is padded with index 0
    pub fn new(width: u32, height: u32, mut indices: Vec<u8>) -> Self {
        let len = width as usize * height as usize;
        if indices.len() != len {
            log::warn!(
                "Terrain grid {}x{} expects {} indices, got {}",
                width,
                height,
                len,
                indices.len()
            );
            indices.resize(len, 0);
        }
        Self { width, height, indices }
    }

    pub fn filled(width: u32, height: u32, palette: PaletteIndex) -> Self {
        Self::new(width, height, vec![palette.0; width as usize * height as usize])
    }

    /// Number of rows (i axis)
    pub fn rows(&self) -> u32 {
        self.height
    }

    /// Number of columns (j axis)
    pub fn cols(&self) -> u32 {
        self.width
    }

    pub fn get(&self, tile: TileCoord) -> Option<PaletteIndex> {
        if !tile.in_bounds(self.rows(), self.cols()) {
            return None;
        }
        let index = tile.row as usize * self.width as usize + tile.col as usize;
        self.indices.get(index).copied().map(PaletteIndex)
    }

    pub fn is_water(&self, tile: TileCoord) -> bool {
        self.get(tile).is_some_and(PaletteIndex::is_water)
    }
}

/// Replace special (tall) artwork with the plain center tile of the same class
pub fn flatten_palette(palette: PaletteIndex, zoom: &ZoomConfig, occupied: bool) -> PaletteIndex {
    if palette.land_type() == LandType::Special && (occupied || zoom.level < 2) {
        PaletteIndex::from_parts(palette.land_class(), 0, palette.variant())
    } else {
        palette
    }
}

/// Terrain layer: one element per visible tile
pub struct TerrainLayer {
    batch: LayerBatch,
    tall_count: usize,
}

impl TerrainLayer {
    pub fn new() -> Self {
        Self {
            batch: LayerBatch::new(SceneLayer::World),
            tall_count: 0,
        }
    }

    /// Re-populate the visible window; `occupied` tiles never render tall
    pub fn update(&mut self, ctx: &mut LayerContext, grid: &TerrainGrid, occupied: &HashSet<TileCoord>) -> bool {
        self.batch.begin_frame();
        self.tall_count = 0;

        let zoom = ctx.camera.zoom;
        let (rows, cols) = (grid.rows(), grid.cols());
        let scale = zoom.texture_scale() as f32;

        for row in ctx.bounds.min_row..=ctx.bounds.max_row {
            for col in ctx.bounds.min_col..=ctx.bounds.max_col {
                let tile = TileCoord::new(row, col);
                let Some(palette) = grid.get(tile) else {
                    continue;
                };

                let (bx, by) = tile_bottom_vertex(row, col, rows, cols, &zoom);
                // Tall artwork can reach well above the diamond
                if !ctx
                    .camera
                    .rect_visible(bx - zoom.u, by - zoom.u, bx + zoom.u, by, zoom.tile_width * 2.0)
                {
                    continue;
                }

                let palette = flatten_palette(palette, &zoom, occupied.contains(&tile));
                let texture = ctx.cache.terrain_sync(ctx.source, palette);
                let tall = !texture.fallback && texture.height * 2 > texture.width;

                let priority = if tall {
                    self.tall_count += 1;
                    LayerPriority::TallTerrain
                } else {
                    LayerPriority::Terrain
                };

                let placement = Placement::at(bx, by, tile_sort_key(row, col, priority)).with_scale(scale);
                self.batch
                    .set_element(ctx.pool, ElementKey::tile(row, col), &texture, placement);
            }
        }

        self.batch.end_frame(ctx.pool)
    }

    /// Release every terrain element
    pub fn clear(&mut self, ctx: &mut LayerContext) -> bool {
        self.tall_count = 0;
        self.batch.clear(ctx.pool)
    }

    /// Elements placed by the last update
    pub fn element_count(&self) -> usize {
        self.batch.len()
    }

    /// Elements placed in the upper tier by the last update
    pub fn tall_count(&self) -> usize {
        self.tall_count
    }
}

impl Default for TerrainLayer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::cache::tests::MemorySource;
    use crate::map::cache::TextureCache;
    use crate::map::camera::IsoCamera;
    use crate::map::coords::LandClass;
    use crate::map::pool::SpritePool;
    use crate::map::sort_key::TIER_OFFSET;

    fn context_parts(rows: u32, cols: u32, zoom: i32) -> (SpritePool, TextureCache, MemorySource, IsoCamera) {
        let mut camera = IsoCamera::new(800, 600, zoom);
        camera.center_on(TileCoord::new(rows as i32 / 2, cols as i32 / 2), rows, cols);
        (SpritePool::new(), TextureCache::default(), MemorySource::default(), camera)
    }

    #[test]
    fn test_flatten_special_tiles() {
        let tree = PaletteIndex::from_parts(LandClass::MidGrass, 13, 1);
        let near = ZoomConfig::for_level(3);
        let far = ZoomConfig::for_level(0);
        assert_eq!(flatten_palette(tree, &near, false), tree);
        assert_eq!(flatten_palette(tree, &near, true).land_type(), LandType::Center);
        assert_eq!(flatten_palette(tree, &far, false).land_class(), LandClass::MidGrass);
        let edge = PaletteIndex::from_parts(LandClass::Water, 2, 0);
        assert_eq!(flatten_palette(edge, &far, true), edge);
    }

    #[test]
    fn test_tall_texture_goes_to_upper_tier() {
        let grid = TerrainGrid::filled(3, 3, PaletteIndex::from_parts(LandClass::Grass, 13, 0));
        let (mut pool, mut cache, mut source, camera) = context_parts(3, 3, 3);
        let key = cache.terrain_key(PaletteIndex::from_parts(LandClass::Grass, 13, 0));
        source = source.with_asset(key, 64, 80);
        let bounds = camera.visible_bounds(3, 3, 2).unwrap();
        let mut layer = TerrainLayer::new();

        let mut ctx = LayerContext {
            pool: &mut pool,
            cache: &mut cache,
            source: &mut source,
            camera: &camera,
            bounds,
        };
        layer.update(&mut ctx, &grid, &HashSet::new());
        assert_eq!(layer.tall_count(), 0);

        ctx.cache.poll_loads(ctx.source);
        assert!(layer.update(&mut ctx, &grid, &HashSet::new()));
        assert_eq!(layer.tall_count(), 9);
        pool.sort();
        assert!(pool.draw_list().all(|s| s.sort_key >= TIER_OFFSET));
    }

    #[test]
    fn test_short_index_buffer_padded() {
        let grid = TerrainGrid::new(2, 2, vec![0xC0]);
        assert!(grid.is_water(TileCoord::new(0, 0)));
        assert_eq!(grid.get(TileCoord::new(1, 1)), Some(PaletteIndex(0)));
        assert_eq!(grid.get(TileCoord::new(2, 0)), None);
    }
}
