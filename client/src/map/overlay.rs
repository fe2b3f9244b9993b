//! Zone coloring and placement / road-drawing previews
//!
//! Overlay elements live in the unsorted overlay container and always draw
//! above the world.

use super::cache::TextureHandle;
use super::coords::{tile_bottom_vertex, TileCoord};
use super::pool::{ElementKey, LayerBatch, Placement, SceneLayer};
use super::roads::preview_path;
use super::LayerContext;

const ZONE_SLOT: u16 = 0;
const PLACEMENT_SLOT: u16 = 1;
const ROAD_SLOT: u16 = 2;

pub const PREVIEW_VALID_COLOR: [f32; 4] = [0.2, 0.85, 0.3, 0.55];
pub const PREVIEW_INVALID_COLOR: [f32; 4] = [0.9, 0.2, 0.2, 0.55];
pub const ROAD_PREVIEW_COLOR: [f32; 4] = [0.95, 0.95, 0.95, 0.6];

/// Zone ids for a rectangle of tiles; id 0 means unzoned
#[derive(Clone, Debug)]
pub struct ZoneGrid {
    pub width: u32,
    pub height: u32,
    /// Column of the grid's first entry
    pub origin_x: i32,
    /// Row of the grid's first entry
    pub origin_y: i32,
    zones: Vec<u8>,
}

impl ZoneGrid {
    pub fn new(width: u32, height: u32, origin_x: i32, origin_y: i32, mut zones: Vec<u8>) -> Self {
        zones.resize(width as usize * height as usize, 0);
        Self {
            width,
            height,
            origin_x,
            origin_y,
            zones,
        }
    }

    pub fn zone_at(&self, tile: TileCoord) -> u8 {
        let local_row = tile.row - self.origin_y;
        let local_col = tile.col - self.origin_x;
        if local_row < 0 || local_col < 0 || local_row >= self.height as i32 || local_col >= self.width as i32 {
            return 0;
        }
        self.zones[local_row as usize * self.width as usize + local_col as usize]
    }
}

/// Translucent color per zone id
pub fn zone_color(zone: u8) -> [f32; 4] {
    match zone {
        1 => [0.2, 0.7, 0.25, 0.35],  // residential
        2 => [0.25, 0.45, 0.9, 0.35], // commercial
        3 => [0.9, 0.75, 0.2, 0.35],  // industrial
        4 => [0.6, 0.3, 0.8, 0.35],   // civic
        _ => [0.6, 0.6, 0.6, 0.35],
    }
}

/// What the overlay currently shows
#[derive(Clone, Debug, Default)]
pub struct OverlayState {
    pub zones_enabled: bool,
    pub zones: Option<ZoneGrid>,
    /// Footprint (xsize, ysize) while placement mode is active
    pub placement: Option<(u32, u32)>,
    pub placement_valid: bool,
    pub road_drawing: bool,
    /// Drag start while a road is being drawn
    pub road_start: Option<TileCoord>,
    pub hover: Option<TileCoord>,
}

/// Overlay layer
pub struct OverlayLayer {
    batch: LayerBatch,
}

impl OverlayLayer {
    pub fn new() -> Self {
        Self {
            batch: LayerBatch::new(SceneLayer::Overlay),
        }
    }

    pub fn update(&mut self, ctx: &mut LayerContext, state: &OverlayState, rows: u32, cols: u32) -> bool {
        self.batch.begin_frame();
        let bounds = ctx.bounds;

        if state.zones_enabled {
            if let Some(zones) = &state.zones {
                for row in bounds.min_row..=bounds.max_row {
                    for col in bounds.min_col..=bounds.max_col {
                        let tile = TileCoord::new(row, col);
                        let zone = zones.zone_at(tile);
                        if zone != 0 {
                            self.put(ctx, tile, ZONE_SLOT, zone_color(zone), rows, cols);
                        }
                    }
                }
            }
        }

        if let (Some((xsize, ysize)), Some(hover)) = (state.placement, state.hover) {
            let color = if state.placement_valid {
                PREVIEW_VALID_COLOR
            } else {
                PREVIEW_INVALID_COLOR
            };
            for row in hover.row..hover.row + ysize as i32 {
                for col in hover.col..hover.col + xsize as i32 {
                    let tile = TileCoord::new(row, col);
                    if tile.in_bounds(rows, cols) {
                        self.put(ctx, tile, PLACEMENT_SLOT, color, rows, cols);
                    }
                }
            }
        }

        if state.road_drawing {
            let tiles: Vec<TileCoord> = match (state.road_start, state.hover) {
                (Some(start), hover) => preview_path(start, hover.unwrap_or(start))
                    .iter()
                    .filter_map(|segment| segment.tiles())
                    .flatten()
                    .collect(),
                (None, Some(hover)) => vec![hover],
                (None, None) => Vec::new(),
            };
            for tile in tiles {
                if tile.in_bounds(rows, cols) {
                    self.put(ctx, tile, ROAD_SLOT, ROAD_PREVIEW_COLOR, rows, cols);
                }
            }
        }

        self.batch.end_frame(ctx.pool)
    }

    fn put(&mut self, ctx: &mut LayerContext, tile: TileCoord, slot: u16, color: [f32; 4], rows: u32, cols: u32) {
        let zoom = ctx.camera.zoom;
        let (bx, by) = tile_bottom_vertex(tile.row, tile.col, rows, cols, &zoom);
        let placement = Placement::at(bx, by, 0).with_scale(zoom.texture_scale() as f32);
        self.batch.set_element(
            ctx.pool,
            ElementKey::with_slot(tile.row, tile.col, slot),
            &TextureHandle::diamond(color),
            placement,
        );
    }

    pub fn element_count(&self) -> usize {
        self.batch.len()
    }
}

impl Default for OverlayLayer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zone_lookup_respects_origin() {
        let grid = ZoneGrid::new(2, 2, 10, 20, vec![1, 2, 3, 4]);
        assert_eq!(grid.zone_at(TileCoord::new(20, 10)), 1);
        assert_eq!(grid.zone_at(TileCoord::new(20, 11)), 2);
        assert_eq!(grid.zone_at(TileCoord::new(21, 11)), 4);
        assert_eq!(grid.zone_at(TileCoord::new(19, 10)), 0);
        assert_eq!(grid.zone_at(TileCoord::new(22, 10)), 0);
    }

    #[test]
    fn test_previews_follow_mode() {
        use crate::map::cache::tests::MemorySource;
        use crate::map::cache::TextureCache;
        use crate::map::camera::{IsoCamera, ViewportBounds};
        use crate::map::pool::SpritePool;

        let mut pool = SpritePool::new();
        let mut cache = TextureCache::default();
        let mut source = MemorySource::default();
        let camera = IsoCamera::default();
        let mut ctx = LayerContext {
            pool: &mut pool,
            cache: &mut cache,
            source: &mut source,
            camera: &camera,
            bounds: ViewportBounds {
                min_row: 0,
                max_row: 7,
                min_col: 0,
                max_col: 7,
            },
        };
        let mut layer = OverlayLayer::new();

        let mut state = OverlayState {
            placement: Some((2, 3)),
            hover: Some(TileCoord::new(1, 1)),
            ..OverlayState::default()
        };
        assert!(layer.update(&mut ctx, &state, 8, 8));
        assert_eq!(layer.element_count(), 6);

        // Footprint hanging off the map edge is clipped
        state.hover = Some(TileCoord::new(7, 7));
        layer.update(&mut ctx, &state, 8, 8);
        assert_eq!(layer.element_count(), 1);

        state.placement = None;
        state.road_drawing = true;
        state.road_start = Some(TileCoord::new(0, 0));
        state.hover = Some(TileCoord::new(2, 4));
        layer.update(&mut ctx, &state, 8, 8);
        // L-path: (0,0)..(0,4) then (1,4)..(2,4)
        assert_eq!(layer.element_count(), 7);

        state.road_drawing = false;
        assert!(layer.update(&mut ctx, &state, 8, 8));
        assert_eq!(layer.element_count(), 0);
    }

    #[test]
    fn test_short_zone_buffer_padded() {
        let grid = ZoneGrid::new(3, 3, 0, 0, vec![2]);
        assert_eq!(grid.zone_at(TileCoord::new(2, 2)), 0);
    }
}
