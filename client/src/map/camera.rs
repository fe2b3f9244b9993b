//! Camera for viewport management, panning and discrete zooming

use super::coords::{map_to_screen, screen_to_map, screen_to_tile, TileCoord, ZoomConfig};

/// Inclusive tile window currently visible, margin included
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ViewportBounds {
    pub min_row: i32,
    pub max_row: i32,
    pub min_col: i32,
    pub max_col: i32,
}

impl ViewportBounds {
    /// Window containing no tiles; layers updated with it release everything
    pub const EMPTY: ViewportBounds = ViewportBounds {
        min_row: 0,
        max_row: -1,
        min_col: 0,
        max_col: -1,
    };

    pub fn contains(&self, tile: TileCoord) -> bool {
        tile.row >= self.min_row && tile.row <= self.max_row && tile.col >= self.min_col && tile.col <= self.max_col
    }

    /// Whether the rectangle [row0, row1] x [col0, col1] overlaps the window
    pub fn intersects(&self, row0: i32, col0: i32, row1: i32, col1: i32) -> bool {
        row0 <= self.max_row && row1 >= self.min_row && col0 <= self.max_col && col1 >= self.min_col
    }

    pub fn tile_count(&self) -> usize {
        let rows = (self.max_row as i64 - self.min_row as i64 + 1).max(0) as usize;
        let cols = (self.max_col as i64 - self.min_col as i64 + 1).max(0) as usize;
        rows * cols
    }

    /// Every tile in the window, row by row
    pub fn tiles(self) -> impl Iterator<Item = TileCoord> {
        let (min_col, max_col) = (self.min_col, self.max_col);
        (self.min_row..=self.max_row).flat_map(move |row| (min_col..=max_col).map(move |col| TileCoord::new(row, col)))
    }
}

/// Isometric camera state
#[derive(Clone, Debug)]
pub struct IsoCamera {
    /// World pixel shown at the top-left corner of the viewport
    pub offset: (f64, f64),
    pub zoom: ZoomConfig,

    /// Viewport size in pixels
    pub viewport_width: u32,
    pub viewport_height: u32,
}

impl IsoCamera {
    pub fn new(width: u32, height: u32, zoom_level: i32) -> Self {
        Self {
            offset: (0.0, 0.0),
            zoom: ZoomConfig::for_level(zoom_level),
            viewport_width: width,
            viewport_height: height,
        }
    }

    /// Update viewport size
    pub fn set_viewport(&mut self, width: u32, height: u32) {
        self.viewport_width = width;
        self.viewport_height = height;
    }

    /// Pan by a pixel delta; content follows the pointer
    pub fn pan(&mut self, dx: f64, dy: f64) {
        self.offset.0 -= dx;
        self.offset.1 -= dy;
    }

    /// Step the zoom by whole levels, keeping the tile under the cursor fixed.
    ///
    /// Returns false when the level was already at the clamp limit.
    pub fn zoom_at(&mut self, steps: i32, screen_x: f64, screen_y: f64, rows: u32, cols: u32) -> bool {
        let old = self.zoom;
        let new = ZoomConfig::for_level((old.level as i32).saturating_add(steps));
        if new.level == old.level {
            return false;
        }

        let (wx, wy) = self.screen_to_world(screen_x, screen_y);
        let (fi, fj) = screen_to_map(wx, wy, rows, cols, &old);
        let (nx, ny) = map_to_screen(fi, fj, rows, cols, &new);

        self.zoom = new;
        self.offset = (nx - screen_x, ny - screen_y);
        log::info!("Zoom level {} -> {}", old.level, new.level);
        true
    }

    /// Center the viewport on a tile
    pub fn center_on(&mut self, tile: TileCoord, rows: u32, cols: u32) {
        let (x, y) = map_to_screen(tile.row as f64, tile.col as f64, rows, cols, &self.zoom);
        self.offset = (
            x + self.zoom.u - self.viewport_width as f64 / 2.0,
            y + self.zoom.u / 2.0 - self.viewport_height as f64 / 2.0,
        );
    }

    pub fn screen_to_world(&self, screen_x: f64, screen_y: f64) -> (f64, f64) {
        (screen_x + self.offset.0, screen_y + self.offset.1)
    }

    pub fn world_to_screen(&self, world_x: f64, world_y: f64) -> (f64, f64) {
        (world_x - self.offset.0, world_y - self.offset.1)
    }

    /// Tile under a screen position (may lie outside the map)
    pub fn tile_at(&self, screen_x: f64, screen_y: f64, rows: u32, cols: u32) -> TileCoord {
        let (wx, wy) = self.screen_to_world(screen_x, screen_y);
        screen_to_tile(wx, wy, rows, cols, &self.zoom)
    }

    /// Visible tile window with `margin` extra tiles, clamped to the map.
    ///
    /// `None` when the map is empty or entirely off-screen.
    pub fn visible_bounds(&self, rows: u32, cols: u32, margin: i32) -> Option<ViewportBounds> {
        if rows == 0 || cols == 0 {
            return None;
        }

        let w = self.viewport_width as f64;
        let h = self.viewport_height as f64;
        let corners = [(0.0, 0.0), (w, 0.0), (0.0, h), (w, h)];

        let mut min_i = f64::MAX;
        let mut max_i = f64::MIN;
        let mut min_j = f64::MAX;
        let mut max_j = f64::MIN;
        for (sx, sy) in corners {
            let (wx, wy) = self.screen_to_world(sx, sy);
            let (i, j) = screen_to_map(wx, wy, rows, cols, &self.zoom);
            min_i = min_i.min(i);
            max_i = max_i.max(i);
            min_j = min_j.min(j);
            max_j = max_j.max(j);
        }

        let bounds = ViewportBounds {
            min_row: (min_i.floor() as i32 - margin).max(0),
            max_row: (max_i.ceil() as i32 + margin).min(rows as i32 - 1),
            min_col: (min_j.floor() as i32 - margin).max(0),
            max_col: (max_j.ceil() as i32 + margin).min(cols as i32 - 1),
        };

        if bounds.min_row > bounds.max_row || bounds.min_col > bounds.max_col {
            None
        } else {
            Some(bounds)
        }
    }

    /// Whether a world-pixel rectangle touches the viewport, grown by `slack` pixels
    pub fn rect_visible(&self, left: f64, top: f64, right: f64, bottom: f64, slack: f64) -> bool {
        let (l, t) = self.world_to_screen(left, top);
        let (r, b) = self.world_to_screen(right, bottom);
        r >= -slack
            && b >= -slack
            && l <= self.viewport_width as f64 + slack
            && t <= self.viewport_height as f64 + slack
    }
}

impl Default for IsoCamera {
    fn default() -> Self {
        Self::new(800, 600, 2)
    }
}
