//! Isometric coordinate system, zoom table and terrain palette decoding
//!
//! Tile addresses are (row, column) = (i, j). Screen positions are world
//! pixels before the camera offset is applied.

/// Zoom configuration for one discrete zoom level
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ZoomConfig {
    pub level: usize,
    /// Half-tile unit in pixels
    pub u: f64,
    pub tile_width: f64,
    pub tile_height: f64,
}

impl ZoomConfig {
    const fn new(level: usize, u: f64) -> Self {
        Self {
            level,
            u,
            tile_width: u * 2.0,
            tile_height: u,
        }
    }

    /// Look up a zoom level, clamping out-of-range values into [0, 3]
    pub fn for_level(level: i32) -> ZoomConfig {
        let clamped = level.clamp(MIN_ZOOM_LEVEL as i32, MAX_ZOOM_LEVEL as i32) as usize;
        ZOOM_LEVELS[clamped]
    }

    /// Uniform scale for textures authored against a 64 px wide tile
    pub fn texture_scale(&self) -> f64 {
        self.tile_width / AUTHORED_TILE_WIDTH
    }
}

/// Width in pixels of the tile that every texture is authored for
pub const AUTHORED_TILE_WIDTH: f64 = 64.0;

pub const MIN_ZOOM_LEVEL: usize = 0;
pub const MAX_ZOOM_LEVEL: usize = 3;

/// Ordered zoom table, coarsest first
pub const ZOOM_LEVELS: [ZoomConfig; 4] = [
    ZoomConfig::new(0, 4.0),
    ZoomConfig::new(1, 8.0),
    ZoomConfig::new(2, 16.0),
    ZoomConfig::new(3, 32.0),
];

/// Map a tile address to the top-left of its bounding box in world pixels
pub fn map_to_screen(i: f64, j: f64, rows: u32, cols: u32, zoom: &ZoomConfig) -> (f64, f64) {
    let rows = rows as f64;
    let cols = cols as f64;
    let x = zoom.u * (rows - i + j);
    let y = (zoom.u / 2.0) * ((rows - i) + (cols - j));
    (x, y)
}

/// Inverse of [`map_to_screen`], returning fractional (i, j)
pub fn screen_to_map(x: f64, y: f64, rows: u32, cols: u32, zoom: &ZoomConfig) -> (f64, f64) {
    let rows = rows as f64;
    let cols = cols as f64;
    // a = rows - i + j, b = rows - i + cols - j
    let a = x / zoom.u;
    let b = 2.0 * y / zoom.u;
    let i = (2.0 * rows + cols - a - b) / 2.0;
    let j = (a - b + cols) / 2.0;
    (i, j)
}

/// Screen position of the bottom vertex of a tile diamond
pub fn tile_bottom_vertex(i: i32, j: i32, rows: u32, cols: u32, zoom: &ZoomConfig) -> (f64, f64) {
    let (x, y) = map_to_screen(i as f64, j as f64, rows, cols, zoom);
    (x + zoom.u, y + zoom.u)
}

/// Tile containing a world-pixel position
pub fn screen_to_tile(x: f64, y: f64, rows: u32, cols: u32, zoom: &ZoomConfig) -> TileCoord {
    // The bounding-box origin of tile (i, j) sits half a tile left of its
    // center, so shift to the diamond center before flooring.
    let (i, j) = screen_to_map(x - zoom.u, y - zoom.u / 2.0, rows, cols, zoom);
    TileCoord::new((i + 0.5).floor() as i32, (j + 0.5).floor() as i32)
}

/// Typed (row, column) tile address used as the key for every per-tile map
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct TileCoord {
    pub row: i32,
    pub col: i32,
}

impl TileCoord {
    pub const fn new(row: i32, col: i32) -> Self {
        Self { row, col }
    }

    pub fn offset(self, d_row: i32, d_col: i32) -> Self {
        Self::new(self.row + d_row, self.col + d_col)
    }

    /// Diagonal index `i + j`
    pub fn diagonal(self) -> i32 {
        self.row + self.col
    }

    pub fn in_bounds(self, rows: u32, cols: u32) -> bool {
        self.row >= 0 && self.col >= 0 && (self.row as u32) < rows && (self.col as u32) < cols
    }
}

/// Land class stored in bits 7-6 of a palette index
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum LandClass {
    Grass,
    MidGrass,
    DryGround,
    Water,
}

impl LandClass {
    /// Flat color used while the real terrain texture is unavailable
    pub fn fallback_color(self) -> [f32; 4] {
        match self {
            LandClass::Grass => [0.36, 0.55, 0.24, 1.0],
            LandClass::MidGrass => [0.48, 0.56, 0.28, 1.0],
            LandClass::DryGround => [0.62, 0.52, 0.34, 1.0],
            LandClass::Water => [0.18, 0.38, 0.62, 1.0],
        }
    }
}

/// Land type stored in bits 5-2 of a palette index
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum LandType {
    Center,
    EdgeN,
    EdgeE,
    EdgeS,
    EdgeW,
    OuterNE,
    OuterSE,
    OuterSW,
    OuterNW,
    InnerNE,
    InnerSE,
    InnerSW,
    InnerNW,
    Special,
}

/// 8-bit terrain palette index: class(2) | type(4) | variant(2)
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct PaletteIndex(pub u8);

impl PaletteIndex {
    pub fn from_parts(class: LandClass, land_type: u8, variant: u8) -> Self {
        let class_bits = match class {
            LandClass::Grass => 0,
            LandClass::MidGrass => 1,
            LandClass::DryGround => 2,
            LandClass::Water => 3,
        };
        Self((class_bits << 6) | ((land_type & 0x0f) << 2) | (variant & 0x03))
    }

    pub fn land_class(self) -> LandClass {
        match self.0 >> 6 {
            0 => LandClass::Grass,
            1 => LandClass::MidGrass,
            2 => LandClass::DryGround,
            _ => LandClass::Water,
        }
    }

    pub fn land_type(self) -> LandType {
        match (self.0 >> 2) & 0x0f {
            0 => LandType::Center,
            1 => LandType::EdgeN,
            2 => LandType::EdgeE,
            3 => LandType::EdgeS,
            4 => LandType::EdgeW,
            5 => LandType::OuterNE,
            6 => LandType::OuterSE,
            7 => LandType::OuterSW,
            8 => LandType::OuterNW,
            9 => LandType::InnerNE,
            10 => LandType::InnerSE,
            11 => LandType::InnerSW,
            12 => LandType::InnerNW,
            // 13..=15 are all treated as special (trees, rocks, ...)
            _ => LandType::Special,
        }
    }

    pub fn variant(self) -> u8 {
        self.0 & 0x03
    }

    pub fn is_water(self) -> bool {
        self.land_class() == LandClass::Water
    }
}
