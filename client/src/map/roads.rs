//! Road topology inference and the road layer
//!
//! Screen directions under the isometric projection:
//!
//! | neighbor  | appears on screen |
//! |-----------|-------------------|
//! | row - 1   | south-east        |
//! | row + 1   | north-west        |
//! | col + 1   | north-east        |
//! | col - 1   | south-west        |
//!
//! Straight roads are named after the grid axis they follow (`NS` along rows,
//! `WE` along columns). Corners are named after the half of the diamond their
//! two arms occupy on screen, tees after the screen direction of their stem.

use std::collections::{HashMap, HashSet};

use super::coords::{tile_bottom_vertex, TileCoord};
use super::pool::{ElementKey, LayerBatch, Placement, SceneLayer};
use super::sort_key::{tile_sort_key, LayerPriority};
use super::terrain::TerrainGrid;
use super::LayerContext;

/// Upper bound on tiles reserved up front for one segment
const MAX_PREALLOC: usize = 4096;

/// Axis-aligned road segment; `x` is the column, `y` the row
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RoadSegment {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl RoadSegment {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn is_axis_aligned(&self) -> bool {
        self.x1 == self.x2 || self.y1 == self.y2
    }

    /// Tiles covered by the segment, endpoints included; `None` if diagonal
    pub fn tiles(&self) -> Option<Vec<TileCoord>> {
        if !self.is_axis_aligned() {
            return None;
        }
        let (r0, r1) = (self.y1.min(self.y2), self.y1.max(self.y2));
        let (c0, c1) = (self.x1.min(self.x2), self.x1.max(self.x2));
        let span = (r1 as i64 - r0 as i64) + (c1 as i64 - c0 as i64) + 1;
        let mut tiles = Vec::with_capacity(usize::try_from(span).unwrap_or(0).min(MAX_PREALLOC));
        for row in r0..=r1 {
            for col in c0..=c1 {
                tiles.push(TileCoord::new(row, col));
            }
        }
        Some(tiles)
    }

    /// The part of the segment inside a `rows` x `cols` map.
    ///
    /// `None` for diagonal segments and for segments that miss the map.
    /// Endpoints come back ordered low to high.
    pub fn clipped(&self, rows: u32, cols: u32) -> Option<RoadSegment> {
        if !self.is_axis_aligned() || rows == 0 || cols == 0 {
            return None;
        }
        let last_row = rows.min(i32::MAX as u32) as i32 - 1;
        let last_col = cols.min(i32::MAX as u32) as i32 - 1;
        let (r0, r1) = (self.y1.min(self.y2), self.y1.max(self.y2));
        let (c0, c1) = (self.x1.min(self.x2), self.x1.max(self.x2));
        if r1 < 0 || c1 < 0 || r0 > last_row || c0 > last_col {
            return None;
        }
        Some(RoadSegment::new(
            c0.max(0),
            r0.max(0),
            c1.min(last_col),
            r1.min(last_row),
        ))
    }
}

/// Connectivity shape of a road tile
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum Topology {
    None,
    NS,
    WE,
    CornerN,
    CornerE,
    CornerS,
    CornerW,
    TeeNE,
    TeeSE,
    TeeSW,
    TeeNW,
    Cross,
}

impl Topology {
    pub const ALL: [Topology; 12] = [
        Topology::None,
        Topology::NS,
        Topology::WE,
        Topology::CornerN,
        Topology::CornerE,
        Topology::CornerS,
        Topology::CornerW,
        Topology::TeeNE,
        Topology::TeeSE,
        Topology::TeeSW,
        Topology::TeeNW,
        Topology::Cross,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Topology::None => "None",
            Topology::NS => "NS",
            Topology::WE => "WE",
            Topology::CornerN => "CornerN",
            Topology::CornerE => "CornerE",
            Topology::CornerS => "CornerS",
            Topology::CornerW => "CornerW",
            Topology::TeeNE => "TeeNE",
            Topology::TeeSE => "TeeSE",
            Topology::TeeSW => "TeeSW",
            Topology::TeeNW => "TeeNW",
            Topology::Cross => "Cross",
        }
    }

    pub fn is_straight(self) -> bool {
        matches!(self, Topology::NS | Topology::WE)
    }

    pub fn is_corner(self) -> bool {
        matches!(
            self,
            Topology::CornerN | Topology::CornerE | Topology::CornerS | Topology::CornerW
        )
    }

    /// Offsets (d_row, d_col) that continue a staircase through this corner
    pub fn staircase_checks(self) -> Option<[(i32, i32); 2]> {
        match self {
            Topology::CornerN | Topology::CornerS => Some([(1, -1), (-1, 1)]),
            Topology::CornerE | Topology::CornerW => Some([(1, 1), (-1, -1)]),
            _ => None,
        }
    }
}

/// Presence of the four cardinal neighbors, named by screen direction
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Neighbors {
    /// row + 1
    pub nw: bool,
    /// col + 1
    pub ne: bool,
    /// row - 1
    pub se: bool,
    /// col - 1
    pub sw: bool,
}

impl Neighbors {
    pub fn of(tile: TileCoord, roads: &HashSet<TileCoord>) -> Self {
        Self {
            nw: roads.contains(&tile.offset(1, 0)),
            ne: roads.contains(&tile.offset(0, 1)),
            se: roads.contains(&tile.offset(-1, 0)),
            sw: roads.contains(&tile.offset(0, -1)),
        }
    }

    pub fn count(&self) -> usize {
        [self.nw, self.ne, self.se, self.sw].iter().filter(|b| **b).count()
    }
}

/// Classify a tile from its neighbors.
///
/// An isolated tile classifies as `Cross` for compatibility with existing
/// maps, although a lone tile drawing a full junction is likely unintended.
pub fn classify(n: Neighbors) -> Topology {
    match n.count() {
        4 => Topology::Cross,
        3 => {
            // The stem points away from the missing arm
            if !n.se {
                Topology::TeeNW
            } else if !n.nw {
                Topology::TeeSE
            } else if !n.sw {
                Topology::TeeNE
            } else {
                Topology::TeeSW
            }
        }
        2 => {
            if n.nw && n.se {
                Topology::NS
            } else if n.ne && n.sw {
                Topology::WE
            } else if n.nw && n.ne {
                Topology::CornerN
            } else if n.ne && n.se {
                Topology::CornerE
            } else if n.se && n.sw {
                Topology::CornerS
            } else {
                Topology::CornerW
            }
        }
        1 => {
            if n.nw || n.se {
                Topology::NS
            } else {
                Topology::WE
            }
        }
        _ => Topology::Cross,
    }
}

/// Artwork file for a road tile.
///
/// Priority: bridge (water, straight only) > smooth corner > standard.
pub fn road_texture_file(topology: Topology, urban: bool, on_water: bool, smooth: bool) -> Option<String> {
    if topology == Topology::None {
        return None;
    }
    let prefix = if urban { "Urban" } else { "Country" };
    let file = if on_water && topology.is_straight() {
        format!("{}RoadBridge{}.bmp", prefix, topology.name())
    } else if smooth && topology.is_corner() {
        format!("{}RoadSmooth{}.bmp", prefix, topology.name())
    } else {
        format!("{}Road{}.bmp", prefix, topology.name())
    };
    Some(file)
}

/// Road tiles plus every tile-derived cache.
///
/// Caches are rebuilt as a unit whenever roads, buildings or terrain change.
#[derive(Default)]
pub struct RoadNetwork {
    segments: Vec<RoadSegment>,
    tiles: HashSet<TileCoord>,
    topology: HashMap<TileCoord, Topology>,
    smooth: HashMap<TileCoord, bool>,
    files: HashMap<TileCoord, String>,
}

impl RoadNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every segment, clipped to a `rows` x `cols` map.
    ///
    /// Diagonal segments and segments entirely off the map are dropped.
    pub fn set_segments(&mut self, segments: Vec<RoadSegment>, rows: u32, cols: u32) {
        self.tiles.clear();
        self.segments.clear();
        for segment in segments {
            if !segment.is_axis_aligned() {
                log::warn!("Ignoring diagonal road segment {:?}", segment);
                continue;
            }
            let Some(clipped) = segment.clipped(rows, cols) else {
                log::warn!("Ignoring road segment {:?} outside the {}x{} map", segment, rows, cols);
                continue;
            };
            if let Some(tiles) = clipped.tiles() {
                self.tiles.extend(tiles);
                self.segments.push(clipped);
            }
        }
        self.topology.clear();
        self.smooth.clear();
        self.files.clear();
        log::info!("{} road segments cover {} tiles", self.segments.len(), self.tiles.len());
    }

    /// Recompute topology, smooth-corner and texture caches from scratch
    pub fn rebuild(&mut self, urban: &HashSet<TileCoord>, terrain: Option<&TerrainGrid>) {
        self.topology.clear();
        self.smooth.clear();
        self.files.clear();

        for &tile in &self.tiles {
            let topology = classify(Neighbors::of(tile, &self.tiles));
            let smooth = topology.staircase_checks().is_some_and(|checks| {
                !checks
                    .iter()
                    .any(|(dr, dc)| self.tiles.contains(&tile.offset(*dr, *dc)))
            });
            let on_water = terrain.is_some_and(|grid| grid.is_water(tile));

            self.topology.insert(tile, topology);
            self.smooth.insert(tile, smooth);
            if let Some(file) = road_texture_file(topology, urban.contains(&tile), on_water, smooth) {
                self.files.insert(tile, file);
            }
        }
    }

    pub fn segments(&self) -> &[RoadSegment] {
        &self.segments
    }

    pub fn tiles(&self) -> &HashSet<TileCoord> {
        &self.tiles
    }

    pub fn has_road(&self, tile: TileCoord) -> bool {
        self.tiles.contains(&tile)
    }

    pub fn topology(&self, tile: TileCoord) -> Topology {
        self.topology.get(&tile).copied().unwrap_or(Topology::None)
    }

    pub fn is_smooth_corner(&self, tile: TileCoord) -> bool {
        self.smooth.get(&tile).copied().unwrap_or(false)
    }

    pub fn texture_file(&self, tile: TileCoord) -> Option<&str> {
        self.files.get(&tile).map(String::as_str)
    }
}

/// L-shaped preview path from `start` to `end`, dominant axis first
pub fn preview_path(start: TileCoord, end: TileCoord) -> Vec<RoadSegment> {
    let d_row = (end.row - start.row).abs();
    let d_col = (end.col - start.col).abs();
    let elbow = if d_col >= d_row {
        TileCoord::new(start.row, end.col)
    } else {
        TileCoord::new(end.row, start.col)
    };

    let mut path = vec![RoadSegment::new(start.col, start.row, elbow.col, elbow.row)];
    if elbow != end {
        path.push(RoadSegment::new(elbow.col, elbow.row, end.col, end.row));
    }
    path
}

/// Road layer: one textured element per visible road tile
pub struct RoadLayer {
    batch: LayerBatch,
}

impl RoadLayer {
    pub fn new() -> Self {
        Self {
            batch: LayerBatch::new(SceneLayer::World),
        }
    }

    pub fn update(&mut self, ctx: &mut LayerContext, network: &RoadNetwork, rows: u32, cols: u32) -> bool {
        self.batch.begin_frame();
        let zoom = ctx.camera.zoom;
        let scale = zoom.texture_scale() as f32;

        for tile in ctx.bounds.tiles() {
            let Some(file) = network.texture_file(tile) else {
                continue;
            };
            // Missing road artwork renders nothing
            let Some(texture) = ctx.cache.road_sync(ctx.source, file) else {
                continue;
            };

            let (bx, by) = tile_bottom_vertex(tile.row, tile.col, rows, cols, &zoom);
            let placement =
                Placement::at(bx, by, tile_sort_key(tile.row, tile.col, LayerPriority::Road)).with_scale(scale);
            self.batch
                .set_element(ctx.pool, ElementKey::tile(tile.row, tile.col), &texture, placement);
        }

        self.batch.end_frame(ctx.pool)
    }

    pub fn element_count(&self) -> usize {
        self.batch.len()
    }
}

impl Default for RoadLayer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::coords::{LandClass, PaletteIndex};

    fn network(tiles: &[(i32, i32)]) -> RoadNetwork {
        let segments = tiles
            .iter()
            .map(|(r, c)| RoadSegment::new(*c, *r, *c, *r))
            .collect();
        let mut net = RoadNetwork::new();
        net.set_segments(segments, 16, 16);
        net.rebuild(&HashSet::new(), None);
        net
    }

    #[test]
    fn test_all_neighbor_sets_classify() {
        for bits in 0u8..16 {
            let n = Neighbors {
                nw: bits & 1 != 0,
                ne: bits & 2 != 0,
                se: bits & 4 != 0,
                sw: bits & 8 != 0,
            };
            let topology = classify(n);
            assert_ne!(topology, Topology::None, "bits {:04b}", bits);
            assert!(Topology::ALL.contains(&topology));
            assert_eq!(classify(n), topology);
        }
    }

    #[test]
    fn test_neighbor_table() {
        let n = |nw, ne, se, sw| Neighbors { nw, ne, se, sw };
        assert_eq!(classify(n(true, true, true, true)), Topology::Cross);
        assert_eq!(classify(n(true, true, false, true)), Topology::TeeNW);
        assert_eq!(classify(n(false, true, true, true)), Topology::TeeSE);
        assert_eq!(classify(n(true, true, true, false)), Topology::TeeNE);
        assert_eq!(classify(n(true, false, true, true)), Topology::TeeSW);
        assert_eq!(classify(n(true, false, true, false)), Topology::NS);
        assert_eq!(classify(n(false, true, false, true)), Topology::WE);
        assert_eq!(classify(n(true, true, false, false)), Topology::CornerN);
        assert_eq!(classify(n(false, true, true, false)), Topology::CornerE);
        assert_eq!(classify(n(false, false, true, true)), Topology::CornerS);
        assert_eq!(classify(n(true, false, false, true)), Topology::CornerW);
        assert_eq!(classify(n(false, false, true, false)), Topology::NS);
        assert_eq!(classify(n(false, false, false, true)), Topology::WE);
        assert_eq!(classify(Neighbors::default()), Topology::Cross);
    }

    #[test]
    fn test_plus_shape() {
        let net = network(&[(2, 2), (1, 2), (3, 2), (2, 1), (2, 3)]);
        assert_eq!(net.topology(TileCoord::new(2, 2)), Topology::Cross);
        assert_eq!(net.topology(TileCoord::new(1, 2)), Topology::NS);
        assert_eq!(net.topology(TileCoord::new(3, 2)), Topology::NS);
        assert_eq!(net.topology(TileCoord::new(2, 1)), Topology::WE);
        assert_eq!(net.topology(TileCoord::new(2, 3)), Topology::WE);
        assert_eq!(net.topology(TileCoord::new(0, 0)), Topology::None);
    }

    #[test]
    fn test_isolated_corner_is_smooth() {
        // (5,5) with arms to row+1 and col+1
        let net = network(&[(5, 5), (6, 5), (5, 6)]);
        let corner = TileCoord::new(5, 5);
        assert_eq!(net.topology(corner), Topology::CornerN);
        assert!(net.is_smooth_corner(corner));
        assert_eq!(net.texture_file(corner), Some("CountryRoadSmoothCornerN.bmp"));
    }

    #[test]
    fn test_staircase_corners_not_smooth() {
        let net = network(&[(0, 0), (0, 1), (1, 1), (1, 2), (2, 2)]);
        let corner = TileCoord::new(0, 1);
        assert!(net.topology(corner).is_corner());
        assert!(!net.is_smooth_corner(corner));
        assert!(!net.is_smooth_corner(TileCoord::new(1, 1)));
        assert_eq!(net.texture_file(corner), Some("CountryRoadCornerW.bmp"));
    }

    #[test]
    fn test_bridge_and_urban_selection() {
        let mut grid_indices = vec![0u8; 25];
        let water = PaletteIndex::from_parts(LandClass::Water, 0, 0).0;
        for col in 0..5 {
            grid_indices[2 * 5 + col] = water;
        }
        let grid = TerrainGrid::new(5, 5, grid_indices);
        let mut net = RoadNetwork::new();
        net.set_segments(vec![RoadSegment::new(2, 0, 2, 4)], 5, 5);
        let urban: HashSet<TileCoord> = [TileCoord::new(0, 2)].into_iter().collect();
        net.rebuild(&urban, Some(&grid));

        assert_eq!(net.texture_file(TileCoord::new(2, 2)), Some("CountryRoadBridgeNS.bmp"));
        assert_eq!(net.texture_file(TileCoord::new(0, 2)), Some("UrbanRoadNS.bmp"));
        assert_eq!(net.texture_file(TileCoord::new(3, 2)), Some("CountryRoadNS.bmp"));
    }

    #[test]
    fn test_diagonal_segment_ignored() {
        let mut net = RoadNetwork::new();
        net.set_segments(vec![RoadSegment::new(0, 0, 3, 3), RoadSegment::new(0, 0, 3, 0)], 8, 8);
        assert_eq!(net.segments().len(), 1);
        assert_eq!(net.tiles().len(), 4);
    }

    #[test]
    fn test_full_range_segment_is_clipped() {
        let wide = RoadSegment::new(3, i32::MIN, 3, i32::MAX);
        assert_eq!(wide.clipped(8, 8), Some(RoadSegment::new(3, 0, 3, 7)));

        let mut net = RoadNetwork::new();
        net.set_segments(
            vec![wide, RoadSegment::new(i32::MIN, 2, i32::MAX, 2), RoadSegment::new(-1_000_000, 5, 1_000_000, 5)],
            8,
            8,
        );
        assert_eq!(net.segments().len(), 3);
        assert_eq!(net.tiles().len(), 8 + 7 + 7);
        assert!(net.tiles().iter().all(|t| t.in_bounds(8, 8)));
    }

    #[test]
    fn test_off_map_segments_dropped() {
        assert_eq!(RoadSegment::new(0, -5, 4, -5).clipped(8, 8), None);
        assert_eq!(RoadSegment::new(8, 0, 8, 3).clipped(8, 8), None);
        assert_eq!(RoadSegment::new(0, 0, 0, 3).clipped(0, 0), None);

        let mut net = RoadNetwork::new();
        net.set_segments(vec![RoadSegment::new(i32::MIN, i32::MIN, i32::MIN + 9, i32::MIN)], 8, 8);
        assert!(net.segments().is_empty());
        assert!(net.tiles().is_empty());
    }

    #[test]
    fn test_preview_path_is_l_shaped() {
        let path = preview_path(TileCoord::new(0, 0), TileCoord::new(2, 5));
        assert_eq!(path, vec![RoadSegment::new(0, 0, 5, 0), RoadSegment::new(5, 0, 5, 2)]);
        let straight = preview_path(TileCoord::new(3, 3), TileCoord::new(7, 3));
        assert_eq!(straight, vec![RoadSegment::new(3, 3, 3, 7)]);
    }
}
