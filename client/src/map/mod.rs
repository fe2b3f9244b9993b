//! Isometric world compositor: layers, texture cache, sprite pool and the
//! per-frame driver that ties them together

pub mod buildings;
pub mod cache;
pub mod camera;
pub mod concrete;
pub mod coords;
pub mod events;
pub mod loader;
pub mod overlay;
pub mod pool;
pub mod renderer;
pub mod roads;
pub mod sort_key;
pub mod terrain;

use std::collections::HashSet;
use std::sync::Arc;

use buildings::{footprint_tiles, urban_tiles, BuildingIndex, BuildingLayer, BuildingPlacement};
use cache::{CacheStats, TextureCache};
use camera::{IsoCamera, ViewportBounds};
use concrete::{ConcreteGrid, PavementLayer};
use coords::TileCoord;
use events::{EventBus, HostEvent, InputCommand, InputQueue, SubscriptionId};
use loader::TextureSource;
use overlay::{OverlayLayer, OverlayState, ZoneGrid};
use pool::{PoolStats, SpritePool};
use roads::{preview_path, RoadLayer, RoadNetwork, RoadSegment};
use terrain::{TerrainGrid, TerrainLayer};

/// Pointer travel in pixels before a press turns into a drag
const DRAG_THRESHOLD: f64 = 4.0;

/// Engine-wide settings
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub asset_base_url: String,
    pub user_agent: String,
    /// Texture count above which eviction kicks in
    pub cache_capacity: usize,
    /// Share of entries dropped per eviction
    pub evict_fraction: f32,
    /// Per-channel tolerance for color-key transparency
    pub color_key_tolerance: u8,
    /// Extra tiles kept around the visible window
    pub viewport_margin: i32,
    /// Side of a building-index bucket in tiles
    pub chunk_size: u32,
    pub initial_zoom: i32,
}

impl EngineConfig {
    /// Defaults with `ISOTILE_ASSET_URL` applied when set
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("ISOTILE_ASSET_URL") {
            config.asset_base_url = url;
        }
        config
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            asset_base_url: String::from("assets"),
            user_agent: String::from("IsoTile/0.1"),
            cache_capacity: 2000,
            evict_fraction: 0.2,
            color_key_tolerance: 8,
            viewport_margin: 2,
            chunk_size: 64,
            initial_zoom: 2,
        }
    }
}

/// Everything a layer needs during its update
pub struct LayerContext<'a> {
    pub pool: &'a mut SpritePool,
    pub cache: &'a mut TextureCache,
    pub source: &'a mut dyn TextureSource,
    pub camera: &'a IsoCamera,
    pub bounds: ViewportBounds,
}

#[derive(Clone, Copy, Debug, Default)]
struct DirtyFlags {
    terrain: bool,
    pavement: bool,
    roads: bool,
    buildings: bool,
    overlay: bool,
    viewport: bool,
}

impl DirtyFlags {
    fn any(&self) -> bool {
        self.terrain || self.pavement || self.roads || self.buildings || self.overlay || self.viewport
    }

    fn content(&mut self) {
        self.terrain = true;
        self.pavement = true;
        self.roads = true;
        self.buildings = true;
    }
}

/// What one tick did
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameStats {
    pub layers_updated: u32,
    pub sorted: bool,
    /// Sprites in use after the tick
    pub elements: usize,
    /// Sprites allocated during the tick
    pub allocations: u64,
    /// Sprites returned to the pool during the tick
    pub releases: u64,
    pub textures_installed: usize,
    pub frame_time_ms: f32,
}

#[derive(Clone, Copy, Debug)]
struct DragState {
    start: (f64, f64),
    last: (f64, f64),
    moved: bool,
}

/// Frame driver owning camera, data, layers and shared resources
pub struct Compositor {
    config: EngineConfig,
    pub camera: IsoCamera,
    cache: TextureCache,
    pool: SpritePool,

    terrain: Option<Arc<TerrainGrid>>,
    /// Placements as given by the host, before clipping to the map
    placed_buildings: Vec<BuildingPlacement>,
    placed_segments: Vec<RoadSegment>,
    buildings: Vec<BuildingPlacement>,
    building_index: BuildingIndex,
    roads: RoadNetwork,
    concrete: ConcreteGrid,
    /// Road tiles and footprints; terrain under them is flattened
    occupied: HashSet<TileCoord>,
    overlay: OverlayState,

    terrain_layer: TerrainLayer,
    pavement_layer: PavementLayer,
    road_layer: RoadLayer,
    building_layer: BuildingLayer,
    overlay_layer: OverlayLayer,

    dirty: DirtyFlags,
    bounds: Option<ViewportBounds>,
    hovered_building: Option<usize>,
    pointer: Option<(f64, f64)>,
    drag: Option<DragState>,
    input: InputQueue,
    events: EventBus,
    last_stats: FrameStats,
}

impl Compositor {
    pub fn new(config: EngineConfig, viewport_width: u32, viewport_height: u32) -> Self {
        let camera = IsoCamera::new(viewport_width, viewport_height, config.initial_zoom);
        let cache = TextureCache::new(&config);
        let building_index = BuildingIndex::new(config.chunk_size);

        Self {
            config,
            camera,
            cache,
            pool: SpritePool::new(),
            terrain: None,
            placed_buildings: Vec::new(),
            placed_segments: Vec::new(),
            buildings: Vec::new(),
            building_index,
            roads: RoadNetwork::new(),
            concrete: ConcreteGrid::new(),
            occupied: HashSet::new(),
            overlay: OverlayState::default(),
            terrain_layer: TerrainLayer::new(),
            pavement_layer: PavementLayer::new(),
            road_layer: RoadLayer::new(),
            building_layer: BuildingLayer::new(),
            overlay_layer: OverlayLayer::new(),
            dirty: DirtyFlags::default(),
            bounds: None,
            hovered_building: None,
            pointer: None,
            drag: None,
            input: InputQueue::default(),
            events: EventBus::new(),
            last_stats: FrameStats::default(),
        }
    }

    /// Map size as (rows, cols); (0, 0) before terrain is loaded
    pub fn map_size(&self) -> (u32, u32) {
        self.terrain
            .as_ref()
            .map(|grid| (grid.rows(), grid.cols()))
            .unwrap_or((0, 0))
    }

    /// Install a terrain grid and center the camera on it
    pub fn load_terrain(&mut self, grid: Arc<TerrainGrid>, terrain_type: &str, season: u8) {
        log::info!(
            "Loading {}x{} terrain ({}, season {})",
            grid.width,
            grid.height,
            terrain_type,
            season
        );
        self.cache.set_terrain_style(terrain_type, season);
        let (rows, cols) = (grid.rows(), grid.cols());
        self.terrain = Some(grid);
        self.camera
            .center_on(TileCoord::new(rows as i32 / 2, cols as i32 / 2), rows, cols);
        self.clip_buildings();
        self.clip_segments();
        self.rebuild_derived();
        self.dirty.content();
        self.dirty.viewport = true;
    }

    /// Switch terrain artwork without replacing the grid
    pub fn set_terrain_style(&mut self, terrain_type: &str, season: u8) {
        if self.cache.set_terrain_style(terrain_type, season) {
            self.dirty.terrain = true;
        }
    }

    /// Replace every building; footprints are clipped to the loaded map
    pub fn set_buildings(&mut self, buildings: Vec<BuildingPlacement>) {
        log::info!("Replacing buildings ({} placements)", buildings.len());
        self.placed_buildings = buildings;
        self.clip_buildings();
        self.rebuild_derived();
        self.dirty.content();
    }

    /// Replace every road segment; segments are clipped to the loaded map
    pub fn set_segments(&mut self, segments: Vec<RoadSegment>) {
        self.placed_segments = segments;
        self.clip_segments();
        self.rebuild_derived();
        self.dirty.content();
    }

    fn clip_buildings(&mut self) {
        let (rows, cols) = self.map_size();
        self.buildings.clear();
        if rows > 0 && cols > 0 {
            for b in &self.placed_buildings {
                match b.clipped(rows, cols) {
                    Some(clipped) => self.buildings.push(clipped),
                    None => log::warn!("Ignoring building {:?} outside the {}x{} map", b, rows, cols),
                }
            }
        } else if !self.placed_buildings.is_empty() {
            log::debug!("Holding {} buildings until terrain is loaded", self.placed_buildings.len());
        }
        self.building_index.rebuild(&self.buildings);
        self.hovered_building = None;
    }

    fn clip_segments(&mut self) {
        let (rows, cols) = self.map_size();
        if rows > 0 && cols > 0 {
            self.roads.set_segments(self.placed_segments.clone(), rows, cols);
        } else {
            if !self.placed_segments.is_empty() {
                log::debug!("Holding {} road segments until terrain is loaded", self.placed_segments.len());
            }
            self.roads.set_segments(Vec::new(), 0, 0);
        }
    }

    /// Recompute every tile-derived structure from scratch
    fn rebuild_derived(&mut self) {
        let terrain = self.terrain.as_deref();
        let urban = urban_tiles(&self.buildings);
        self.roads.rebuild(&urban, terrain);
        self.concrete.rebuild(&self.buildings, self.roads.tiles(), terrain);

        self.occupied = footprint_tiles(&self.buildings);
        self.occupied.extend(self.roads.tiles().iter().copied());
    }

    pub fn set_placement_mode(&mut self, enabled: bool, footprint: Option<(u32, u32)>) {
        self.overlay.placement = if enabled {
            let (xsize, ysize) = footprint.unwrap_or((1, 1));
            Some((xsize.max(1), ysize.max(1)))
        } else {
            None
        };
        if enabled {
            self.overlay.road_drawing = false;
            self.overlay.road_start = None;
        }
        self.refresh_placement_validity();
        self.dirty.overlay = true;
    }

    pub fn set_road_drawing_mode(&mut self, enabled: bool) {
        self.overlay.road_drawing = enabled;
        self.overlay.road_start = None;
        if enabled {
            self.overlay.placement = None;
        }
        self.dirty.overlay = true;
    }

    /// Show or hide zone coloring; without a grid the host is asked for data
    pub fn set_zone_overlay(&mut self, enabled: bool, zones: Option<ZoneGrid>) {
        self.overlay.zones_enabled = enabled;
        if zones.is_some() {
            self.overlay.zones = zones;
        } else if enabled {
            if let Some(bounds) = self.bounds {
                self.events.emit(HostEvent::ZoneDataRequested(bounds));
            }
        }
        self.dirty.overlay = true;
    }

    pub fn push_input(&mut self, command: InputCommand) {
        self.input.push(command);
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.camera.set_viewport(width, height);
        self.dirty.viewport = true;
    }

    pub fn subscribe(&mut self, callback: impl FnMut(&HostEvent) + 'static) -> SubscriptionId {
        self.events.subscribe(callback)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Advance one frame; returns the events delivered during the tick
    pub fn tick(&mut self, source: &mut dyn TextureSource) -> (FrameStats, Vec<HostEvent>) {
        let started = web_time::Instant::now();
        let allocations_before = self.pool.allocations();
        let releases_before = self.pool.releases();
        let mut stats = FrameStats::default();

        while let Some(command) = self.input.pop() {
            self.handle_input(command);
        }

        stats.textures_installed = self.cache.poll_loads(source);
        if stats.textures_installed > 0 {
            self.dirty.content();
        }
        for id in self.cache.take_retired() {
            self.pool.retire_texture(id);
        }

        if self.dirty.any() {
            let (rows, cols) = self.map_size();
            let bounds = self.camera.visible_bounds(rows, cols, self.config.viewport_margin);
            if bounds != self.bounds {
                if let Some(b) = bounds {
                    self.events.emit(HostEvent::ViewportChanged(b));
                    if self.overlay.zones_enabled {
                        self.events.emit(HostEvent::ZoneDataRequested(b));
                    }
                }
                self.bounds = bounds;
            }

            let all = self.dirty.viewport;
            let mut ctx = LayerContext {
                pool: &mut self.pool,
                cache: &mut self.cache,
                source,
                camera: &self.camera,
                bounds: bounds.unwrap_or(ViewportBounds::EMPTY),
            };
            let mut changed = false;

            if all || self.dirty.terrain {
                changed |= match &self.terrain {
                    Some(grid) => self.terrain_layer.update(&mut ctx, grid, &self.occupied),
                    None => self.terrain_layer.clear(&mut ctx),
                };
                stats.layers_updated += 1;
            }
            if all || self.dirty.pavement {
                changed |= self.pavement_layer.update(&mut ctx, &self.concrete, rows, cols);
                stats.layers_updated += 1;
            }
            if all || self.dirty.roads {
                changed |= self.road_layer.update(&mut ctx, &self.roads, rows, cols);
                stats.layers_updated += 1;
            }
            if all || self.dirty.buildings {
                changed |= self.building_layer.update(
                    &mut ctx,
                    &self.buildings,
                    &self.building_index,
                    self.hovered_building,
                    rows,
                    cols,
                );
                stats.layers_updated += 1;
            }
            if all || self.dirty.overlay {
                changed |= self.overlay_layer.update(&mut ctx, &self.overlay, rows, cols);
                stats.layers_updated += 1;
            }

            if changed {
                self.pool.sort();
                stats.sorted = true;
            }
            self.dirty = DirtyFlags::default();
        }

        stats.elements = self.pool.stats().in_use;
        stats.allocations = self.pool.allocations() - allocations_before;
        stats.releases = self.pool.releases() - releases_before;
        stats.frame_time_ms = started.elapsed().as_secs_f32() * 1000.0;
        self.last_stats = stats;

        (stats, self.events.dispatch())
    }

    fn handle_input(&mut self, command: InputCommand) {
        match command {
            InputCommand::PointerMoved { x, y } => self.pointer_moved(x, y),
            InputCommand::PointerPressed { x, y } => {
                self.drag = Some(DragState {
                    start: (x, y),
                    last: (x, y),
                    moved: false,
                });
                if self.overlay.road_drawing {
                    let (rows, cols) = self.map_size();
                    let tile = self.camera.tile_at(x, y, rows, cols);
                    if tile.in_bounds(rows, cols) {
                        self.overlay.road_start = Some(tile);
                        self.overlay.hover = Some(tile);
                        self.dirty.overlay = true;
                    }
                }
            }
            InputCommand::PointerReleased { x, y } => {
                let drag = self.drag.take();
                if let Some(start) = self.overlay.road_start.take() {
                    let (rows, cols) = self.map_size();
                    let end = self.clamp_tile(self.camera.tile_at(x, y, rows, cols));
                    for segment in preview_path(start, end) {
                        self.events.emit(HostEvent::RoadSegmentCompleted(segment));
                    }
                    self.dirty.overlay = true;
                } else if drag.is_some_and(|d| !d.moved) {
                    self.click(x, y);
                }
            }
            InputCommand::Wheel { notches, x, y } => {
                let (rows, cols) = self.map_size();
                if notches != 0 && self.camera.zoom_at(notches, x, y, rows, cols) {
                    self.dirty.viewport = true;
                }
            }
            InputCommand::Cancel => {
                if self.overlay.placement.is_some() {
                    self.set_placement_mode(false, None);
                    self.events.emit(HostEvent::PlacementCancelled);
                }
                if self.overlay.road_drawing {
                    self.set_road_drawing_mode(false);
                    self.events.emit(HostEvent::RoadDrawingCancelled);
                }
            }
            InputCommand::Resize { width, height } => self.resize(width, height),
        }
    }

    fn pointer_moved(&mut self, x: f64, y: f64) {
        self.pointer = Some((x, y));

        if let Some(drag) = self.drag.as_mut() {
            if self.overlay.road_start.is_none() {
                let travelled = (x - drag.start.0).hypot(y - drag.start.1);
                if travelled > DRAG_THRESHOLD {
                    drag.moved = true;
                }
                if drag.moved {
                    self.camera.pan(x - drag.last.0, y - drag.last.1);
                    self.dirty.viewport = true;
                }
                drag.last = (x, y);
            }
        }

        let (rows, cols) = self.map_size();
        let tile = self.camera.tile_at(x, y, rows, cols);
        let hover = tile.in_bounds(rows, cols).then_some(tile);
        if hover != self.overlay.hover {
            self.overlay.hover = hover;
            if self.overlay.placement.is_some() || self.overlay.road_drawing {
                self.refresh_placement_validity();
                self.dirty.overlay = true;
            }
        }

        let hovered_building = hover.and_then(|t| self.building_index.building_at(&self.buildings, t));
        if hovered_building != self.hovered_building {
            self.hovered_building = hovered_building;
            self.dirty.buildings = true;
        }
    }

    fn click(&mut self, x: f64, y: f64) {
        let (rows, cols) = self.map_size();
        let tile = self.camera.tile_at(x, y, rows, cols);
        if !tile.in_bounds(rows, cols) {
            return;
        }

        if let Some((xsize, ysize)) = self.overlay.placement {
            if self.placement_valid(tile, xsize, ysize) {
                self.events.emit(HostEvent::PlacementRequested {
                    x: tile.col,
                    y: tile.row,
                    xsize,
                    ysize,
                });
            }
            return;
        }

        if let Some(index) = self.building_index.building_at(&self.buildings, tile) {
            let b = &self.buildings[index];
            self.events.emit(HostEvent::BuildingClicked {
                x: b.x,
                y: b.y,
                class: b.class.clone(),
            });
        }
    }

    fn clamp_tile(&self, tile: TileCoord) -> TileCoord {
        let (rows, cols) = self.map_size();
        TileCoord::new(
            tile.row.clamp(0, rows.saturating_sub(1) as i32),
            tile.col.clamp(0, cols.saturating_sub(1) as i32),
        )
    }

    /// Footprint inside the map and clear of buildings and roads
    pub fn placement_valid(&self, origin: TileCoord, xsize: u32, ysize: u32) -> bool {
        let (rows, cols) = self.map_size();
        let candidate = BuildingPlacement::new(origin.col, origin.row, "", xsize, ysize);
        candidate.footprint().all(|tile| {
            tile.in_bounds(rows, cols)
                && !self.roads.has_road(tile)
                && self.building_index.building_at(&self.buildings, tile).is_none()
        })
    }

    fn refresh_placement_validity(&mut self) {
        self.overlay.placement_valid = match (self.overlay.placement, self.overlay.hover) {
            (Some((xsize, ysize)), Some(hover)) => self.placement_valid(hover, xsize, ysize),
            _ => false,
        };
    }

    pub fn pool(&self) -> &SpritePool {
        &self.pool
    }

    pub fn cache(&self) -> &TextureCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut TextureCache {
        &mut self.cache
    }

    pub fn roads(&self) -> &RoadNetwork {
        &self.roads
    }

    pub fn concrete(&self) -> &ConcreteGrid {
        &self.concrete
    }

    pub fn buildings(&self) -> &[BuildingPlacement] {
        &self.buildings
    }

    pub fn bounds(&self) -> Option<ViewportBounds> {
        self.bounds
    }

    pub fn hovered_tile(&self) -> Option<TileCoord> {
        self.overlay.hover
    }

    pub fn pointer(&self) -> Option<(f64, f64)> {
        self.pointer
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn last_stats(&self) -> FrameStats {
        self.last_stats
    }

    /// Elements per layer: terrain, tall terrain, pavement, roads, buildings, overlay
    pub fn layer_counts(&self) -> LayerCounts {
        LayerCounts {
            terrain: self.terrain_layer.element_count(),
            tall_terrain: self.terrain_layer.tall_count(),
            pavement: self.pavement_layer.element_count(),
            roads: self.road_layer.element_count(),
            buildings: self.building_layer.element_count(),
            overlay: self.overlay_layer.element_count(),
        }
    }
}

/// Element counts after the last update of each layer
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct LayerCounts {
    pub terrain: usize,
    pub tall_terrain: usize,
    pub pavement: usize,
    pub roads: usize,
    pub buildings: usize,
    pub overlay: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::cache::tests::{png_bytes, MemorySource};
    use crate::map::cache::TextureKey;
    use crate::map::coords::PaletteIndex;

    fn world(rows: u32, cols: u32) -> Compositor {
        let mut compositor = Compositor::new(EngineConfig::default(), 800, 600);
        compositor.load_terrain(Arc::new(TerrainGrid::filled(cols, rows, PaletteIndex(0))), "Earth", 0);
        compositor
    }

    #[test]
    fn test_idle_tick_does_nothing() {
        let mut compositor = world(8, 8);
        let mut source = MemorySource::default();
        let (first, _) = compositor.tick(&mut source);
        assert!(first.sorted);
        assert_eq!(first.layers_updated, 5);

        let (second, _) = compositor.tick(&mut source);
        assert_eq!(second.layers_updated, 0);
        assert!(!second.sorted);
    }

    #[test]
    fn test_pan_reuses_sprites() {
        let mut compositor = world(200, 200);
        let mut source = MemorySource::default();
        compositor.tick(&mut source);

        for _ in 0..3 {
            compositor.push_input(InputCommand::PointerPressed { x: 400.0, y: 300.0 });
            compositor.push_input(InputCommand::PointerMoved { x: 410.0, y: 300.0 });
            compositor.push_input(InputCommand::PointerReleased { x: 410.0, y: 300.0 });
            compositor.tick(&mut source);
            compositor.push_input(InputCommand::PointerPressed { x: 410.0, y: 300.0 });
            compositor.push_input(InputCommand::PointerMoved { x: 400.0, y: 300.0 });
            compositor.push_input(InputCommand::PointerReleased { x: 400.0, y: 300.0 });
            compositor.tick(&mut source);
        }
        let allocated = compositor.pool_stats().allocations;

        for _ in 0..3 {
            compositor.push_input(InputCommand::PointerPressed { x: 400.0, y: 300.0 });
            compositor.push_input(InputCommand::PointerMoved { x: 410.0, y: 300.0 });
            compositor.push_input(InputCommand::PointerReleased { x: 410.0, y: 300.0 });
            let (stats, _) = compositor.tick(&mut source);
            assert!(stats.layers_updated > 0);
            compositor.push_input(InputCommand::PointerPressed { x: 410.0, y: 300.0 });
            compositor.push_input(InputCommand::PointerMoved { x: 400.0, y: 300.0 });
            compositor.push_input(InputCommand::PointerReleased { x: 400.0, y: 300.0 });
            compositor.tick(&mut source);
        }
        assert_eq!(compositor.pool_stats().allocations, allocated);
    }

    #[test]
    fn test_click_reports_building() {
        let mut compositor = world(20, 20);
        compositor.set_buildings(vec![BuildingPlacement::new(9, 9, "office", 2, 2)]);
        let mut source = MemorySource::default();
        compositor.tick(&mut source);

        let (rows, cols) = compositor.map_size();
        let zoom = compositor.camera.zoom;
        let (x, y) = coords::map_to_screen(10.0, 10.0, rows, cols, &zoom);
        let (sx, sy) = compositor.camera.world_to_screen(x + zoom.u, y + zoom.u / 2.0);

        compositor.push_input(InputCommand::PointerPressed { x: sx, y: sy });
        compositor.push_input(InputCommand::PointerReleased { x: sx, y: sy });
        let (_, events) = compositor.tick(&mut source);
        assert!(events.contains(&HostEvent::BuildingClicked {
            x: 9,
            y: 9,
            class: "office".into()
        }));
    }

    #[test]
    fn test_escape_cancels_modes() {
        let mut compositor = world(8, 8);
        let mut source = MemorySource::default();
        compositor.set_placement_mode(true, Some((2, 2)));
        compositor.push_input(InputCommand::Cancel);
        let (_, events) = compositor.tick(&mut source);
        assert_eq!(
            events.iter().filter(|e| **e == HostEvent::PlacementCancelled).count(),
            1
        );

        compositor.set_road_drawing_mode(true);
        compositor.push_input(InputCommand::Cancel);
        let (_, events) = compositor.tick(&mut source);
        assert!(events.contains(&HostEvent::RoadDrawingCancelled));
        assert!(!events.contains(&HostEvent::PlacementCancelled));
    }

    #[test]
    fn test_road_drag_emits_segments() {
        let mut compositor = world(30, 30);
        compositor.set_road_drawing_mode(true);
        let mut source = MemorySource::default();
        compositor.tick(&mut source);

        let (rows, cols) = compositor.map_size();
        let zoom = compositor.camera.zoom;
        let center = |i: f64, j: f64| {
            let (x, y) = coords::map_to_screen(i, j, rows, cols, &zoom);
            compositor.camera.world_to_screen(x + zoom.u, y + zoom.u / 2.0)
        };
        let (ax, ay) = center(10.0, 10.0);
        let (bx, by) = center(12.0, 15.0);

        compositor.push_input(InputCommand::PointerPressed { x: ax, y: ay });
        compositor.push_input(InputCommand::PointerMoved { x: bx, y: by });
        compositor.push_input(InputCommand::PointerReleased { x: bx, y: by });
        let (_, events) = compositor.tick(&mut source);
        let segments: Vec<RoadSegment> = events
            .iter()
            .filter_map(|e| match e {
                HostEvent::RoadSegmentCompleted(s) => Some(*s),
                _ => None,
            })
            .collect();
        assert_eq!(segments, vec![RoadSegment::new(10, 10, 15, 10), RoadSegment::new(15, 10, 15, 12)]);
    }

    #[test]
    fn test_placement_validity() {
        let mut compositor = world(20, 20);
        compositor.set_buildings(vec![BuildingPlacement::new(5, 5, "x", 2, 2)]);
        compositor.set_segments(vec![RoadSegment::new(0, 10, 19, 10)]);
        assert!(compositor.placement_valid(TileCoord::new(0, 0), 3, 3));
        assert!(!compositor.placement_valid(TileCoord::new(4, 4), 2, 2));
        assert!(!compositor.placement_valid(TileCoord::new(9, 0), 2, 2));
        assert!(!compositor.placement_valid(TileCoord::new(19, 19), 2, 2));
    }

    #[test]
    fn test_out_of_range_placements_are_clipped() {
        let mut compositor = world(20, 20);
        compositor.set_segments(vec![
            RoadSegment::new(4, i32::MIN, 4, i32::MAX),
            RoadSegment::new(i32::MIN, -7, i32::MAX, -7),
        ]);
        compositor.set_buildings(vec![
            BuildingPlacement::new(i32::MIN, i32::MIN, "lost", 1, 1),
            BuildingPlacement::new(18, 10, "edge", 5, 1),
        ]);
        assert_eq!(compositor.roads().tiles().len(), 20);
        assert_eq!(compositor.buildings(), &[BuildingPlacement::new(18, 10, "edge", 2, 1)]);

        let mut source = MemorySource::default();
        let (stats, _) = compositor.tick(&mut source);
        assert!(stats.sorted);
        assert!(compositor.layer_counts().buildings <= 1);
    }

    #[test]
    fn test_placements_before_terrain_wait_for_map() {
        let mut compositor = Compositor::new(EngineConfig::default(), 800, 600);
        compositor.set_segments(vec![RoadSegment::new(0, 3, 30, 3)]);
        compositor.set_buildings(vec![BuildingPlacement::new(1, 1, "x", 1, 1)]);
        assert!(compositor.roads().tiles().is_empty());
        assert!(compositor.buildings().is_empty());

        compositor.load_terrain(Arc::new(TerrainGrid::filled(10, 10, PaletteIndex(0))), "Earth", 0);
        assert_eq!(compositor.roads().tiles().len(), 10);
        assert_eq!(compositor.buildings().len(), 1);
    }

    #[test]
    fn test_texture_arrival_requests_rerender() {
        let mut compositor = world(4, 4);
        let key = compositor.cache().terrain_key(PaletteIndex(0));
        let mut source = MemorySource::default().with_asset(key, 64, 32);
        compositor.tick(&mut source);
        let (stats, _) = compositor.tick(&mut source);
        assert_eq!(stats.textures_installed, 1);
        assert!(stats.layers_updated > 0);
        assert!(compositor.pool().draw_list().all(|s| s.texture != cache::DIAMOND_TEXTURE));
    }

    #[test]
    fn test_style_switches_keep_pool_size_flat() {
        let mut compositor = world(4, 4);
        let mut source = MemorySource::default();
        for style in ["Earth", "Alien"] {
            compositor.set_terrain_style(style, 0);
            let key = compositor.cache().terrain_key(PaletteIndex(0));
            source = source.with_asset(key, 64, 32);
        }

        let mut cycle = |compositor: &mut Compositor, style: &str| {
            compositor.set_terrain_style(style, 0);
            compositor.tick(&mut source);
            let (stats, _) = compositor.tick(&mut source);
            assert_eq!(stats.textures_installed, 1);
        };
        cycle(&mut compositor, "Earth");
        cycle(&mut compositor, "Alien");
        let warmed = compositor.pool_stats().total;

        for n in 0..10 {
            cycle(&mut compositor, if n % 2 == 0 { "Earth" } else { "Alien" });
        }
        let stats = compositor.pool_stats();
        assert_eq!(stats.total, warmed);
        assert_eq!(stats.in_use, 16);
    }

    #[test]
    fn test_road_and_pavement_layers_place_visible_tiles_only() {
        let mut compositor = world(400, 400);
        compositor.set_segments((0..400).step_by(4).map(|row| RoadSegment::new(0, row, 399, row)).collect());
        compositor.set_buildings(
            (0..400)
                .step_by(16)
                .flat_map(|row| (0..400).step_by(16).map(move |col| BuildingPlacement::new(col + 2, row + 2, "", 1, 1)))
                .collect(),
        );

        let mut source = MemorySource::default();
        for &tile in compositor.roads().tiles() {
            if let Some(file) = compositor.roads().texture_file(tile) {
                source.assets.insert(TextureKey::Road { file: file.to_string() }, png_bytes(64, 32));
            }
        }
        for &tile in compositor.concrete().occupied_tiles() {
            if let Some(file) = compositor.concrete().texture_file(tile) {
                source.assets.insert(TextureKey::Concrete { file }, png_bytes(64, 32));
            }
        }
        compositor.tick(&mut source);
        compositor.tick(&mut source);

        let bounds = compositor.bounds().unwrap();
        let roads = compositor.roads().tiles();
        let visible_roads = roads.iter().filter(|t| bounds.contains(**t)).count();
        assert!(visible_roads > 0 && visible_roads < roads.len());
        assert_eq!(compositor.layer_counts().roads, visible_roads);

        let concrete = compositor.concrete();
        let paved: Vec<TileCoord> = concrete
            .occupied_tiles()
            .copied()
            .filter(|t| concrete.variant(*t).is_some())
            .collect();
        let visible_paved = paved.iter().filter(|t| bounds.contains(**t)).count();
        assert!(visible_paved > 0 && visible_paved < paved.len());
        assert_eq!(compositor.layer_counts().pavement, visible_paved);
    }

    #[test]
    fn test_viewport_change_notifies_host() {
        let mut compositor = world(100, 100);
        let mut source = MemorySource::default();
        let (_, events) = compositor.tick(&mut source);
        assert!(matches!(events[0], HostEvent::ViewportChanged(_)));

        compositor.set_zone_overlay(true, None);
        let (_, events) = compositor.tick(&mut source);
        assert!(events.iter().any(|e| matches!(e, HostEvent::ZoneDataRequested(_))));
    }
}
