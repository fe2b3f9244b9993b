//! LRU texture cache with background loading and deterministic fallbacks
//!
//! The cache never talks to the GPU. Decoded images are queued for upload and
//! evicted ids are queued for destruction; the renderer drains both queues.

use std::collections::{HashMap, HashSet};

use image::RgbaImage;

use super::coords::PaletteIndex;
use super::loader::{decode_texture, ColorKey, FetchResult, TextureSource};
use super::EngineConfig;

/// GPU-side identity of a texture
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct TextureId(pub u32);

/// Built-in white diamond used for every flat-color fallback
pub const DIAMOND_TEXTURE: TextureId = TextureId(0);

/// Key color for road and pavement artwork
pub const ROAD_KEY_COLOR: [u8; 3] = [255, 0, 255];

/// Handle returned to layers
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TextureHandle {
    pub id: TextureId,
    pub width: u32,
    pub height: u32,
    /// Multiplied into the sprite tint
    pub tint: [f32; 4],
    pub fallback: bool,
}

impl TextureHandle {
    pub fn solid(id: TextureId, width: u32, height: u32, tint: [f32; 4]) -> Self {
        Self {
            id,
            width,
            height,
            tint,
            fallback: true,
        }
    }

    /// Flat diamond tinted `color`, sized for the authored 64 px tile
    pub fn diamond(color: [f32; 4]) -> Self {
        Self::solid(DIAMOND_TEXTURE, 64, 32, color)
    }
}

/// Cache partitions
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum TextureCategory {
    Terrain,
    Road,
    Concrete,
    Building,
}

/// Category plus parameters identifying one texture
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub enum TextureKey {
    Terrain {
        terrain_type: String,
        season: u8,
        palette: u8,
    },
    Road {
        file: String,
    },
    Concrete {
        file: String,
    },
    Building {
        class: String,
    },
}

impl TextureKey {
    pub fn category(&self) -> TextureCategory {
        match self {
            TextureKey::Terrain { .. } => TextureCategory::Terrain,
            TextureKey::Road { .. } => TextureCategory::Road,
            TextureKey::Concrete { .. } => TextureCategory::Concrete,
            TextureKey::Building { .. } => TextureCategory::Building,
        }
    }

    /// Path of the asset relative to the texture server root
    pub fn asset_path(&self) -> String {
        match self {
            TextureKey::Terrain {
                terrain_type,
                season,
                palette,
            } => format!("terrain/{}/{}/{}.png", terrain_type, season, palette),
            TextureKey::Road { file } => format!("roads/{}", file),
            TextureKey::Concrete { file } => format!("concrete/{}", file),
            TextureKey::Building { class } => format!("buildings/{}.png", class),
        }
    }

    fn color_key(&self) -> ColorKey {
        match self.category() {
            TextureCategory::Terrain | TextureCategory::Building => ColorKey::Corner,
            TextureCategory::Road | TextureCategory::Concrete => ColorKey::Fixed(ROAD_KEY_COLOR),
        }
    }
}

/// Image waiting to be uploaded by the renderer
pub struct TextureUpload {
    pub id: TextureId,
    pub image: RgbaImage,
}

struct CacheEntry {
    handle: TextureHandle,
    last_used: u64,
}

/// LRU cache for textures
pub struct TextureCache {
    entries: HashMap<TextureKey, CacheEntry>,
    pending: HashSet<TextureKey>,
    /// Keys whose fetch resolved to nothing; not re-requested implicitly
    missing: HashSet<TextureKey>,
    clock: u64,
    next_id: u32,
    capacity: usize,
    evict_fraction: f32,
    tolerance: u8,
    terrain_type: String,
    season: u8,
    uploads: Vec<TextureUpload>,
    releases: Vec<TextureId>,
    /// Ids dropped from the cache, for sprite-pool bookkeeping
    retired: Vec<TextureId>,
    evictions: u64,
}

impl TextureCache {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            entries: HashMap::new(),
            pending: HashSet::new(),
            missing: HashSet::new(),
            clock: 0,
            next_id: DIAMOND_TEXTURE.0 + 1,
            capacity: config.cache_capacity.max(1),
            evict_fraction: config.evict_fraction.clamp(0.01, 1.0),
            tolerance: config.color_key_tolerance,
            terrain_type: String::from("Earth"),
            season: 0,
            uploads: vec![TextureUpload {
                id: DIAMOND_TEXTURE,
                image: diamond_image(64, 32),
            }],
            releases: Vec::new(),
            retired: Vec::new(),
            evictions: 0,
        }
    }

    /// Switch terrain artwork; drops every terrain entry when it changes
    pub fn set_terrain_style(&mut self, terrain_type: &str, season: u8) -> bool {
        if self.terrain_type == terrain_type && self.season == season {
            return false;
        }
        self.terrain_type = terrain_type.to_string();
        self.season = season;
        self.invalidate_category(TextureCategory::Terrain);
        true
    }

    pub fn terrain_key(&self, palette: PaletteIndex) -> TextureKey {
        TextureKey::Terrain {
            terrain_type: self.terrain_type.clone(),
            season: self.season,
            palette: palette.0,
        }
    }

    /// Terrain texture, or a flat land-class color while it loads
    pub fn terrain_sync(&mut self, source: &mut dyn TextureSource, palette: PaletteIndex) -> TextureHandle {
        let key = self.terrain_key(palette);
        self.get_sync(source, key)
            .unwrap_or_else(|| TextureHandle::diamond(palette.land_class().fallback_color()))
    }

    pub fn road_sync(&mut self, source: &mut dyn TextureSource, file: &str) -> Option<TextureHandle> {
        self.get_sync(source, TextureKey::Road { file: file.to_string() })
    }

    pub fn concrete_sync(&mut self, source: &mut dyn TextureSource, file: &str) -> Option<TextureHandle> {
        self.get_sync(source, TextureKey::Concrete { file: file.to_string() })
    }

    pub fn building_sync(&mut self, source: &mut dyn TextureSource, class: &str) -> Option<TextureHandle> {
        self.get_sync(source, TextureKey::Building { class: class.to_string() })
    }

    /// Cached texture for `key`; starts a background fetch on a miss
    pub fn get_sync(&mut self, source: &mut dyn TextureSource, key: TextureKey) -> Option<TextureHandle> {
        self.clock += 1;
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.last_used = self.clock;
            return Some(entry.handle);
        }

        if !self.missing.contains(&key) {
            self.start_fetch(source, key);
        }
        None
    }

    /// Explicitly (re)request a texture, clearing an earlier miss
    pub fn request(&mut self, source: &mut dyn TextureSource, key: TextureKey) {
        self.missing.remove(&key);
        if !self.entries.contains_key(&key) {
            self.start_fetch(source, key);
        }
    }

    fn start_fetch(&mut self, source: &mut dyn TextureSource, key: TextureKey) {
        if self.pending.contains(&key) {
            return; // Already loading
        }
        source.request(&key);
        self.pending.insert(key);
    }

    /// Drain finished fetches; returns how many textures became available
    pub fn poll_loads(&mut self, source: &mut dyn TextureSource) -> usize {
        let mut installed = 0;
        while let Some(result) = source.poll() {
            let key = result.key().clone();
            self.pending.remove(&key);

            if self.is_stale(&key) {
                continue;
            }

            match result {
                FetchResult::Loaded(key, bytes) => match decode_texture(&bytes, key.color_key(), self.tolerance) {
                    Ok(image) => {
                        self.insert(key, image);
                        installed += 1;
                    }
                    Err(e) => {
                        log::warn!("Failed to decode {}: {}", key.asset_path(), e);
                        self.missing.insert(key);
                    }
                },
                FetchResult::Missing(key) => {
                    log::debug!("No texture for {}", key.asset_path());
                    self.missing.insert(key);
                }
                FetchResult::Failed(key, err) => {
                    log::warn!("Failed to fetch {}: {}", key.asset_path(), err);
                    self.missing.insert(key);
                }
            }
        }
        installed
    }

    /// Terrain results for a style that is no longer active
    fn is_stale(&self, key: &TextureKey) -> bool {
        match key {
            TextureKey::Terrain {
                terrain_type, season, ..
            } => *terrain_type != self.terrain_type || *season != self.season,
            _ => false,
        }
    }

    /// Store a decoded image, evicting old entries if over capacity
    pub fn insert(&mut self, key: TextureKey, image: RgbaImage) -> TextureHandle {
        let (width, height) = image.dimensions();
        let id = TextureId(self.next_id);
        self.next_id += 1;
        self.clock += 1;

        let handle = TextureHandle {
            id,
            width,
            height,
            tint: [1.0; 4],
            fallback: false,
        };

        if let Some(old) = self.entries.insert(
            key,
            CacheEntry {
                handle,
                last_used: self.clock,
            },
        ) {
            self.retire(old.handle.id);
        }
        self.uploads.push(TextureUpload { id, image });

        self.evict_if_needed();
        handle
    }

    /// Remove the least recently used share of entries once over capacity
    fn evict_if_needed(&mut self) {
        let len = self.entries.len();
        if len <= self.capacity {
            return;
        }

        let by_fraction = (len as f32 * self.evict_fraction).ceil() as usize;
        let count = by_fraction.max(len - self.capacity);

        let mut by_age: Vec<(u64, TextureKey)> = self
            .entries
            .iter()
            .map(|(key, entry)| (entry.last_used, key.clone()))
            .collect();
        by_age.sort_by_key(|(last_used, _)| *last_used);

        for (_, key) in by_age.into_iter().take(count) {
            if let Some(entry) = self.entries.remove(&key) {
                self.retire(entry.handle.id);
                self.evictions += 1;
            }
        }
        log::debug!("Evicted {} textures ({} remain)", count, self.entries.len());
    }

    /// Drop every entry of one category
    pub fn invalidate_category(&mut self, category: TextureCategory) {
        let doomed: Vec<TextureKey> = self
            .entries
            .keys()
            .filter(|key| key.category() == category)
            .cloned()
            .collect();
        for key in doomed {
            if let Some(entry) = self.entries.remove(&key) {
                self.retire(entry.handle.id);
            }
        }
        self.missing.retain(|key| key.category() != category);
    }

    /// Drop an id: a still-queued upload is discarded, otherwise the GPU
    /// texture is queued for release
    fn retire(&mut self, id: TextureId) {
        let queued = self.uploads.len();
        self.uploads.retain(|upload| upload.id != id);
        if self.uploads.len() == queued {
            self.releases.push(id);
        }
        self.retired.push(id);
    }

    /// Images decoded since the last call
    pub fn take_uploads(&mut self) -> Vec<TextureUpload> {
        std::mem::take(&mut self.uploads)
    }

    /// Texture ids whose GPU resources should be destroyed
    pub fn take_releases(&mut self) -> Vec<TextureId> {
        std::mem::take(&mut self.releases)
    }

    /// Every id dropped since the last call, uploaded or not
    pub fn take_retired(&mut self) -> Vec<TextureId> {
        std::mem::take(&mut self.retired)
    }

    pub fn contains(&self, key: &TextureKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn is_pending(&self, key: &TextureKey) -> bool {
        self.pending.contains(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let mut per_category = [0usize; 4];
        for key in self.entries.keys() {
            per_category[key.category() as usize] += 1;
        }
        CacheStats {
            texture_count: self.entries.len(),
            capacity: self.capacity,
            pending: self.pending.len(),
            evictions: self.evictions,
            per_category,
        }
    }
}

impl Default for TextureCache {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

/// Cache statistics for debugging/UI
#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    pub texture_count: usize,
    pub capacity: usize,
    pub pending: usize,
    pub evictions: u64,
    /// Indexed by `TextureCategory as usize`
    pub per_category: [usize; 4],
}

impl CacheStats {
    pub fn usage_percent(&self) -> f32 {
        if self.capacity == 0 {
            0.0
        } else {
            (self.texture_count as f32 / self.capacity as f32) * 100.0
        }
    }
}

/// Opaque white diamond inscribed in a `width` x `height` box
pub fn diamond_image(width: u32, height: u32) -> RgbaImage {
    let half_w = width as f32 / 2.0;
    let half_h = height as f32 / 2.0;
    RgbaImage::from_fn(width, height, |x, y| {
        let dx = ((x as f32 + 0.5) - half_w).abs() / half_w;
        let dy = ((y as f32 + 0.5) - half_h).abs() / half_h;
        if dx + dy <= 1.0 {
            image::Rgba([255, 255, 255, 255])
        } else {
            image::Rgba([0, 0, 0, 0])
        }
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::io::Cursor;

    /// Scripted source: requests complete on the next poll
    #[derive(Default)]
    pub(crate) struct MemorySource {
        pub assets: HashMap<TextureKey, Vec<u8>>,
        pub requests: Vec<TextureKey>,
        queue: VecDeque<TextureKey>,
    }

    impl MemorySource {
        pub fn with_asset(mut self, key: TextureKey, width: u32, height: u32) -> Self {
            self.assets.insert(key, png_bytes(width, height));
            self
        }
    }

    impl TextureSource for MemorySource {
        fn request(&mut self, key: &TextureKey) {
            self.requests.push(key.clone());
            self.queue.push_back(key.clone());
        }

        fn poll(&mut self) -> Option<FetchResult> {
            let key = self.queue.pop_front()?;
            Some(match self.assets.get(&key) {
                Some(bytes) => FetchResult::Loaded(key, bytes.clone()),
                None => FetchResult::Missing(key),
            })
        }
    }

    pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, image::Rgba([0, 0, 0, 255]));
        let mut out = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    fn road(n: usize) -> TextureKey {
        TextureKey::Road { file: format!("r{}.bmp", n) }
    }

    fn small_cache(capacity: usize) -> TextureCache {
        TextureCache::new(&EngineConfig {
            cache_capacity: capacity,
            ..EngineConfig::default()
        })
    }

    #[test]
    fn test_terrain_fallback_then_real_texture() {
        let mut cache = TextureCache::default();
        let key = cache.terrain_key(PaletteIndex(0));
        let mut source = MemorySource::default().with_asset(key.clone(), 64, 32);

        let first = cache.terrain_sync(&mut source, PaletteIndex(0));
        assert!(first.fallback);
        assert_eq!(first.id, DIAMOND_TEXTURE);
        assert!(cache.is_pending(&key));

        assert_eq!(cache.poll_loads(&mut source), 1);
        let second = cache.terrain_sync(&mut source, PaletteIndex(0));
        assert!(!second.fallback);
        assert_ne!(second.id, DIAMOND_TEXTURE);
        assert_eq!((second.width, second.height), (64, 32));
    }

    #[test]
    fn test_concurrent_requests_coalesced() {
        let mut cache = TextureCache::default();
        let mut source = MemorySource::default();
        for _ in 0..5 {
            assert!(cache.road_sync(&mut source, "RoadNS.bmp").is_none());
        }
        assert_eq!(source.requests.len(), 1);
    }

    #[test]
    fn test_missing_not_refetched_until_explicit_request() {
        let mut cache = TextureCache::default();
        let mut source = MemorySource::default();
        let key = TextureKey::Building { class: "1234".into() };

        assert!(cache.get_sync(&mut source, key.clone()).is_none());
        cache.poll_loads(&mut source);
        assert!(cache.get_sync(&mut source, key.clone()).is_none());
        assert_eq!(source.requests.len(), 1);

        cache.request(&mut source, key);
        assert_eq!(source.requests.len(), 2);
    }

    #[test]
    fn test_eviction_drops_least_recently_used() {
        let mut cache = small_cache(10);
        let mut source = MemorySource::default();
        for n in 0..10 {
            cache.insert(road(n), RgbaImage::new(1, 1));
        }
        // Touch the three oldest so they become the most recent
        for n in 0..3 {
            assert!(cache.get_sync(&mut source, road(n)).is_some());
        }
        cache.insert(road(10), RgbaImage::new(1, 1));

        assert!(cache.len() <= 10);
        // 20% of 11 rounds up to 3: entries 3, 4, 5 were the oldest
        for n in 3..6 {
            assert!(!cache.contains(&road(n)), "road {} should be evicted", n);
        }
        for n in (0..3).chain(6..11) {
            assert!(cache.contains(&road(n)), "road {} should survive", n);
        }
        assert_eq!(cache.stats().evictions, 3);
    }

    #[test]
    fn test_eviction_queues_gpu_release() {
        let mut cache = small_cache(2);
        let a = cache.insert(road(0), RgbaImage::new(1, 1));
        cache.insert(road(1), RgbaImage::new(1, 1));
        // The renderer has created both textures by now
        cache.take_uploads();
        cache.insert(road(2), RgbaImage::new(1, 1));
        assert_eq!(cache.take_releases(), vec![a.id]);
        assert_eq!(cache.take_retired(), vec![a.id]);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_style_switch_discards_queued_uploads() {
        let mut cache = TextureCache::default();
        let key = cache.terrain_key(PaletteIndex(0));
        let mut source = MemorySource::default().with_asset(key, 64, 32);
        cache.terrain_sync(&mut source, PaletteIndex(0));
        assert_eq!(cache.poll_loads(&mut source), 1);
        let loaded = cache.terrain_sync(&mut source, PaletteIndex(0));

        // Switched in the same frame, before the renderer drained anything
        assert!(cache.set_terrain_style("Alien", 1));
        let uploads: Vec<TextureId> = cache.take_uploads().iter().map(|u| u.id).collect();
        let releases = cache.take_releases();
        assert_eq!(uploads, vec![DIAMOND_TEXTURE]);
        assert!(releases.iter().all(|id| !uploads.contains(id)));
        assert!(releases.is_empty());
        assert_eq!(cache.take_retired(), vec![loaded.id]);
    }

    #[test]
    fn test_replaced_entry_never_in_both_queues() {
        let mut cache = TextureCache::default();
        let first = cache.insert(road(0), RgbaImage::new(1, 1));
        let second = cache.insert(road(0), RgbaImage::new(1, 1));
        let uploads: Vec<TextureId> = cache.take_uploads().iter().map(|u| u.id).collect();
        assert!(!uploads.contains(&first.id));
        assert!(uploads.contains(&second.id));
        assert!(cache.take_releases().is_empty());

        let third = cache.insert(road(0), RgbaImage::new(1, 1));
        assert_eq!(cache.take_releases(), vec![second.id]);
        assert_eq!(cache.take_uploads().len(), 1);
        assert_ne!(third.id, second.id);
    }

    #[test]
    fn test_terrain_style_switch_only_drops_terrain() {
        let mut cache = TextureCache::default();
        cache.insert(cache.terrain_key(PaletteIndex(4)), RgbaImage::new(1, 1));
        cache.insert(road(0), RgbaImage::new(1, 1));

        assert!(!cache.set_terrain_style("Earth", 0));
        assert!(cache.set_terrain_style("Alien", 2));
        assert_eq!(cache.stats().per_category[TextureCategory::Terrain as usize], 0);
        assert!(cache.contains(&road(0)));
    }

    #[test]
    fn test_stale_terrain_results_dropped() {
        let mut cache = TextureCache::default();
        let old_key = cache.terrain_key(PaletteIndex(0));
        let mut source = MemorySource::default().with_asset(old_key.clone(), 64, 32);
        cache.terrain_sync(&mut source, PaletteIndex(0));
        cache.set_terrain_style("Alien", 1);
        assert_eq!(cache.poll_loads(&mut source), 0);
        assert!(!cache.contains(&old_key));
    }

    #[test]
    fn test_diamond_uploaded_first() {
        let mut cache = TextureCache::default();
        let uploads = cache.take_uploads();
        assert_eq!(uploads[0].id, DIAMOND_TEXTURE);
        let img = &uploads[0].image;
        assert_eq!(img.get_pixel(32, 16)[3], 255);
        assert_eq!(img.get_pixel(0, 0)[3], 0);
    }
}
