//! Recycled sprite instances and per-layer placement tracking
//!
//! The pool owns every sprite in the scene. Layers never hold sprites
//! directly; they go through a [`LayerBatch`] which maps a stable element key
//! to the sprite currently placed there.

use std::collections::{HashMap, HashSet};

use super::cache::{TextureHandle, TextureId};

/// Index of a sprite slot inside the pool
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct SpriteId(u32);

/// Scene container a sprite is attached to
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SceneLayer {
    /// Sorted world content (terrain, pavement, roads, buildings)
    World,
    /// Unsorted UI-space content drawn after the world
    Overlay,
}

/// A GPU-drawable textured quad
#[derive(Clone, Debug)]
pub struct Sprite {
    pub texture: TextureId,
    /// World-pixel position of the anchor point
    pub x: f64,
    pub y: f64,
    /// Texture size in texels
    pub width: u32,
    pub height: u32,
    pub scale: f32,
    /// Normalized anchor inside the texture, (0, 0) = top-left
    pub anchor: [f32; 2],
    pub tint: [f32; 4],
    pub alpha: f32,
    pub sort_key: i64,
    pub visible: bool,
    pub layer: SceneLayer,
}

impl Sprite {
    fn new(texture: TextureId, layer: SceneLayer) -> Self {
        Self {
            texture,
            x: 0.0,
            y: 0.0,
            width: 0,
            height: 0,
            scale: 1.0,
            anchor: [0.0, 0.0],
            tint: [1.0; 4],
            alpha: 1.0,
            sort_key: 0,
            visible: true,
            layer,
        }
    }

    fn reset(&mut self, layer: SceneLayer) {
        let texture = self.texture;
        *self = Sprite::new(texture, layer);
    }

    /// Screen-space rectangle (left, top, right, bottom) in world pixels
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        let w = self.width as f64 * self.scale as f64;
        let h = self.height as f64 * self.scale as f64;
        let left = self.x - w * self.anchor[0] as f64;
        let top = self.y - h * self.anchor[1] as f64;
        (left, top, left + w, top + h)
    }
}

/// Where and how a layer wants an element drawn
#[derive(Clone, Copy, Debug)]
pub struct Placement {
    pub x: f64,
    pub y: f64,
    pub scale: f32,
    pub anchor: [f32; 2],
    pub tint: [f32; 4],
    pub alpha: f32,
    pub sort_key: i64,
}

impl Placement {
    pub fn at(x: f64, y: f64, sort_key: i64) -> Self {
        Self {
            x,
            y,
            scale: 1.0,
            anchor: [0.5, 1.0],
            tint: [1.0; 4],
            alpha: 1.0,
            sort_key,
        }
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_anchor(mut self, anchor: [f32; 2]) -> Self {
        self.anchor = anchor;
        self
    }

    pub fn with_tint(mut self, tint: [f32; 4]) -> Self {
        self.tint = tint;
        self
    }

    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha;
        self
    }
}

/// Pool statistics for debugging/UI
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStats {
    pub allocations: u64,
    pub releases: u64,
    pub total: usize,
    pub in_use: usize,
    pub free: usize,
}

/// Arena of sprites with per-texture free lists.
///
/// Slots freed under a texture id the cache has dropped move to a shared
/// list and are rebound to whichever texture asks next.
#[derive(Default)]
pub struct SpritePool {
    sprites: Vec<Sprite>,
    free: HashMap<TextureId, Vec<SpriteId>>,
    spare: Vec<SpriteId>,
    /// Sprites in use per texture id
    live: HashMap<TextureId, usize>,
    /// Dropped ids that still have sprites in use
    retired: HashSet<TextureId>,
    free_count: usize,
    allocations: u64,
    releases: u64,
    world_order: Vec<SpriteId>,
    overlay_order: Vec<SpriteId>,
}

impl SpritePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a sprite for `texture`, recycling a released one when possible
    pub fn acquire(&mut self, texture: TextureId, layer: SceneLayer) -> SpriteId {
        *self.live.entry(texture).or_insert(0) += 1;

        if let Some(id) = self.free.get_mut(&texture).and_then(|list| list.pop()) {
            self.free_count -= 1;
            self.sprites[id.0 as usize].reset(layer);
            return id;
        }
        if let Some(id) = self.spare.pop() {
            self.free_count -= 1;
            let sprite = &mut self.sprites[id.0 as usize];
            sprite.texture = texture;
            sprite.reset(layer);
            return id;
        }

        let id = SpriteId(self.sprites.len() as u32);
        self.sprites.push(Sprite::new(texture, layer));
        self.allocations += 1;
        id
    }

    /// Hide a sprite and return it to the free list of its texture
    pub fn release(&mut self, id: SpriteId) {
        let sprite = &mut self.sprites[id.0 as usize];
        sprite.visible = false;
        let texture = sprite.texture;

        let remaining = match self.live.get_mut(&texture) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => 0,
        };
        if remaining == 0 {
            self.live.remove(&texture);
        }

        if self.retired.contains(&texture) {
            if remaining == 0 {
                self.retired.remove(&texture);
            }
            self.spare.push(id);
        } else {
            self.free.entry(texture).or_default().push(id);
        }
        self.free_count += 1;
        self.releases += 1;
    }

    /// Stop reserving slots for a texture id that will never be drawn again
    pub fn retire_texture(&mut self, texture: TextureId) {
        if let Some(slots) = self.free.remove(&texture) {
            self.spare.extend(slots);
        }
        if self.live.contains_key(&texture) {
            self.retired.insert(texture);
        }
    }

    pub fn get(&self, id: SpriteId) -> &Sprite {
        &self.sprites[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: SpriteId) -> &mut Sprite {
        &mut self.sprites[id.0 as usize]
    }

    /// Number of sprites ever allocated (never decreases)
    pub fn allocations(&self) -> u64 {
        self.allocations
    }

    /// Number of releases so far
    pub fn releases(&self) -> u64 {
        self.releases
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocations: self.allocations,
            releases: self.releases,
            total: self.sprites.len(),
            in_use: self.sprites.len() - self.free_count,
            free: self.free_count,
        }
    }

    /// Rebuild both draw lists; world content is ordered by sort key.
    ///
    /// Ties keep slot order so the result is deterministic between frames.
    pub fn sort(&mut self) {
        self.world_order.clear();
        self.overlay_order.clear();
        for (index, sprite) in self.sprites.iter().enumerate() {
            if !sprite.visible {
                continue;
            }
            let id = SpriteId(index as u32);
            match sprite.layer {
                SceneLayer::World => self.world_order.push(id),
                SceneLayer::Overlay => self.overlay_order.push(id),
            }
        }
        let sprites = &self.sprites;
        self.world_order
            .sort_by_key(|id| (sprites[id.0 as usize].sort_key, id.0));
    }

    /// Visible sprites in draw order: sorted world content, then overlay
    pub fn draw_list(&self) -> impl Iterator<Item = &Sprite> {
        self.world_order
            .iter()
            .chain(self.overlay_order.iter())
            .map(|id| &self.sprites[id.0 as usize])
            .filter(|sprite| sprite.visible)
    }
}

/// Stable identity of an element within one layer
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct ElementKey {
    pub row: i32,
    pub col: i32,
    /// Distinguishes several elements anchored on the same tile
    pub slot: u16,
}

impl ElementKey {
    pub fn tile(row: i32, col: i32) -> Self {
        Self { row, col, slot: 0 }
    }

    pub fn with_slot(row: i32, col: i32, slot: u16) -> Self {
        Self { row, col, slot }
    }
}

#[derive(Clone, Copy, Debug)]
struct Placed {
    texture: TextureId,
    sprite: SpriteId,
}

/// Per-layer frame cycle over the shared pool.
///
/// `begin_frame` / `set_element`* / `end_frame`: every element not set during
/// the cycle is released at `end_frame`.
pub struct LayerBatch {
    layer: SceneLayer,
    placed: HashMap<ElementKey, Placed>,
    touched: HashSet<ElementKey>,
    changed: bool,
}

impl LayerBatch {
    pub fn new(layer: SceneLayer) -> Self {
        Self {
            layer,
            placed: HashMap::new(),
            touched: HashSet::new(),
            changed: false,
        }
    }

    pub fn begin_frame(&mut self) {
        self.touched.clear();
        self.changed = false;
    }

    /// Create or update the element at `key`
    pub fn set_element(
        &mut self,
        pool: &mut SpritePool,
        key: ElementKey,
        texture: &TextureHandle,
        placement: Placement,
    ) {
        self.touched.insert(key);

        let sprite_id = match self.placed.get(&key) {
            Some(placed) if placed.texture == texture.id => placed.sprite,
            Some(placed) => {
                // Instances are never shared across texture identities
                pool.release(placed.sprite);
                let sprite = pool.acquire(texture.id, self.layer);
                self.placed.insert(key, Placed { texture: texture.id, sprite });
                self.changed = true;
                sprite
            }
            None => {
                let sprite = pool.acquire(texture.id, self.layer);
                self.placed.insert(key, Placed { texture: texture.id, sprite });
                self.changed = true;
                sprite
            }
        };

        let sprite = pool.get_mut(sprite_id);
        if sprite.sort_key != placement.sort_key {
            self.changed = true;
        }
        sprite.x = placement.x;
        sprite.y = placement.y;
        sprite.width = texture.width;
        sprite.height = texture.height;
        sprite.scale = placement.scale;
        sprite.anchor = placement.anchor;
        sprite.tint = [
            texture.tint[0] * placement.tint[0],
            texture.tint[1] * placement.tint[1],
            texture.tint[2] * placement.tint[2],
            texture.tint[3] * placement.tint[3],
        ];
        sprite.alpha = placement.alpha;
        sprite.sort_key = placement.sort_key;
        sprite.visible = true;
    }

    /// Release everything not touched this frame; returns true when the set of
    /// elements or any sort key changed
    pub fn end_frame(&mut self, pool: &mut SpritePool) -> bool {
        let stale: Vec<ElementKey> = self
            .placed
            .keys()
            .filter(|key| !self.touched.contains(key))
            .copied()
            .collect();

        for key in stale {
            if let Some(placed) = self.placed.remove(&key) {
                pool.release(placed.sprite);
                self.changed = true;
            }
        }

        self.changed
    }

    /// Release every element of this layer
    pub fn clear(&mut self, pool: &mut SpritePool) -> bool {
        self.begin_frame();
        self.end_frame(pool)
    }

    pub fn len(&self) -> usize {
        self.placed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.placed.is_empty()
    }

    pub fn sprite_at(&self, key: &ElementKey) -> Option<SpriteId> {
        self.placed.get(key).map(|placed| placed.sprite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texture(id: u32) -> TextureHandle {
        TextureHandle::solid(TextureId(id), 64, 32, [1.0; 4])
    }

    fn fill(batch: &mut LayerBatch, pool: &mut SpritePool, tex: &TextureHandle, n: i32) -> bool {
        batch.begin_frame();
        for i in 0..n {
            for j in 0..n {
                batch.set_element(pool, ElementKey::tile(i, j), tex, Placement::at(0.0, 0.0, (i + j) as i64));
            }
        }
        batch.end_frame(pool)
    }

    #[test]
    fn test_steady_frames_allocate_nothing() {
        let mut pool = SpritePool::new();
        let mut batch = LayerBatch::new(SceneLayer::World);
        let tex = texture(7);

        assert!(fill(&mut batch, &mut pool, &tex, 10));
        let after_first = pool.allocations();
        assert_eq!(after_first, 100);

        for _ in 0..5 {
            assert!(!fill(&mut batch, &mut pool, &tex, 10));
        }
        assert_eq!(pool.allocations(), after_first);
    }

    #[test]
    fn test_untouched_elements_released_and_recycled() {
        let mut pool = SpritePool::new();
        let mut batch = LayerBatch::new(SceneLayer::World);
        let tex = texture(1);

        fill(&mut batch, &mut pool, &tex, 4);
        assert!(fill(&mut batch, &mut pool, &tex, 2));
        assert_eq!(batch.len(), 4);
        assert_eq!(pool.stats().free, 12);

        // Growing again reuses released sprites
        fill(&mut batch, &mut pool, &tex, 4);
        assert_eq!(pool.allocations(), 16);
        assert_eq!(pool.stats().free, 0);
    }

    #[test]
    fn test_texture_change_swaps_instance() {
        let mut pool = SpritePool::new();
        let mut batch = LayerBatch::new(SceneLayer::World);
        let key = ElementKey::tile(3, 3);

        batch.begin_frame();
        batch.set_element(&mut pool, key, &texture(1), Placement::at(0.0, 0.0, 5));
        batch.end_frame(&mut pool);
        let first = batch.sprite_at(&key).unwrap();

        batch.begin_frame();
        batch.set_element(&mut pool, key, &texture(2), Placement::at(0.0, 0.0, 5));
        assert!(batch.end_frame(&mut pool));
        let second = batch.sprite_at(&key).unwrap();

        assert_ne!(first, second);
        assert_eq!(pool.get(second).texture, TextureId(2));
        assert!(!pool.get(first).visible);
        // The released sprite only serves its own texture again
        assert_eq!(pool.acquire(TextureId(1), SceneLayer::World), first);
    }

    #[test]
    fn test_retired_texture_slots_are_reused() {
        let mut pool = SpritePool::new();
        let mut batch = LayerBatch::new(SceneLayer::World);

        // Each round draws with a fresh id and drops the previous one
        for round in 1..=20 {
            fill(&mut batch, &mut pool, &texture(round), 4);
            pool.retire_texture(TextureId(round - 1));
        }
        let stats = pool.stats();
        assert_eq!(stats.in_use, 16);
        assert!(stats.total <= 32, "pool grew to {}", stats.total);
        assert_eq!(pool.allocations(), 32);
    }

    #[test]
    fn test_sprites_released_after_retirement_become_spare() {
        let mut pool = SpritePool::new();
        let a = pool.acquire(TextureId(1), SceneLayer::World);
        pool.retire_texture(TextureId(1));
        pool.release(a);

        let b = pool.acquire(TextureId(2), SceneLayer::World);
        assert_eq!(a, b);
        assert_eq!(pool.get(b).texture, TextureId(2));
        assert!(pool.get(b).visible);
        assert_eq!(pool.stats().free, 0);
    }

    #[test]
    fn test_sort_orders_world_and_appends_overlay() {
        let mut pool = SpritePool::new();
        let mut world = LayerBatch::new(SceneLayer::World);
        let mut overlay = LayerBatch::new(SceneLayer::Overlay);
        let tex = texture(1);

        world.begin_frame();
        for (n, key) in [30, 10, 20].iter().enumerate() {
            world.set_element(&mut pool, ElementKey::tile(n as i32, 0), &tex, Placement::at(0.0, 0.0, *key));
        }
        world.end_frame(&mut pool);
        overlay.begin_frame();
        overlay.set_element(&mut pool, ElementKey::tile(0, 0), &tex, Placement::at(0.0, 0.0, 0));
        overlay.end_frame(&mut pool);

        pool.sort();
        let order: Vec<(SceneLayer, i64)> = pool.draw_list().map(|s| (s.layer, s.sort_key)).collect();
        assert_eq!(
            order,
            vec![
                (SceneLayer::World, 10),
                (SceneLayer::World, 20),
                (SceneLayer::World, 30),
                (SceneLayer::Overlay, 0)
            ]
        );
    }

    #[test]
    fn test_sprite_bounds_use_anchor_and_scale() {
        let mut pool = SpritePool::new();
        let mut batch = LayerBatch::new(SceneLayer::World);
        batch.begin_frame();
        batch.set_element(
            &mut pool,
            ElementKey::tile(0, 0),
            &texture(1),
            Placement::at(100.0, 100.0, 0).with_scale(0.5),
        );
        batch.end_frame(&mut pool);
        let id = batch.sprite_at(&ElementKey::tile(0, 0)).unwrap();
        assert_eq!(pool.get(id).bounds(), (84.0, 84.0, 116.0, 100.0));
    }
}
