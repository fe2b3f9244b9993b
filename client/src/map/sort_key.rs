//! Unified draw-order keys shared by every world layer
//!
//! All world elements end up in one container sorted ascending by key, so the
//! key alone has to encode the painter's order across layers.

/// Largest diagonal index `i + j` supported (2500 x 2500 world)
pub const MAX_DIAGONAL: i64 = 5000;
/// Largest column index supported
pub const MAX_COLUMN: i64 = 2500;

const PRIORITY_RANGE: i64 = 10;
const J_MULT: i64 = PRIORITY_RANGE;
const DIAGONAL_MULT: i64 = (MAX_COLUMN + 1) * J_MULT;
/// Offset added to every upper-tier key; exceeds the largest lower-tier key
pub const TIER_OFFSET: i64 = (MAX_DIAGONAL + 1) * DIAGONAL_MULT;

/// Ordering partition
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Tier {
    /// Terrain base, pavement, roads
    Lower,
    /// Tall terrain, buildings
    Upper,
}

/// Per-layer tie breaker for elements on the same tile
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum LayerPriority {
    Terrain = 0,
    Pavement = 1,
    Road = 2,
    TallTerrain = 3,
    Building = 4,
}

impl LayerPriority {
    pub fn tier(self) -> Tier {
        match self {
            LayerPriority::Terrain | LayerPriority::Pavement | LayerPriority::Road => Tier::Lower,
            LayerPriority::TallTerrain | LayerPriority::Building => Tier::Upper,
        }
    }
}

/// Draw-order key for an element at diagonal `i + j`, column `j`.
///
/// Out-of-range diagonals and columns are clamped so keys never wrap across
/// tiers.
pub fn sort_key(diagonal: i64, j: i64, priority: LayerPriority) -> i64 {
    let diagonal = diagonal.clamp(0, MAX_DIAGONAL);
    let j = j.clamp(0, MAX_COLUMN);
    let within_tier = (MAX_DIAGONAL - diagonal) * DIAGONAL_MULT + j * J_MULT + priority as i64;
    match priority.tier() {
        Tier::Lower => within_tier,
        Tier::Upper => TIER_OFFSET + within_tier,
    }
}

/// Convenience wrapper for tile-addressed elements
pub fn tile_sort_key(i: i32, j: i32, priority: LayerPriority) -> i64 {
    sort_key(i as i64 + j as i64, j as i64, priority)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [LayerPriority; 5] = [
        LayerPriority::Terrain,
        LayerPriority::Pavement,
        LayerPriority::Road,
        LayerPriority::TallTerrain,
        LayerPriority::Building,
    ];

    #[test]
    fn test_nearer_diagonal_always_sorts_later() {
        for lower in [LayerPriority::Terrain, LayerPriority::Road] {
            for upper in [LayerPriority::Terrain, LayerPriority::Pavement] {
                // diagonal 100 is farther from the viewer than 99
                let far = sort_key(100, MAX_COLUMN, lower);
                let near = sort_key(99, 0, upper);
                assert!(far < near);
            }
        }
        for d in (1..MAX_DIAGONAL).step_by(397) {
            let far_max = sort_key(d, MAX_COLUMN, LayerPriority::Building);
            let near_min = sort_key(d - 1, 0, LayerPriority::TallTerrain);
            assert!(far_max < near_min);
        }
    }

    #[test]
    fn test_upper_tier_above_every_lower_key() {
        let lower_max = [LayerPriority::Terrain, LayerPriority::Pavement, LayerPriority::Road]
            .iter()
            .map(|p| sort_key(0, MAX_COLUMN, *p))
            .max()
            .unwrap();
        let upper_min = [LayerPriority::TallTerrain, LayerPriority::Building]
            .iter()
            .map(|p| sort_key(MAX_DIAGONAL, 0, *p))
            .min()
            .unwrap();
        assert!(upper_min > lower_max);
    }

    #[test]
    fn test_same_tile_ordered_by_priority() {
        let keys: Vec<i64> = ALL.iter().map(|p| tile_sort_key(12, 30, *p)).collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_higher_column_sorts_later_on_same_diagonal() {
        assert!(tile_sort_key(10, 5, LayerPriority::Road) < tile_sort_key(9, 6, LayerPriority::Terrain));
    }

    #[test]
    fn test_out_of_range_inputs_clamped() {
        assert_eq!(sort_key(-5, -1, LayerPriority::Terrain), sort_key(0, 0, LayerPriority::Terrain));
        assert!(sort_key(MAX_DIAGONAL * 3, 0, LayerPriority::Building) >= TIER_OFFSET);
    }
}
