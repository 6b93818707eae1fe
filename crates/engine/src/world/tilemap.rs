use thiserror::Error;

use super::geometry::Vec2;

pub const BLOCKED_TILE_ID: u16 = 2;
pub const OPEN_TILE_ID: u16 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct TileCoord {
    pub(crate) x: u32,
    pub(crate) y: u32,
}

#[derive(Debug, Clone)]
pub struct Tilemap {
    width: u32,
    height: u32,
    origin: Vec2,
    tiles: Vec<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TilemapError {
    #[error("tile count mismatch: expected {expected}, got {actual}")]
    TileCountMismatch { expected: usize, actual: usize },
    #[error("tilemap must be at least 1x1, got {width}x{height}")]
    Empty { width: u32, height: u32 },
}

impl Tilemap {
    pub fn new(
        width: u32,
        height: u32,
        origin: Vec2,
        tiles: Vec<u16>,
    ) -> Result<Self, TilemapError> {
        if width == 0 || height == 0 {
            return Err(TilemapError::Empty { width, height });
        }
        let expected = width as usize * height as usize;
        let actual = tiles.len();
        if expected != actual {
            return Err(TilemapError::TileCountMismatch { expected, actual });
        }
        Ok(Self {
            width,
            height,
            origin,
            tiles,
        })
    }

    /// Fully walkable map.
    pub fn open(width: u32, height: u32, origin: Vec2) -> Result<Self, TilemapError> {
        Self::new(
            width,
            height,
            origin,
            vec![OPEN_TILE_ID; width as usize * height as usize],
        )
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn origin(&self) -> Vec2 {
        self.origin
    }

    pub fn tile_at(&self, x: u32, y: u32) -> Option<u16> {
        self.index_of(TileCoord { x, y })
            .and_then(|index| self.tiles.get(index))
            .copied()
    }

    pub fn set_tile(&mut self, x: u32, y: u32, tile_id: u16) -> bool {
        let Some(index) = self.index_of(TileCoord { x, y }) else {
            return false;
        };
        self.tiles[index] = tile_id;
        true
    }

    pub fn block_tile_at(&mut self, point: Vec2) -> bool {
        let Some(tile) = self.world_to_tile(point) else {
            return false;
        };
        self.set_tile(tile.x, tile.y, BLOCKED_TILE_ID)
    }

    pub fn is_walkable(&self, point: Vec2) -> bool {
        self.world_to_tile(point)
            .is_some_and(|tile| self.is_tile_walkable(tile))
    }

    pub(crate) fn is_tile_walkable(&self, tile: TileCoord) -> bool {
        self.index_of(tile)
            .and_then(|index| self.tiles.get(index))
            .is_some_and(|tile_id| *tile_id != BLOCKED_TILE_ID)
    }

    pub(crate) fn world_to_tile(&self, world: Vec2) -> Option<TileCoord> {
        if !world.is_finite() {
            return None;
        }
        let tile_x = (world.x - self.origin.x).floor() as i64;
        let tile_y = (world.y - self.origin.y).floor() as i64;
        if tile_x < 0 || tile_y < 0 || tile_x >= self.width as i64 || tile_y >= self.height as i64 {
            return None;
        }
        Some(TileCoord {
            x: tile_x as u32,
            y: tile_y as u32,
        })
    }

    pub(crate) fn tile_center_world(&self, tile: TileCoord) -> Vec2 {
        Vec2 {
            x: self.origin.x + tile.x as f32 + 0.5,
            y: self.origin.y + tile.y as f32 + 0.5,
        }
    }

    pub(crate) fn index_of(&self, tile: TileCoord) -> Option<usize> {
        if tile.x >= self.width || tile.y >= self.height {
            return None;
        }
        Some(tile.y as usize * self.width as usize + tile.x as usize)
    }

    pub(crate) fn coord_of(&self, index: usize) -> TileCoord {
        TileCoord {
            x: (index as u32) % self.width,
            y: (index as u32) / self.width,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_tile_count() {
        let error = Tilemap::new(3, 2, Vec2::default(), vec![0; 5]).expect_err("mismatch");
        assert_eq!(
            error,
            TilemapError::TileCountMismatch {
                expected: 6,
                actual: 5
            }
        );
    }

    #[test]
    fn walkability_respects_origin_and_blocked_tiles() {
        let mut tilemap = Tilemap::open(4, 4, Vec2::new(100.0, 200.0)).expect("tilemap");
        assert!(tilemap.is_walkable(Vec2::new(100.5, 200.5)));
        assert!(!tilemap.is_walkable(Vec2::new(99.5, 200.5)));
        assert!(!tilemap.is_walkable(Vec2::new(104.5, 200.5)));

        assert!(tilemap.block_tile_at(Vec2::new(101.2, 202.9)));
        assert!(!tilemap.is_walkable(Vec2::new(101.5, 202.5)));
        assert_eq!(tilemap.tile_at(1, 2), Some(BLOCKED_TILE_ID));
    }
}
