use std::ops::{Add, Sub};

use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Vec2) -> f32 {
        self.distance_squared(other).sqrt()
    }

    pub fn distance_squared(self, other: Vec2) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn lerp(self, other: Vec2, t: f32) -> Vec2 {
        Vec2 {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
        }
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// Center of the tile containing this point.
    pub fn snapped(self) -> Vec2 {
        Vec2 {
            x: self.x.floor() + 0.5,
            y: self.y.floor() + 0.5,
        }
    }
}

impl Add for Vec2 {
    type Output = Vec2;

    fn add(self, rhs: Vec2) -> Self::Output {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vec2 {
    type Output = Vec2;

    fn sub(self, rhs: Vec2) -> Self::Output {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct MapId(pub u16);

/// Axis-aligned rectangle, inclusive of `min` and exclusive of `max`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub min: Vec2,
    pub max: Vec2,
}

impl Rect {
    pub fn from_corners(a: Vec2, b: Vec2) -> Self {
        Self {
            min: Vec2::new(a.x.min(b.x), a.y.min(b.y)),
            max: Vec2::new(a.x.max(b.x), a.y.max(b.y)),
        }
    }

    pub fn contains(&self, point: Vec2) -> bool {
        point.x >= self.min.x
            && point.x < self.max.x
            && point.y >= self.min.y
            && point.y < self.max.y
    }

    pub fn center(&self) -> Vec2 {
        self.min.lerp(self.max, 0.5)
    }

    pub fn width(&self) -> f32 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> f32 {
        self.max.y - self.min.y
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0.0 || self.height() <= 0.0
    }

    /// Uniform tile-centered sample inside the rectangle.
    pub fn sample_point<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Vec2> {
        if self.is_empty() {
            return None;
        }
        let x = rng.gen_range(self.min.x..self.max.x);
        let y = rng.gen_range(self.min.y..self.max.y);
        Some(Vec2::new(x, y).snapped())
    }
}

/// Eight compass directions in clockwise order starting north (+y).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    North,
    NorthEast,
    East,
    SouthEast,
    South,
    SouthWest,
    West,
    NorthWest,
}

impl Direction {
    pub const ALL: [Direction; 8] = [
        Direction::North,
        Direction::NorthEast,
        Direction::East,
        Direction::SouthEast,
        Direction::South,
        Direction::SouthWest,
        Direction::West,
        Direction::NorthWest,
    ];

    pub fn offset(self) -> (i32, i32) {
        match self {
            Direction::North => (0, 1),
            Direction::NorthEast => (1, 1),
            Direction::East => (1, 0),
            Direction::SouthEast => (1, -1),
            Direction::South => (0, -1),
            Direction::SouthWest => (-1, -1),
            Direction::West => (-1, 0),
            Direction::NorthWest => (-1, 1),
        }
    }

    pub fn step_from(self, origin: Vec2) -> Vec2 {
        let (dx, dy) = self.offset();
        Vec2::new(origin.x + dx as f32, origin.y + dy as f32)
    }

    /// Direction whose offset best matches the vector from `from` to `to`.
    pub fn towards(from: Vec2, to: Vec2) -> Option<Direction> {
        let dx = to.x - from.x;
        let dy = to.y - from.y;
        if dx.abs() < f32::EPSILON && dy.abs() < f32::EPSILON {
            return None;
        }
        let angle = dy.atan2(dx);
        // East is 0 rad; clockwise index from north.
        let octant = ((std::f32::consts::FRAC_PI_2 - angle) / std::f32::consts::FRAC_PI_4).round();
        let index = (octant as i32).rem_euclid(8) as usize;
        Some(Direction::ALL[index])
    }

    pub fn rotate_clockwise(self) -> Direction {
        Direction::ALL[(self.index() + 1) % 8]
    }

    pub fn rotate_counter_clockwise(self) -> Direction {
        Direction::ALL[(self.index() + 7) % 8]
    }

    pub fn opposite(self) -> Direction {
        Direction::ALL[(self.index() + 4) % 8]
    }

    fn index(self) -> usize {
        Direction::ALL
            .iter()
            .position(|direction| *direction == self)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn towards_picks_matching_octant() {
        let origin = Vec2::new(10.5, 10.5);
        assert_eq!(
            Direction::towards(origin, Vec2::new(10.5, 20.5)),
            Some(Direction::North)
        );
        assert_eq!(
            Direction::towards(origin, Vec2::new(15.5, 15.5)),
            Some(Direction::NorthEast)
        );
        assert_eq!(
            Direction::towards(origin, Vec2::new(2.5, 10.5)),
            Some(Direction::West)
        );
        assert_eq!(
            Direction::towards(origin, Vec2::new(12.5, 3.5)),
            Some(Direction::South)
        );
        assert_eq!(Direction::towards(origin, origin), None);
    }

    #[test]
    fn rotation_wraps_around_compass() {
        assert_eq!(Direction::North.rotate_counter_clockwise(), Direction::NorthWest);
        assert_eq!(Direction::NorthWest.rotate_clockwise(), Direction::North);
        assert_eq!(Direction::East.opposite(), Direction::West);
    }

    #[test]
    fn rect_samples_stay_inside_bounds() {
        let rect = Rect::from_corners(Vec2::new(20.0, 5.0), Vec2::new(0.0, 0.0));
        let mut rng = SmallRng::seed_from_u64(7);
        for _ in 0..64 {
            let point = rect.sample_point(&mut rng).expect("sample");
            assert!(rect.contains(point), "{point:?} escaped {rect:?}");
        }
        let empty = Rect::from_corners(Vec2::new(1.0, 1.0), Vec2::new(1.0, 4.0));
        assert!(empty.sample_point(&mut rng).is_none());
    }
}
