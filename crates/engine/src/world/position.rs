use serde::{Deserialize, Serialize};
use std::fmt;

use crate::chunk::{MAX_Y, MIN_Y};

/// Absolute block position in the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// The chunk column this block belongs to.
    pub const fn chunk(&self) -> ChunkPos {
        ChunkPos {
            x: self.x >> 4,
            z: self.z >> 4,
        }
    }

    /// Whether the position falls outside the world's vertical bounds.
    pub const fn out_of_bounds(&self) -> bool {
        self.y < MIN_Y || self.y > MAX_Y
    }

    /// Coordinates local to the containing chunk (x, z in 0..16).
    pub const fn local(&self) -> (u8, i16, u8) {
        ((self.x & 0xF) as u8, self.y as i16, (self.z & 0xF) as u8)
    }

    /// The centre of the block, used for particles and sounds.
    pub fn centre(&self) -> Vec3 {
        Vec3::new(
            self.x as f64 + 0.5,
            self.y as f64 + 0.5,
            self.z as f64 + 0.5,
        )
    }

    /// The six cardinal neighbours.
    pub const fn neighbours(&self) -> [BlockPos; 6] {
        [
            Self::new(self.x + 1, self.y, self.z),
            Self::new(self.x - 1, self.y, self.z),
            Self::new(self.x, self.y + 1, self.z),
            Self::new(self.x, self.y - 1, self.z),
            Self::new(self.x, self.y, self.z + 1),
            Self::new(self.x, self.y, self.z - 1),
        ]
    }
}

impl fmt::Display for BlockPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Chunk column position (each chunk is 16x16 blocks horizontally).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkPos {
    pub x: i32,
    pub z: i32,
}

impl ChunkPos {
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// The block position of the chunk's lowest corner at the given y.
    pub const fn block_origin(&self, y: i32) -> BlockPos {
        BlockPos::new(self.x << 4, y, self.z << 4)
    }
}

impl fmt::Display for ChunkPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}

/// Continuous position, used for entities and effects.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// The chunk column containing this position. Truncation rather than
    /// flooring: callers only use this for coarse chunk selection where an
    /// off-by-one at the negative axis boundary doesn't matter.
    pub fn chunk(&self) -> ChunkPos {
        ChunkPos::new((self.x as i32) >> 4, (self.z as i32) >> 4)
    }

    pub fn add(&self, other: Vec3) -> Vec3 {
        Vec3::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }

    pub fn sub(&self, other: Vec3) -> Vec3 {
        Vec3::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }
}

/// Axis-aligned bounding box, used for entity queries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn translate(&self, by: Vec3) -> Aabb {
        Aabb::new(self.min.add(by), self.max.add(by))
    }

    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x < other.max.x
            && self.max.x > other.min.x
            && self.min.y < other.max.y
            && self.max.y > other.min.y
            && self.min.z < other.max.z
            && self.max.z > other.min.z
    }

    pub fn contains(&self, pos: Vec3) -> bool {
        pos.x >= self.min.x
            && pos.x <= self.max.x
            && pos.y >= self.min.y
            && pos.y <= self.max.y
            && pos.z >= self.min.z
            && pos.z <= self.max.z
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_pos_to_chunk() {
        assert_eq!(BlockPos::new(0, 64, 0).chunk(), ChunkPos::new(0, 0));
        assert_eq!(BlockPos::new(15, 64, 15).chunk(), ChunkPos::new(0, 0));
        assert_eq!(BlockPos::new(16, 64, -1).chunk(), ChunkPos::new(1, -1));
        assert_eq!(BlockPos::new(-16, 64, -17).chunk(), ChunkPos::new(-1, -2));
    }

    #[test]
    fn local_coordinates_wrap() {
        let (x, y, z) = BlockPos::new(-1, 70, 33).local();
        assert_eq!((x, y, z), (15, 70, 1));
    }

    #[test]
    fn out_of_bounds() {
        assert!(BlockPos::new(0, -1, 0).out_of_bounds());
        assert!(BlockPos::new(0, 256, 0).out_of_bounds());
        assert!(!BlockPos::new(0, 0, 0).out_of_bounds());
        assert!(!BlockPos::new(0, 255, 0).out_of_bounds());
    }

    #[test]
    fn aabb_intersection() {
        let a = Aabb::new(Vec3::new(0.0, 0.0, 0.0), Vec3::new(1.0, 1.0, 1.0));
        let b = Aabb::new(Vec3::new(0.5, 0.5, 0.5), Vec3::new(2.0, 2.0, 2.0));
        let c = Aabb::new(Vec3::new(1.5, 0.0, 0.0), Vec3::new(2.0, 1.0, 1.0));
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }
}
