use std::collections::HashSet;

use crate::vec3::{self, Vec3};

/// Stable identity of a connected participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub u64);

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "participant#{}", self.0)
    }
}

/// Largest absolute coordinate accepted on any axis. Keeps every voxel index well inside
/// `i32`.
pub const WORLD_LIMIT: f64 = 30_000_000.0;

/// Finite and within [`WORLD_LIMIT`] on every axis.
pub fn within_world(p: Vec3) -> bool {
    p.is_finite()
        && p.x.abs() <= WORLD_LIMIT
        && p.y.abs() <= WORLD_LIMIT
        && p.z.abs() <= WORLD_LIMIT
}

/// Identity of a loaded world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct WorldId(pub u32);

impl std::fmt::Display for WorldId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "world#{}", self.0)
    }
}

/// A camera placement: an origin and a unit view direction in one world.
///
/// Plain `Copy` value. Deriving a new ray never touches the one it came from.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationRay {
    pub world: WorldId,
    pub position: Vec3,
    pub direction: Vec3,
}

impl ObservationRay {
    /// Capture a ray. The direction is normalized here so every stored ray is unit length.
    pub fn new(world: WorldId, position: Vec3, direction: Vec3) -> Self {
        Self {
            world,
            position,
            direction: vec3::normalize(direction),
        }
    }

    /// Same origin, opposite direction.
    pub fn reversed(&self) -> Self {
        Self {
            direction: vec3::negate(self.direction),
            ..*self
        }
    }

    /// Origin stepped backward along the direction by `distance`.
    pub fn pulled_back(&self, distance: f64) -> Self {
        Self {
            position: vec3::sub(self.position, vec3::scale(self.direction, distance)),
            ..*self
        }
    }

    pub fn is_finite(&self) -> bool {
        self.position.is_finite() && self.direction.is_finite()
    }

    /// Finite, with its origin inside the world limits.
    pub fn is_in_world(&self) -> bool {
        within_world(self.position) && self.direction.is_finite()
    }
}

/// Voxel coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// The voxel whose unit cell contains `p`.
    pub fn containing(p: Vec3) -> Self {
        Self::new(p.x.floor() as i32, p.y.floor() as i32, p.z.floor() as i32)
    }

    pub fn center(self) -> Vec3 {
        Vec3::new(
            self.x as f64 + 0.5,
            self.y as f64 + 0.5,
            self.z as f64 + 0.5,
        )
    }

    pub fn chunk(self) -> ChunkPos {
        ChunkPos {
            x: self.x.div_euclid(ChunkPos::SIZE),
            z: self.z.div_euclid(ChunkPos::SIZE),
        }
    }
}

/// Column coordinate of a 16x16 chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct ChunkPos {
    pub x: i32,
    pub z: i32,
}

impl ChunkPos {
    pub const SIZE: i32 = 16;
}

/// The obfuscated voxels an outbound chunk payload stands for.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChunkBlocks {
    pub chunk: Option<ChunkPos>,
    pub blocks: HashSet<BlockPos>,
}

impl ChunkBlocks {
    pub fn new(chunk: ChunkPos) -> Self {
        Self {
            chunk: Some(chunk),
            blocks: HashSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
