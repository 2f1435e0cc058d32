//! Usage contract of the voxel world's ray query.
//!
//! The engine never looks at world geometry directly. Everything it knows about occlusion
//! comes from [`GeometryProbe::clip`], which the hosting world engine implements.

use antixray_shared::types::ParticipantId;
use antixray_shared::vec3::Vec3;

/// Which block shapes stop the ray.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockFilter {
    /// The shape the client renders (what a camera would collide with).
    Visual,
    /// Full collision shape.
    Collider,
}

/// Which fluids stop the ray.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FluidFilter {
    None,
    SourceOnly,
    Any,
}

/// One segment query: from `from` to `to`, first opaque surface wins.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipQuery {
    pub from: Vec3,
    pub to: Vec3,
    pub block: BlockFilter,
    pub fluid: FluidFilter,
    /// The participant whose own body must not count as an obstacle.
    pub exclude: Option<ParticipantId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitKind {
    Hit,
    Miss,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitResult {
    pub kind: HitKind,
    /// Collision point for hits, the segment end for misses.
    pub location: Vec3,
}

impl HitResult {
    pub fn hit(location: Vec3) -> Self {
        Self {
            kind: HitKind::Hit,
            location,
        }
    }

    pub fn miss(end: Vec3) -> Self {
        Self {
            kind: HitKind::Miss,
            location: end,
        }
    }

    pub fn is_hit(&self) -> bool {
        self.kind == HitKind::Hit
    }
}

/// Error reported by a world query, e.g. the world was unloaded under it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeError(pub String);

impl std::fmt::Display for ProbeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ProbeError {}

/// Synchronous, side-effect-free segment query against voxel geometry.
pub trait GeometryProbe: Send + Sync {
    fn clip(&self, query: &ClipQuery) -> Result<HitResult, ProbeError>;
}
