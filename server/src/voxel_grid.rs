//! In-process voxel geometry: a sparse set of opaque unit cells with a DDA segment clip.
//!
//! The binary serves generated grids to its bridge host, and the tests build small hand
//! placed scenes (walls, boxes) with it.

use std::collections::HashSet;

use antixray_shared::types::BlockPos;
use antixray_shared::vec3::{self, Vec3};
use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::probe::{ClipQuery, GeometryProbe, HitResult, ProbeError};

/// Largest absolute coordinate a clip segment may reach. Cell indices stay far from
/// `i32` overflow.
const CLIP_LIMIT: f64 = 1.0e9;

fn clippable(p: Vec3) -> bool {
    p.is_finite()
        && p.x.abs() <= CLIP_LIMIT
        && p.y.abs() <= CLIP_LIMIT
        && p.z.abs() <= CLIP_LIMIT
}

#[derive(Debug, Clone, Default)]
pub struct VoxelGrid {
    solid: HashSet<BlockPos>,
}

impl VoxelGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_solid(&mut self, pos: BlockPos) {
        self.solid.insert(pos);
    }

    pub fn clear(&mut self, pos: BlockPos) {
        self.solid.remove(&pos);
    }

    pub fn is_solid(&self, pos: BlockPos) -> bool {
        self.solid.contains(&pos)
    }

    pub fn len(&self) -> usize {
        self.solid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.solid.is_empty()
    }

    /// Fill every cell in the inclusive box `min..=max`.
    pub fn fill(&mut self, min: BlockPos, max: BlockPos) {
        for x in min.x..=max.x {
            for y in min.y..=max.y {
                for z in min.z..=max.z {
                    self.solid.insert(BlockPos::new(x, y, z));
                }
            }
        }
    }

    /// Flat ground below `ground_level` over a square of `half_extent` blocks, with random
    /// cave pockets carved out of it and random pillars standing on it.
    pub fn generate(rng: &mut ChaCha8Rng, half_extent: i32, ground_level: i32) -> Self {
        let mut grid = Self::new();
        let floor = ground_level - 8;
        grid.fill(
            BlockPos::new(-half_extent, floor, -half_extent),
            BlockPos::new(half_extent, ground_level - 1, half_extent),
        );

        let area = ((2 * half_extent + 1) * (2 * half_extent + 1)) as usize;
        for _ in 0..area / 32 {
            let x = rng.gen_range(-half_extent..=half_extent);
            let z = rng.gen_range(-half_extent..=half_extent);
            let y = rng.gen_range(floor + 1..ground_level - 1);
            grid.clear(BlockPos::new(x, y, z));
        }
        for _ in 0..area / 64 {
            let x = rng.gen_range(-half_extent..=half_extent);
            let z = rng.gen_range(-half_extent..=half_extent);
            let height = rng.gen_range(1..=6);
            for y in ground_level..ground_level + height {
                grid.set_solid(BlockPos::new(x, y, z));
            }
        }
        grid
    }
}

impl GeometryProbe for VoxelGrid {
    fn clip(&self, query: &ClipQuery) -> Result<HitResult, ProbeError> {
        if !clippable(query.from) || !clippable(query.to) {
            return Err(ProbeError("clip segment out of range".to_string()));
        }
        Ok(clip_cells(query.from, query.to, |pos| self.is_solid(pos)))
    }
}

/// Walk the unit cells crossed by the segment `from -> to` and report where it enters the
/// first solid one. A segment starting inside a solid cell hits at `from`.
pub fn clip_cells(from: Vec3, to: Vec3, is_solid: impl Fn(BlockPos) -> bool) -> HitResult {
    let mut cell = BlockPos::containing(from);
    if is_solid(cell) {
        return HitResult::hit(from);
    }

    let delta = vec3::sub(to, from);
    let max_dist = vec3::length(delta);
    if max_dist < 1e-12 {
        return HitResult::miss(to);
    }
    let d = vec3::scale(delta, 1.0 / max_dist);

    let step_x = if d.x >= 0.0 { 1 } else { -1 };
    let step_y = if d.y >= 0.0 { 1 } else { -1 };
    let step_z = if d.z >= 0.0 { 1 } else { -1 };

    let next_boundary = |c: i32, step: i32| {
        if step > 0 {
            c as f64 + 1.0
        } else {
            c as f64
        }
    };
    let axis_t = |c: i32, step: i32, o: f64, dc: f64| {
        if dc.abs() < 1e-12 {
            f64::INFINITY
        } else {
            ((next_boundary(c, step) - o) / dc).max(0.0)
        }
    };
    let axis_delta = |dc: f64| {
        if dc.abs() < 1e-12 {
            f64::INFINITY
        } else {
            1.0 / dc.abs()
        }
    };

    let mut t_max_x = axis_t(cell.x, step_x, from.x, d.x);
    let mut t_max_y = axis_t(cell.y, step_y, from.y, d.y);
    let mut t_max_z = axis_t(cell.z, step_z, from.z, d.z);
    let t_delta_x = axis_delta(d.x);
    let t_delta_y = axis_delta(d.y);
    let t_delta_z = axis_delta(d.z);

    // Each step crosses one cell boundary; a segment can't cross more than this many.
    let max_steps = (max_dist.ceil() as usize + 1) * 3;
    for _ in 0..max_steps {
        let t;
        if t_max_x < t_max_y && t_max_x < t_max_z {
            cell.x += step_x;
            t = t_max_x;
            t_max_x += t_delta_x;
        } else if t_max_y < t_max_z {
            cell.y += step_y;
            t = t_max_y;
            t_max_y += t_delta_y;
        } else {
            cell.z += step_z;
            t = t_max_z;
            t_max_z += t_delta_z;
        }

        if t > max_dist {
            break;
        }
        if is_solid(cell) {
            return HitResult::hit(vec3::add(from, vec3::scale(d, t)));
        }
    }

    HitResult::miss(to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{BlockFilter, FluidFilter};
    use antixray_shared::vec3::vec3;
    use rand::SeedableRng;

    fn query(from: Vec3, to: Vec3) -> ClipQuery {
        ClipQuery {
            from,
            to,
            block: BlockFilter::Visual,
            fluid: FluidFilter::None,
            exclude: None,
        }
    }

    fn wall_at_x(x: i32) -> VoxelGrid {
        let mut grid = VoxelGrid::new();
        grid.fill(BlockPos::new(x, -3, -3), BlockPos::new(x, 3, 3));
        grid
    }

    #[test]
    fn empty_grid_misses_at_segment_end() {
        let grid = VoxelGrid::new();
        let r = grid
            .clip(&query(vec3(0.5, 0.5, 0.5), vec3(10.5, 0.5, 0.5)))
            .unwrap();
        assert!(!r.is_hit());
        assert_eq!(r.location, vec3(10.5, 0.5, 0.5));
    }

    #[test]
    fn hits_near_face_of_wall() {
        let grid = wall_at_x(3);
        let r = grid
            .clip(&query(vec3(0.5, 0.5, 0.5), vec3(10.5, 0.5, 0.5)))
            .unwrap();
        assert!(r.is_hit());
        assert!((r.location.x - 3.0).abs() < 1e-9, "{:?}", r.location);
    }

    #[test]
    fn hits_wall_in_negative_direction() {
        let grid = wall_at_x(-2);
        let r = grid
            .clip(&query(vec3(1.0, 0.5, 0.5), vec3(-3.0, 0.5, 0.5)))
            .unwrap();
        assert!(r.is_hit());
        // Cell -2 spans [-2, -1); entering from +x means hitting x = -1.
        assert!((r.location.x + 1.0).abs() < 1e-9, "{:?}", r.location);
    }

    #[test]
    fn wall_beyond_segment_is_a_miss() {
        let grid = wall_at_x(8);
        let r = grid
            .clip(&query(vec3(0.5, 0.5, 0.5), vec3(4.5, 0.5, 0.5)))
            .unwrap();
        assert!(!r.is_hit());
    }

    #[test]
    fn starting_inside_solid_hits_immediately() {
        let grid = wall_at_x(0);
        let from = vec3(0.5, 0.5, 0.5);
        let r = grid.clip(&query(from, vec3(5.0, 0.5, 0.5))).unwrap();
        assert!(r.is_hit());
        assert_eq!(r.location, from);
    }

    #[test]
    fn diagonal_segment_finds_corner_block() {
        let mut grid = VoxelGrid::new();
        grid.set_solid(BlockPos::new(2, 2, 2));
        let r = grid
            .clip(&query(vec3(0.5, 0.5, 0.5), vec3(4.5, 4.5, 4.5)))
            .unwrap();
        assert!(r.is_hit());
        assert_eq!(BlockPos::containing(vec3::add(r.location, vec3(1e-6, 1e-6, 1e-6))), BlockPos::new(2, 2, 2));
    }

    #[test]
    fn non_finite_segment_is_an_error() {
        let grid = VoxelGrid::new();
        assert!(grid
            .clip(&query(vec3(f64::NAN, 0.0, 0.0), vec3(1.0, 0.0, 0.0)))
            .is_err());
    }

    #[test]
    fn segment_beyond_world_limit_is_an_error() {
        let grid = VoxelGrid::new();
        let far = vec3(1e300, 64.0, 0.0);
        assert!(grid.clip(&query(far, vec3::add(far, vec3(4.0, 0.0, 0.0)))).is_err());
        assert!(grid
            .clip(&query(vec3(0.0, 64.0, 0.0), vec3(-4.0e9, 64.0, 0.0)))
            .is_err());
    }

    #[test]
    fn generation_is_deterministic_per_seed() {
        let a = VoxelGrid::generate(&mut ChaCha8Rng::seed_from_u64(7), 16, 64);
        let b = VoxelGrid::generate(&mut ChaCha8Rng::seed_from_u64(7), 16, 64);
        assert_eq!(a.len(), b.len());
        assert!(a.is_solid(BlockPos::new(0, 56, 0)) == b.is_solid(BlockPos::new(0, 56, 0)));
        assert!(!a.is_empty());
    }
}
