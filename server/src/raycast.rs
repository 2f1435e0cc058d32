//! Maximum-visibility ray casting.
//!
//! The distance a camera can be pulled back along a ray before it hits geometry, computed
//! the way the game client positions its third-person camera: eight probes from the
//! corners of a small cube around the origin, nearest hit wins. Corner order, offset signs
//! and `f32` offset precision follow the client exactly so that server and client agree on
//! the same distance.

use std::sync::atomic::{AtomicBool, Ordering};

use antixray_shared::types::{ObservationRay, ParticipantId};
use antixray_shared::vec3::{self, Vec3};

use crate::error::EngineError;
use crate::probe::{BlockFilter, ClipQuery, FluidFilter, GeometryProbe};

/// Half edge of the corner cube, in `f32` like the client.
pub const CORNER_HALF_EXTENT: f32 = 0.1;

/// Offset of corner `i` (0..8). Bit 0 picks the x sign, bit 1 y, bit 2 z; a clear bit is
/// negative.
pub fn corner_offset(i: u32) -> Vec3 {
    let sign = |bit: u32| ((i >> bit & 1) as i32 * 2 - 1) as f32;
    let x = sign(0) * CORNER_HALF_EXTENT;
    let y = sign(1) * CORNER_HALF_EXTENT;
    let z = sign(2) * CORNER_HALF_EXTENT;
    Vec3::new(x as f64, y as f64, z as f64)
}

pub struct VisibilityRayCaster<'a> {
    probe: &'a dyn GeometryProbe,
    exclude: Option<ParticipantId>,
    running: Option<&'a AtomicBool>,
}

impl<'a> VisibilityRayCaster<'a> {
    pub fn new(probe: &'a dyn GeometryProbe) -> Self {
        Self {
            probe,
            exclude: None,
            running: None,
        }
    }

    /// Don't treat this participant's own body as an obstacle.
    pub fn excluding(mut self, participant: ParticipantId) -> Self {
        self.exclude = Some(participant);
        self
    }

    /// Abort with [`EngineError::JobInterrupted`] as soon as `running` turns false.
    pub fn interruptible(mut self, running: &'a AtomicBool) -> Self {
        self.running = Some(running);
        self
    }

    fn check_interrupted(&self) -> Result<(), EngineError> {
        match self.running {
            Some(flag) if !flag.load(Ordering::Acquire) => Err(EngineError::JobInterrupted {
                participant: self.exclude.unwrap_or(ParticipantId(0)),
            }),
            _ => Ok(()),
        }
    }

    /// Refine `starting_bound` down to the distance at which the camera, pulled back
    /// against `ray.direction`, first touches geometry. Never returns more than
    /// `starting_bound`.
    pub fn max_visible_distance(
        &self,
        ray: &ObservationRay,
        starting_bound: f64,
    ) -> Result<f64, EngineError> {
        let position = ray.position;
        let direction = ray.direction;
        let mut bound = starting_bound;

        for i in 0..8 {
            self.check_interrupted()?;
            let corner = corner_offset(i);
            let from = vec3::add(position, corner);
            // Segment end tracks the bound found so far, as the client does.
            let to = Vec3::new(
                position.x - direction.x * bound + corner.x,
                position.y - direction.y * bound + corner.y,
                position.z - direction.z * bound + corner.z,
            );
            let query = ClipQuery {
                from,
                to,
                block: BlockFilter::Visual,
                fluid: FluidFilter::None,
                exclude: self.exclude,
            };
            let hit = self
                .probe
                .clip(&query)
                .map_err(|e| EngineError::GeometryQueryFailure {
                    world: ray.world,
                    message: e.to_string(),
                })?;

            if hit.is_hit() {
                let distance = vec3::distance(hit.location, position);
                if distance < bound {
                    bound = distance;
                }
            }
        }

        Ok(bound)
    }

    /// Visible distance looking along `ray.direction`.
    pub fn view_distance(&self, ray: &ObservationRay, bound: f64) -> Result<f64, EngineError> {
        self.max_visible_distance(&ray.reversed(), bound)
    }
}

/// Camera placements to probe for one first-person ray.
///
/// Without third-person probing this is just the primary. With it, two more: the camera
/// pulled back behind the participant, and the camera in front of the participant looking
/// back at them. Both need a probe of the primary first, so a failure there fails the whole
/// derivation.
pub fn derive_rays(
    caster: &VisibilityRayCaster<'_>,
    primary: ObservationRay,
    third_person: bool,
    max_zoom: f64,
) -> Result<Vec<ObservationRay>, EngineError> {
    if !third_person {
        return Ok(vec![primary]);
    }

    let behind = primary.pulled_back(caster.max_visible_distance(&primary, max_zoom)?);
    let mirrored = primary.reversed();
    let in_front = mirrored.pulled_back(caster.max_visible_distance(&mirrored, max_zoom)?);

    Ok(vec![primary, behind, in_front])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{HitResult, ProbeError};
    use crate::voxel_grid::VoxelGrid;
    use antixray_shared::types::{BlockPos, WorldId};
    use antixray_shared::vec3::vec3;
    use parking_lot::Mutex;

    const TOLERANCE: f64 = 0.1 * 1.7320508075688772;

    fn wall_at_x(x: i32) -> VoxelGrid {
        let mut grid = VoxelGrid::new();
        grid.fill(BlockPos::new(x, -4, -4), BlockPos::new(x, 4, 4));
        grid
    }

    fn ray(position: Vec3, direction: Vec3) -> ObservationRay {
        ObservationRay::new(WorldId(0), position, direction)
    }

    #[derive(Default)]
    struct RecordingProbe {
        queries: Mutex<Vec<ClipQuery>>,
    }

    impl GeometryProbe for RecordingProbe {
        fn clip(&self, query: &ClipQuery) -> Result<HitResult, ProbeError> {
            self.queries.lock().push(*query);
            Ok(HitResult::miss(query.to))
        }
    }

    struct BrokenProbe;

    impl GeometryProbe for BrokenProbe {
        fn clip(&self, _query: &ClipQuery) -> Result<HitResult, ProbeError> {
            Err(ProbeError("world unloaded".to_string()))
        }
    }

    #[test]
    fn corner_order_and_signs_match_client() {
        let tenth = 0.1f32 as f64;
        assert_eq!(corner_offset(0), vec3(-tenth, -tenth, -tenth));
        assert_eq!(corner_offset(1), vec3(tenth, -tenth, -tenth));
        assert_eq!(corner_offset(2), vec3(-tenth, tenth, -tenth));
        assert_eq!(corner_offset(3), vec3(tenth, tenth, -tenth));
        assert_eq!(corner_offset(4), vec3(-tenth, -tenth, tenth));
        assert_eq!(corner_offset(7), vec3(tenth, tenth, tenth));
        // f32 precision, not 0.1_f64
        assert_ne!(corner_offset(7).x, 0.1);
    }

    #[test]
    fn probes_every_corner_in_order_ignoring_self() {
        let probe = RecordingProbe::default();
        let caster = VisibilityRayCaster::new(&probe).excluding(ParticipantId(5));
        let r = ray(vec3(0.0, 64.0, 0.0), vec3(0.0, 0.0, 1.0));
        caster.max_visible_distance(&r, 4.0).unwrap();

        let queries = probe.queries.lock();
        assert_eq!(queries.len(), 8);
        for (i, q) in queries.iter().enumerate() {
            let corner = corner_offset(i as u32);
            assert_eq!(q.from, vec3::add(r.position, corner));
            assert_eq!(q.to.z, r.position.z - 4.0 + corner.z);
            assert_eq!(q.exclude, Some(ParticipantId(5)));
            assert_eq!(q.block, BlockFilter::Visual);
            assert_eq!(q.fluid, FluidFilter::None);
        }
    }

    #[test]
    fn wall_two_units_behind_camera_limits_pull_back() {
        // Facing +x; cell -2 has its near face at x = -1, two units behind the origin.
        let grid = wall_at_x(-2);
        let caster = VisibilityRayCaster::new(&grid);
        let d = caster
            .max_visible_distance(&ray(vec3(1.0, 0.5, 0.5), vec3(1.0, 0.0, 0.0)), 4.0)
            .unwrap();
        assert!((d - 2.0).abs() <= TOLERANCE, "distance {}", d);
        assert!(d <= 4.0);
    }

    #[test]
    fn facing_wall_two_units_ahead() {
        let grid = wall_at_x(3);
        let caster = VisibilityRayCaster::new(&grid);
        let d = caster
            .view_distance(&ray(vec3(1.0, 0.5, 0.5), vec3(1.0, 0.0, 0.0)), 4.0)
            .unwrap();
        assert!((d - 2.0).abs() <= TOLERANCE, "distance {}", d);
    }

    #[test]
    fn clear_line_of_sight_returns_bound_exactly() {
        let grid = wall_at_x(40);
        let caster = VisibilityRayCaster::new(&grid);
        let r = ray(vec3(1.0, 0.5, 0.5), vec3(1.0, 0.0, 0.0));
        assert_eq!(caster.view_distance(&r, 4.0).unwrap(), 4.0);
        assert_eq!(caster.max_visible_distance(&r, 4.0).unwrap(), 4.0);
    }

    #[test]
    fn repeated_calls_are_identical() {
        let grid = VoxelGrid::generate(
            &mut <rand_chacha::ChaCha8Rng as rand::SeedableRng>::seed_from_u64(3),
            12,
            4,
        );
        let caster = VisibilityRayCaster::new(&grid);
        let r = ray(vec3(0.3, 4.7, -2.2), vec3(0.4, -0.3, 0.8));
        let first = caster.view_distance(&r, 16.0).unwrap();
        for _ in 0..10 {
            assert_eq!(caster.view_distance(&r, 16.0).unwrap().to_bits(), first.to_bits());
        }
        assert!(first <= 16.0);
    }

    #[test]
    fn never_exceeds_bound_even_when_hits_lie_beyond_it() {
        let grid = wall_at_x(-6);
        let caster = VisibilityRayCaster::new(&grid);
        let r = ray(vec3(1.0, 0.5, 0.5), vec3(1.0, 0.0, 0.0));
        assert_eq!(caster.max_visible_distance(&r, 3.0).unwrap(), 3.0);
    }

    #[test]
    fn probe_error_becomes_geometry_failure() {
        let caster = VisibilityRayCaster::new(&BrokenProbe);
        let err = caster
            .max_visible_distance(&ray(vec3(0.0, 0.0, 0.0), vec3(1.0, 0.0, 0.0)), 4.0)
            .unwrap_err();
        assert!(matches!(err, EngineError::GeometryQueryFailure { .. }));
    }

    #[test]
    fn cleared_running_flag_interrupts() {
        let grid = VoxelGrid::new();
        let running = AtomicBool::new(false);
        let caster = VisibilityRayCaster::new(&grid)
            .excluding(ParticipantId(2))
            .interruptible(&running);
        let err = caster
            .max_visible_distance(&ray(vec3(0.0, 0.0, 0.0), vec3(1.0, 0.0, 0.0)), 4.0)
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::JobInterrupted {
                participant: ParticipantId(2)
            }
        );
    }

    #[test]
    fn first_person_only_without_third_person_policy() {
        let probe = RecordingProbe::default();
        let caster = VisibilityRayCaster::new(&probe);
        let primary = ray(vec3(0.0, 64.0, 0.0), vec3(0.0, 0.0, 1.0));
        let rays = derive_rays(&caster, primary, false, 4.0).unwrap();
        assert_eq!(rays, vec![primary]);
        assert!(probe.queries.lock().is_empty());
    }

    #[test]
    fn third_person_rays_are_pulled_back_by_probed_distance() {
        // Wall 2 behind (x = -1 face), open in front.
        let grid = wall_at_x(-2);
        let caster = VisibilityRayCaster::new(&grid);
        let primary = ray(vec3(1.0, 0.5, 0.5), vec3(1.0, 0.0, 0.0));
        let rays = derive_rays(&caster, primary, true, 4.0).unwrap();

        assert_eq!(rays.len(), 3);
        assert_eq!(rays[0], primary);

        let behind = rays[1];
        assert_eq!(behind.direction, primary.direction);
        assert!((behind.position.x - (1.0 - 2.0)).abs() <= TOLERANCE);

        let in_front = rays[2];
        assert_eq!(in_front.direction, vec3(-1.0, 0.0, 0.0));
        assert_eq!(in_front.position, vec3(5.0, 0.5, 0.5));
    }

    #[test]
    fn derivation_fails_when_primary_probe_fails() {
        let caster = VisibilityRayCaster::new(&BrokenProbe);
        let primary = ray(vec3(0.0, 64.0, 0.0), vec3(0.0, 0.0, 1.0));
        assert!(derive_rays(&caster, primary, true, 4.0).is_err());
        assert!(derive_rays(&caster, primary, false, 4.0).is_ok());
    }
}
