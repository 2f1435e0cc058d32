use std::sync::Arc;
use std::time::Instant;

use antixray_shared::protocol::{round4, RayWire, VisibilityMsg};
use antixray_shared::types::{ObservationRay, ParticipantId};
use parking_lot::Mutex;

/// Where a participant's job for the current tick is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Idle,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// No job for this participant is queued or running.
    pub fn is_settled(self) -> bool {
        !matches!(self, JobStatus::Queued | JobStatus::Running)
    }
}

/// Visible distance along one probed camera placement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayVisibility {
    pub ray: ObservationRay,
    pub distance: f64,
}

/// Output of one successful ray-trace job.
#[derive(Debug, Clone, PartialEq)]
pub struct VisibilityResult {
    pub tick: u64,
    /// First-person ray first, then the third-person placements when probed.
    pub rays: Vec<RayVisibility>,
}

impl VisibilityResult {
    /// Furthest distance over every probed placement.
    pub fn max_distance(&self) -> f64 {
        self.rays.iter().map(|r| r.distance).fold(0.0, f64::max)
    }

    pub fn to_msg(&self, id: ParticipantId) -> VisibilityMsg {
        VisibilityMsg {
            id,
            tick: self.tick,
            rays: self
                .rays
                .iter()
                .map(|r| RayWire {
                    position: r.ray.position.to_array().map(round4),
                    direction: r.ray.direction.to_array().map(round4),
                    distance: round4(r.distance),
                })
                .collect(),
        }
    }
}

/// Start and end of one job, recorded when timings are enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobTiming {
    pub participant: ParticipantId,
    pub tick: u64,
    pub started: Instant,
    pub finished: Instant,
}

/// Visibility record of one eligible participant.
///
/// A teleport or respawn replaces the whole record under a new generation rather than
/// editing this one, so a job still holding the old record can finish without touching
/// the new one.
#[derive(Debug)]
pub struct ParticipantVisibilityState {
    id: ParticipantId,
    generation: u64,
    view: Mutex<ObservationRay>,
    status: Mutex<JobStatus>,
    result: Mutex<Option<Arc<VisibilityResult>>>,
}

impl ParticipantVisibilityState {
    pub fn new(id: ParticipantId, generation: u64, view: ObservationRay) -> Self {
        Self {
            id,
            generation,
            view: Mutex::new(view),
            status: Mutex::new(JobStatus::Idle),
            result: Mutex::new(None),
        }
    }

    pub fn id(&self) -> ParticipantId {
        self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Current first-person ray (a copy).
    pub fn view(&self) -> ObservationRay {
        *self.view.lock()
    }

    /// Movement within the same world. Does not start a new generation.
    pub fn set_view(&self, view: ObservationRay) {
        *self.view.lock() = view;
    }

    pub fn status(&self) -> JobStatus {
        *self.status.lock()
    }

    /// Last successful result, kept across failed ticks.
    pub fn result(&self) -> Option<Arc<VisibilityResult>> {
        self.result.lock().clone()
    }

    /// Rays probed by the last successful job, or just the first-person ray before that.
    pub fn rays(&self) -> Vec<ObservationRay> {
        match self.result() {
            Some(result) => result.rays.iter().map(|r| r.ray).collect(),
            None => vec![self.view()],
        }
    }

    pub(crate) fn mark_queued(&self) -> bool {
        let mut status = self.status.lock();
        if !status.is_settled() {
            return false;
        }
        *status = JobStatus::Queued;
        true
    }

    pub(crate) fn mark_running(&self) -> bool {
        let mut status = self.status.lock();
        if *status != JobStatus::Queued {
            return false;
        }
        *status = JobStatus::Running;
        true
    }

    pub(crate) fn complete(&self, result: VisibilityResult) {
        *self.result.lock() = Some(Arc::new(result));
        *self.status.lock() = JobStatus::Completed;
    }

    pub(crate) fn fail(&self) {
        *self.status.lock() = JobStatus::Failed;
    }

    /// Only a job that never started can be cancelled.
    pub(crate) fn cancel_if_queued(&self) -> bool {
        let mut status = self.status.lock();
        if *status == JobStatus::Queued {
            *status = JobStatus::Cancelled;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use antixray_shared::types::WorldId;
    use antixray_shared::vec3::vec3;

    fn state() -> ParticipantVisibilityState {
        ParticipantVisibilityState::new(
            ParticipantId(1),
            1,
            ObservationRay::new(WorldId(0), vec3(0.0, 64.0, 0.0), vec3(0.0, 0.0, 1.0)),
        )
    }

    fn result(tick: u64, distance: f64) -> VisibilityResult {
        VisibilityResult {
            tick,
            rays: vec![RayVisibility {
                ray: ObservationRay::new(WorldId(0), vec3(0.0, 64.0, 0.0), vec3(0.0, 0.0, 1.0)),
                distance,
            }],
        }
    }

    #[test]
    fn fresh_state_is_idle_with_first_person_ray_only() {
        let s = state();
        assert_eq!(s.status(), JobStatus::Idle);
        assert!(s.result().is_none());
        assert_eq!(s.rays().len(), 1);
    }

    #[test]
    fn happy_path_transitions() {
        let s = state();
        assert!(s.mark_queued());
        assert!(!s.mark_queued(), "already queued");
        assert!(s.mark_running());
        s.complete(result(1, 12.0));
        assert_eq!(s.status(), JobStatus::Completed);
        assert!(s.mark_queued(), "completed job can be queued again");
    }

    #[test]
    fn failure_keeps_last_good_result() {
        let s = state();
        s.mark_queued();
        s.mark_running();
        s.complete(result(1, 12.0));

        s.mark_queued();
        s.mark_running();
        s.fail();
        assert_eq!(s.status(), JobStatus::Failed);
        assert_eq!(s.result().unwrap().tick, 1);
        assert_eq!(s.result().unwrap().max_distance(), 12.0);
    }

    #[test]
    fn only_queued_jobs_cancel() {
        let s = state();
        s.mark_queued();
        assert!(s.cancel_if_queued());
        assert_eq!(s.status(), JobStatus::Cancelled);

        s.mark_queued();
        s.mark_running();
        assert!(!s.cancel_if_queued());
        assert_eq!(s.status(), JobStatus::Running);
    }

    #[test]
    fn wire_message_rounds_distances() {
        let msg = result(3, 2.004987562).to_msg(ParticipantId(9));
        assert_eq!(msg.id, ParticipantId(9));
        assert_eq!(msg.rays[0].distance, 2.005);
    }
}
