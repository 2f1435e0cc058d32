use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use crate::error::{panic_message, EngineError};
use crate::participant::{JobTiming, ParticipantVisibilityState, RayVisibility, VisibilityResult};
use crate::raycast::{derive_rays, VisibilityRayCaster};
use crate::state::EngineContext;

/// How a job ended.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed,
    /// The participant's state was replaced while the job ran; the result was dropped.
    Discarded,
    Failed(EngineError),
    /// Never started.
    Skipped,
}

/// One participant's ray trace for one tick.
///
/// Holds the participant's state record, not its id: if the record is replaced mid-job
/// the result is discarded instead of being written to the replacement.
pub struct RayTraceJob {
    ctx: Arc<EngineContext>,
    state: Arc<ParticipantVisibilityState>,
    tick: u64,
}

impl RayTraceJob {
    /// Queue a job, or `None` if the participant already has one pending.
    pub fn queue(
        ctx: Arc<EngineContext>,
        state: Arc<ParticipantVisibilityState>,
        tick: u64,
    ) -> Option<Self> {
        if !state.mark_queued() {
            return None;
        }
        Some(Self { ctx, state, tick })
    }

    pub fn run(self) -> JobOutcome {
        if !self.ctx.is_running() || !self.state.mark_running() {
            // Drop marks the state cancelled.
            return JobOutcome::Skipped;
        }
        let _in_flight = self.ctx.enter_job();
        let started = Instant::now();

        let traced = panic::catch_unwind(AssertUnwindSafe(|| self.trace()))
            .unwrap_or_else(|payload| {
                Err(EngineError::Panicked {
                    context: "ray trace job",
                    message: panic_message(payload.as_ref()),
                })
            });

        if self.ctx.timings_enabled() {
            self.ctx.record_timing(JobTiming {
                participant: self.state.id(),
                tick: self.tick,
                started,
                finished: Instant::now(),
            });
        }

        match traced {
            Ok(result) if self.ctx.is_live(&self.state) => {
                self.state.complete(result);
                JobOutcome::Completed
            }
            Ok(_) => {
                tracing::debug!(
                    "Discarding tick {} result for replaced {}",
                    self.tick,
                    self.state.id()
                );
                self.state.fail();
                JobOutcome::Discarded
            }
            Err(e) => {
                match &e {
                    EngineError::JobInterrupted { .. } => tracing::debug!("{}", e),
                    _ => tracing::warn!("Ray trace for {} failed: {}", self.state.id(), e),
                }
                self.state.fail();
                JobOutcome::Failed(e)
            }
        }
    }

    fn trace(&self) -> Result<VisibilityResult, EngineError> {
        let view = self.state.view();
        let world = self
            .ctx
            .world(view.world)
            .ok_or_else(|| EngineError::GeometryQueryFailure {
                world: view.world,
                message: "world is not loaded".to_string(),
            })?;
        let config = self.ctx.config();

        let caster = VisibilityRayCaster::new(world.probe.as_ref())
            .excluding(self.state.id())
            .interruptible(self.ctx.running_flag());

        let placements = derive_rays(
            &caster,
            view,
            world.policy.ray_trace_third_person,
            config.max_zoom,
        )?;

        let mut rays = Vec::with_capacity(placements.len());
        for ray in placements {
            let distance = caster.view_distance(&ray, config.max_ray_trace_distance)?;
            rays.push(RayVisibility { ray, distance });
        }

        // The world may have been unloaded and replaced while probing.
        match self.ctx.world(view.world) {
            Some(current) if Arc::ptr_eq(&current, &world) => {}
            _ => {
                return Err(EngineError::GeometryQueryFailure {
                    world: view.world,
                    message: "world unloaded during ray trace".to_string(),
                })
            }
        }

        Ok(VisibilityResult {
            tick: self.tick,
            rays,
        })
    }
}

impl Drop for RayTraceJob {
    fn drop(&mut self) {
        self.state.cancel_if_queued();
    }
}
