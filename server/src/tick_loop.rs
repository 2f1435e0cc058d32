use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::error::EngineError;
use crate::job::{JobOutcome, RayTraceJob};
use crate::state::EngineContext;

/// What one tick dispatched and how its jobs ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    pub dispatched: usize,
    pub completed: usize,
    pub discarded: usize,
    pub failed: usize,
    /// Dropped by the pool or skipped because the engine was stopping.
    pub cancelled: usize,
}

/// Queue one job per dispatchable participant on `pool` and wait for all of them.
pub async fn run_tick(ctx: &Arc<EngineContext>, pool: &Handle) -> TickReport {
    let tick = ctx.next_tick();
    let mut report = TickReport {
        tick,
        ..Default::default()
    };

    let handles: Vec<_> = ctx
        .dispatchable_states()
        .into_iter()
        .filter_map(|state| RayTraceJob::queue(Arc::clone(ctx), state, tick))
        .map(|job| pool.spawn(async move { job.run() }))
        .collect();
    report.dispatched = handles.len();

    for handle in handles {
        match handle.await {
            Ok(JobOutcome::Completed) => report.completed += 1,
            Ok(JobOutcome::Discarded) => report.discarded += 1,
            Ok(JobOutcome::Failed(_)) => report.failed += 1,
            Ok(JobOutcome::Skipped) | Err(_) => report.cancelled += 1,
        }
    }
    report
}

/// Fixed-cadence tick loop. A tick starts only after every job of the previous one has
/// settled; ticks missed meanwhile are skipped, not bunched up.
pub async fn run_tick_loop(
    ctx: Arc<EngineContext>,
    pool: Handle,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(ctx.config().tick_duration());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if !ctx.is_running() {
                    break;
                }
                let started = Instant::now();
                tokio::select! {
                    report = run_tick(&ctx, &pool) => {
                        if ctx.timings_enabled() {
                            tracing::info!(
                                "Tick {}: {} dispatched, {} completed, {} discarded, {} failed, {} cancelled in {:?}",
                                report.tick,
                                report.dispatched,
                                report.completed,
                                report.discarded,
                                report.failed,
                                report.cancelled,
                                started.elapsed()
                            );
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }

            _ = shutdown.changed() => break,
        }
    }

    tracing::info!("Ray trace tick loop ended");
}

/// The thread driving [`run_tick_loop`].
pub struct TickTimer {
    shutdown: watch::Sender<bool>,
    thread: Option<JoinHandle<()>>,
}

impl TickTimer {
    pub fn start(ctx: Arc<EngineContext>, pool: Handle) -> Result<Self, EngineError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| EngineError::PoolStart(e.to_string()))?;
        let (shutdown, shutdown_rx) = watch::channel(false);

        let thread = std::thread::Builder::new()
            .name("antixray tick thread".to_string())
            .spawn(move || runtime.block_on(run_tick_loop(ctx, pool, shutdown_rx)))
            .map_err(|e| EngineError::PoolStart(e.to_string()))?;

        Ok(Self {
            shutdown,
            thread: Some(thread),
        })
    }

    /// Stop scheduling further ticks. A tick already waiting on its jobs stops waiting.
    pub fn cancel(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Wait up to `timeout` for the thread to exit. Returns false if it is still running,
    /// in which case it is left detached.
    pub fn join(mut self, timeout: Duration) -> bool {
        let thread = match self.thread.take() {
            Some(thread) => thread,
            None => return true,
        };
        let deadline = Instant::now() + timeout;
        while !thread.is_finished() {
            if Instant::now() >= deadline {
                tracing::warn!("Tick thread did not exit within {:?}", timeout);
                return false;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        let _ = thread.join();
        true
    }
}

impl Drop for TickTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::host::{ParticipantSnapshot, WorldDescriptor};
    use crate::participant::JobStatus;
    use crate::probe::{ClipQuery, GeometryProbe, HitResult, ProbeError};
    use crate::voxel_grid::VoxelGrid;
    use antixray_shared::config::{WorldPolicy, WorldSettings};
    use antixray_shared::types::{ObservationRay, ParticipantId, WorldId};
    use antixray_shared::vec3::vec3;
    use std::sync::atomic::AtomicBool;

    fn context(ms_per_tick: u64) -> Arc<EngineContext> {
        let config = EngineConfig {
            ms_per_ray_trace_tick: ms_per_tick,
            world_settings: WorldSettings::default().with(
                "nether",
                WorldPolicy {
                    ray_trace: false,
                    ray_trace_third_person: false,
                },
            ),
            ..Default::default()
        };
        let ctx = Arc::new(EngineContext::new(config, Arc::new(AtomicBool::new(false))));
        for (id, name) in [(0, "overworld"), (1, "nether")] {
            ctx.load_world(WorldDescriptor {
                id: WorldId(id),
                name: name.to_string(),
                probe: Arc::new(VoxelGrid::new()),
            });
        }
        for (id, world) in [(1, 0), (2, 0), (3, 1)] {
            ctx.seed(&ParticipantSnapshot {
                id: ParticipantId(id),
                view: ObservationRay::new(WorldId(world), vec3(0.0, 0.0, 0.0), vec3(0.0, 0.0, 1.0)),
                exempt: false,
            });
        }
        ctx
    }

    fn pool() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .build()
            .unwrap()
    }

    #[test]
    fn tick_runs_one_job_per_ray_traced_participant() {
        let ctx = context(50);
        let pool = pool();
        let report = pool.block_on(run_tick(&ctx, pool.handle()));

        assert_eq!(report.tick, 1);
        assert_eq!(report.dispatched, 2);
        assert_eq!(report.completed, 2);
        assert!(ctx.state(ParticipantId(1)).unwrap().result().is_some());
        assert!(ctx.state(ParticipantId(3)).unwrap().result().is_none());
    }

    struct UnloadedChunks;

    impl GeometryProbe for UnloadedChunks {
        fn clip(&self, _query: &ClipQuery) -> Result<HitResult, ProbeError> {
            Err(ProbeError("chunk not loaded".to_string()))
        }
    }

    #[test]
    fn failed_job_does_not_stop_the_tick_or_the_timer() {
        let ctx = context(5);
        ctx.load_world(WorldDescriptor {
            id: WorldId(2),
            name: "broken".to_string(),
            probe: Arc::new(UnloadedChunks),
        });
        ctx.seed(&ParticipantSnapshot {
            id: ParticipantId(4),
            view: ObservationRay::new(WorldId(2), vec3(0.0, 0.0, 0.0), vec3(0.0, 0.0, 1.0)),
            exempt: false,
        });
        ctx.remove(ParticipantId(2));

        let pool = pool();
        let report = pool.block_on(run_tick(&ctx, pool.handle()));
        assert_eq!(report.dispatched, 2);
        assert_eq!(report.completed, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(
            ctx.state(ParticipantId(4)).unwrap().status(),
            JobStatus::Failed
        );

        let timer = TickTimer::start(Arc::clone(&ctx), pool.handle().clone()).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while ctx.current_tick() < 10 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        timer.cancel();
        assert!(timer.join(Duration::from_secs(2)));

        assert!(ctx.current_tick() >= 10);
        let healthy = ctx.state(ParticipantId(1)).unwrap().result().unwrap();
        assert!(healthy.tick > 1);
        assert!(ctx.state(ParticipantId(4)).unwrap().result().is_none());
    }

    #[test]
    fn timer_ticks_until_cancelled() {
        let ctx = context(5);
        let pool = pool();
        let timer = TickTimer::start(Arc::clone(&ctx), pool.handle().clone()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while ctx.current_tick() < 3 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(ctx.current_tick() >= 3);

        timer.cancel();
        assert!(timer.join(Duration::from_secs(2)));
        let stopped_at = ctx.current_tick();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(ctx.current_tick(), stopped_at);
    }
}
