//! Engine lifecycle: enable builds a fresh [`EngineContext`] with its worker pool and tick
//! timer, disable tears all of it down step by step.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use antixray_shared::types::{ChunkBlocks, ParticipantId};
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Runtime;

use crate::config::EngineConfig;
use crate::error::{panic_message, EngineError, ShutdownFailure};
use crate::host::Host;
use crate::packet_cache::ChunkPacket;
use crate::participant::{JobTiming, ParticipantVisibilityState, VisibilityResult};
use crate::state::{EngineContext, HostEvent};
use crate::tick_loop::TickTimer;

/// Shortest wait for the tick thread to exit on disable.
const MIN_TIMER_JOIN: Duration = Duration::from_millis(100);

struct Running {
    ctx: Arc<EngineContext>,
    pool: Runtime,
    timer: TickTimer,
}

pub struct Engine {
    host: Arc<dyn Host>,
    config: RwLock<EngineConfig>,
    timings: Arc<AtomicBool>,
    /// Held for the whole of enable and disable so the two never interleave.
    lifecycle: Mutex<Option<Running>>,
    context: RwLock<Option<Arc<EngineContext>>>,
}

impl Engine {
    pub fn new(host: Arc<dyn Host>, config: EngineConfig) -> Self {
        let timings = Arc::new(AtomicBool::new(config.timings_enabled));
        Self {
            host,
            config: RwLock::new(config),
            timings,
            lifecycle: Mutex::new(None),
            context: RwLock::new(None),
        }
    }

    pub fn config(&self) -> EngineConfig {
        self.config.read().clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.context.read().is_some()
    }

    /// Context of the current enable cycle.
    pub fn context(&self) -> Option<Arc<EngineContext>> {
        self.context.read().clone()
    }

    /// Start the worker pool and tick timer and seed every eligible participant.
    /// Enabling a running engine is a no-op.
    pub fn enable(&self) -> Result<(), EngineError> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.is_some() {
            return Ok(());
        }

        let config = self.config();
        config.validate().map_err(EngineError::Config)?;

        let thread_id = Arc::new(AtomicUsize::new(0));
        let pool = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.worker_count())
            .thread_name_fn(move || {
                let id = thread_id.fetch_add(1, Ordering::Relaxed);
                format!("antixray ray trace thread {}", id)
            })
            .enable_time()
            .build()
            .map_err(|e| EngineError::PoolStart(e.to_string()))?;

        let ctx = Arc::new(EngineContext::new(config, Arc::clone(&self.timings)));
        for world in self.host.worlds() {
            ctx.load_world(world);
        }
        let mut seeded = 0;
        for participant in self.host.participants() {
            if ctx.seed(&participant).is_none() {
                continue;
            }
            seeded += 1;
            if let Err(e) = self.host.attach_interceptor(participant.id) {
                tracing::warn!("Failed to attach interceptor for {}: {}", participant.id, e);
            }
        }

        let timer = match TickTimer::start(Arc::clone(&ctx), pool.handle().clone()) {
            Ok(timer) => timer,
            Err(e) => {
                pool.shutdown_background();
                return Err(e);
            }
        };

        tracing::info!(
            "Ray trace engine enabled: {} thread(s), {}ms per tick, {} world(s), {} participant(s)",
            ctx.config().worker_count(),
            ctx.config().tick_duration().as_millis(),
            ctx.world_ids().len(),
            seeded
        );

        *self.context.write() = Some(Arc::clone(&ctx));
        *lifecycle = Some(Running { ctx, pool, timer });
        Ok(())
    }

    /// Tear down the current cycle. Every step runs even if an earlier one failed; the
    /// failures come back together once all steps have run. Disabling a stopped engine is
    /// a no-op.
    ///
    /// Blocks for up to the shutdown grace period, so must not be called from an async
    /// task.
    pub fn disable(&self) -> Result<(), EngineError> {
        let mut lifecycle = self.lifecycle.lock();
        let Running { ctx, pool, timer } = match lifecycle.take() {
            Some(running) => running,
            None => return Ok(()),
        };
        *self.context.write() = None;

        let grace = ctx.config().shutdown_grace();
        let mut failures = Vec::new();

        run_step(&mut failures, "stop tick timer", || {
            ctx.stop();
            timer.cancel();
            Ok(())
        });

        for state in ctx.states() {
            let id = state.id();
            run_step(&mut failures, "detach interceptor", || {
                self.host.detach_interceptor(id).map_err(EngineError::from)
            });
        }

        run_step(&mut failures, "drain ray trace pool", || {
            pool.shutdown_timeout(grace);
            match ctx.in_flight() {
                0 => Ok(()),
                still_running => Err(EngineError::TimeoutOnDrain {
                    still_running,
                    grace_ms: grace.as_millis() as u64,
                }),
            }
        });

        run_step(&mut failures, "join tick timer", || {
            timer.join(grace.max(MIN_TIMER_JOIN));
            Ok(())
        });

        for world in ctx.world_ids() {
            run_step(&mut failures, "release world", || {
                ctx.unload_world(world);
                self.host.release_world(world).map_err(EngineError::from)
            });
        }

        run_step(&mut failures, "clear state", || {
            ctx.clear();
            Ok(())
        });

        match ShutdownFailure::from_failures(failures) {
            None => {
                tracing::info!("Ray trace engine disabled");
                Ok(())
            }
            Some(failure) => {
                tracing::error!("Ray trace engine disabled with errors: {}", failure);
                Err(EngineError::Shutdown(Box::new(failure)))
            }
        }
    }

    /// Disable then enable, optionally switching to `config`. The result is the same as a
    /// fresh start. Returns the teardown failure if there was one, with a restart failure
    /// appended to its suppressed errors, else the restart result.
    /// An invalid `config` is rejected before anything is torn down.
    pub fn reload(&self, config: Option<EngineConfig>) -> Result<(), EngineError> {
        if let Some(config) = &config {
            config.validate().map_err(EngineError::Config)?;
        }

        let disabled = self.disable();
        if let Some(config) = config {
            self.timings.store(config.timings_enabled, Ordering::Relaxed);
            *self.config.write() = config;
        }
        let enabled = self.enable();

        let result = reload_result(disabled, enabled);
        if result.is_ok() {
            tracing::info!("Ray trace engine reloaded");
        }
        result
    }

    /// Apply a host lifecycle event. Events while disabled are ignored; the next enable
    /// reads the host's state afresh.
    pub fn handle_event(&self, event: HostEvent) -> Result<(), EngineError> {
        let ctx = match self.context() {
            Some(ctx) => ctx,
            None => return Ok(()),
        };

        match event {
            HostEvent::Connected(snapshot) => {
                let tracked = ctx.state(snapshot.id).is_some();
                if ctx.seed(&snapshot).is_some() {
                    self.host.attach_interceptor(snapshot.id)?;
                } else if tracked {
                    // Reconnected exempt: undo the attach from its earlier connect.
                    self.host.detach_interceptor(snapshot.id)?;
                }
            }
            HostEvent::Moved { id, view } => {
                ctx.update_view(id, view);
            }
            HostEvent::Teleported { id, view } => {
                ctx.replace(id, view);
            }
            HostEvent::Disconnected(id) => {
                if ctx.remove(id).is_some() {
                    self.host.detach_interceptor(id)?;
                }
            }
            HostEvent::ExemptionChanged(snapshot) => {
                if snapshot.exempt {
                    if ctx.remove(snapshot.id).is_some() {
                        self.host.detach_interceptor(snapshot.id)?;
                    }
                } else if ctx.state(snapshot.id).is_none() {
                    ctx.seed(&snapshot);
                    self.host.attach_interceptor(snapshot.id)?;
                }
            }
            HostEvent::WorldLoaded(world) => {
                ctx.load_world(world);
            }
            HostEvent::WorldUnloaded(id) => {
                ctx.unload_world(id);
            }
        }
        Ok(())
    }

    pub fn state(&self, id: ParticipantId) -> Option<Arc<ParticipantVisibilityState>> {
        self.context()?.state(id)
    }

    /// Last successful visibility result for a participant.
    pub fn visibility(&self, id: ParticipantId) -> Option<Arc<VisibilityResult>> {
        self.state(id)?.result()
    }

    /// Blocks revealed in an outbound chunk payload, computed once per payload.
    pub fn packet_blocks<F>(
        &self,
        payload: &Arc<ChunkPacket>,
        compute: F,
    ) -> Result<Arc<ChunkBlocks>, EngineError>
    where
        F: FnOnce(&ChunkPacket) -> ChunkBlocks,
    {
        let ctx = self.context().ok_or(EngineError::NotRunning)?;
        Ok(ctx.packet_cache().get_or_compute(payload, compute))
    }

    pub fn set_timings_enabled(&self, enabled: bool) {
        self.timings.store(enabled, Ordering::Relaxed);
        tracing::info!(
            "Ray trace timings {}",
            if enabled { "enabled" } else { "disabled" }
        );
    }

    pub fn timings_enabled(&self) -> bool {
        self.timings.load(Ordering::Relaxed)
    }

    /// Timings recorded in the current cycle, oldest first.
    pub fn job_timings(&self) -> Vec<JobTiming> {
        self.context()
            .map(|ctx| ctx.job_timings())
            .unwrap_or_default()
    }

    /// Re-seed each participant from the host's current view and have the host resend
    /// their chunks. Every id is attempted; the first failure is returned. Returns the
    /// number of participants re-seeded.
    pub fn reload_chunks(&self, ids: &[ParticipantId]) -> Result<usize, EngineError> {
        let ctx = self.context().ok_or(EngineError::NotRunning)?;
        let participants = self.host.participants();
        let mut first_error = None;
        let mut reseeded = 0;

        for &id in ids {
            if let Some(snapshot) = participants.iter().find(|p| p.id == id) {
                if ctx.seed(snapshot).is_some() {
                    reseeded += 1;
                }
            }
            if let Err(e) = self.host.resend_chunks(id) {
                tracing::warn!("Chunk resend for {} failed: {}", id, e);
                first_error.get_or_insert(EngineError::from(e));
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(reseeded),
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(running) = self.lifecycle.get_mut().take() {
            running.ctx.stop();
            running.timer.cancel();
            running.pool.shutdown_background();
        }
    }
}

/// Combine the two halves of a reload. A restart failure after a failed teardown is
/// kept as a suppressed error of the teardown failure.
fn reload_result(
    disabled: Result<(), EngineError>,
    enabled: Result<(), EngineError>,
) -> Result<(), EngineError> {
    let restart = match enabled {
        Ok(()) => return disabled,
        Err(e) => e,
    };
    let teardown = match disabled {
        Ok(()) => return Err(restart),
        Err(e) => e,
    };
    tracing::error!("Ray trace engine failed to restart: {}", restart);
    let failure = match teardown {
        EngineError::Shutdown(mut failure) => {
            failure.suppressed.push(restart);
            failure
        }
        other => Box::new(ShutdownFailure {
            first: other,
            suppressed: vec![restart],
        }),
    };
    Err(EngineError::Shutdown(failure))
}

/// Run one teardown step, recording its error or panic and carrying on.
fn run_step<F>(failures: &mut Vec<EngineError>, step: &'static str, f: F)
where
    F: FnOnce() -> Result<(), EngineError>,
{
    let result = panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        Err(EngineError::Panicked {
            context: step,
            message: panic_message(payload.as_ref()),
        })
    });
    if let Err(e) = result {
        tracing::error!("Teardown step '{}' failed: {}", step, e);
        failures.push(e);
    }
}
