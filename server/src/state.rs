use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use antixray_shared::config::WorldPolicy;
use antixray_shared::types::{ObservationRay, ParticipantId, WorldId};
use parking_lot::{Mutex, RwLock};

use crate::config::EngineConfig;
use crate::host::{ParticipantSnapshot, WorldDescriptor};
use crate::packet_cache::{ChunkPacket, ObfuscatedPacketCache};
use crate::participant::{JobTiming, ParticipantVisibilityState};
use crate::probe::GeometryProbe;

/// Job timings kept while diagnostics are on.
const TIMING_HISTORY: usize = 1024;

/// Lifecycle notifications from the host runtime.
#[derive(Debug, Clone)]
pub enum HostEvent {
    Connected(ParticipantSnapshot),
    /// Movement or look change.
    Moved {
        id: ParticipantId,
        view: ObservationRay,
    },
    /// Teleport, respawn or world change.
    Teleported {
        id: ParticipantId,
        view: ObservationRay,
    },
    Disconnected(ParticipantId),
    ExemptionChanged(ParticipantSnapshot),
    WorldLoaded(WorldDescriptor),
    WorldUnloaded(WorldId),
}

/// A loaded world with its resolved ray-trace policy.
pub struct LoadedWorld {
    pub id: WorldId,
    pub name: String,
    pub policy: WorldPolicy,
    pub probe: Arc<dyn GeometryProbe>,
}

/// Everything one enable/disable cycle of the engine owns besides its threads.
///
/// Built fresh on every enable and dropped on disable, so a reload can't see anything
/// left over from the previous cycle.
pub struct EngineContext {
    config: EngineConfig,
    running: AtomicBool,
    timings_enabled: Arc<AtomicBool>,
    tick: AtomicU64,
    next_generation: AtomicU64,
    in_flight: AtomicUsize,
    states: RwLock<HashMap<ParticipantId, Arc<ParticipantVisibilityState>>>,
    worlds: RwLock<HashMap<WorldId, Arc<LoadedWorld>>>,
    packet_cache: ObfuscatedPacketCache<ChunkPacket>,
    timings: Mutex<VecDeque<JobTiming>>,
}

impl EngineContext {
    pub fn new(config: EngineConfig, timings_enabled: Arc<AtomicBool>) -> Self {
        Self {
            config,
            running: AtomicBool::new(true),
            timings_enabled,
            tick: AtomicU64::new(0),
            next_generation: AtomicU64::new(1),
            in_flight: AtomicUsize::new(0),
            states: RwLock::new(HashMap::new()),
            worlds: RwLock::new(HashMap::new()),
            packet_cache: ObfuscatedPacketCache::new(),
            timings: Mutex::new(VecDeque::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Flag jobs poll between probes. Cleared by [`EngineContext::stop`].
    pub fn running_flag(&self) -> &AtomicBool {
        &self.running
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn timings_enabled(&self) -> bool {
        self.timings_enabled.load(Ordering::Relaxed)
    }

    pub fn current_tick(&self) -> u64 {
        self.tick.load(Ordering::Acquire)
    }

    pub(crate) fn next_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub(crate) fn enter_job(&self) -> InFlightGuard<'_> {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        InFlightGuard { ctx: self }
    }

    pub fn packet_cache(&self) -> &ObfuscatedPacketCache<ChunkPacket> {
        &self.packet_cache
    }

    // === Worlds ===

    pub fn load_world(&self, world: WorldDescriptor) -> Arc<LoadedWorld> {
        let policy = self.config.world_settings.policy_for(&world.name);
        let loaded = Arc::new(LoadedWorld {
            id: world.id,
            name: world.name,
            policy,
            probe: world.probe,
        });
        tracing::info!(
            "Loaded {} '{}' (ray trace: {}, third person: {})",
            loaded.id,
            loaded.name,
            policy.ray_trace,
            policy.ray_trace_third_person
        );
        self.worlds.write().insert(loaded.id, Arc::clone(&loaded));
        loaded
    }

    pub fn unload_world(&self, id: WorldId) -> Option<Arc<LoadedWorld>> {
        let removed = self.worlds.write().remove(&id);
        if let Some(world) = &removed {
            tracing::info!("Unloaded {} '{}'", world.id, world.name);
        }
        removed
    }

    pub fn world(&self, id: WorldId) -> Option<Arc<LoadedWorld>> {
        self.worlds.read().get(&id).cloned()
    }

    pub fn world_ids(&self) -> Vec<WorldId> {
        let mut ids: Vec<WorldId> = self.worlds.read().keys().copied().collect();
        ids.sort();
        ids
    }

    // === Participants ===

    /// Create a fresh state for an eligible participant, replacing any previous one.
    /// Exempt participants lose their state instead.
    pub fn seed(&self, snapshot: &ParticipantSnapshot) -> Option<Arc<ParticipantVisibilityState>> {
        if snapshot.exempt {
            self.remove(snapshot.id);
            return None;
        }
        let generation = self.next_generation.fetch_add(1, Ordering::AcqRel);
        let state = Arc::new(ParticipantVisibilityState::new(
            snapshot.id,
            generation,
            snapshot.view,
        ));
        self.states.write().insert(snapshot.id, Arc::clone(&state));
        Some(state)
    }

    /// Apply a view update. Crossing into another world replaces the state like a
    /// teleport. Returns false for participants without a state.
    pub fn update_view(&self, id: ParticipantId, view: ObservationRay) -> bool {
        let current = match self.state(id) {
            Some(state) => state,
            None => return false,
        };
        if current.view().world == view.world {
            current.set_view(view);
        } else {
            self.replace(id, view);
        }
        true
    }

    /// Swap in a new-generation state at `view` if the participant has one.
    pub fn replace(&self, id: ParticipantId, view: ObservationRay) -> bool {
        if self.state(id).is_none() {
            return false;
        }
        self.seed(&ParticipantSnapshot {
            id,
            view,
            exempt: false,
        });
        true
    }

    pub fn remove(&self, id: ParticipantId) -> Option<Arc<ParticipantVisibilityState>> {
        self.states.write().remove(&id)
    }

    pub fn state(&self, id: ParticipantId) -> Option<Arc<ParticipantVisibilityState>> {
        self.states.read().get(&id).cloned()
    }

    pub fn participant_count(&self) -> usize {
        self.states.read().len()
    }

    pub fn states(&self) -> Vec<Arc<ParticipantVisibilityState>> {
        self.states.read().values().cloned().collect()
    }

    /// States that get a job this tick: their world is loaded and ray traced.
    pub fn dispatchable_states(&self) -> Vec<Arc<ParticipantVisibilityState>> {
        let worlds = self.worlds.read();
        self.states
            .read()
            .values()
            .filter(|s| {
                worlds
                    .get(&s.view().world)
                    .map_or(false, |w| w.policy.ray_trace)
            })
            .cloned()
            .collect()
    }

    /// Whether `state` is still the live entry for its participant.
    pub fn is_live(&self, state: &ParticipantVisibilityState) -> bool {
        self.states
            .read()
            .get(&state.id())
            .map_or(false, |live| live.generation() == state.generation())
    }

    // === Diagnostics ===

    pub(crate) fn record_timing(&self, timing: JobTiming) {
        let mut timings = self.timings.lock();
        if timings.len() == TIMING_HISTORY {
            timings.pop_front();
        }
        timings.push_back(timing);
    }

    pub fn job_timings(&self) -> Vec<JobTiming> {
        self.timings.lock().iter().copied().collect()
    }

    /// Drop every per-participant state, cached payload and timing.
    pub fn clear(&self) {
        self.states.write().clear();
        self.packet_cache.clear();
        self.timings.lock().clear();
    }
}

pub(crate) struct InFlightGuard<'a> {
    ctx: &'a EngineContext,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.ctx.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}
