//! The host runtime as the engine sees it: who is connected, which worlds are loaded, and
//! the per-participant hooks the engine asks the host to install or remove.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use antixray_shared::types::{ObservationRay, ParticipantId, WorldId};
use parking_lot::{Mutex, RwLock};

use crate::probe::GeometryProbe;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostError {
    pub message: String,
}

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for HostError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HostError {}

/// A connected participant as currently known to the host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParticipantSnapshot {
    pub id: ParticipantId,
    pub view: ObservationRay,
    /// Exempt participants (non-player entities, bypass permission) are never ray traced.
    pub exempt: bool,
}

/// A loaded world and its geometry query.
#[derive(Clone)]
pub struct WorldDescriptor {
    pub id: WorldId,
    pub name: String,
    pub probe: Arc<dyn GeometryProbe>,
}

impl std::fmt::Debug for WorldDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

pub trait Host: Send + Sync {
    fn participants(&self) -> Vec<ParticipantSnapshot>;

    fn worlds(&self) -> Vec<WorldDescriptor>;

    /// Install the outbound chunk-packet interceptor for a participant.
    fn attach_interceptor(&self, id: ParticipantId) -> Result<(), HostError>;

    fn detach_interceptor(&self, id: ParticipantId) -> Result<(), HostError>;

    /// Hand a world back to the host's default obfuscation.
    fn release_world(&self, id: WorldId) -> Result<(), HostError>;

    /// Resend every loaded chunk to a participant.
    fn resend_chunks(&self, id: ParticipantId) -> Result<(), HostError>;
}

/// Identity of one bridge connection.
pub type BridgeId = u64;

/// In-process host fed by the WebSocket bridge.
#[derive(Default)]
pub struct BridgeHost {
    worlds: RwLock<Vec<WorldDescriptor>>,
    participants: Mutex<BTreeMap<ParticipantId, ParticipantSnapshot>>,
    /// Bridge connection that last connected each participant.
    owners: Mutex<BTreeMap<ParticipantId, BridgeId>>,
    next_bridge: AtomicU64,
    attached: Mutex<HashSet<ParticipantId>>,
    resent: Mutex<Vec<ParticipantId>>,
}

impl BridgeHost {
    pub fn new(worlds: Vec<WorldDescriptor>) -> Self {
        Self {
            worlds: RwLock::new(worlds),
            ..Default::default()
        }
    }

    pub fn world(&self, id: WorldId) -> Option<WorldDescriptor> {
        self.worlds.read().iter().find(|w| w.id == id).cloned()
    }

    pub fn add_world(&self, world: WorldDescriptor) {
        let mut worlds = self.worlds.write();
        worlds.retain(|w| w.id != world.id);
        worlds.push(world);
    }

    pub fn remove_world(&self, id: WorldId) -> Option<WorldDescriptor> {
        let mut worlds = self.worlds.write();
        let idx = worlds.iter().position(|w| w.id == id)?;
        Some(worlds.remove(idx))
    }

    pub fn record_participant(&self, snapshot: ParticipantSnapshot) {
        self.participants.lock().insert(snapshot.id, snapshot);
    }

    pub fn record_view(&self, id: ParticipantId, view: ObservationRay) -> bool {
        match self.participants.lock().get_mut(&id) {
            Some(p) => {
                p.view = view;
                true
            }
            None => false,
        }
    }

    pub fn record_exempt(&self, id: ParticipantId, exempt: bool) -> Option<ParticipantSnapshot> {
        let mut participants = self.participants.lock();
        let p = participants.get_mut(&id)?;
        p.exempt = exempt;
        Some(*p)
    }

    pub fn forget_participant(&self, id: ParticipantId) {
        self.participants.lock().remove(&id);
        self.owners.lock().remove(&id);
    }

    pub fn open_bridge(&self) -> BridgeId {
        self.next_bridge.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Make `bridge` the owner of a connected participant, taking it over from any other.
    pub fn claim(&self, id: ParticipantId, bridge: BridgeId) {
        if self.participants.lock().contains_key(&id) {
            self.owners.lock().insert(id, bridge);
        }
    }

    pub fn owned_by(&self, id: ParticipantId, bridge: BridgeId) -> bool {
        self.owners.lock().get(&id) == Some(&bridge)
    }

    pub fn participant(&self, id: ParticipantId) -> Option<ParticipantSnapshot> {
        self.participants.lock().get(&id).copied()
    }

    pub fn is_attached(&self, id: ParticipantId) -> bool {
        self.attached.lock().contains(&id)
    }

    /// Participants that had chunks resent, oldest first.
    pub fn resent(&self) -> Vec<ParticipantId> {
        self.resent.lock().clone()
    }
}

impl Host for BridgeHost {
    fn participants(&self) -> Vec<ParticipantSnapshot> {
        self.participants.lock().values().copied().collect()
    }

    fn worlds(&self) -> Vec<WorldDescriptor> {
        self.worlds.read().clone()
    }

    fn attach_interceptor(&self, id: ParticipantId) -> Result<(), HostError> {
        self.attached.lock().insert(id);
        Ok(())
    }

    fn detach_interceptor(&self, id: ParticipantId) -> Result<(), HostError> {
        self.attached.lock().remove(&id);
        Ok(())
    }

    fn release_world(&self, id: WorldId) -> Result<(), HostError> {
        if self.world(id).is_none() {
            return Err(HostError::new(format!("{} is not loaded", id)));
        }
        tracing::debug!("Released {} to default obfuscation", id);
        Ok(())
    }

    fn resend_chunks(&self, id: ParticipantId) -> Result<(), HostError> {
        if self.participant(id).is_none() {
            return Err(HostError::new(format!("{} is not connected", id)));
        }
        self.resent.lock().push(id);
        Ok(())
    }
}
