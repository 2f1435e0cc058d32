use serde::{Deserialize, Serialize};

use crate::types::{ParticipantId, WorldId};

/// Protocol version - increment when making breaking changes.
pub const PROTOCOL_VERSION: u32 = 1;

// === Engine -> Host ===

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMsg {
    #[serde(rename = "welcome")]
    Welcome(WelcomeMsg),
    #[serde(rename = "visibility")]
    Visibility(VisibilityMsg),
    #[serde(rename = "ack")]
    Ack { op: String },
    #[serde(rename = "error")]
    Error { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WelcomeMsg {
    pub protocol_version: u32,
    pub server_version: String,
    pub ms_per_ray_trace_tick: u64,
    pub ray_trace_threads: usize,
}

/// Latest completed visibility of one participant. `tick` is 0 and `rays` empty until the
/// first job for the participant has completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibilityMsg {
    pub id: ParticipantId,
    pub tick: u64,
    pub rays: Vec<RayWire>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RayWire {
    pub position: [f64; 3],
    pub direction: [f64; 3],
    pub distance: f64,
}

// === Host -> Engine ===

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMsg {
    #[serde(rename = "connect")]
    Connect {
        id: ParticipantId,
        world: WorldId,
        position: [f64; 3],
        direction: [f64; 3],
        #[serde(default)]
        exempt: bool,
    },
    #[serde(rename = "move")]
    Move {
        id: ParticipantId,
        position: [f64; 3],
        direction: [f64; 3],
    },
    #[serde(rename = "teleport")]
    Teleport {
        id: ParticipantId,
        world: WorldId,
        position: [f64; 3],
        direction: [f64; 3],
    },
    #[serde(rename = "disconnect")]
    Disconnect { id: ParticipantId },
    #[serde(rename = "set_exempt")]
    SetExempt { id: ParticipantId, exempt: bool },
    #[serde(rename = "query")]
    Query { id: ParticipantId },
    #[serde(rename = "reload")]
    Reload,
    #[serde(rename = "set_timings")]
    SetTimings { enabled: bool },
    #[serde(rename = "reload_chunks")]
    ReloadChunks { ids: Vec<ParticipantId> },
}

impl ClientMsg {
    /// Tag used in `ack` replies.
    pub fn op(&self) -> &'static str {
        match self {
            ClientMsg::Connect { .. } => "connect",
            ClientMsg::Move { .. } => "move",
            ClientMsg::Teleport { .. } => "teleport",
            ClientMsg::Disconnect { .. } => "disconnect",
            ClientMsg::SetExempt { .. } => "set_exempt",
            ClientMsg::Query { .. } => "query",
            ClientMsg::Reload => "reload",
            ClientMsg::SetTimings { .. } => "set_timings",
            ClientMsg::ReloadChunks { .. } => "reload_chunks",
        }
    }
}

// === Conversion helpers ===

/// Round to 4 decimal places (plenty for block-scale distances, keeps JSON small)
#[inline]
pub fn round4(v: f64) -> f64 {
    (v * 10000.0).round() / 10000.0
}
