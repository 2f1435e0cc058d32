//! Ray-trace anti-xray engine.
//!
//! Each tick, every eligible participant gets one ray-trace job on a dedicated worker pool
//! that measures how far their view is unobstructed. The results tell the packet
//! obfuscation layer which hidden blocks a participant could legitimately see. The host
//! runtime talks to the engine through the [`host::Host`] trait; the binary feeds it over
//! the WebSocket bridge in [`ws`].

pub mod config;
pub mod error;
pub mod host;
pub mod job;
pub mod lifecycle;
pub mod packet_cache;
pub mod participant;
pub mod probe;
pub mod raycast;
pub mod state;
pub mod tick_loop;
pub mod voxel_grid;
pub mod ws;
