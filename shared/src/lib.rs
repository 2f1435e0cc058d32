//! Types shared between the ray-trace anti-xray engine and its host bridge.

pub mod config;
pub mod protocol;
pub mod types;
pub mod vec3;
