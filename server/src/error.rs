use std::fmt;

use antixray_shared::types::{ParticipantId, WorldId};

use crate::host::HostError;

/// Errors raised by the ray-trace engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// The world query failed or its world went away mid-job. Fails one job only.
    GeometryQueryFailure { world: WorldId, message: String },
    /// Cooperative cancellation during shutdown. Terminal, never retried.
    JobInterrupted { participant: ParticipantId },
    /// The worker pool still had running jobs when the grace period ran out.
    TimeoutOnDrain { still_running: usize, grace_ms: u64 },
    /// A host-runtime callback failed.
    Host(HostError),
    /// A job or teardown step panicked instead of returning an error.
    Panicked { context: &'static str, message: String },
    /// Invalid configuration.
    Config(String),
    /// The ray-trace worker pool could not be created.
    PoolStart(String),
    /// The engine is disabled.
    NotRunning,
    /// One or more teardown steps failed.
    Shutdown(Box<ShutdownFailure>),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::GeometryQueryFailure { world, message } => {
                write!(f, "geometry query failed in {}: {}", world, message)
            }
            EngineError::JobInterrupted { participant } => {
                write!(f, "ray trace job for {} interrupted", participant)
            }
            EngineError::TimeoutOnDrain {
                still_running,
                grace_ms,
            } => write!(
                f,
                "{} ray trace job(s) still running after {}ms grace period",
                still_running, grace_ms
            ),
            EngineError::Host(e) => write!(f, "host error: {}", e),
            EngineError::Panicked { context, message } => {
                write!(f, "{} panicked: {}", context, message)
            }
            EngineError::Config(msg) => write!(f, "invalid configuration: {}", msg),
            EngineError::PoolStart(msg) => write!(f, "failed to start ray trace pool: {}", msg),
            EngineError::NotRunning => write!(f, "engine is not running"),
            EngineError::Shutdown(failure) => write!(f, "{}", failure),
        }
    }
}

impl std::error::Error for EngineError {}

/// Best-effort text of a caught panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl From<HostError> for EngineError {
    fn from(e: HostError) -> Self {
        EngineError::Host(e)
    }
}

/// Every failure collected while tearing the engine down. `first` is the earliest failed
/// step; the rest are kept in step order.
#[derive(Debug, Clone, PartialEq)]
pub struct ShutdownFailure {
    pub first: EngineError,
    pub suppressed: Vec<EngineError>,
}

impl ShutdownFailure {
    /// Fold collected failures into one. `None` when every step succeeded.
    pub fn from_failures(mut failures: Vec<EngineError>) -> Option<Self> {
        if failures.is_empty() {
            return None;
        }
        let first = failures.remove(0);
        Some(Self {
            first,
            suppressed: failures,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &EngineError> {
        std::iter::once(&self.first).chain(self.suppressed.iter())
    }

    pub fn contains_drain_timeout(&self) -> bool {
        self.iter()
            .any(|e| matches!(e, EngineError::TimeoutOnDrain { .. }))
    }
}

impl fmt::Display for ShutdownFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shutdown failed: {}", self.first)?;
        if !self.suppressed.is_empty() {
            write!(f, " ({} suppressed:", self.suppressed.len())?;
            for e in &self.suppressed {
                write!(f, " [{}]", e)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}
