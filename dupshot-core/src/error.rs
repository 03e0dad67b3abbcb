//! Error types for the capture pipeline.
//!
//! Every fallible operation returns `Result<T, CaptureError>`. Variants are
//! grouped by the stage that raises them so the caller can decide whether a
//! failure aborts the run or only skips part of a cycle.

use std::path::PathBuf;

use thiserror::Error;

/// The canonical error type for a capture run.
#[derive(Debug, Error)]
pub enum CaptureError {
    // ── Setup Errors ─────────────────────────────────────────────
    /// No rendering backend could be created from the fallback list.
    #[error("no usable rendering device: {0}")]
    DeviceInit(String),

    /// The output is already duplicated by another client or access was denied.
    #[error("desktop duplication unavailable: {0}")]
    DuplicationUnavailable(String),

    /// The host platform has no duplication service.
    #[error("unsupported platform: {0}")]
    Unsupported(&'static str),

    /// A configuration value could not be parsed or is out of range.
    #[error("invalid configuration: {0}")]
    Config(String),

    // ── Frame Protocol Errors ────────────────────────────────────
    /// No frame with new content arrived within the retry budget.
    #[error("no new frame after {attempts} attempts ({timeout_ms} ms each)")]
    FrameTimeout { attempts: u32, timeout_ms: u32 },

    /// The duplication service rejected a frame acquisition.
    #[error("frame acquisition failed: {0}")]
    Acquire(String),

    /// The duplication service rejected a frame release.
    #[error("frame release failed: {0}")]
    Release(String),

    /// A scoped handle was used out of order (double acquire, release without frame, nested map).
    #[error("resource protocol violation: {0}")]
    ProtocolViolation(&'static str),

    // ── Staging Errors ───────────────────────────────────────────
    /// The CPU-readable staging resource could not be created.
    #[error("staging allocation failed: {0}")]
    StagingAllocation(String),

    /// The surface could not be copied into the staging resource.
    #[error("staging copy failed: {0}")]
    Stage(String),

    /// The staging resource could not be mapped, or the mapping is malformed.
    #[error("map failed: {0}")]
    Map(String),

    // ── Cursor Errors ────────────────────────────────────────────
    /// Cursor state or shape could not be obtained. Never fails a cycle.
    #[error("cursor unavailable: {0}")]
    CursorUnavailable(String),

    // ── Output Errors ────────────────────────────────────────────
    /// The encoded image could not be written.
    #[error("failed to write {}: {source}", path.display())]
    EncodeIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CaptureError {
    /// Whether the pipeline recovers from this error locally.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CaptureError::CursorUnavailable(_))
    }

    /// Whether this error comes from device, output or duplication setup.
    pub fn is_setup(&self) -> bool {
        matches!(
            self,
            CaptureError::DeviceInit(_)
                | CaptureError::DuplicationUnavailable(_)
                | CaptureError::Unsupported(_)
                | CaptureError::Config(_)
        )
    }
}
