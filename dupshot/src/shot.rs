//! Capture-and-save runner.

use std::path::PathBuf;

use tracing::info;

use dupshot_core::{CaptureConfig, CaptureError, CaptureOutput};

/// Capture one frame of the configured output and write it to disk.
///
/// Returns the path written. Nothing is left at the destination on failure.
pub fn run(config: &CaptureConfig) -> Result<PathBuf, CaptureError> {
    info!(
        output = config.output_index,
        cursor = ?config.cursor,
        timeout_ms = config.retry.timeout_ms,
        "capturing"
    );
    let output = dupshot_core::capture_desktop(config)?;
    write_output(&output, config)
}

/// Encode a captured frame in the configured format and write it atomically.
pub fn write_output(output: &CaptureOutput, config: &CaptureConfig) -> Result<PathBuf, CaptureError> {
    output.image.save(&config.output_path, config.format)?;
    info!(
        path = %config.output_path.display(),
        width = output.image.width,
        height = output.image.height,
        "saved"
    );
    Ok(config.output_path.clone())
}

// ── Tests ────────────────────────────────────────────────────────
