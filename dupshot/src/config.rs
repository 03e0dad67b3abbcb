//! Configuration for a capture run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use dupshot_core::{CaptureConfig, CaptureError, CursorMode, ImageFormat, RetryPolicy};

/// Longest single service wait accepted from the file.
const MAX_TIMEOUT_MS: u32 = 60_000;
/// Upper bound on empty-frame retries.
const MAX_EMPTY_RETRIES: u32 = 1_000;
/// Upper bound on the pause between attempts.
const MAX_RETRY_DELAY_MS: u64 = 1_000;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShotConfig {
    /// Frame acquisition settings.
    pub capture: CaptureSection,
    /// Cursor overlay settings.
    pub cursor: CursorSection,
    /// Output file settings.
    pub output: OutputSection,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Frame acquisition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSection {
    /// Output (monitor) index to capture (0 = primary).
    pub output_index: u32,
    /// Duplication service wait per attempt, in milliseconds.
    pub timeout_ms: u32,
    /// Attempts allowed after the first one when no new frame arrives.
    pub max_empty_retries: u32,
    /// Pause between attempts, in milliseconds.
    pub retry_delay_ms: u64,
}

/// Cursor overlay.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CursorSection {
    /// "duplication", "gdi" or "hidden".
    pub mode: CursorMode,
}

/// Output file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    /// Destination path.
    pub path: PathBuf,
    /// "auto" (from the extension), "ppm" or "bmp".
    pub format: String,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for CaptureSection {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            output_index: 0,
            timeout_ms: retry.timeout_ms,
            max_empty_retries: retry.max_empty_retries,
            retry_delay_ms: retry.retry_delay.as_millis() as u64,
        }
    }
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("screen.ppm"),
            format: "auto".into(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ShotConfig {
    /// Load configuration from a TOML file.
    ///
    /// A missing file yields the defaults; an unreadable or malformed one is
    /// a `Config` error.
    pub fn load(path: &Path) -> Result<Self, CaptureError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(CaptureError::Config(format!("{}: {e}", path.display())));
            }
        };
        toml::from_str(&contents)
            .map_err(|e| CaptureError::Config(format!("{}: {e}", path.display())))
    }

    /// The default configuration as TOML text.
    pub fn default_toml() -> Result<String, CaptureError> {
        toml::to_string_pretty(&Self::default())
            .map_err(|e| CaptureError::Config(format!("serialize defaults: {e}")))
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> Result<(), CaptureError> {
        let text = Self::default_toml()?;
        std::fs::write(path, text).map_err(|source| CaptureError::EncodeIo {
            path: path.to_path_buf(),
            source,
        })
    }

    /// The output encoding, resolving "auto" from the path's extension.
    pub fn image_format(&self) -> Result<ImageFormat, CaptureError> {
        match self.output.format.to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(ImageFormat::from_path(&self.output.path).unwrap_or_default()),
            "ppm" => Ok(ImageFormat::Ppm),
            "bmp" => Ok(ImageFormat::Bmp),
            other => Err(CaptureError::Config(format!(
                "unknown output format {other:?} (expected auto, ppm or bmp)"
            ))),
        }
    }

    /// Convert into the core `CaptureConfig`, clamping out-of-range values.
    pub fn to_capture_config(&self) -> Result<CaptureConfig, CaptureError> {
        if self.output.path.as_os_str().is_empty() {
            return Err(CaptureError::Config("output path is empty".into()));
        }
        Ok(CaptureConfig {
            output_index: self.capture.output_index,
            retry: RetryPolicy {
                timeout_ms: self.capture.timeout_ms.clamp(1, MAX_TIMEOUT_MS),
                max_empty_retries: self.capture.max_empty_retries.min(MAX_EMPTY_RETRIES),
                retry_delay: Duration::from_millis(
                    self.capture.retry_delay_ms.min(MAX_RETRY_DELAY_MS),
                ),
            },
            cursor: self.cursor.mode,
            output_path: self.output.path.clone(),
            format: self.image_format()?,
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────
