//! # dupshot-core
//!
//! Single-shot desktop capture over a frame-duplication service.
//!
//! This crate contains:
//! - **Source**: `FrameSource` negotiating one frame at a time, skipping empty frames
//! - **Staging**: `SurfaceStager` copying a frame into CPU memory behind a map guard
//! - **Cursor**: tagged cursor shapes, `PointerTracker`, and `CursorCompositor`
//! - **Encoder**: `PixelEncoder` turning pitched BGRA into PPM or BMP output
//! - **Pipeline**: `CapturePipeline` chaining the above for one capture cycle
//! - **Device**: ordered driver fallback for device creation
//! - **DXGI**: the Windows backend (`dxgi`), stubbed on other platforms
//! - **Sim**: an in-memory service and staging device for tests
//! - **Error**: `CaptureError`, a `thiserror`-based error enum

pub mod cursor;
pub mod device;
pub mod dxgi;
pub mod encoder;
pub mod error;
pub mod pipeline;
pub mod sim;
pub mod source;
pub mod staging;
pub mod types;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use cursor::{
    CursorCompositor, CursorImage, CursorProvider, CursorShape, CursorState, PointerTracker,
    ShapeBitmap, Texel,
};
pub use device::{DriverKind, first_success};
pub use dxgi::capture_desktop;
pub use encoder::{ImageFormat, OutputImage, PPM_MAXVAL, PixelEncoder, write_atomic};
pub use error::CaptureError;
pub use pipeline::{CaptureConfig, CaptureOutput, CapturePipeline, CursorMode, CursorSource};
pub use source::{Acquired, CapturedFrame, DuplicationBackend, FrameSource, RawFrame, RetryPolicy};
pub use staging::{MappedSurface, RawMapping, StagingDevice, SurfaceStager};
pub use types::{FrameMetadata, MappedView, PixelFormat, Point};
