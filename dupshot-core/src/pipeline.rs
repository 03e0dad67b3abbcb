//! One capture cycle, end to end.
//!
//! ```text
//! acquire ─▶ stage ─▶ map ─▶ query cursor ─▶ composite ─▶ encode ─▶ unmap ─▶ release
//! ```
//!
//! Every handle in the chain is a guard, so an error at any step still
//! unmaps the staging resource and releases the frame on the way out.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cursor::{CursorCompositor, CursorProvider, CursorState};
use crate::encoder::{ImageFormat, OutputImage, PixelEncoder};
use crate::error::CaptureError;
use crate::source::{DuplicationBackend, FrameSource, RetryPolicy};
use crate::staging::{StagingDevice, SurfaceStager};
use crate::types::FrameMetadata;

// ── Configuration ────────────────────────────────────────────────

/// Where the cursor image comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CursorMode {
    /// Pointer position and shape reported by the duplication service.
    #[default]
    Duplication,
    /// The system cursor as seen by GDI.
    Gdi,
    /// Leave the cursor out.
    Hidden,
}

/// Everything a single capture needs to know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Output (monitor) index on the selected adapter.
    pub output_index: u32,
    pub retry: RetryPolicy,
    pub cursor: CursorMode,
    pub output_path: PathBuf,
    pub format: ImageFormat,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            output_index: 0,
            retry: RetryPolicy::default(),
            cursor: CursorMode::Duplication,
            output_path: PathBuf::from("screen.ppm"),
            format: ImageFormat::Ppm,
        }
    }
}

// ── Cursor source ────────────────────────────────────────────────

/// Resolved cursor source for a pipeline.
pub enum CursorSource {
    /// Use the pointer state folded from duplicated frames.
    Duplication,
    /// Ask an external provider each cycle.
    Provider(Box<dyn CursorProvider>),
    Hidden,
}

impl std::fmt::Debug for CursorSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CursorSource::Duplication => "Duplication",
            CursorSource::Provider(_) => "Provider",
            CursorSource::Hidden => "Hidden",
        })
    }
}

// ── CapturePipeline ──────────────────────────────────────────────

/// Result of one successful cycle.
#[derive(Debug, Clone)]
pub struct CaptureOutput {
    pub image: OutputImage,
    pub metadata: FrameMetadata,
    /// Cursor pixels written onto the frame; zero if none were drawn.
    pub cursor_pixels: usize,
}

/// Owns one frame source and one staging resource.
pub struct CapturePipeline<B, D>
where
    B: DuplicationBackend,
    D: StagingDevice<Surface = B::Surface>,
{
    source: FrameSource<B>,
    stager: SurfaceStager<D>,
    compositor: CursorCompositor,
    encoder: PixelEncoder,
    cursor: CursorSource,
}

impl<B, D> CapturePipeline<B, D>
where
    B: DuplicationBackend,
    D: StagingDevice<Surface = B::Surface>,
{
    pub fn new(backend: B, device: D, retry: RetryPolicy, cursor: CursorSource) -> Self {
        Self {
            source: FrameSource::new(backend, retry),
            stager: SurfaceStager::new(device),
            compositor: CursorCompositor::new(),
            encoder: PixelEncoder::new(),
            cursor,
        }
    }

    pub fn source(&self) -> &FrameSource<B> {
        &self.source
    }

    pub fn stager(&self) -> &SurfaceStager<D> {
        &self.stager
    }

    /// Run one capture cycle and return the encoded image.
    ///
    /// A cursor that cannot be queried or drawn is logged and skipped; the
    /// frame is still produced. Any other failure aborts the cycle after the
    /// mapping and frame have been handed back.
    pub fn capture(&mut self) -> Result<CaptureOutput, CaptureError> {
        let frame = self.source.acquire_frame()?;
        let metadata = *frame.metadata();

        self.stager.stage(frame.surface())?;
        let mut mapped = self.stager.map()?;

        let cursor = match &mut self.cursor {
            CursorSource::Duplication => frame.pointer().current(),
            CursorSource::Provider(provider) => provider.query_cursor(),
            CursorSource::Hidden => Ok(None),
        };
        let cursor = skip_recoverable(cursor, "cursor query")?.flatten();

        let mut view = mapped.view()?;
        let cursor_pixels = match &cursor {
            Some(state) => draw_cursor(&self.compositor, &mut view, state)?,
            None => 0,
        };
        let image = self.encoder.encode_image(&view);
        drop(view);

        mapped.unmap();
        frame.release()?;

        info!(
            width = image.width,
            height = image.height,
            cursor_pixels,
            "frame captured"
        );
        Ok(CaptureOutput {
            image,
            metadata,
            cursor_pixels,
        })
    }
}

fn draw_cursor(
    compositor: &CursorCompositor,
    view: &mut crate::types::MappedView<'_>,
    state: &CursorState,
) -> Result<usize, CaptureError> {
    debug!(x = state.position.x, y = state.position.y, "compositing cursor");
    Ok(skip_recoverable(compositor.composite(view, state), "cursor composite")?.unwrap_or(0))
}

/// `Ok(Some(v))` on success, `Ok(None)` after logging a recoverable error.
fn skip_recoverable<T>(result: Result<T, CaptureError>, what: &str) -> Result<Option<T>, CaptureError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_recoverable() => {
            warn!("{what} skipped: {e}");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cursor::CursorShape;
    use crate::sim::{SimDuplication, SimStaging, SimSurface, new_frame};
    use crate::source::{Acquired, RawFrame};
    use crate::types::Point;

    struct FixedCursor(Result<Option<CursorState>, &'static str>);

    impl CursorProvider for FixedCursor {
        fn query_cursor(&mut self) -> Result<Option<CursorState>, CaptureError> {
            self.0
                .clone()
                .map_err(|m| CaptureError::CursorUnavailable(m.into()))
        }
    }

    fn retry() -> RetryPolicy {
        RetryPolicy {
            timeout_ms: 1,
            max_empty_retries: 0,
            retry_delay: Duration::ZERO,
        }
    }

    fn one_frame(w: u32, h: u32) -> SimDuplication {
        SimDuplication::new([new_frame(SimSurface::filled(w, h, [0; 4]), 1)])
    }

    fn red_dot(x: i32, y: i32) -> CursorState {
        CursorState {
            visible: true,
            position: Point::new(x, y),
            shape: CursorShape::color(1, 1, Point::default(), vec![0, 0, 255, 255]),
        }
    }

    #[test]
    fn hidden_cursor_leaves_frame_untouched() {
        let mut pipeline = CapturePipeline::new(
            one_frame(2, 1),
            SimStaging::new(2, 1, 8, 0).unwrap(),
            retry(),
            CursorSource::Hidden,
        );
        let out = pipeline.capture().unwrap();
        assert_eq!(out.cursor_pixels, 0);
        assert_eq!(out.image.rgb, vec![0; 6]);
    }

    #[test]
    fn provider_cursor_is_drawn() {
        let mut pipeline = CapturePipeline::new(
            one_frame(2, 1),
            SimStaging::new(2, 1, 8, 0).unwrap(),
            retry(),
            CursorSource::Provider(Box::new(FixedCursor(Ok(Some(red_dot(1, 0)))))),
        );
        let out = pipeline.capture().unwrap();
        assert_eq!(out.cursor_pixels, 1);
        assert_eq!(out.image.rgb, vec![0, 0, 0, 255, 0, 0]);
    }

    #[test]
    fn cursor_failure_still_produces_frame() {
        let mut pipeline = CapturePipeline::new(
            one_frame(1, 1),
            SimStaging::new(1, 1, 4, 0).unwrap(),
            retry(),
            CursorSource::Provider(Box::new(FixedCursor(Err("no cursor")))),
        );
        let out = pipeline.capture().unwrap();
        assert_eq!(out.cursor_pixels, 0);
        assert_eq!(pipeline.source().backend().release_count(), 1);
    }

    #[test]
    fn duplication_cursor_comes_from_frame_pointer() {
        let metadata = crate::sim::pointer_metadata(5, true, 0, 0);
        let frame = Acquired::Frame(RawFrame {
            surface: SimSurface::filled(2, 2, [0; 4]),
            metadata,
            pointer_shape: Some(CursorShape::color(
                1,
                1,
                Point::default(),
                vec![255, 255, 255, 255],
            )),
        });
        let mut pipeline = CapturePipeline::new(
            SimDuplication::new([frame]),
            SimStaging::new(2, 2, 8, 0).unwrap(),
            retry(),
            CursorSource::Duplication,
        );
        let out = pipeline.capture().unwrap();
        assert_eq!(out.cursor_pixels, 1);
        assert_eq!(&out.image.rgb[..3], &[255, 255, 255]);
        assert_eq!(&out.image.rgb[3..], &[0; 9]);
    }

    #[test]
    fn stage_failure_releases_frame() {
        let mut pipeline = CapturePipeline::new(
            one_frame(3, 1),
            SimStaging::new(2, 1, 8, 0).unwrap(),
            retry(),
            CursorSource::Hidden,
        );
        let err = pipeline.capture().unwrap_err();
        assert!(matches!(err, CaptureError::Stage(_)));
        let backend = pipeline.source().backend();
        assert_eq!(backend.acquire_count(), backend.release_count());
        assert!(!backend.is_holding_frame());
        assert_eq!(pipeline.stager().device().map_count(), 0);
    }
}
