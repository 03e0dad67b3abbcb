//! DXGI Desktop Duplication backend for Windows.
//!
//! Wires the Direct3D 11 duplication API into the portable pipeline:
//!
//! 1. Create a D3D11 device, falling back hardware → WARP → reference.
//! 2. Walk device → adapter → output and duplicate the requested output.
//! 3. Allocate one CPU read/write staging texture at the output size.
//! 4. Hand both to [`CapturePipeline`](crate::pipeline::CapturePipeline).
//!
//! # Platform
//!
//! The backend is **Windows-only**. On other platforms
//! [`capture_desktop`] fails with [`CaptureError::Unsupported`]. The status
//! classification and pointer-shape decoding below are portable.

#[cfg(target_os = "windows")]
mod gdi_cursor;

#[cfg(target_os = "windows")]
pub use gdi_cursor::GdiCursor;

use crate::cursor::{CursorShape, ShapeBitmap};
use crate::error::CaptureError;
use crate::pipeline::{CaptureConfig, CaptureOutput};
use crate::types::Point;

// ── Service status codes ─────────────────────────────────────────

const HR_WAIT_TIMEOUT: u32 = 0x887A_0027;
const HR_ACCESS_LOST: u32 = 0x887A_0026;
const HR_NOT_CURRENTLY_AVAILABLE: u32 = 0x887A_0022;
const HR_UNSUPPORTED: u32 = 0x887A_0004;
const HR_SESSION_DISCONNECTED: u32 = 0x887A_0028;
const HR_ACCESS_DENIED: u32 = 0x8007_0005;

/// How a failed duplication call should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    /// The wait elapsed; counts as one empty attempt.
    Timeout,
    /// Duplication is not (or no longer) possible for this session.
    Unavailable,
    /// Any other failure.
    Failed,
}

/// Classify an `HRESULT` returned by the duplication service.
pub fn classify_hresult(code: i32) -> ServiceStatus {
    match code as u32 {
        HR_WAIT_TIMEOUT => ServiceStatus::Timeout,
        HR_ACCESS_LOST
        | HR_NOT_CURRENTLY_AVAILABLE
        | HR_UNSUPPORTED
        | HR_SESSION_DISCONNECTED
        | HR_ACCESS_DENIED => ServiceStatus::Unavailable,
        _ => ServiceStatus::Failed,
    }
}

// ── Pointer shapes ───────────────────────────────────────────────

const SHAPE_TYPE_MONOCHROME: u32 = 1;
const SHAPE_TYPE_COLOR: u32 = 2;
const SHAPE_TYPE_MASKED_COLOR: u32 = 4;

/// Pointer shape as reported alongside a duplicated frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerShapeInfo {
    pub kind: u32,
    pub width: u32,
    /// Buffer height; twice the visible height for monochrome shapes.
    pub height: u32,
    pub pitch: u32,
    pub hotspot: Point,
}

/// Decode a pointer-shape buffer into a [`CursorShape`].
///
/// Returns `None` for shape types this crate does not know.
pub fn decode_pointer_shape(info: &PointerShapeInfo, buffer: Vec<u8>) -> Option<CursorShape> {
    let pitch = info.pitch as usize;
    let (height, bitmap) = match info.kind {
        SHAPE_TYPE_MONOCHROME => (info.height / 2, ShapeBitmap::Monochrome { pitch, mask: buffer }),
        SHAPE_TYPE_COLOR => (info.height, ShapeBitmap::Color { pitch, pixels: buffer }),
        SHAPE_TYPE_MASKED_COLOR => (
            info.height,
            ShapeBitmap::MaskedColor {
                pitch,
                pixels: buffer,
            },
        ),
        _ => return None,
    };
    Some(CursorShape {
        width: info.width,
        height,
        hotspot: info.hotspot,
        bitmap,
    })
}

// ── Windows implementation ───────────────────────────────────────

#[cfg(target_os = "windows")]
mod platform {
    use std::ffi::c_void;
    use std::ptr::NonNull;

    use tracing::{debug, trace, warn};
    use windows::{
        core::Interface,
        Win32::Graphics::{
            Direct3D::{
                D3D_DRIVER_TYPE, D3D_DRIVER_TYPE_HARDWARE, D3D_DRIVER_TYPE_REFERENCE,
                D3D_DRIVER_TYPE_WARP, D3D_FEATURE_LEVEL, D3D_FEATURE_LEVEL_9_1,
                D3D_FEATURE_LEVEL_10_0, D3D_FEATURE_LEVEL_10_1, D3D_FEATURE_LEVEL_11_0,
            },
            Direct3D11::*,
            Dxgi::{Common::*, *},
        },
    };

    use super::*;
    use crate::cursor::CursorProvider;
    use crate::device::{DriverKind, first_success};
    use crate::pipeline::{CapturePipeline, CursorMode, CursorSource};
    use crate::source::{Acquired, DuplicationBackend, RawFrame};
    use crate::staging::{RawMapping, StagingDevice};
    use crate::types::FrameMetadata;

    const FEATURE_LEVELS: [D3D_FEATURE_LEVEL; 4] = [
        D3D_FEATURE_LEVEL_11_0,
        D3D_FEATURE_LEVEL_10_1,
        D3D_FEATURE_LEVEL_10_0,
        D3D_FEATURE_LEVEL_9_1,
    ];

    fn driver_type(kind: DriverKind) -> D3D_DRIVER_TYPE {
        match kind {
            DriverKind::Hardware => D3D_DRIVER_TYPE_HARDWARE,
            DriverKind::Warp => D3D_DRIVER_TYPE_WARP,
            DriverKind::Reference => D3D_DRIVER_TYPE_REFERENCE,
        }
    }

    fn service_error(call: &str, e: windows::core::Error) -> CaptureError {
        match classify_hresult(e.code().0) {
            ServiceStatus::Unavailable => CaptureError::DuplicationUnavailable(format!("{call}: {e}")),
            _ => CaptureError::Acquire(format!("{call}: {e}")),
        }
    }

    /// One D3D11 device with its immediate context.
    struct D3dDevice {
        device: ID3D11Device,
        context: ID3D11DeviceContext,
        feature_level: D3D_FEATURE_LEVEL,
    }

    fn create_device(kind: DriverKind) -> Result<D3dDevice, CaptureError> {
        let mut device = None;
        let mut context = None;
        let mut feature_level = D3D_FEATURE_LEVEL_9_1;
        unsafe {
            D3D11CreateDevice(
                None,
                driver_type(kind),
                None,
                D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                Some(&FEATURE_LEVELS[..]),
                D3D11_SDK_VERSION,
                Some(&mut device),
                Some(&mut feature_level),
                Some(&mut context),
            )
            .map_err(|e| CaptureError::DeviceInit(format!("D3D11CreateDevice failed: {e}")))?;
        }
        // A device without a context is useless; both drop here if either is missing.
        match (device, context) {
            (Some(device), Some(context)) => Ok(D3dDevice {
                device,
                context,
                feature_level,
            }),
            _ => Err(CaptureError::DeviceInit(
                "D3D11CreateDevice returned no device or context".into(),
            )),
        }
    }

    // ── DxgiSession ──────────────────────────────────────────────

    /// A duplicated output and the device that owns it.
    pub struct DxgiSession {
        d3d: D3dDevice,
        duplication: IDXGIOutputDuplication,
        width: u32,
        height: u32,
        desktop_origin: Point,
    }

    impl DxgiSession {
        /// Duplicate output `output_index` (0 = primary) of the device's adapter.
        pub fn open(output_index: u32) -> Result<Self, CaptureError> {
            let (driver, d3d) = first_success(&DriverKind::FALLBACK_ORDER, create_device)?;
            debug!(%driver, feature_level = d3d.feature_level.0, "D3D11 device ready");

            let dxgi_device: IDXGIDevice = d3d
                .device
                .cast()
                .map_err(|e| CaptureError::DeviceInit(format!("cast to IDXGIDevice failed: {e}")))?;
            let adapter = unsafe { dxgi_device.GetAdapter() }
                .map_err(|e| CaptureError::DeviceInit(format!("GetAdapter failed: {e}")))?;
            let output = unsafe { adapter.EnumOutputs(output_index) }.map_err(|e| {
                CaptureError::DuplicationUnavailable(format!("output {output_index} not found: {e}"))
            })?;

            let output_desc = unsafe { output.GetDesc() }
                .map_err(|e| CaptureError::DuplicationUnavailable(format!("output GetDesc failed: {e}")))?;
            let name = String::from_utf16_lossy(&output_desc.DeviceName);
            let bounds = output_desc.DesktopCoordinates;
            debug!(
                output = name.trim_end_matches('\0'),
                left = bounds.left,
                top = bounds.top,
                right = bounds.right,
                bottom = bounds.bottom,
                attached = output_desc.AttachedToDesktop.as_bool(),
                "output descriptor"
            );

            let output1: IDXGIOutput1 = output.cast().map_err(|e| {
                CaptureError::DuplicationUnavailable(format!("cast to IDXGIOutput1 failed: {e}"))
            })?;
            let duplication = unsafe { output1.DuplicateOutput(&d3d.device) }
                .map_err(|e| service_error("DuplicateOutput", e))?;

            let dup_desc = unsafe { duplication.GetDesc() };
            debug!(
                width = dup_desc.ModeDesc.Width,
                height = dup_desc.ModeDesc.Height,
                rotation = dup_desc.Rotation.0,
                system_memory = dup_desc.DesktopImageInSystemMemory.as_bool(),
                "duplication descriptor"
            );

            Ok(Self {
                width: dup_desc.ModeDesc.Width,
                height: dup_desc.ModeDesc.Height,
                desktop_origin: Point::new(bounds.left, bounds.top),
                d3d,
                duplication,
            })
        }

        pub fn dimensions(&self) -> (u32, u32) {
            (self.width, self.height)
        }

        /// Top-left of this output on the virtual desktop.
        pub fn desktop_origin(&self) -> Point {
            self.desktop_origin
        }

        /// Allocate the staging texture for this output.
        pub fn create_staging(&self) -> Result<DxgiStaging, CaptureError> {
            let desc = D3D11_TEXTURE2D_DESC {
                Width: self.width,
                Height: self.height,
                MipLevels: 1,
                ArraySize: 1,
                Format: DXGI_FORMAT_B8G8R8A8_UNORM,
                SampleDesc: DXGI_SAMPLE_DESC {
                    Count: 1,
                    Quality: 0,
                },
                Usage: D3D11_USAGE_STAGING,
                BindFlags: 0,
                CPUAccessFlags: (D3D11_CPU_ACCESS_READ.0 | D3D11_CPU_ACCESS_WRITE.0) as u32,
                MiscFlags: 0,
            };

            let mut texture = None;
            unsafe { self.d3d.device.CreateTexture2D(&desc, None, Some(&mut texture)) }
                .map_err(|e| CaptureError::StagingAllocation(format!("CreateTexture2D failed: {e}")))?;
            let texture = texture
                .ok_or_else(|| CaptureError::StagingAllocation("staging texture is None".into()))?;

            Ok(DxgiStaging {
                context: self.d3d.context.clone(),
                texture,
                width: self.width,
                height: self.height,
            })
        }

        /// Give up the session, keeping only the duplication interface.
        pub fn into_duplication(self) -> DxgiDuplication {
            DxgiDuplication {
                duplication: self.duplication,
                shape_buffer: Vec::new(),
            }
        }
    }

    // ── DxgiDuplication ──────────────────────────────────────────

    /// [`DuplicationBackend`] over `IDXGIOutputDuplication`.
    pub struct DxgiDuplication {
        duplication: IDXGIOutputDuplication,
        shape_buffer: Vec<u8>,
    }

    impl DxgiDuplication {
        fn pointer_shape(&mut self, size: u32) -> Result<Option<CursorShape>, CaptureError> {
            self.shape_buffer.resize(size as usize, 0);
            let mut required = 0u32;
            let mut info = DXGI_OUTDUPL_POINTER_SHAPE_INFO::default();
            unsafe {
                self.duplication.GetFramePointerShape(
                    size,
                    self.shape_buffer.as_mut_ptr() as *mut c_void,
                    &mut required,
                    &mut info,
                )
            }
            .map_err(|e| CaptureError::CursorUnavailable(format!("GetFramePointerShape failed: {e}")))?;
            trace!(?info, required, "pointer shape");

            let info = PointerShapeInfo {
                kind: info.Type,
                width: info.Width,
                height: info.Height,
                pitch: info.Pitch,
                hotspot: Point::new(info.HotSpot.x, info.HotSpot.y),
            };
            let buffer = self.shape_buffer[..(required as usize).min(size as usize)].to_vec();
            Ok(decode_pointer_shape(&info, buffer))
        }

        fn release_after_failure(&mut self) {
            if let Err(e) = unsafe { self.duplication.ReleaseFrame() } {
                warn!("ReleaseFrame after failed acquire: {e}");
            }
        }
    }

    fn frame_metadata(info: &DXGI_OUTDUPL_FRAME_INFO) -> FrameMetadata {
        FrameMetadata {
            present_timestamp: info.LastPresentTime,
            pointer_update_timestamp: info.LastMouseUpdateTime,
            accumulated_frames: info.AccumulatedFrames,
            rects_coalesced: info.RectsCoalesced.as_bool(),
            protected_content_masked_out: info.ProtectedContentMaskedOut.as_bool(),
            pointer_visible: info.PointerPosition.Visible.as_bool(),
            pointer_position: Point::new(
                info.PointerPosition.Position.x,
                info.PointerPosition.Position.y,
            ),
        }
    }

    impl DuplicationBackend for DxgiDuplication {
        type Surface = ID3D11Texture2D;

        fn acquire_next_frame(
            &mut self,
            timeout_ms: u32,
        ) -> Result<Acquired<ID3D11Texture2D>, CaptureError> {
            let mut info = DXGI_OUTDUPL_FRAME_INFO::default();
            let mut resource: Option<IDXGIResource> = None;

            if let Err(e) = unsafe {
                self.duplication
                    .AcquireNextFrame(timeout_ms, &mut info, &mut resource)
            } {
                return match classify_hresult(e.code().0) {
                    ServiceStatus::Timeout => Ok(Acquired::Timeout),
                    ServiceStatus::Unavailable => Err(CaptureError::DuplicationUnavailable(
                        format!("AcquireNextFrame: {e}"),
                    )),
                    ServiceStatus::Failed => {
                        Err(CaptureError::Acquire(format!("AcquireNextFrame failed: {e}")))
                    }
                };
            }
            trace!(?info, "frame info");

            let surface = resource
                .ok_or_else(|| CaptureError::Acquire("acquired resource is None".into()))
                .and_then(|r| {
                    r.cast::<ID3D11Texture2D>().map_err(|e| {
                        CaptureError::Acquire(format!("cast to ID3D11Texture2D failed: {e}"))
                    })
                });
            let surface = match surface {
                Ok(surface) => surface,
                Err(e) => {
                    self.release_after_failure();
                    return Err(e);
                }
            };

            let pointer_shape = match info.PointerShapeBufferSize {
                0 => None,
                size => self.pointer_shape(size).unwrap_or_else(|e| {
                    warn!("{e}");
                    None
                }),
            };

            Ok(Acquired::Frame(RawFrame {
                surface,
                metadata: frame_metadata(&info),
                pointer_shape,
            }))
        }

        fn release_frame(&mut self) -> Result<(), CaptureError> {
            unsafe { self.duplication.ReleaseFrame() }
                .map_err(|e| CaptureError::Release(format!("ReleaseFrame failed: {e}")))
        }
    }

    // ── DxgiStaging ──────────────────────────────────────────────

    /// The CPU read/write staging texture.
    pub struct DxgiStaging {
        context: ID3D11DeviceContext,
        texture: ID3D11Texture2D,
        width: u32,
        height: u32,
    }

    // SAFETY: a successful `Map` of a `width`×`height` B8G8R8A8 staging
    // texture yields `RowPitch * height` bytes that stay valid and are
    // exclusively CPU-owned until `Unmap`.
    unsafe impl StagingDevice for DxgiStaging {
        type Surface = ID3D11Texture2D;

        fn dimensions(&self) -> (u32, u32) {
            (self.width, self.height)
        }

        fn copy_from(&mut self, surface: &ID3D11Texture2D) -> Result<(), CaptureError> {
            unsafe { self.context.CopyResource(&self.texture, surface) };
            Ok(())
        }

        fn map(&mut self) -> Result<RawMapping, CaptureError> {
            let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
            unsafe {
                self.context
                    .Map(&self.texture, 0, D3D11_MAP_READ_WRITE, 0, Some(&mut mapped))
            }
            .map_err(|e| CaptureError::Map(format!("Map failed: {e}")))?;

            match NonNull::new(mapped.pData as *mut u8) {
                Some(ptr) => Ok(RawMapping {
                    ptr,
                    row_pitch: mapped.RowPitch as usize,
                }),
                None => {
                    unsafe { self.context.Unmap(&self.texture, 0) };
                    Err(CaptureError::Map("Map returned a null pointer".into()))
                }
            }
        }

        fn unmap(&mut self) {
            unsafe { self.context.Unmap(&self.texture, 0) };
        }
    }

    // ── Entry point ──────────────────────────────────────────────

    pub fn capture_desktop(config: &CaptureConfig) -> Result<CaptureOutput, CaptureError> {
        let session = DxgiSession::open(config.output_index)?;
        let staging = session.create_staging()?;
        let cursor = match config.cursor {
            CursorMode::Duplication => CursorSource::Duplication,
            CursorMode::Gdi => {
                let provider: Box<dyn CursorProvider> =
                    Box::new(GdiCursor::new(session.desktop_origin()));
                CursorSource::Provider(provider)
            }
            CursorMode::Hidden => CursorSource::Hidden,
        };

        let mut pipeline = CapturePipeline::new(
            session.into_duplication(),
            staging,
            config.retry.clone(),
            cursor,
        );
        pipeline.capture()
    }
}

#[cfg(target_os = "windows")]
pub use platform::{DxgiDuplication, DxgiSession, DxgiStaging, capture_desktop};

// ── Non-Windows stub ─────────────────────────────────────────────

/// Desktop duplication is only available on Windows.
#[cfg(not(target_os = "windows"))]
pub fn capture_desktop(_config: &CaptureConfig) -> Result<CaptureOutput, CaptureError> {
    Err(CaptureError::Unsupported(
        "DXGI Desktop Duplication is only available on Windows",
    ))
}

// ── Tests ────────────────────────────────────────────────────────
