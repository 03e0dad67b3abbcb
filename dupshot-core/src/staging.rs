//! Copying duplicated surfaces into CPU-visible memory.
//!
//! [`SurfaceStager`] wraps a [`StagingDevice`] whose staging resource is
//! allocated once at the output resolution and reused. Mapping yields a
//! [`MappedSurface`] guard; the mapped bytes are only reachable through the
//! guard and the resource is unmapped when it goes away.

use std::ptr::NonNull;

use tracing::trace;

use crate::error::CaptureError;
use crate::types::{MappedView, STAGING_BPP, span_len};

/// A CPU pointer to a mapped staging resource.
#[derive(Debug, Clone, Copy)]
pub struct RawMapping {
    pub ptr: NonNull<u8>,
    /// Row pitch in **bytes**.
    pub row_pitch: usize,
}

/// A CPU-readable and writable BGRA8 staging resource.
///
/// # Safety
///
/// A `RawMapping` returned by `map` must point to at least
/// `(height - 1) * row_pitch + width * 4` bytes that are valid for reads and
/// writes, and not aliased by anything else, until `unmap` is called.
pub unsafe trait StagingDevice {
    /// The GPU surface type this device can copy from.
    type Surface;

    /// Width and height of the staging resource in pixels.
    fn dimensions(&self) -> (u32, u32);

    /// Full-resource copy of `surface` into the staging resource.
    fn copy_from(&mut self, surface: &Self::Surface) -> Result<(), CaptureError>;

    fn map(&mut self) -> Result<RawMapping, CaptureError>;

    fn unmap(&mut self);
}

// ── SurfaceStager ────────────────────────────────────────────────

/// Stages surfaces and hands out at most one mapping at a time.
pub struct SurfaceStager<D: StagingDevice> {
    device: D,
    staged: bool,
}

impl<D: StagingDevice> SurfaceStager<D> {
    pub fn new(device: D) -> Self {
        Self {
            device,
            staged: false,
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.device.dimensions()
    }

    /// Copy `surface` into the staging resource, replacing its contents.
    pub fn stage(&mut self, surface: &D::Surface) -> Result<(), CaptureError> {
        self.device.copy_from(surface)?;
        self.staged = true;
        trace!("surface staged");
        Ok(())
    }

    /// Map the staged contents for CPU access.
    ///
    /// The returned guard borrows the stager, so a second map cannot start
    /// until the first one is unmapped.
    pub fn map(&mut self) -> Result<MappedSurface<'_, D>, CaptureError> {
        if !self.staged {
            return Err(CaptureError::Map("nothing has been staged".into()));
        }
        let (width, height) = self.device.dimensions();
        let raw = self.device.map()?;
        let mapped = MappedSurface {
            stager: self,
            raw,
            width,
            height,
            unmapped: false,
        };
        if raw.row_pitch < width as usize * STAGING_BPP {
            // `mapped` drops here and unmaps.
            return Err(CaptureError::Map(format!(
                "device reported row pitch {} for a {width} px wide surface",
                raw.row_pitch
            )));
        }
        trace!(row_pitch = raw.row_pitch, "staging mapped");
        Ok(mapped)
    }
}

// ── MappedSurface ────────────────────────────────────────────────

/// A live mapping of the staging resource.
pub struct MappedSurface<'a, D: StagingDevice> {
    stager: &'a mut SurfaceStager<D>,
    raw: RawMapping,
    width: u32,
    height: u32,
    unmapped: bool,
}

impl<D: StagingDevice> MappedSurface<'_, D> {
    pub fn row_pitch(&self) -> usize {
        self.raw.row_pitch
    }

    /// Borrow the mapped pixels. The view cannot outlive the mapping.
    pub fn view(&mut self) -> Result<MappedView<'_>, CaptureError> {
        let len = span_len(self.width, self.height, self.raw.row_pitch);
        // SAFETY: the `StagingDevice` contract guarantees `len` bytes at
        // `ptr` are valid and exclusively ours until `unmap`, which only runs
        // when this guard is consumed or dropped. The returned slice borrows
        // `self` mutably, so it ends before either can happen.
        let data = unsafe { std::slice::from_raw_parts_mut(self.raw.ptr.as_ptr(), len) };
        MappedView::new(data, self.width, self.height, self.raw.row_pitch)
    }

    /// Unmap now rather than at end of scope.
    pub fn unmap(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.unmapped {
            self.unmapped = true;
            self.stager.device.unmap();
            trace!("staging unmapped");
        }
    }
}

impl<D: StagingDevice> Drop for MappedSurface<'_, D> {
    fn drop(&mut self) {
        self.release();
    }
}

// ── Tests ────────────────────────────────────────────────────────
