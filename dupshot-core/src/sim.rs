//! In-memory duplication service and staging device.
//!
//! Drives the pipeline without a GPU: frames are scripted up front, the
//! staging "texture" is a pitched byte vector, and every protocol call is
//! counted so tests can check acquire/release and map/unmap balance.

use std::collections::VecDeque;
use std::ptr::NonNull;

use crate::error::CaptureError;
use crate::source::{Acquired, DuplicationBackend, RawFrame};
use crate::staging::{RawMapping, StagingDevice};
use crate::types::{FrameMetadata, Point};

/// A CPU-side stand-in for a duplicated GPU surface: tightly packed BGRA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimSurface {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl SimSurface {
    pub fn filled(width: u32, height: u32, bgra: [u8; 4]) -> Self {
        Self {
            width,
            height,
            pixels: bgra.repeat((width * height) as usize),
        }
    }
}

/// A frame with no new content (zero present timestamp).
pub fn empty_frame(surface: SimSurface) -> Acquired<SimSurface> {
    Acquired::Frame(RawFrame {
        surface,
        metadata: FrameMetadata::default(),
        pointer_shape: None,
    })
}

/// A frame with new content presented at `present_timestamp`.
pub fn new_frame(surface: SimSurface, present_timestamp: i64) -> Acquired<SimSurface> {
    Acquired::Frame(RawFrame {
        surface,
        metadata: FrameMetadata {
            present_timestamp,
            accumulated_frames: 1,
            ..FrameMetadata::default()
        },
        pointer_shape: None,
    })
}

/// Pointer fields for a frame whose pointer shape's top-left is at `(x, y)`.
pub fn pointer_metadata(present_timestamp: i64, visible: bool, x: i32, y: i32) -> FrameMetadata {
    FrameMetadata {
        present_timestamp,
        pointer_update_timestamp: present_timestamp.max(1),
        accumulated_frames: 1,
        pointer_visible: visible,
        pointer_position: Point::new(x, y),
        ..FrameMetadata::default()
    }
}

// ── SimDuplication ───────────────────────────────────────────────

/// A scripted duplication service.
///
/// Each acquire pops the next scripted outcome; an exhausted script times
/// out. The service itself rejects a second acquire while a frame is held,
/// mirroring the invalid-call error of a real service.
#[derive(Debug, Default)]
pub struct SimDuplication {
    script: VecDeque<Acquired<SimSurface>>,
    held: bool,
    acquires: usize,
    releases: usize,
}

impl SimDuplication {
    pub fn new(script: impl IntoIterator<Item = Acquired<SimSurface>>) -> Self {
        Self {
            script: script.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Successful `acquire_next_frame` calls that produced a frame.
    pub fn acquire_count(&self) -> usize {
        self.acquires
    }

    pub fn release_count(&self) -> usize {
        self.releases
    }

    pub fn is_holding_frame(&self) -> bool {
        self.held
    }
}

impl DuplicationBackend for SimDuplication {
    type Surface = SimSurface;

    fn acquire_next_frame(&mut self, _timeout_ms: u32) -> Result<Acquired<SimSurface>, CaptureError> {
        if self.held {
            return Err(CaptureError::Acquire("previous frame was not released".into()));
        }
        let next = self.script.pop_front().unwrap_or(Acquired::Timeout);
        if matches!(next, Acquired::Frame(_)) {
            self.held = true;
            self.acquires += 1;
        }
        Ok(next)
    }

    fn release_frame(&mut self) -> Result<(), CaptureError> {
        if !self.held {
            return Err(CaptureError::Release("no frame is held".into()));
        }
        self.held = false;
        self.releases += 1;
        Ok(())
    }
}

// ── SimStaging ───────────────────────────────────────────────────

/// A pitched CPU buffer standing in for a staging texture.
///
/// Row padding is filled with `pad` and never overwritten by copies, so a
/// stride bug shows up as pad bytes in the output.
#[derive(Debug)]
pub struct SimStaging {
    width: u32,
    height: u32,
    row_pitch: usize,
    memory: Vec<u8>,
    mapped: bool,
    maps: usize,
    unmaps: usize,
}

impl SimStaging {
    /// Allocate a `width`×`height` staging buffer with `row_pitch` bytes per row.
    pub fn new(width: u32, height: u32, row_pitch: usize, pad: u8) -> Result<Self, CaptureError> {
        if row_pitch < width as usize * 4 {
            return Err(CaptureError::StagingAllocation(format!(
                "row pitch {row_pitch} cannot hold {width} BGRA pixels"
            )));
        }
        Ok(Self {
            width,
            height,
            row_pitch,
            memory: vec![pad; row_pitch * height as usize],
            mapped: false,
            maps: 0,
            unmaps: 0,
        })
    }

    /// Raw staging memory, padding included.
    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    pub fn map_count(&self) -> usize {
        self.maps
    }

    pub fn unmap_count(&self) -> usize {
        self.unmaps
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped
    }
}

// SAFETY: `memory` is allocated once and never resized, so the pointer
// handed out by `map` covers `row_pitch * height` bytes until `unmap`.
unsafe impl StagingDevice for SimStaging {
    type Surface = SimSurface;

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn copy_from(&mut self, surface: &SimSurface) -> Result<(), CaptureError> {
        if (surface.width, surface.height) != (self.width, self.height) {
            return Err(CaptureError::Stage(format!(
                "surface is {}x{}, staging is {}x{}",
                surface.width, surface.height, self.width, self.height
            )));
        }
        let row_bytes = self.width as usize * 4;
        if surface.pixels.len() < row_bytes * self.height as usize {
            return Err(CaptureError::Stage("surface pixel data is truncated".into()));
        }
        for (dst, src) in self
            .memory
            .chunks_exact_mut(self.row_pitch)
            .zip(surface.pixels.chunks_exact(row_bytes))
        {
            dst[..row_bytes].copy_from_slice(src);
        }
        Ok(())
    }

    fn map(&mut self) -> Result<RawMapping, CaptureError> {
        if self.mapped {
            return Err(CaptureError::Map("already mapped".into()));
        }
        let ptr = NonNull::new(self.memory.as_mut_ptr())
            .ok_or_else(|| CaptureError::Map("staging memory is empty".into()))?;
        self.mapped = true;
        self.maps += 1;
        Ok(RawMapping {
            ptr,
            row_pitch: self.row_pitch,
        })
    }

    fn unmap(&mut self) {
        if self.mapped {
            self.mapped = false;
            self.unmaps += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_keeps_padding() {
        let mut staging = SimStaging::new(2, 2, 12, 0xEE).unwrap();
        staging
            .copy_from(&SimSurface::filled(2, 2, [1, 2, 3, 4]))
            .unwrap();
        let mem = staging.memory();
        assert_eq!(&mem[..8], &[1, 2, 3, 4, 1, 2, 3, 4]);
        assert_eq!(&mem[8..12], &[0xEE; 4]);
        assert_eq!(&mem[12..20], &[1, 2, 3, 4, 1, 2, 3, 4]);
    }

    #[test]
    fn copy_rejects_mismatched_surface() {
        let mut staging = SimStaging::new(2, 2, 8, 0).unwrap();
        let err = staging
            .copy_from(&SimSurface::filled(3, 2, [0; 4]))
            .unwrap_err();
        assert!(matches!(err, CaptureError::Stage(_)));
    }

    #[test]
    fn service_rejects_unbalanced_calls() {
        let mut dup = SimDuplication::new([new_frame(SimSurface::filled(1, 1, [0; 4]), 1)]);
        assert!(dup.release_frame().is_err());
        assert!(matches!(dup.acquire_next_frame(0), Ok(Acquired::Frame(_))));
        assert!(dup.acquire_next_frame(0).is_err());
        dup.release_frame().unwrap();
        assert!(matches!(dup.acquire_next_frame(0), Ok(Acquired::Timeout)));
    }
}
