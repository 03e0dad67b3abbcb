//! Shared types for the capture pipeline.
//!
//! These describe what flows between stages: frame metadata handed out by
//! the duplication service, and the mapped view of the staging buffer that
//! the compositor writes to and the encoder reads from.

use crate::error::CaptureError;

// ── PixelFormat ──────────────────────────────────────────────────

/// Pixel layout of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 4 bytes per pixel: Blue, Green, Red, Alpha (duplication surfaces).
    Bgra8,
    /// 3 bytes per pixel: Red, Green, Blue (encoded output).
    Rgb8,
}

impl PixelFormat {
    /// Bytes consumed by a single pixel in this format.
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra8 => 4,
            PixelFormat::Rgb8 => 3,
        }
    }
}

/// Bytes per pixel of every staged surface.
pub const STAGING_BPP: usize = PixelFormat::Bgra8.bytes_per_pixel();

// ── Point ────────────────────────────────────────────────────────

/// A signed pixel coordinate. Cursor positions may be negative near edges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub const fn offset(self, other: Point) -> Self {
        Self::new(self.x.saturating_add(other.x), self.y.saturating_add(other.y))
    }

    pub const fn minus(self, other: Point) -> Self {
        Self::new(self.x.saturating_sub(other.x), self.y.saturating_sub(other.y))
    }
}

// ── FrameMetadata ────────────────────────────────────────────────

/// Information reported by the duplication service with each frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameMetadata {
    /// Time the desktop image was last presented. Zero means no new content.
    pub present_timestamp: i64,
    /// Time the pointer was last updated. Zero means the pointer fields are stale.
    pub pointer_update_timestamp: i64,
    /// Frames presented since the previous acquisition.
    pub accumulated_frames: u32,
    /// Whether dirty rectangles were merged by the service.
    pub rects_coalesced: bool,
    /// Whether protected content was blacked out.
    pub protected_content_masked_out: bool,
    /// Whether the pointer is drawn on this output.
    pub pointer_visible: bool,
    /// Top-left corner of the pointer shape, relative to the output.
    pub pointer_position: Point,
}

impl FrameMetadata {
    /// An "empty" frame carries no new desktop image.
    pub fn has_new_content(&self) -> bool {
        self.present_timestamp != 0
    }

    /// Whether `pointer_visible`/`pointer_position` were refreshed by this frame.
    pub fn has_pointer_update(&self) -> bool {
        self.pointer_update_timestamp != 0
    }
}

// ── MappedView ───────────────────────────────────────────────────

/// Number of bytes spanned by `height` rows of `width` BGRA pixels at `row_pitch`.
///
/// The last row is not required to carry padding.
pub fn span_len(width: u32, height: u32, row_pitch: usize) -> usize {
    if width == 0 || height == 0 {
        return 0;
    }
    (height as usize - 1) * row_pitch + width as usize * STAGING_BPP
}

/// A mutable BGRA view over a mapped staging buffer.
///
/// Pixel `(x, y)` lives at byte `y * row_pitch + x * 4`. `row_pitch` may be
/// larger than `width * 4`; the padding bytes are never touched.
#[derive(Debug)]
pub struct MappedView<'a> {
    data: &'a mut [u8],
    width: u32,
    height: u32,
    row_pitch: usize,
}

impl<'a> MappedView<'a> {
    /// Wrap `data` as a `width`×`height` BGRA view.
    ///
    /// Fails if the pitch cannot hold a row or `data` is too short.
    pub fn new(
        data: &'a mut [u8],
        width: u32,
        height: u32,
        row_pitch: usize,
    ) -> Result<Self, CaptureError> {
        let min_pitch = width as usize * STAGING_BPP;
        if row_pitch < min_pitch {
            return Err(CaptureError::Map(format!(
                "row pitch {row_pitch} is smaller than {width} px * {STAGING_BPP} bytes"
            )));
        }
        let needed = span_len(width, height, row_pitch);
        if data.len() < needed {
            return Err(CaptureError::Map(format!(
                "mapped buffer holds {} bytes, {width}x{height} at pitch {row_pitch} needs {needed}",
                data.len()
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            row_pitch,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row pitch in **bytes**.
    pub fn row_pitch(&self) -> usize {
        self.row_pitch
    }

    /// The `width * 4` pixel bytes of row `y` without padding, or `None`
    /// past the last row.
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        if y >= self.height {
            return None;
        }
        let start = y as usize * self.row_pitch;
        Some(&self.data[start..start + self.width as usize * STAGING_BPP])
    }

    /// Mutable pixel bytes of row `y`, or `None` past the last row.
    pub fn row_mut(&mut self, y: u32) -> Option<&mut [u8]> {
        if y >= self.height {
            return None;
        }
        let start = y as usize * self.row_pitch;
        Some(&mut self.data[start..start + self.width as usize * STAGING_BPP])
    }

    /// The BGRA bytes at `(x, y)`, or `None` outside the image.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = y as usize * self.row_pitch + x as usize * STAGING_BPP;
        let mut px = [0u8; 4];
        px.copy_from_slice(&self.data[offset..offset + STAGING_BPP]);
        Some(px)
    }

    /// Mutable BGRA bytes at `(x, y)`, or `None` outside the image.
    pub fn pixel_mut(&mut self, x: u32, y: u32) -> Option<&mut [u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = y as usize * self.row_pitch + x as usize * STAGING_BPP;
        Some(&mut self.data[offset..offset + STAGING_BPP])
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_per_pixel() {
        assert_eq!(PixelFormat::Bgra8.bytes_per_pixel(), 4);
        assert_eq!(PixelFormat::Rgb8.bytes_per_pixel(), 3);
    }

    #[test]
    fn empty_frame_detection() {
        let mut meta = FrameMetadata::default();
        assert!(!meta.has_new_content());
        meta.present_timestamp = 42;
        assert!(meta.has_new_content());
    }

    #[test]
    fn pitch_smaller_than_row_is_rejected() {
        let mut buf = vec![0u8; 64];
        let err = MappedView::new(&mut buf, 4, 2, 12).unwrap_err();
        assert!(matches!(err, CaptureError::Map(_)));
    }

    #[test]
    fn short_buffer_is_rejected() {
        let mut buf = vec![0u8; 40];
        assert!(MappedView::new(&mut buf, 4, 3, 16).is_err());
    }

    #[test]
    fn last_row_needs_no_padding() {
        // 2 rows at pitch 32, width 7: 32 + 28 bytes.
        let mut buf = vec![0u8; 60];
        assert!(MappedView::new(&mut buf, 7, 2, 32).is_ok());
    }

    #[test]
    fn pixel_addressing_uses_pitch() {
        let mut buf = vec![0u8; 32 * 3];
        buf[32 * 2 + 4 * 5..32 * 2 + 4 * 5 + 4].copy_from_slice(&[1, 2, 3, 4]);
        let mut view = MappedView::new(&mut buf, 7, 3, 32).unwrap();
        assert_eq!(view.pixel(5, 2), Some([1, 2, 3, 4]));
        assert_eq!(view.pixel(7, 0), None);
        assert_eq!(view.pixel(0, 3), None);

        view.pixel_mut(0, 1).unwrap().copy_from_slice(&[9, 9, 9, 9]);
        assert_eq!(&view.row(1).unwrap()[..4], &[9, 9, 9, 9]);
        assert_eq!(view.row(1).unwrap().len(), 28);
    }

    #[test]
    fn rows_past_the_end_are_none() {
        let mut buf = vec![0u8; 32 * 3];
        let mut view = MappedView::new(&mut buf, 7, 3, 32).unwrap();
        assert!(view.row(2).is_some());
        assert_eq!(view.row(3), None);
        assert_eq!(view.row(u32::MAX), None);
        assert!(view.row_mut(3).is_none());
    }

    #[test]
    fn point_arithmetic() {
        let p = Point::new(10, -3);
        assert_eq!(p.minus(Point::new(4, 4)), Point::new(6, -7));
        assert_eq!(p.offset(Point::new(1, 1)), Point::new(11, -2));
    }
}
