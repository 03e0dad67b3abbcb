//! System cursor lookup through GDI.
//!
//! Used when the duplication service does not report the pointer (for
//! example on some remote sessions). The cursor's colour and mask bitmaps
//! are read back as 32-bit top-down DIBs and classified into a
//! [`ShapeBitmap`].

use std::mem;

use tracing::trace;
use windows::Win32::Graphics::Gdi::{
    BI_RGB, BITMAP, BITMAPINFO, BITMAPINFOHEADER, DIB_RGB_COLORS, DeleteObject, GetDC, GetDIBits,
    GetObjectW, HBITMAP, HDC, ReleaseDC,
};
use windows::Win32::UI::WindowsAndMessaging::{
    CURSOR_SHOWING, CURSORINFO, GetCursorInfo, GetIconInfo, ICONINFO,
};

use crate::cursor::{CursorProvider, CursorShape, CursorState, ShapeBitmap, pack_mask_bits};
use crate::error::CaptureError;
use crate::types::Point;

/// Reads the system cursor and places it relative to one output.
#[derive(Debug, Clone, Copy)]
pub struct GdiCursor {
    desktop_origin: Point,
}

impl GdiCursor {
    /// `desktop_origin` is the output's top-left on the virtual desktop.
    pub fn new(desktop_origin: Point) -> Self {
        Self { desktop_origin }
    }
}

// ── Scoped handles ───────────────────────────────────────────────

/// The bitmaps `GetIconInfo` hands over; both are deleted on drop.
struct IconBitmaps {
    color: HBITMAP,
    mask: HBITMAP,
}

impl Drop for IconBitmaps {
    fn drop(&mut self) {
        for bitmap in [self.color, self.mask] {
            if !bitmap.is_invalid() {
                let _ = unsafe { DeleteObject(bitmap) };
            }
        }
    }
}

/// The screen DC, released on drop.
struct ScreenDc(HDC);

impl ScreenDc {
    fn get() -> Result<Self, CaptureError> {
        let dc = unsafe { GetDC(None) };
        if dc.is_invalid() {
            return Err(CaptureError::CursorUnavailable("GetDC failed".into()));
        }
        Ok(Self(dc))
    }
}

impl Drop for ScreenDc {
    fn drop(&mut self) {
        unsafe { ReleaseDC(None, self.0) };
    }
}

// ── Bitmap readback ──────────────────────────────────────────────

fn bitmap_size(bitmap: HBITMAP) -> Result<(u32, u32), CaptureError> {
    let mut bm = BITMAP::default();
    let written = unsafe {
        GetObjectW(
            bitmap,
            mem::size_of::<BITMAP>() as i32,
            Some(&mut bm as *mut _ as *mut _),
        )
    };
    if written == 0 || bm.bmWidth <= 0 || bm.bmHeight <= 0 {
        return Err(CaptureError::CursorUnavailable("GetObjectW failed".into()));
    }
    Ok((bm.bmWidth as u32, bm.bmHeight as u32))
}

/// Read `rows` rows of `bitmap` as tightly packed top-down BGRA.
fn read_bgra(dc: &ScreenDc, bitmap: HBITMAP, width: u32, rows: u32) -> Result<Vec<u8>, CaptureError> {
    let mut bmi = BITMAPINFO {
        bmiHeader: BITMAPINFOHEADER {
            biSize: mem::size_of::<BITMAPINFOHEADER>() as u32,
            biWidth: width as i32,
            biHeight: -(rows as i32),
            biPlanes: 1,
            biBitCount: 32,
            biCompression: BI_RGB.0,
            biSizeImage: width * rows * 4,
            ..Default::default()
        },
        ..Default::default()
    };
    let mut bgra = vec![0u8; (width * rows * 4) as usize];
    let lines = unsafe {
        GetDIBits(
            dc.0,
            bitmap,
            0,
            rows,
            Some(bgra.as_mut_ptr() as *mut _),
            &mut bmi,
            DIB_RGB_COLORS,
        )
    };
    if lines != rows as i32 {
        return Err(CaptureError::CursorUnavailable(format!(
            "GetDIBits returned {lines} of {rows} rows"
        )));
    }
    Ok(bgra)
}

/// Classify the icon bitmaps into a shape.
///
/// - colour bitmap with any alpha → `Color`
/// - colour bitmap without alpha → `MaskedColor`, alpha taken from the AND mask
/// - mask only → `Monochrome`, AND rows over XOR rows
fn read_shape(bitmaps: &IconBitmaps, hotspot: Point) -> Result<CursorShape, CaptureError> {
    let dc = ScreenDc::get()?;

    if bitmaps.color.is_invalid() {
        let (width, mask_rows) = bitmap_size(bitmaps.mask)?;
        let bgra = read_bgra(&dc, bitmaps.mask, width, mask_rows)?;
        let (pitch, mask) = pack_mask_bits(&bgra, width, mask_rows);
        return Ok(CursorShape {
            width,
            height: mask_rows / 2,
            hotspot,
            bitmap: ShapeBitmap::Monochrome { pitch, mask },
        });
    }

    let (width, height) = bitmap_size(bitmaps.color)?;
    let mut pixels = read_bgra(&dc, bitmaps.color, width, height)?;
    let pitch = width as usize * 4;

    if pixels.chunks_exact(4).any(|px| px[3] != 0) {
        return Ok(CursorShape {
            width,
            height,
            hotspot,
            bitmap: ShapeBitmap::Color { pitch, pixels },
        });
    }

    let mask = read_bgra(&dc, bitmaps.mask, width, height)?;
    for (px, m) in pixels.chunks_exact_mut(4).zip(mask.chunks_exact(4)) {
        px[3] = if m[0] | m[1] | m[2] != 0 { 0xFF } else { 0 };
    }
    Ok(CursorShape {
        width,
        height,
        hotspot,
        bitmap: ShapeBitmap::MaskedColor { pitch, pixels },
    })
}

// ── Provider ─────────────────────────────────────────────────────

impl CursorProvider for GdiCursor {
    fn query_cursor(&mut self) -> Result<Option<CursorState>, CaptureError> {
        let mut info = CURSORINFO {
            cbSize: mem::size_of::<CURSORINFO>() as u32,
            ..Default::default()
        };
        unsafe { GetCursorInfo(&mut info) }
            .map_err(|e| CaptureError::CursorUnavailable(format!("GetCursorInfo failed: {e}")))?;
        if info.flags.0 & CURSOR_SHOWING.0 == 0 {
            trace!("cursor hidden");
            return Ok(None);
        }

        let mut icon = ICONINFO::default();
        unsafe { GetIconInfo(info.hCursor, &mut icon) }
            .map_err(|e| CaptureError::CursorUnavailable(format!("GetIconInfo failed: {e}")))?;
        let bitmaps = IconBitmaps {
            color: icon.hbmColor,
            mask: icon.hbmMask,
        };
        let hotspot = Point::new(icon.xHotspot as i32, icon.yHotspot as i32);
        let shape = read_shape(&bitmaps, hotspot)?;

        let screen = Point::new(info.ptScreenPos.x, info.ptScreenPos.y);
        trace!(x = screen.x, y = screen.y, w = shape.width, h = shape.height, "gdi cursor");
        Ok(Some(CursorState {
            visible: true,
            position: screen.minus(self.desktop_origin),
            shape,
        }))
    }
}
