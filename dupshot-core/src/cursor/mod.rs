//! Cursor shapes, state, and providers.
//!
//! A shape arrives in one of three encodings and is resolved into a grid of
//! [`Texel`]s before it is drawn:
//!
//! | Bitmap        | Source layout                         | Resolution                          |
//! |---------------|---------------------------------------|-------------------------------------|
//! | `Color`       | BGRA, alpha per pixel                 | alpha 0 → skip, else replace        |
//! | `MaskedColor` | BGRA, alpha byte is a 0/0xFF mask     | 0 → replace, 0xFF → XOR             |
//! | `Monochrome`  | 1 bpp AND rows, then 1 bpp XOR rows   | AND/XOR truth table                 |

mod composite;

pub use composite::CursorCompositor;

use crate::error::CaptureError;
use crate::types::{FrameMetadata, Point};

// ── Shape ────────────────────────────────────────────────────────

/// Encoded pixel data of a cursor shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShapeBitmap {
    /// 32-bit BGRA with straight alpha.
    Color { pitch: usize, pixels: Vec<u8> },
    /// 32-bit BGRA whose alpha byte selects replace (0) or XOR (0xFF).
    MaskedColor { pitch: usize, pixels: Vec<u8> },
    /// 1-bit masks: `height` AND rows followed by `height` XOR rows, MSB first.
    Monochrome { pitch: usize, mask: Vec<u8> },
}

/// A cursor image plus the pixel that marks the pointer location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorShape {
    /// Visible width in pixels.
    pub width: u32,
    /// Visible height in pixels (half the mask height for `Monochrome`).
    pub height: u32,
    /// Offset of the pointer location inside the shape.
    pub hotspot: Point,
    pub bitmap: ShapeBitmap,
}

/// A single resolved cursor pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Texel {
    /// Leave the destination untouched.
    Transparent,
    /// Replace the destination BGRA wholesale.
    Opaque([u8; 4]),
    /// XOR the BGR channels into the destination and force it opaque.
    Xor([u8; 4]),
}

/// A shape resolved into a row-major texel grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorImage {
    pub width: u32,
    pub height: u32,
    pub texels: Vec<Texel>,
}

impl CursorImage {
    pub fn texel(&self, x: u32, y: u32) -> Texel {
        self.texels[y as usize * self.width as usize + x as usize]
    }
}

impl CursorShape {
    /// A true-colour shape from tightly packed BGRA rows.
    pub fn color(width: u32, height: u32, hotspot: Point, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            hotspot,
            bitmap: ShapeBitmap::Color {
                pitch: width as usize * 4,
                pixels,
            },
        }
    }

    /// Resolve the encoded bitmap into texels.
    ///
    /// Fails with [`CaptureError::CursorUnavailable`] if the bitmap is
    /// shorter than its declared dimensions.
    pub fn resolve(&self) -> Result<CursorImage, CaptureError> {
        let (w, h) = (self.width as usize, self.height as usize);
        let mut texels = Vec::with_capacity(w * h);

        match &self.bitmap {
            ShapeBitmap::Color { pitch, pixels } => {
                check_layout("color", *pitch, w * 4, h, pixels.len())?;
                for row in 0..h {
                    for px in pixels[row * pitch..row * pitch + w * 4].chunks_exact(4) {
                        texels.push(if px[3] == 0 {
                            Texel::Transparent
                        } else {
                            Texel::Opaque([px[0], px[1], px[2], px[3]])
                        });
                    }
                }
            }
            ShapeBitmap::MaskedColor { pitch, pixels } => {
                check_layout("masked color", *pitch, w * 4, h, pixels.len())?;
                for row in 0..h {
                    for px in pixels[row * pitch..row * pitch + w * 4].chunks_exact(4) {
                        let rgb = [px[0], px[1], px[2]];
                        texels.push(match (px[3], rgb) {
                            (0, [b, g, r]) => Texel::Opaque([b, g, r, 0xFF]),
                            (_, [0, 0, 0]) => Texel::Transparent,
                            (_, [b, g, r]) => Texel::Xor([b, g, r, 0]),
                        });
                    }
                }
            }
            ShapeBitmap::Monochrome { pitch, mask } => {
                check_layout("monochrome", *pitch, w.div_ceil(8), h * 2, mask.len())?;
                for row in 0..h {
                    for col in 0..w {
                        let bit = 0x80u8 >> (col % 8);
                        let and = mask[row * pitch + col / 8] & bit != 0;
                        let xor = mask[(row + h) * pitch + col / 8] & bit != 0;
                        texels.push(match (and, xor) {
                            (false, false) => Texel::Opaque([0x00, 0x00, 0x00, 0xFF]),
                            (false, true) => Texel::Opaque([0xFF, 0xFF, 0xFF, 0xFF]),
                            (true, false) => Texel::Transparent,
                            (true, true) => Texel::Xor([0xFF, 0xFF, 0xFF, 0]),
                        });
                    }
                }
            }
        }

        Ok(CursorImage {
            width: self.width,
            height: self.height,
            texels,
        })
    }
}

fn check_layout(
    kind: &str,
    pitch: usize,
    row_bytes: usize,
    rows: usize,
    len: usize,
) -> Result<(), CaptureError> {
    if pitch < row_bytes {
        return Err(CaptureError::CursorUnavailable(format!(
            "{kind} shape pitch {pitch} is smaller than a row ({row_bytes} bytes)"
        )));
    }
    let needed = if rows == 0 { 0 } else { (rows - 1) * pitch + row_bytes };
    if len < needed {
        return Err(CaptureError::CursorUnavailable(format!(
            "{kind} shape holds {len} bytes, needs {needed}"
        )));
    }
    Ok(())
}

/// Pack 32-bit mask pixels (black = 0, anything else = 1) into 1-bpp rows.
///
/// Returns the row pitch and the packed bytes. Used to turn GDI mask
/// bitmaps, which are read back as BGRA, into `ShapeBitmap::Monochrome`.
pub fn pack_mask_bits(bgra: &[u8], width: u32, rows: u32) -> (usize, Vec<u8>) {
    if width == 0 || rows == 0 {
        return (0, Vec::new());
    }
    let pitch = (width as usize).div_ceil(8);
    let mut packed = vec![0u8; pitch * rows as usize];
    for (row, line) in bgra
        .chunks_exact(width as usize * 4)
        .take(rows as usize)
        .enumerate()
    {
        for (col, px) in line.chunks_exact(4).enumerate() {
            if px[0] | px[1] | px[2] != 0 {
                packed[row * pitch + col / 8] |= 0x80 >> (col % 8);
            }
        }
    }
    (pitch, packed)
}

// ── State & providers ────────────────────────────────────────────

/// The cursor as it should appear on the captured frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorState {
    pub visible: bool,
    /// Hotspot location, relative to the captured output.
    pub position: Point,
    pub shape: CursorShape,
}

impl CursorState {
    /// Where the shape's top-left pixel lands on the output.
    pub fn origin(&self) -> Point {
        self.position.minus(self.shape.hotspot)
    }
}

/// Anything that can report the current cursor.
pub trait CursorProvider {
    /// `Ok(None)` when the cursor is hidden.
    fn query_cursor(&mut self) -> Result<Option<CursorState>, CaptureError>;
}

/// Pointer state accumulated from duplication frames.
///
/// The service only reports the pointer shape when it changes, and only
/// refreshes the position when `pointer_update_timestamp` is non-zero, so
/// the last known values are kept across frames.
#[derive(Debug, Clone, Default)]
pub struct PointerTracker {
    visible: bool,
    top_left: Option<Point>,
    shape: Option<CursorShape>,
}

impl PointerTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in the pointer fields of one acquired frame.
    pub fn observe(&mut self, metadata: &FrameMetadata, shape: Option<CursorShape>) {
        if metadata.has_pointer_update() {
            self.visible = metadata.pointer_visible;
            self.top_left = Some(metadata.pointer_position);
        }
        if let Some(shape) = shape {
            self.shape = Some(shape);
        }
    }

    /// The cursor as last reported by the service.
    pub fn current(&self) -> Result<Option<CursorState>, CaptureError> {
        if !self.visible {
            return Ok(None);
        }
        let top_left = self.top_left.ok_or_else(|| {
            CaptureError::CursorUnavailable("no pointer position reported".into())
        })?;
        let shape = self.shape.clone().ok_or_else(|| {
            CaptureError::CursorUnavailable("no pointer shape reported".into())
        })?;
        // The service reports the shape's top-left corner, not the hotspot.
        Ok(Some(CursorState {
            visible: true,
            position: top_left.offset(shape.hotspot),
            shape,
        }))
    }
}

impl CursorProvider for PointerTracker {
    fn query_cursor(&mut self) -> Result<Option<CursorState>, CaptureError> {
        self.current()
    }
}

// ── Tests ────────────────────────────────────────────────────────
