//! Drawing a resolved cursor onto a mapped staging buffer.
//!
//! Compositing is a hard alpha test: a texel either replaces the destination
//! pixel wholesale or leaves it alone. There is no proportional blending.

use tracing::debug;

use crate::cursor::{CursorState, Texel};
use crate::error::CaptureError;
use crate::types::MappedView;

/// Writes cursor shapes onto mapped BGRA buffers.
#[derive(Debug, Clone, Copy, Default)]
pub struct CursorCompositor;

impl CursorCompositor {
    pub fn new() -> Self {
        Self
    }

    /// Draw `state` onto `view` and return the number of pixels written.
    ///
    /// The shape's top-left lands at `position - hotspot`. Every shape pixel
    /// whose destination falls outside the view is clipped, so the cursor
    /// may hang off any edge or sit entirely off screen.
    pub fn composite(
        &self,
        view: &mut MappedView<'_>,
        state: &CursorState,
    ) -> Result<usize, CaptureError> {
        if !state.visible {
            return Ok(0);
        }
        let image = state.shape.resolve()?;
        let origin = state.origin();

        let Some((cols, rows)) = visible_span(
            (i64::from(origin.x), i64::from(origin.y)),
            (image.width, image.height),
            (view.width(), view.height()),
        ) else {
            debug!(x = origin.x, y = origin.y, "cursor entirely outside the output");
            return Ok(0);
        };

        let mut written = 0;
        for sy in rows {
            let dy = (i64::from(origin.y) + i64::from(sy)) as u32;
            let Some(row) = view.row_mut(dy) else {
                continue;
            };
            for sx in cols.clone() {
                let dx = (i64::from(origin.x) + i64::from(sx)) as usize;
                let dst = &mut row[dx * 4..dx * 4 + 4];
                match image.texel(sx, sy) {
                    Texel::Transparent => continue,
                    Texel::Opaque(px) => dst.copy_from_slice(&px),
                    Texel::Xor(px) => {
                        dst[0] ^= px[0];
                        dst[1] ^= px[1];
                        dst[2] ^= px[2];
                        dst[3] = 0xFF;
                    }
                }
                written += 1;
            }
        }
        Ok(written)
    }
}

/// Shape-local column and row ranges that land inside the destination.
fn visible_span(
    origin: (i64, i64),
    shape: (u32, u32),
    dest: (u32, u32),
) -> Option<(std::ops::Range<u32>, std::ops::Range<u32>)> {
    let axis = |start: i64, len: u32, limit: u32| {
        let first = (-start).clamp(0, i64::from(len));
        let last = (i64::from(limit) - start).clamp(0, i64::from(len));
        (first < last).then(|| first as u32..last as u32)
    };
    let cols = axis(origin.0, shape.0, dest.0)?;
    let rows = axis(origin.1, shape.1, dest.1)?;
    Some((cols, rows))
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::{CursorShape, ShapeBitmap};
    use crate::types::Point;

    const PAD: u8 = 0xAB;

    /// A `w`×`h` zeroed buffer with 8 bytes of sentinel padding per row.
    fn padded(w: u32, h: u32) -> (Vec<u8>, usize) {
        let pitch = w as usize * 4 + 8;
        let mut buf = vec![0u8; pitch * h as usize];
        for row in buf.chunks_exact_mut(pitch) {
            row[w as usize * 4..].fill(PAD);
        }
        (buf, pitch)
    }

    fn solid(w: u32, h: u32, hotspot: Point, px: [u8; 4]) -> CursorShape {
        CursorShape::color(w, h, hotspot, px.repeat((w * h) as usize))
    }

    fn state_at(x: i32, y: i32, shape: CursorShape) -> CursorState {
        CursorState {
            visible: true,
            position: Point::new(x, y),
            shape,
        }
    }

    fn padding_intact(buf: &[u8], w: u32, pitch: usize) -> bool {
        buf.chunks_exact(pitch)
            .all(|row| row[w as usize * 4..].iter().all(|&b| b == PAD))
    }

    #[test]
    fn replaces_at_hotspot_adjusted_origin() {
        let (mut buf, pitch) = padded(6, 6);
        let mut view = MappedView::new(&mut buf, 6, 6, pitch).unwrap();
        let shape = solid(2, 2, Point::new(1, 1), [1, 2, 3, 255]);

        let n = CursorCompositor.composite(&mut view, &state_at(3, 3, shape)).unwrap();
        assert_eq!(n, 4);
        assert_eq!(view.pixel(2, 2), Some([1, 2, 3, 255]));
        assert_eq!(view.pixel(3, 3), Some([1, 2, 3, 255]));
        assert_eq!(view.pixel(4, 4), Some([0, 0, 0, 0]));
        assert_eq!(view.pixel(1, 1), Some([0, 0, 0, 0]));
    }

    #[test]
    fn partial_alpha_is_a_hard_replace() {
        let (mut buf, pitch) = padded(2, 1);
        buf[..8].copy_from_slice(&[100, 100, 100, 255, 100, 100, 100, 255]);
        let mut view = MappedView::new(&mut buf, 2, 1, pitch).unwrap();
        let shape = CursorShape::color(
            2,
            1,
            Point::default(),
            vec![10, 20, 30, 0x20, 10, 20, 30, 0x00],
        );

        CursorCompositor.composite(&mut view, &state_at(0, 0, shape)).unwrap();
        assert_eq!(view.pixel(0, 0), Some([10, 20, 30, 0x20]));
        assert_eq!(view.pixel(1, 0), Some([100, 100, 100, 255]));
    }

    #[test]
    fn clips_on_every_side() {
        let cases = [
            (-2, 1),  // left
            (3, 1),   // right
            (1, -2),  // top
            (1, 3),   // bottom
            (-2, -2), // top-left corner
            (4, 4),   // bottom-right corner
        ];
        for (x, y) in cases {
            let (mut buf, pitch) = padded(5, 5);
            let mut view = MappedView::new(&mut buf, 5, 5, pitch).unwrap();
            let shape = solid(4, 4, Point::default(), [9, 9, 9, 255]);
            let n = CursorCompositor
                .composite(&mut view, &state_at(x, y, shape))
                .unwrap();

            let expected_w = (x + 4).min(5) - x.max(0);
            let expected_h = (y + 4).min(5) - y.max(0);
            assert_eq!(n as i32, expected_w * expected_h, "case ({x}, {y})");

            for py in 0..5 {
                for px in 0..5 {
                    let inside = px >= x && px < x + 4 && py >= y && py < y + 4;
                    let want = if inside { [9, 9, 9, 255] } else { [0; 4] };
                    assert_eq!(view.pixel(px as u32, py as u32), Some(want));
                }
            }
            drop(view);
            assert!(padding_intact(&buf, 5, pitch), "case ({x}, {y})");
        }
    }

    #[test]
    fn fully_offscreen_writes_nothing() {
        for (x, y) in [(-10, 0), (0, -10), (5, 0), (0, 5), (i32::MIN, i32::MAX)] {
            let (mut buf, pitch) = padded(5, 5);
            let before = buf.clone();
            let mut view = MappedView::new(&mut buf, 5, 5, pitch).unwrap();
            let shape = solid(3, 3, Point::default(), [1, 1, 1, 1]);
            let n = CursorCompositor
                .composite(&mut view, &state_at(x, y, shape))
                .unwrap();
            assert_eq!(n, 0);
            drop(view);
            assert_eq!(buf, before);
        }
    }

    #[test]
    fn xor_texels_invert_destination() {
        let (mut buf, pitch) = padded(1, 1);
        buf[..4].copy_from_slice(&[0x0F, 0xF0, 0x00, 0x00]);
        let mut view = MappedView::new(&mut buf, 1, 1, pitch).unwrap();
        let shape = CursorShape {
            width: 1,
            height: 1,
            hotspot: Point::default(),
            bitmap: ShapeBitmap::Monochrome {
                pitch: 1,
                mask: vec![0x80, 0x80],
            },
        };
        CursorCompositor.composite(&mut view, &state_at(0, 0, shape)).unwrap();
        assert_eq!(view.pixel(0, 0), Some([0xF0, 0x0F, 0xFF, 0xFF]));
    }

    #[test]
    fn invisible_state_is_skipped() {
        let (mut buf, pitch) = padded(2, 2);
        let mut view = MappedView::new(&mut buf, 2, 2, pitch).unwrap();
        let mut state = state_at(0, 0, solid(2, 2, Point::default(), [1, 1, 1, 1]));
        state.visible = false;
        assert_eq!(CursorCompositor.composite(&mut view, &state).unwrap(), 0);
    }

    #[test]
    fn malformed_shape_is_reported() {
        let (mut buf, pitch) = padded(2, 2);
        let mut view = MappedView::new(&mut buf, 2, 2, pitch).unwrap();
        let shape = CursorShape::color(2, 2, Point::default(), vec![0; 3]);
        let err = CursorCompositor
            .composite(&mut view, &state_at(0, 0, shape))
            .unwrap_err();
        assert!(err.is_recoverable());
    }
}
