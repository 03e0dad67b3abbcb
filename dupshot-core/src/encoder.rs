//! Channel reordering and image file encoding.
//!
//! [`PixelEncoder`] turns a mapped BGRA view into a tightly packed RGB
//! [`OutputImage`], reading every row at its row pitch. The image is then
//! serialised as a binary PPM (`P6`) or a 24-bit BMP and written atomically.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CaptureError;
use crate::types::{MappedView, PixelFormat};

/// Maximum channel value written to PPM headers.
pub const PPM_MAXVAL: u8 = 255;

// ── ImageFormat ──────────────────────────────────────────────────

/// Output file encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// Binary portable pixel map.
    #[default]
    Ppm,
    /// Uncompressed 24-bit Windows bitmap.
    Bmp,
}

impl ImageFormat {
    /// Guess the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "ppm" | "pnm" => Some(ImageFormat::Ppm),
            "bmp" => Some(ImageFormat::Bmp),
            _ => None,
        }
    }
}

// ── OutputImage ──────────────────────────────────────────────────

/// A packed RGB image, top row first, no row padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputImage {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

impl OutputImage {
    /// The `P6` header for this image.
    pub fn ppm_header(&self) -> String {
        format!("P6\n#\n{} {} {}\n", self.width, self.height, PPM_MAXVAL)
    }

    /// Binary PPM: header followed by the RGB triples.
    pub fn to_ppm(&self) -> Vec<u8> {
        let header = self.ppm_header();
        let mut out = Vec::with_capacity(header.len() + self.rgb.len());
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(&self.rgb);
        out
    }

    /// 24-bit bottom-up BMP with rows padded to four bytes.
    pub fn to_bmp(&self) -> Vec<u8> {
        const FILE_HEADER: usize = 14;
        const INFO_HEADER: usize = 40;

        let row_bytes = self.width as usize * 3;
        let stride = row_bytes.next_multiple_of(4);
        let image_size = stride * self.height as usize;
        let offset = FILE_HEADER + INFO_HEADER;

        let mut out = Vec::with_capacity(offset + image_size);
        // BITMAPFILEHEADER
        out.extend_from_slice(b"BM");
        out.extend_from_slice(&((offset + image_size) as u32).to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&(offset as u32).to_le_bytes());
        // BITMAPINFOHEADER
        out.extend_from_slice(&(INFO_HEADER as u32).to_le_bytes());
        out.extend_from_slice(&(self.width as i32).to_le_bytes());
        out.extend_from_slice(&(self.height as i32).to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&24u16.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // BI_RGB
        out.extend_from_slice(&(image_size as u32).to_le_bytes());
        out.extend_from_slice(&[0u8; 16]);

        for row in self.rgb.chunks_exact(row_bytes.max(1)).rev() {
            for px in row.chunks_exact(3) {
                out.extend_from_slice(&[px[2], px[1], px[0]]);
            }
            out.resize(out.len() + stride - row_bytes, 0);
        }
        out
    }

    pub fn encode(&self, format: ImageFormat) -> Vec<u8> {
        match format {
            ImageFormat::Ppm => self.to_ppm(),
            ImageFormat::Bmp => self.to_bmp(),
        }
    }

    /// Encode and write to `path` atomically.
    ///
    /// The bytes go to a sibling temporary file which is renamed over
    /// `path` only after a complete write, so `path` never holds a
    /// truncated image.
    pub fn save(&self, path: &Path, format: ImageFormat) -> Result<(), CaptureError> {
        let bytes = self.encode(format);
        write_atomic(path, &bytes)?;
        debug!(path = %path.display(), bytes = bytes.len(), ?format, "image written");
        Ok(())
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{}.tmp", std::process::id()));
    path.with_file_name(name)
}

/// Write `bytes` to `path` through a temporary file and rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CaptureError> {
    let tmp = temp_sibling(path);
    let io_err = |source| CaptureError::EncodeIo {
        path: path.to_path_buf(),
        source,
    };

    let written = fs::File::create(&tmp).and_then(|mut file| {
        file.write_all(bytes)?;
        file.sync_all()
    });
    if let Err(e) = written.and_then(|()| fs::rename(&tmp, path)) {
        let _ = fs::remove_file(&tmp);
        return Err(io_err(e));
    }
    Ok(())
}

// ── PixelEncoder ─────────────────────────────────────────────────

/// Converts mapped BGRA buffers to RGB output.
#[derive(Debug, Clone, Copy, Default)]
pub struct PixelEncoder;

impl PixelEncoder {
    pub fn new() -> Self {
        Self
    }

    /// Reorder `view` into a packed RGB image, dropping alpha.
    ///
    /// Row `y` is read from `y * row_pitch`; row padding never reaches the
    /// output.
    pub fn encode_image(&self, view: &MappedView<'_>) -> OutputImage {
        let (width, height) = (view.width(), view.height());
        let bpp = PixelFormat::Rgb8.bytes_per_pixel();
        let mut rgb = Vec::with_capacity(width as usize * height as usize * bpp);
        for row in (0..height).filter_map(|y| view.row(y)) {
            for px in row.chunks_exact(4) {
                rgb.extend_from_slice(&[px[2], px[1], px[0]]);
            }
        }
        OutputImage { width, height, rgb }
    }

    /// Header plus pixel bytes of a binary PPM.
    pub fn encode(&self, view: &MappedView<'_>) -> Vec<u8> {
        self.encode_image(view).to_ppm()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const SENTINEL: u8 = 0x5A;

    #[test]
    fn stride_padding_never_reaches_output() {
        // width 7, pitch 32: 4 bytes of padding per row.
        let (w, h, pitch) = (7u32, 3u32, 32usize);
        let mut buf = vec![SENTINEL; pitch * h as usize];
        for y in 0..h as usize {
            for x in 0..w as usize {
                let v = (y * 10 + x) as u8;
                buf[y * pitch + x * 4..y * pitch + x * 4 + 4].copy_from_slice(&[v, v, v, 0xFF]);
            }
        }
        let view = MappedView::new(&mut buf, w, h, pitch).unwrap();
        let image = PixelEncoder.encode_image(&view);

        assert_eq!(image.rgb.len(), 7 * 3 * 3);
        assert!(!image.rgb.contains(&SENTINEL));
        // First pixel of row 2 comes from offset 64, not 56.
        assert_eq!(&image.rgb[2 * 21..2 * 21 + 3], &[20, 20, 20]);
        assert_eq!(&image.rgb[21 * 3 - 3..], &[26, 26, 26]);
    }

    #[test]
    fn channel_reorder_drops_alpha() {
        let samples: [[u8; 4]; 4] = [
            [0, 0, 0, 0],
            [255, 255, 255, 255],
            [1, 2, 3, 4],
            [200, 100, 50, 0],
        ];
        for [b, g, r, a] in samples {
            let mut buf = vec![b, g, r, a];
            let view = MappedView::new(&mut buf, 1, 1, 4).unwrap();
            assert_eq!(PixelEncoder.encode_image(&view).rgb, vec![r, g, b]);
        }
    }

    #[test]
    fn ppm_header_and_body() {
        let mut buf = vec![0u8; 16 * 2];
        buf[..4].copy_from_slice(&[3, 2, 1, 0]);
        let view = MappedView::new(&mut buf, 4, 2, 16).unwrap();
        let bytes = PixelEncoder.encode(&view);

        let header = b"P6\n#\n4 2 255\n";
        assert_eq!(&bytes[..header.len()], header);
        assert_eq!(bytes.len(), header.len() + 24);
        assert_eq!(&bytes[header.len()..header.len() + 3], &[1, 2, 3]);
    }

    #[test]
    fn bmp_is_bottom_up_bgr_with_padding() {
        // 1x2 image: top red, bottom blue. Row stride 4 bytes.
        let image = OutputImage {
            width: 1,
            height: 2,
            rgb: vec![255, 0, 0, 0, 0, 255],
        };
        let bmp = image.to_bmp();
        assert_eq!(&bmp[..2], b"BM");
        assert_eq!(u32::from_le_bytes(bmp[2..6].try_into().unwrap()), 54 + 8);
        assert_eq!(u32::from_le_bytes(bmp[10..14].try_into().unwrap()), 54);
        assert_eq!(u16::from_le_bytes(bmp[28..30].try_into().unwrap()), 24);
        // Bottom row (blue) first, stored as BGR.
        assert_eq!(&bmp[54..58], &[255, 0, 0, 0]);
        assert_eq!(&bmp[58..62], &[0, 0, 255, 0]);
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(ImageFormat::from_path(Path::new("a.PPM")), Some(ImageFormat::Ppm));
        assert_eq!(ImageFormat::from_path(Path::new("a.bmp")), Some(ImageFormat::Bmp));
        assert_eq!(ImageFormat::from_path(Path::new("a.png")), None);
        assert_eq!(ImageFormat::from_path(Path::new("noext")), None);
    }

    #[test]
    fn save_writes_complete_file_and_no_temp() {
        let dir = std::env::temp_dir().join(format!("dupshot-enc-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("shot.ppm");

        let image = OutputImage {
            width: 1,
            height: 1,
            rgb: vec![9, 8, 7],
        };
        image.save(&path, ImageFormat::Ppm).unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"P6\n#\n1 1 255\n\x09\x08\x07");
        assert!(!temp_sibling(&path).exists());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn save_into_missing_directory_fails_cleanly() {
        let path = std::env::temp_dir()
            .join(format!("dupshot-missing-{}", std::process::id()))
            .join("shot.ppm");
        let image = OutputImage {
            width: 1,
            height: 1,
            rgb: vec![0, 0, 0],
        };
        let err = image.save(&path, ImageFormat::Ppm).unwrap_err();
        assert!(matches!(err, CaptureError::EncodeIo { .. }));
        assert!(!path.exists());
    }
}
