//! Per-format structural scanners.
//!
//! Every scanner is a pure function over a complete byte buffer returning a
//! [`ScanReport`]; orchestration, streaming and EXIF extraction live
//! elsewhere. The dispatcher matches exhaustively over [`ImageFormat`], so
//! adding a format without wiring its scanner is a compile error.

pub mod bmp;
pub mod gif;
pub mod ico;
pub mod isobmff;
pub mod jpeg;
pub mod png;
pub mod svg;
pub mod tiff;
pub mod webp;

use crate::types::{Dimensions, ImageFormat, ScanReport};

/// Runs the scanner for `format` over the complete buffer. An undetected
/// format yields a skipped report, never an error.
pub fn scan(format: Option<ImageFormat>, data: &[u8]) -> ScanReport {
    match format {
        Some(ImageFormat::Png | ImageFormat::Apng) => png::scan(data),
        Some(ImageFormat::Jpeg) => jpeg::scan(data),
        Some(ImageFormat::Gif) => gif::scan(data),
        Some(ImageFormat::WebP) => webp::scan(data),
        Some(ImageFormat::Svg) => svg::scan(data),
        Some(ImageFormat::Bmp) => bmp::scan(data),
        Some(ImageFormat::Ico) => ico::scan(data),
        Some(ImageFormat::Tiff) => tiff::scan(data),
        Some(ImageFormat::Jpeg2000) => isobmff::scan_jp2(data),
        Some(ImageFormat::Avif) => isobmff::scan_avif(data),
        Some(ImageFormat::Heic) => isobmff::scan_heic(data),
        None => ScanReport::skipped("no scanner for unrecognized input"),
    }
}

/// Best-effort dimensions from the first chunk of a stream, before the full
/// buffer exists. Formats whose size lives deep in the file return `None`.
pub fn probe_dimensions(format: ImageFormat, first_chunk: &[u8]) -> Option<Dimensions> {
    match format {
        ImageFormat::Png | ImageFormat::Apng => png::quick_dimensions(first_chunk),
        ImageFormat::Jpeg => jpeg::quick_dimensions(first_chunk),
        ImageFormat::Gif => gif::quick_dimensions(first_chunk),
        ImageFormat::WebP => webp::quick_dimensions(first_chunk),
        ImageFormat::Bmp => bmp::quick_dimensions(first_chunk),
        ImageFormat::Ico => ico::quick_dimensions(first_chunk),
        ImageFormat::Tiff => tiff::quick_dimensions(first_chunk),
        ImageFormat::Avif | ImageFormat::Heic => isobmff::quick_dimensions(first_chunk),
        ImageFormat::Svg | ImageFormat::Jpeg2000 => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undetected_format_is_skipped() {
        let report = scan(None, b"not an image at all");
        assert!(report.skipped);
        assert!(report.errors.is_empty());
        assert!(report.metadata.is_empty());
    }

    #[test]
    fn test_dispatch_reaches_scanner() {
        // wrong bytes for the format produce that scanner's own error
        let report = scan(Some(ImageFormat::Gif), b"BM\x00\x00");
        assert!(!report.skipped);
        assert!(report.errors[0].contains("GIF"));
    }
}
