//! BMP scanner.
//!
//! Fixed-offset decode of the file header and the BITMAPINFOHEADER. Height
//! is signed: a negative value means a top-down row order, and the reported
//! dimension is its magnitude.

use tracing::debug;

use crate::cursor::{read_i32_le, read_u16_le, read_u32_le};
use crate::types::{Dimensions, MetadataItem, ScanReport};

pub fn scan(data: &[u8]) -> ScanReport {
    let mut report = ScanReport::new();

    if data.len() < 2 || &data[..2] != b"BM" {
        report.error("missing BM file header");
        return report;
    }

    let (Some(file_size), Some(pixel_offset), Some(dib_size)) = (
        read_u32_le(data, 2),
        read_u32_le(data, 10),
        read_u32_le(data, 14),
    ) else {
        report.error("truncated BMP file header");
        return report;
    };

    report.push(
        MetadataItem::new("header", "file header")
            .at(0)
            .sized(14)
            .detail(format!(
                "declared size {file_size}, pixel data at {pixel_offset}"
            )),
    );

    if file_size as usize != data.len() {
        report.warning(format!(
            "declared file size {file_size} does not match actual size {}",
            data.len()
        ));
    }
    if pixel_offset as usize >= data.len() {
        report.error(format!("pixel data offset {pixel_offset} is past end of file"));
    }

    if dib_size < 40 {
        report.warning(format!("legacy DIB header of {dib_size} bytes, fields not decoded"));
        return report;
    }

    let (Some(width), Some(height), Some(bpp), Some(compression)) = (
        read_i32_le(data, 18),
        read_i32_le(data, 22),
        read_u16_le(data, 28),
        read_u32_le(data, 30),
    ) else {
        report.error("truncated DIB header");
        return report;
    };

    let top_down = height < 0;
    if width <= 0 || height == 0 {
        report.error(format!("invalid bitmap dimensions {width}x{height}"));
    } else {
        report.dimensions = Some(Dimensions {
            width: width as u32,
            height: height.unsigned_abs(),
        });
    }

    let mut detail = format!(
        "{}x{}, {bpp} bpp, {}",
        width,
        height.unsigned_abs(),
        compression_name(compression)
    );
    if top_down {
        detail.push_str(", top-down");
    }
    report.push(
        MetadataItem::new("DIB", "bitmap info header")
            .at(14)
            .sized(dib_size as u64)
            .detail(detail),
    );

    debug!(errors = report.errors.len(), "bmp scan finished");
    report
}

fn compression_name(compression: u32) -> &'static str {
    match compression {
        0 => "BI_RGB",
        1 => "BI_RLE8",
        2 => "BI_RLE4",
        3 => "BI_BITFIELDS",
        4 => "BI_JPEG",
        5 => "BI_PNG",
        _ => "unknown compression",
    }
}

/// Width/height from the DIB header, for first-chunk probing.
pub fn quick_dimensions(data: &[u8]) -> Option<Dimensions> {
    if data.len() < 26 || &data[..2] != b"BM" {
        return None;
    }
    let width = read_i32_le(data, 18)?;
    let height = read_i32_le(data, 22)?;
    (width > 0 && height != 0).then_some(Dimensions {
        width: width as u32,
        height: height.unsigned_abs(),
    })
}
