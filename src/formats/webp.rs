//! WebP RIFF scanner.
//!
//! RIFF container: `RIFF`, little-endian total size, `WEBP`, then chunks of
//! fourcc + little-endian size + data. Chunks with an odd declared size are
//! padded to an even boundary; the pad byte is not part of the size, so the
//! walk must add it back or every subsequent fourcc is misread.

use tracing::debug;

use crate::cursor::{read_bytes, read_u16_le, read_u32_le};
use crate::types::{Dimensions, MetadataItem, ScanReport};

pub fn scan(data: &[u8]) -> ScanReport {
    let mut report = ScanReport::new();

    let (Some(riff), Some(declared), Some(webp)) = (
        read_bytes(data, 0, 4),
        read_u32_le(data, 4),
        read_bytes(data, 8, 4),
    ) else {
        report.error("truncated RIFF header");
        return report;
    };
    if riff != b"RIFF" || webp != b"WEBP" {
        report.error("missing RIFF/WEBP header");
        return report;
    }

    report.push(
        MetadataItem::new("RIFF", "container header")
            .at(0)
            .sized(12)
            .detail(format!("declared size {declared}")),
    );
    if declared as usize + 8 != data.len() {
        report.warning(format!(
            "RIFF size {declared} does not match file size {}",
            data.len()
        ));
    }

    let mut pos = 12usize;
    while pos < data.len() {
        let (Some(fourcc), Some(size)) = (read_bytes(data, pos, 4), read_u32_le(data, pos + 4))
        else {
            report.error(format!("truncated chunk header at offset {pos}"));
            break;
        };
        let name = String::from_utf8_lossy(fourcc).trim_end().to_string();

        let Some(payload_end) = pos
            .checked_add(8)
            .and_then(|n| n.checked_add(size as usize))
            .filter(|&n| n <= data.len())
        else {
            report.error(format!(
                "chunk {name} at offset {pos} extends past end of file"
            ));
            break;
        };

        let payload = &data[pos + 8..payload_end];
        let mut item = MetadataItem::new(&name, chunk_description(fourcc))
            .at(pos as u64)
            .sized(size as u64);

        if report.dimensions.is_none() {
            if let Some(dims) = frame_dimensions(fourcc, payload) {
                item = item.detail(format!("{dims}"));
                report.dimensions = Some(dims);
            }
        }
        report.push(item);

        // odd sizes are padded to even offsets
        pos = payload_end + (size as usize & 1);
    }

    if report.errors.is_empty() && !report.has_item("VP8") && !report.has_item("VP8L") {
        report.error("no image data chunk (VP8 or VP8L)");
    }

    debug!(
        chunks = report.metadata.len(),
        errors = report.errors.len(),
        "webp scan finished"
    );
    report
}

fn frame_dimensions(fourcc: &[u8], payload: &[u8]) -> Option<Dimensions> {
    match fourcc {
        // canvas size, stored minus one as 24-bit little-endian fields
        b"VP8X" => {
            if payload.len() < 10 {
                return None;
            }
            let width = u32::from_le_bytes([payload[4], payload[5], payload[6], 0]) + 1;
            let height = u32::from_le_bytes([payload[7], payload[8], payload[9], 0]) + 1;
            Some(Dimensions { width, height })
        }
        // lossy frame header: 3-byte tag, 9D 01 2A start code, 14-bit dims
        b"VP8 " => {
            if payload.get(3..6)? != [0x9D, 0x01, 0x2A] {
                return None;
            }
            let width = (read_u16_le(payload, 6)? & 0x3FFF) as u32;
            let height = (read_u16_le(payload, 8)? & 0x3FFF) as u32;
            (width > 0 && height > 0).then_some(Dimensions { width, height })
        }
        // lossless: 0x2F signature, then 14+14 bits of width-1/height-1
        b"VP8L" => {
            if *payload.first()? != 0x2F {
                return None;
            }
            let bits = read_u32_le(payload, 1)?;
            Some(Dimensions {
                width: (bits & 0x3FFF) + 1,
                height: ((bits >> 14) & 0x3FFF) + 1,
            })
        }
        _ => None,
    }
}

fn chunk_description(fourcc: &[u8]) -> &'static str {
    match fourcc {
        b"VP8 " => "lossy image data",
        b"VP8L" => "lossless image data",
        b"VP8X" => "extended features",
        b"ANIM" => "animation parameters",
        b"ANMF" => "animation frame",
        b"ALPH" => "alpha data",
        b"ICCP" => "ICC profile",
        b"EXIF" => "EXIF metadata",
        b"XMP " => "XMP metadata",
        _ => "chunk",
    }
}

/// Canvas size from the leading chunks, for first-chunk probing.
pub fn quick_dimensions(data: &[u8]) -> Option<Dimensions> {
    if read_bytes(data, 0, 4)? != b"RIFF" || read_bytes(data, 8, 4)? != b"WEBP" {
        return None;
    }
    let fourcc = read_bytes(data, 12, 4)?;
    let size = read_u32_le(data, 16)? as usize;
    frame_dimensions(fourcc, data.get(20..20 + size)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn riff_chunk(fourcc: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = fourcc.to_vec();
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(payload);
        if payload.len() % 2 == 1 {
            out.push(0);
        }
        out
    }

    fn vp8_payload(width: u16, height: u16) -> Vec<u8> {
        let mut p = vec![0x30, 0x01, 0x00, 0x9D, 0x01, 0x2A];
        p.extend_from_slice(&width.to_le_bytes());
        p.extend_from_slice(&height.to_le_bytes());
        p.extend_from_slice(&[0u8; 8]);
        p
    }

    fn create_webp(chunks: &[Vec<u8>]) -> Vec<u8> {
        let body_len: usize = chunks.iter().map(Vec::len).sum();
        let mut data = b"RIFF".to_vec();
        data.extend_from_slice(&((body_len + 4) as u32).to_le_bytes());
        data.extend_from_slice(b"WEBP");
        for c in chunks {
            data.extend_from_slice(c);
        }
        data
    }

    #[test]
    fn test_scan_lossy_webp() {
        let data = create_webp(&[riff_chunk(b"VP8 ", &vp8_payload(1024, 768))]);
        let report = scan(&data);
        assert!(report.is_structurally_valid(), "errors: {:?}", report.errors);
        assert_eq!(
            report.dimensions,
            Some(Dimensions {
                width: 1024,
                height: 768
            })
        );
    }

    #[test]
    fn test_odd_chunk_padding_keeps_walk_aligned() {
        // 13-byte ICCP forces a pad byte before VP8
        let data = create_webp(&[
            riff_chunk(b"ICCP", &[0xAB; 13]),
            riff_chunk(b"VP8 ", &vp8_payload(10, 20)),
        ]);
        let report = scan(&data);
        assert!(report.is_structurally_valid(), "errors: {:?}", report.errors);
        assert!(report.has_item("ICCP"));
        assert!(report.has_item("VP8"));
    }

    #[test]
    fn test_vp8x_canvas_dimensions() {
        let mut vp8x = vec![0x02, 0, 0, 0];
        vp8x.extend_from_slice(&[0x1F, 0x00, 0x00]); // width 32
        vp8x.extend_from_slice(&[0x3F, 0x00, 0x00]); // height 64
        let data = create_webp(&[
            riff_chunk(b"VP8X", &vp8x),
            riff_chunk(b"VP8L", &[0x2F, 0x1F, 0xC0, 0x0F, 0x00]),
        ]);
        let report = scan(&data);
        assert_eq!(
            report.dimensions,
            Some(Dimensions {
                width: 32,
                height: 64
            })
        );
    }

    #[test]
    fn test_missing_image_chunk_is_fatal() {
        let data = create_webp(&[riff_chunk(b"ICCP", &[0u8; 4])]);
        let report = scan(&data);
        assert!(!report.is_structurally_valid());
        assert!(report.errors[0].contains("VP8"));
    }

    #[test]
    fn test_declared_size_mismatch_is_warning() {
        let mut data = create_webp(&[riff_chunk(b"VP8 ", &vp8_payload(4, 4))]);
        data[4] = data[4].wrapping_add(7);
        let report = scan(&data);
        assert!(report.is_structurally_valid());
        assert!(report.warnings.iter().any(|w| w.contains("RIFF size")));
    }

    #[test]
    fn test_quick_dimensions() {
        let data = create_webp(&[riff_chunk(b"VP8 ", &vp8_payload(640, 480))]);
        assert_eq!(
            quick_dimensions(&data),
            Some(Dimensions {
                width: 640,
                height: 480
            })
        );
    }
}
