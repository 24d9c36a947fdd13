//! GIF block scanner.
//!
//! After the header and logical screen descriptor, the body is a sequence of
//! blocks introduced by a single byte: 0x21 extension, 0x2C image
//! descriptor, 0x3B trailer. Extension payloads and image data arrive as
//! sub-block chains (length byte, data, repeated until a zero length). Both
//! the global and any local color tables must be skipped by size, not
//! guessed at.

use tracing::debug;

use crate::cursor::read_u16_le;
use crate::types::{Dimensions, ItemPayload, MetadataItem, ScanReport};

const COMMENT_PREVIEW_LEN: usize = 50;

pub fn scan(data: &[u8]) -> ScanReport {
    let mut report = ScanReport::new();

    let version = match data.get(..6) {
        Some(b"GIF87a") => "87a",
        Some(b"GIF89a") => "89a",
        _ => {
            report.error("missing GIF header");
            return report;
        }
    };
    report.push(
        MetadataItem::new("header", format!("GIF version {version}"))
            .at(0)
            .sized(6),
    );

    let Some(pos) = logical_screen(data, &mut report) else {
        return report;
    };
    let mut pos = pos;
    let mut trailer_seen = false;
    let mut frames = 0u32;

    while pos < data.len() {
        match data[pos] {
            0x21 => {
                let Some(next) = extension_block(data, pos, &mut report) else {
                    report.error(format!("truncated extension block at offset {pos}"));
                    break;
                };
                pos = next;
            }
            0x2C => {
                let Some(next) = image_descriptor(data, pos, &mut report) else {
                    report.error(format!("truncated image descriptor at offset {pos}"));
                    break;
                };
                frames += 1;
                pos = next;
            }
            0x3B => {
                trailer_seen = true;
                report.push(MetadataItem::new("trailer", "end of stream").at(pos as u64).sized(1));
                if pos + 1 < data.len() {
                    report.warning(format!("{} trailing bytes after trailer", data.len() - pos - 1));
                }
                break;
            }
            other => {
                report.error(format!("unknown block introducer 0x{other:02X} at offset {pos}"));
                break;
            }
        }
    }

    if !trailer_seen && report.errors.is_empty() {
        report.error("missing trailer byte");
    }
    if frames > 1 {
        report.push(MetadataItem::new("frames", format!("{frames} image frames")));
    }

    debug!(
        blocks = report.metadata.len(),
        errors = report.errors.len(),
        "gif scan finished"
    );
    report
}

/// Logical screen descriptor at offset 6; returns the offset of the first
/// block, past any global color table.
fn logical_screen(data: &[u8], report: &mut ScanReport) -> Option<usize> {
    let (Some(width), Some(height), Some(&packed)) =
        (read_u16_le(data, 6), read_u16_le(data, 8), data.get(10))
    else {
        report.error("truncated logical screen descriptor");
        return None;
    };
    if data.len() < 13 {
        report.error("truncated logical screen descriptor");
        return None;
    }

    report.dimensions = Some(Dimensions {
        width: width as u32,
        height: height as u32,
    });

    let mut detail = format!("{width}x{height}");
    if data[12] != 0 {
        detail.push_str(&format!(", aspect ratio byte {}", data[12]));
    }

    let mut pos = 13usize;
    if packed & 0x80 != 0 {
        let table_len = 3 * (1usize << ((packed & 0x07) + 1));
        detail.push_str(&format!(
            ", global color table {} entries, background color {}",
            table_len / 3,
            data[11]
        ));
        if pos + table_len > data.len() {
            report.push(
                MetadataItem::new("screen", "logical screen descriptor")
                    .at(6)
                    .sized(7)
                    .detail(detail),
            );
            report.error("global color table extends past end of file");
            return None;
        }
        pos += table_len;
    }
    report.push(
        MetadataItem::new("screen", "logical screen descriptor")
            .at(6)
            .sized(7)
            .detail(detail),
    );
    Some(pos)
}

fn extension_block(data: &[u8], start: usize, report: &mut ScanReport) -> Option<usize> {
    let label = *data.get(start + 1)?;
    let mut item = MetadataItem::new(extension_name(label), extension_description(label))
        .at(start as u64);

    let (blocks, end) = collect_sub_blocks(data, start + 2)?;
    match label {
        0xFE => {
            let text = String::from_utf8_lossy(&blocks);
            let preview: String = text.chars().take(COMMENT_PREVIEW_LEN).collect();
            item = item.with_payload(ItemPayload::TextChunk {
                keyword: "comment".into(),
                preview,
            });
        }
        0xFF if blocks.len() >= 11 => {
            let app = String::from_utf8_lossy(&blocks[..11]).into_owned();
            item = item.detail(app.trim_end_matches('\0').to_string());
        }
        _ => {}
    }
    report.push(item.sized((end - start) as u64));
    Some(end)
}

/// Image descriptor: 9 fixed bytes, optional local color table, LZW minimum
/// code size byte, then the pixel-data sub-block chain.
fn image_descriptor(data: &[u8], start: usize, report: &mut ScanReport) -> Option<usize> {
    let width = read_u16_le(data, start + 5)?;
    let height = read_u16_le(data, start + 7)?;
    let packed = *data.get(start + 9)?;

    let mut pos = start + 10;
    if packed & 0x80 != 0 {
        let table_len = 3 * (1usize << ((packed & 0x07) + 1));
        pos = pos.checked_add(table_len)?;
        if pos > data.len() {
            return None;
        }
    }
    // LZW minimum code size
    pos = pos.checked_add(1)?;
    if pos > data.len() {
        return None;
    }

    let (_, end) = collect_sub_blocks(data, pos)?;
    report.push(
        MetadataItem::new("image", "image descriptor")
            .at(start as u64)
            .sized((end - start) as u64)
            .detail(format!("{width}x{height}")),
    );
    Some(end)
}

/// Concatenates a sub-block chain starting at `pos`; returns the assembled
/// bytes and the offset just past the zero terminator.
fn collect_sub_blocks(data: &[u8], mut pos: usize) -> Option<(Vec<u8>, usize)> {
    let mut out = Vec::new();
    loop {
        let len = *data.get(pos)? as usize;
        pos += 1;
        if len == 0 {
            return Some((out, pos));
        }
        out.extend_from_slice(data.get(pos..pos + len)?);
        pos += len;
    }
}

fn extension_name(label: u8) -> &'static str {
    match label {
        0xF9 => "GCE",
        0xFE => "comment",
        0x01 => "plaintext",
        0xFF => "application",
        _ => "extension",
    }
}

fn extension_description(label: u8) -> &'static str {
    match label {
        0xF9 => "graphic control extension",
        0xFE => "comment extension",
        0x01 => "plain text extension",
        0xFF => "application extension",
        _ => "unknown extension",
    }
}

/// Width/height from the logical screen descriptor, for first-chunk probing.
pub fn quick_dimensions(data: &[u8]) -> Option<Dimensions> {
    if !matches!(data.get(..6), Some(b"GIF87a") | Some(b"GIF89a")) {
        return None;
    }
    let width = read_u16_le(data, 6)?;
    let height = read_u16_le(data, 8)?;
    (width > 0 && height > 0).then_some(Dimensions {
        width: width as u32,
        height: height as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub_blocks(payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        for part in payload.chunks(255) {
            out.push(part.len() as u8);
            out.extend_from_slice(part);
        }
        out.push(0);
        out
    }

    fn image_block(width: u16, height: u16, local_table: bool) -> Vec<u8> {
        let mut out = vec![0x2C, 0, 0, 0, 0];
        out.extend_from_slice(&width.to_le_bytes());
        out.extend_from_slice(&height.to_le_bytes());
        if local_table {
            out.push(0x80); // LCT flag, 2 entries
            out.extend_from_slice(&[0u8; 6]);
        } else {
            out.push(0x00);
        }
        out.push(2); // LZW minimum code size
        out.extend(sub_blocks(&[0x4C, 0x01]));
        out
    }

    fn create_minimal_gif() -> Vec<u8> {
        let mut data = b"GIF89a".to_vec();
        data.extend_from_slice(&320u16.to_le_bytes());
        data.extend_from_slice(&240u16.to_le_bytes());
        data.extend_from_slice(&[0x00, 0, 0]); // no GCT
        data.extend(image_block(320, 240, false));
        data.push(0x3B);
        data
    }

    #[test]
    fn test_scan_minimal_gif() {
        let report = scan(&create_minimal_gif());
        assert!(report.is_structurally_valid(), "errors: {:?}", report.errors);
        assert!(report.has_item("header"));
        assert!(report.has_item("image"));
        assert!(report.has_item("trailer"));
        assert_eq!(
            report.dimensions,
            Some(Dimensions {
                width: 320,
                height: 240
            })
        );
    }

    #[test]
    fn test_local_color_table_is_skipped() {
        let mut data = b"GIF89a".to_vec();
        data.extend_from_slice(&8u16.to_le_bytes());
        data.extend_from_slice(&8u16.to_le_bytes());
        data.extend_from_slice(&[0x00, 0, 0]);
        data.extend(image_block(8, 8, true));
        data.push(0x3B);

        let report = scan(&data);
        assert!(report.is_structurally_valid(), "errors: {:?}", report.errors);
    }

    #[test]
    fn test_comment_extension() {
        let mut data = b"GIF89a".to_vec();
        data.extend_from_slice(&[1, 0, 1, 0, 0x00, 0, 0]);
        data.extend_from_slice(&[0x21, 0xFE]);
        data.extend(sub_blocks(b"made by hand"));
        data.extend(image_block(1, 1, false));
        data.push(0x3B);

        let report = scan(&data);
        let comment = report.metadata.iter().find(|m| m.key == "comment").unwrap();
        match &comment.payload {
            ItemPayload::TextChunk { preview, .. } => assert_eq!(preview, "made by hand"),
            other => panic!("expected text payload, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_trailer_is_fatal() {
        let mut data = create_minimal_gif();
        data.pop();
        let report = scan(&data);
        assert!(!report.is_structurally_valid());
        assert!(report.errors[0].contains("trailer"));
    }

    #[test]
    fn test_unknown_introducer_is_fatal() {
        let mut data = create_minimal_gif();
        let trailer = data.len() - 1;
        data[trailer] = 0x42;
        let report = scan(&data);
        assert!(report.errors[0].contains("unknown block introducer 0x42"));
    }

    #[test]
    fn test_quick_dimensions() {
        assert_eq!(
            quick_dimensions(&create_minimal_gif()),
            Some(Dimensions {
                width: 320,
                height: 240
            })
        );
        assert_eq!(quick_dimensions(b"GIF89a"), None);
    }
}
