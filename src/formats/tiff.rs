//! TIFF IFD scanner.
//!
//! The 8-byte header fixes the byte order (`II` or `MM`, magic 42) and
//! points at the first image file directory. Each IFD is an entry count,
//! 12-byte entries, and a link to the next IFD. Offsets come from the file
//! itself, so the walk keeps a visited set: a directory chain that revisits
//! an offset is reported once and abandoned instead of looping forever.

use std::collections::HashSet;

use tracing::debug;

use crate::cursor::{read_bytes, Endian};
use crate::types::{Dimensions, MetadataItem, ScanReport};

const MAX_IFD_ENTRIES: u16 = 4096;

pub fn scan(data: &[u8]) -> ScanReport {
    let mut report = ScanReport::new();

    let Some((endian, first_ifd)) = parse_header(data) else {
        report.error("missing TIFF header");
        return report;
    };
    report.push(
        MetadataItem::new("header", "TIFF header")
            .at(0)
            .sized(8)
            .detail(match endian {
                Endian::Little => "little-endian".to_string(),
                Endian::Big => "big-endian".to_string(),
            }),
    );

    let mut visited: HashSet<u32> = HashSet::new();
    let mut next = first_ifd;
    let mut index = 0usize;

    while next != 0 {
        if !visited.insert(next) {
            report.error(format!("IFD chain loops back to offset {next}"));
            break;
        }
        match walk_ifd(data, endian, next, index, &mut report) {
            Some(link) => next = link,
            None => break,
        }
        index += 1;
    }

    if index == 0 && report.errors.is_empty() {
        report.error("no image file directory");
    }

    debug!(
        directories = index,
        errors = report.errors.len(),
        "tiff scan finished"
    );
    report
}

fn parse_header(data: &[u8]) -> Option<(Endian, u32)> {
    let endian = match read_bytes(data, 0, 2)? {
        b"II" => Endian::Little,
        b"MM" => Endian::Big,
        _ => return None,
    };
    if endian.read_u16(data, 2)? != 42 {
        return None;
    }
    Some((endian, endian.read_u32(data, 4)?))
}

/// One directory; returns the link to the next IFD, or `None` on a
/// structural failure (already recorded in the report).
fn walk_ifd(
    data: &[u8],
    endian: Endian,
    offset: u32,
    index: usize,
    report: &mut ScanReport,
) -> Option<u32> {
    let base = offset as usize;
    let Some(count) = endian.read_u16(data, base) else {
        report.error(format!("IFD {index} offset {offset} is past end of file"));
        return None;
    };
    if count > MAX_IFD_ENTRIES {
        report.error(format!("IFD {index} declares {count} entries"));
        return None;
    }

    report.push(
        MetadataItem::new(format!("IFD{index}"), "image file directory")
            .at(offset as u64)
            .sized(2 + count as u64 * 12 + 4)
            .detail(format!("{count} entries")),
    );

    let mut width: Option<u32> = None;
    let mut height: Option<u32> = None;

    for i in 0..count as usize {
        let entry = base + 2 + i * 12;
        let (Some(tag), Some(field_type), Some(value)) = (
            endian.read_u16(data, entry),
            endian.read_u16(data, entry + 2),
            inline_value(data, endian, entry),
        ) else {
            report.error(format!("IFD {index} entry {i} is truncated"));
            return None;
        };

        match tag {
            0x0100 => width = value,
            0x0101 => height = value,
            _ => {}
        }
        if let Some(name) = tag_name(tag) {
            let mut item = MetadataItem::new(name, format!("tag 0x{tag:04X}")).at(entry as u64).sized(12);
            if let Some(v) = value {
                item = item.detail(format!("{v}"));
            } else if let Some(text) = ascii_value(data, endian, entry, field_type) {
                item = item.detail(text);
            }
            report.push(item);
        }
    }

    if report.dimensions.is_none() {
        if let (Some(w), Some(h)) = (width, height) {
            if w > 0 && h > 0 {
                report.dimensions = Some(Dimensions {
                    width: w,
                    height: h,
                });
            }
        }
    }

    let link_offset = base + 2 + count as usize * 12;
    let Some(link) = endian.read_u32(data, link_offset) else {
        report.error(format!("IFD {index} next-directory link is truncated"));
        return None;
    };
    Some(link)
}

/// SHORT/LONG value stored inline in the entry's value field.
fn inline_value(data: &[u8], endian: Endian, entry: usize) -> Option<Option<u32>> {
    let field_type = endian.read_u16(data, entry + 2)?;
    let count = endian.read_u32(data, entry + 4)?;
    let value = match (field_type, count) {
        (3, 1) => Some(endian.read_u16(data, entry + 8)? as u32),
        (4, 1) => Some(endian.read_u32(data, entry + 8)?),
        _ => None,
    };
    Some(value)
}

/// ASCII tag value dereferenced through its offset, truncated for display.
fn ascii_value(data: &[u8], endian: Endian, entry: usize, field_type: u16) -> Option<String> {
    if field_type != 2 {
        return None;
    }
    let count = endian.read_u32(data, entry + 4)? as usize;
    let bytes = if count <= 4 {
        read_bytes(data, entry + 8, count)?
    } else {
        let offset = endian.read_u32(data, entry + 8)? as usize;
        read_bytes(data, offset, count)?
    };
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim_end_matches('\0');
    (!trimmed.is_empty()).then(|| trimmed.chars().take(50).collect())
}

fn tag_name(tag: u16) -> Option<&'static str> {
    Some(match tag {
        0x0100 => "ImageWidth",
        0x0101 => "ImageLength",
        0x0102 => "BitsPerSample",
        0x0103 => "Compression",
        0x0106 => "PhotometricInterpretation",
        0x0111 => "StripOffsets",
        0x0112 => "Orientation",
        0x0115 => "SamplesPerPixel",
        0x0117 => "StripByteCounts",
        0x011A => "XResolution",
        0x011B => "YResolution",
        0x010F => "Make",
        0x0110 => "Model",
        0x0131 => "Software",
        0x0132 => "DateTime",
        0x8769 => "ExifIFD",
        0x8825 => "GPSIFD",
        _ => return None,
    })
}

/// Width/height from the first IFD, for first-chunk probing.
pub fn quick_dimensions(data: &[u8]) -> Option<Dimensions> {
    let (endian, first) = parse_header(data)?;
    let base = first as usize;
    let count = endian.read_u16(data, base)?.min(MAX_IFD_ENTRIES);
    let mut width = None;
    let mut height = None;
    for i in 0..count as usize {
        let entry = base + 2 + i * 12;
        match endian.read_u16(data, entry)? {
            0x0100 => width = inline_value(data, endian, entry)?,
            0x0101 => height = inline_value(data, endian, entry)?,
            _ => {}
        }
    }
    match (width, height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => Some(Dimensions {
            width: w,
            height: h,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_short(tag: u16, value: u16) -> Vec<u8> {
        let mut e = tag.to_le_bytes().to_vec();
        e.extend_from_slice(&3u16.to_le_bytes());
        e.extend_from_slice(&1u32.to_le_bytes());
        e.extend_from_slice(&value.to_le_bytes());
        e.extend_from_slice(&[0, 0]);
        e
    }

    fn create_minimal_tiff(next_ifd: u32) -> Vec<u8> {
        let mut data = b"II".to_vec();
        data.extend_from_slice(&42u16.to_le_bytes());
        data.extend_from_slice(&8u32.to_le_bytes()); // first IFD at 8
        data.extend_from_slice(&2u16.to_le_bytes()); // 2 entries
        data.extend(entry_short(0x0100, 200));
        data.extend(entry_short(0x0101, 100));
        data.extend_from_slice(&next_ifd.to_le_bytes());
        data
    }

    #[test]
    fn test_scan_minimal_tiff() {
        let report = scan(&create_minimal_tiff(0));
        assert!(report.is_structurally_valid(), "errors: {:?}", report.errors);
        assert!(report.has_item("IFD0"));
        assert!(report.has_item("ImageWidth"));
        assert_eq!(
            report.dimensions,
            Some(Dimensions {
                width: 200,
                height: 100
            })
        );
    }

    #[test]
    fn test_big_endian_header() {
        let mut data = b"MM".to_vec();
        data.extend_from_slice(&42u16.to_be_bytes());
        data.extend_from_slice(&8u32.to_be_bytes());
        data.extend_from_slice(&0u16.to_be_bytes());
        data.extend_from_slice(&0u32.to_be_bytes());
        let report = scan(&data);
        assert!(report.has_item("IFD0"));
    }

    #[test]
    fn test_looping_ifd_chain_is_detected() {
        // the IFD links back to itself
        let report = scan(&create_minimal_tiff(8));
        assert!(!report.is_structurally_valid());
        assert!(report.errors[0].contains("loops"));
        // the first traversal still produced metadata
        assert!(report.has_item("IFD0"));
    }

    #[test]
    fn test_ifd_offset_past_eof_is_fatal() {
        let report = scan(&create_minimal_tiff(0xFFFF));
        assert!(!report.is_structurally_valid());
        assert!(report.errors[0].contains("past end of file"));
    }

    #[test]
    fn test_wrong_magic_is_rejected() {
        let report = scan(&[0x49, 0x49, 0x00, 0x2A, 0, 0, 0, 0]);
        assert!(report.errors[0].contains("missing TIFF header"));
    }

    #[test]
    fn test_quick_dimensions() {
        assert_eq!(
            quick_dimensions(&create_minimal_tiff(0)),
            Some(Dimensions {
                width: 200,
                height: 100
            })
        );
    }
}
