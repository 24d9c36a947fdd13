//! ICO directory scanner.
//!
//! 6-byte header (reserved 0, type 1, entry count) followed by 16-byte
//! directory entries. A stored width or height of 0 means 256. Each entry's
//! image data range must lie inside the file.

use tracing::debug;

use crate::cursor::{read_u16_le, read_u32_le};
use crate::types::{Dimensions, MetadataItem, ScanReport};

pub fn scan(data: &[u8]) -> ScanReport {
    let mut report = ScanReport::new();

    let (Some(reserved), Some(kind), Some(count)) = (
        read_u16_le(data, 0),
        read_u16_le(data, 2),
        read_u16_le(data, 4),
    ) else {
        report.error("truncated ICO header");
        return report;
    };
    if reserved != 0 || kind != 1 {
        report.error("missing ICO header");
        return report;
    }
    if count == 0 {
        report.error("icon directory declares zero images");
        return report;
    }

    report.push(
        MetadataItem::new("header", "icon directory")
            .at(0)
            .sized(6)
            .detail(format!("{count} image(s)")),
    );

    let mut largest: Option<Dimensions> = None;
    for index in 0..count as usize {
        let entry_offset = 6 + index * 16;
        let Some(entry) = data.get(entry_offset..entry_offset + 16) else {
            report.error(format!("truncated directory entry {index}"));
            break;
        };

        // 0 encodes 256 in the one-byte size fields
        let width = if entry[0] == 0 { 256 } else { entry[0] as u32 };
        let height = if entry[1] == 0 { 256 } else { entry[1] as u32 };
        let bpp = read_u16_le(entry, 6).unwrap_or(0);
        let size = read_u32_le(entry, 8).unwrap_or(0);
        let offset = read_u32_le(entry, 12).unwrap_or(0);

        report.push(
            MetadataItem::new(format!("entry{index}"), "icon directory entry")
                .at(entry_offset as u64)
                .sized(16)
                .detail(format!("{width}x{height}, {bpp} bpp, data at {offset}")),
        );

        let in_bounds = (offset as usize)
            .checked_add(size as usize)
            .is_some_and(|end| end <= data.len());
        if !in_bounds {
            report.error(format!(
                "entry {index} image data ({offset}+{size}) is past end of file"
            ));
        }

        if largest.is_none_or(|d| width * height > d.width * d.height) {
            largest = Some(Dimensions { width, height });
        }
    }

    report.dimensions = largest;

    debug!(
        entries = report.metadata.len().saturating_sub(1),
        errors = report.errors.len(),
        "ico scan finished"
    );
    report
}

/// Size of the largest declared icon, for first-chunk probing.
pub fn quick_dimensions(data: &[u8]) -> Option<Dimensions> {
    if read_u16_le(data, 0)? != 0 || read_u16_le(data, 2)? != 1 {
        return None;
    }
    let count = read_u16_le(data, 4)?;
    let mut best: Option<Dimensions> = None;
    for index in 0..count as usize {
        let entry = data.get(6 + index * 16..6 + index * 16 + 16)?;
        let width = if entry[0] == 0 { 256 } else { entry[0] as u32 };
        let height = if entry[1] == 0 { 256 } else { entry[1] as u32 };
        if best.is_none_or(|d| width * height > d.width * d.height) {
            best = Some(Dimensions { width, height });
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(width: u8, height: u8, size: u32, offset: u32) -> Vec<u8> {
        let mut e = vec![width, height, 0, 0, 1, 0, 32, 0];
        e.extend_from_slice(&size.to_le_bytes());
        e.extend_from_slice(&offset.to_le_bytes());
        e
    }

    fn create_ico(entries: &[Vec<u8>], data_len: usize) -> Vec<u8> {
        let mut out = vec![0, 0, 1, 0];
        out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
        for e in entries {
            out.extend_from_slice(e);
        }
        out.extend(std::iter::repeat_n(0u8, data_len));
        out
    }

    #[test]
    fn test_scan_two_entry_ico() {
        let data = create_ico(&[entry(16, 16, 4, 38), entry(32, 32, 4, 42)], 12);
        let report = scan(&data);
        assert!(report.is_structurally_valid(), "errors: {:?}", report.errors);
        assert!(report.has_item("entry0"));
        assert!(report.has_item("entry1"));
        // largest icon wins
        assert_eq!(
            report.dimensions,
            Some(Dimensions {
                width: 32,
                height: 32
            })
        );
    }

    #[test]
    fn test_zero_size_field_means_256() {
        let data = create_ico(&[entry(0, 0, 4, 22)], 8);
        let report = scan(&data);
        assert_eq!(
            report.dimensions,
            Some(Dimensions {
                width: 256,
                height: 256
            })
        );
    }

    #[test]
    fn test_entry_data_past_eof_is_fatal() {
        let data = create_ico(&[entry(16, 16, 4096, 22)], 8);
        let report = scan(&data);
        assert!(!report.is_structurally_valid());
        assert!(report.errors[0].contains("past end of file"));
    }

    #[test]
    fn test_zero_entries_is_fatal() {
        let report = scan(&[0, 0, 1, 0, 0, 0]);
        assert!(!report.is_structurally_valid());
        assert!(report.errors[0].contains("zero images"));
    }

    #[test]
    fn test_wrong_type_is_rejected() {
        // type 2 is a cursor, not an icon
        let report = scan(&[0, 0, 2, 0, 1, 0]);
        assert!(report.errors[0].contains("missing ICO header"));
    }
}
