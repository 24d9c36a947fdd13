//! JPEG marker/segment scanner.
//!
//! A marker is `FF xx` with `xx` outside {00, FF}. Standalone markers (SOI,
//! EOI, RSTn, TEM) occupy two bytes; every other marker carries a big-endian
//! length that includes itself. SOS is special: the entropy-coded scan data
//! that follows declares no length, so the walk drops to a raw byte search
//! for the next EOI. If bytes remain after the first EOI (Photoshop IRB and
//! friends), a second pass walks the trailing region; anomalies there are
//! warnings, not structural errors.

use std::collections::HashSet;
use std::ops::Range;

use memchr::memmem;
use tracing::debug;

use crate::cursor::read_u16_be;
use crate::types::{Dimensions, ItemPayload, MetadataItem, ScanReport};

pub const SOI: [u8; 2] = [0xFF, 0xD8];
pub const EOI: [u8; 2] = [0xFF, 0xD9];

const COMMENT_PREVIEW_LEN: usize = 70;

/// Markers whose absence after a full scan is fatal.
const CRITICAL_MARKERS: [&str; 4] = ["SOI", "SOF0", "SOS", "EOI"];
/// Markers normally present; their absence is informational only.
const COMMON_MARKERS: [&str; 3] = ["DQT", "DHT", "APP0"];

pub fn scan(data: &[u8]) -> ScanReport {
    let mut report = ScanReport::new();

    if data.len() < 2 || data[..2] != SOI {
        report.error("missing SOI marker");
        return report;
    }

    let mut found: HashSet<String> = HashSet::new();

    // Pass 1: main image, up to and including the first EOI.
    let end = walk_segments(data, 0, &mut report, &mut found, true);

    // Pass 2: trailing region after the first EOI, if any.
    if end < data.len() {
        report.push(
            MetadataItem::new("TRAILING_DATA", "data after EOI")
                .at(end as u64)
                .sized((data.len() - end) as u64),
        );
        walk_segments(data, end, &mut report, &mut found, false);
    }

    cross_check_markers(&found, &mut report);

    debug!(
        segments = report.metadata.len(),
        errors = report.errors.len(),
        "jpeg scan finished"
    );
    report
}

/// Walks marker segments from `start`; returns the offset just past this
/// pass's EOI, or `data.len()` when no EOI was reached. With `strict`
/// false (trailing region) structural anomalies downgrade to warnings.
fn walk_segments(
    data: &[u8],
    start: usize,
    report: &mut ScanReport,
    found: &mut HashSet<String>,
    strict: bool,
) -> usize {
    let mut pos = start;

    while pos + 1 < data.len() {
        if data[pos] != 0xFF {
            pos += 1;
            continue;
        }
        // fill bytes before the marker code
        while pos + 1 < data.len() && data[pos + 1] == 0xFF {
            pos += 1;
        }
        if pos + 1 >= data.len() {
            break;
        }

        let marker = data[pos + 1];
        if marker == 0x00 {
            pos += 2;
            continue;
        }

        let name = marker_name(marker);
        found.insert(name.clone());

        if is_standalone_marker(marker) {
            report.push(
                MetadataItem::new(&name, marker_description(marker))
                    .at(pos as u64)
                    .sized(2),
            );
            if marker == 0xD9 {
                return pos + 2;
            }
            pos += 2;
            continue;
        }

        let Some(seg_len) = read_u16_be(data, pos + 2).filter(|&l| l >= 2) else {
            structural_issue(
                report,
                strict,
                format!("corrupted segment length for {name} at offset {pos}"),
            );
            return data.len();
        };
        let seg_end = pos + 2 + seg_len as usize;
        if seg_end > data.len() {
            structural_issue(
                report,
                strict,
                format!("segment {name} at offset {pos} extends past end of file"),
            );
            return data.len();
        }

        let payload = &data[pos + 4..seg_end];
        let mut item = MetadataItem::new(&name, marker_description(marker))
            .at(pos as u64)
            .sized(2 + seg_len as u64);

        if let Some(payload_item) = describe_segment(marker, payload, report) {
            item = item.with_payload(payload_item);
        }
        report.push(item);

        if marker == 0xDA {
            // Entropy-coded data declares no length: raw search for EOI.
            match memmem::find(&data[seg_end..], &EOI) {
                Some(rel) => {
                    let eoi_pos = seg_end + rel;
                    found.insert("EOI".into());
                    report.push(
                        MetadataItem::new("EOI", marker_description(0xD9))
                            .at(eoi_pos as u64)
                            .sized(2),
                    );
                    return eoi_pos + 2;
                }
                None => return data.len(),
            }
        }

        pos = seg_end;
    }

    data.len()
}

fn structural_issue(report: &mut ScanReport, strict: bool, message: String) {
    if strict {
        report.error(message);
    } else {
        report.warning(message);
    }
}

fn cross_check_markers(found: &HashSet<String>, report: &mut ScanReport) {
    for name in CRITICAL_MARKERS {
        if !found.contains(name) {
            report.error(format!("missing critical marker {name}"));
            report.push(
                MetadataItem::new(name, "required marker not found")
                    .with_payload(ItemPayload::MissingMarker),
            );
        }
    }
    for name in COMMON_MARKERS {
        if !found.contains(name) {
            report.warning(format!("common marker {name} not present"));
            report.push(
                MetadataItem::new(name, "marker not present")
                    .with_payload(ItemPayload::MissingMarker),
            );
        }
    }
}

/// Payload decoders for the segments worth describing.
fn describe_segment(marker: u8, payload: &[u8], report: &mut ScanReport) -> Option<ItemPayload> {
    match marker {
        0xE0 => describe_app0(payload),
        0xE1 => describe_app1(payload),
        0xDB => {
            let first = *payload.first()?;
            let precision = if first >> 4 == 0 { 8 } else { 16 };
            Some(detail(format!(
                "{precision}-bit precision, table {}",
                first & 0x0F
            )))
        }
        0xC4 => {
            let first = *payload.first()?;
            let class = if first >> 4 == 0 { "DC" } else { "AC" };
            Some(detail(format!("{class} class, table {}", first & 0x0F)))
        }
        0xC0..=0xC3 | 0xC5..=0xC7 | 0xC9..=0xCB | 0xCD..=0xCF => {
            let (precision, height, width, components) = (
                *payload.first()?,
                read_u16_be(payload, 1)?,
                read_u16_be(payload, 3)?,
                *payload.get(5)?,
            );
            if report.dimensions.is_none() && width > 0 && height > 0 {
                report.dimensions = Some(Dimensions {
                    width: width as u32,
                    height: height as u32,
                });
            }
            let mut text =
                format!("{precision}-bit, {width}x{height}, {components} component(s)");
            if marker == 0xC2 {
                text.push_str(", progressive");
            }
            Some(detail(text))
        }
        0xDA => Some(detail(format!("{} component(s) in scan", *payload.first()?))),
        0xDD => Some(detail(format!(
            "restart interval {}",
            read_u16_be(payload, 0)?
        ))),
        0xFE => {
            let text = String::from_utf8_lossy(payload);
            let preview: String = text.chars().take(COMMENT_PREVIEW_LEN).collect();
            Some(ItemPayload::TextChunk {
                keyword: "comment".into(),
                preview,
            })
        }
        _ => None,
    }
}

fn describe_app0(payload: &[u8]) -> Option<ItemPayload> {
    if payload.len() >= 12 && &payload[..5] == b"JFIF\0" {
        let units = match payload[7] {
            0 => "aspect ratio",
            1 => "dpi",
            2 => "dpcm",
            _ => "unknown units",
        };
        return Some(detail(format!(
            "JFIF {}.{}, density {}x{} ({units})",
            payload[5],
            payload[6],
            read_u16_be(payload, 8)?,
            read_u16_be(payload, 10)?,
        )));
    }
    None
}

fn describe_app1(payload: &[u8]) -> Option<ItemPayload> {
    if payload.len() >= 8 && &payload[..6] == b"Exif\0\0" {
        let order = match &payload[6..8] {
            b"II" => "little-endian TIFF",
            b"MM" => "big-endian TIFF",
            _ => "unknown byte order",
        };
        return Some(detail(format!("Exif metadata, {order}")));
    }
    if payload.starts_with(b"http://ns.adobe.com/xap/1.0/") {
        return Some(detail("XMP metadata"));
    }
    None
}

fn detail(text: impl Into<String>) -> ItemPayload {
    ItemPayload::Detail { text: text.into() }
}

/// Byte range of the TIFF stream inside the first APP1/Exif segment, for
/// the external EXIF tag reader.
pub fn exif_payload(data: &[u8]) -> Option<Range<usize>> {
    if data.len() < 2 || data[..2] != SOI {
        return None;
    }
    let mut pos = 2usize;
    while pos + 3 < data.len() {
        if data[pos] != 0xFF {
            return None;
        }
        let marker = data[pos + 1];
        if is_standalone_marker(marker) {
            if marker == 0xD9 {
                return None;
            }
            pos += 2;
            continue;
        }
        let seg_len = read_u16_be(data, pos + 2).filter(|&l| l >= 2)? as usize;
        let seg_end = pos + 2 + seg_len;
        if seg_end > data.len() {
            return None;
        }
        if marker == 0xE1 && data[pos + 4..seg_end].starts_with(b"Exif\0\0") {
            return Some(pos + 10..seg_end);
        }
        if marker == 0xDA {
            return None;
        }
        pos = seg_end;
    }
    None
}

/// SOF-based width/height from the leading segments, for first-chunk probing.
pub fn quick_dimensions(data: &[u8]) -> Option<Dimensions> {
    if data.len() < 4 || data[..2] != SOI {
        return None;
    }
    let mut pos = 2usize;
    while pos + 1 < data.len() {
        if data[pos] != 0xFF {
            return None;
        }
        let marker = data[pos + 1];
        if marker == 0xFF {
            pos += 1;
            continue;
        }
        if is_standalone_marker(marker) {
            if marker == 0xD9 {
                return None;
            }
            pos += 2;
            continue;
        }
        if matches!(marker, 0xC0..=0xC3) {
            let height = read_u16_be(data, pos + 5)?;
            let width = read_u16_be(data, pos + 7)?;
            return (width > 0 && height > 0).then_some(Dimensions {
                width: width as u32,
                height: height as u32,
            });
        }
        if marker == 0xDA {
            return None;
        }
        let seg_len = read_u16_be(data, pos + 2).filter(|&l| l >= 2)? as usize;
        pos += 2 + seg_len;
    }
    None
}

#[inline]
pub const fn is_standalone_marker(marker: u8) -> bool {
    matches!(marker, 0xD8 | 0xD9 | 0x01) || matches!(marker, 0xD0..=0xD7)
}

fn marker_name(marker: u8) -> String {
    match marker {
        0xD8 => "SOI".into(),
        0xD9 => "EOI".into(),
        0xDA => "SOS".into(),
        0xDB => "DQT".into(),
        0xC4 => "DHT".into(),
        0xCC => "DAC".into(),
        0xDC => "DNL".into(),
        0xDD => "DRI".into(),
        0xFE => "COM".into(),
        0x01 => "TEM".into(),
        0xC0..=0xCF => format!("SOF{}", marker - 0xC0),
        0xD0..=0xD7 => format!("RST{}", marker - 0xD0),
        0xE0..=0xEF => format!("APP{}", marker - 0xE0),
        other => format!("0xFF{other:02X}"),
    }
}

fn marker_description(marker: u8) -> &'static str {
    match marker {
        0xD8 => "start of image",
        0xD9 => "end of image",
        0xDA => "start of scan",
        0xDB => "quantization table",
        0xC4 => "Huffman table",
        0xDD => "restart interval",
        0xFE => "comment",
        0x01 => "temporary marker",
        0xC0 => "baseline frame header",
        0xC2 => "progressive frame header",
        0xC1 | 0xC3 | 0xC5..=0xC7 | 0xC9..=0xCB | 0xCD..=0xCF => "frame header",
        0xD0..=0xD7 => "restart marker",
        0xE0..=0xEF => "application segment",
        _ => "marker segment",
    }
}
