//! PNG / APNG chunk scanner.
//!
//! Walks chunks from offset 8: 4-byte big-endian length, 4-byte ASCII type,
//! `length` data bytes, 4-byte CRC. CRC mismatches are warnings only; the
//! verdict depends on chunk geometry and the terminal IEND.

use tracing::debug;

use crate::cursor::{read_bytes, read_u32_be};
use crate::signature::PNG_SIGNATURE;
use crate::types::{Dimensions, ItemPayload, MetadataItem, ScanReport};

const TEXT_PREVIEW_LEN: usize = 50;

pub fn scan(data: &[u8]) -> ScanReport {
    let mut report = ScanReport::new();

    if data.len() < PNG_SIGNATURE.len() || data[..8] != PNG_SIGNATURE {
        report.error("missing PNG signature");
        return report;
    }

    let mut pos = 8usize;
    let mut iend_seen = false;

    while pos < data.len() {
        let (Some(length), Some(type_bytes)) = (read_u32_be(data, pos), read_bytes(data, pos + 4, 4))
        else {
            report.error(format!("truncated chunk header at offset {pos}"));
            break;
        };
        let chunk_type = String::from_utf8_lossy(type_bytes).into_owned();

        let Some(next) = pos
            .checked_add(12)
            .and_then(|n| n.checked_add(length as usize))
            .filter(|&n| n > pos && n <= data.len())
        else {
            report.error(format!(
                "corrupted chunk length {length} for {chunk_type} at offset {pos}"
            ));
            break;
        };

        let payload = &data[pos + 8..pos + 8 + length as usize];
        let mut item = MetadataItem::new(&chunk_type, chunk_description(type_bytes))
            .at(pos as u64)
            .sized(length as u64);

        match type_bytes {
            b"IHDR" => {
                if let Some(ihdr) = IhdrData::from_bytes(payload) {
                    report.dimensions = Some(Dimensions {
                        width: ihdr.width,
                        height: ihdr.height,
                    });
                    item = item.detail(format!(
                        "{}x{}, {}-bit, color type {}",
                        ihdr.width, ihdr.height, ihdr.bit_depth, ihdr.color_type
                    ));
                    if !ihdr.is_valid() {
                        report.warning("IHDR declares an invalid bit depth / color type combination");
                    }
                } else {
                    report.warning("IHDR chunk shorter than 13 bytes");
                }
            }
            b"acTL" => {
                if let Some(frames) = read_u32_be(payload, 0) {
                    item = item.detail(format!("animation control, {frames} frames"));
                }
            }
            b"tEXt" | b"iTXt" => {
                item = item.with_payload(split_text_chunk(payload));
            }
            b"IEND" => {
                iend_seen = true;
            }
            _ => {}
        }

        if !crc_matches(data, pos, type_bytes, payload) {
            report.warning(format!("CRC mismatch in {chunk_type} chunk at offset {pos}"));
        }

        report.push(item);

        if iend_seen {
            if next < data.len() {
                report.warning(format!("{} trailing bytes after IEND", data.len() - next));
            }
            break;
        }
        pos = next;
    }

    if !iend_seen && report.errors.is_empty() {
        report.error("missing or corrupted IEND chunk");
    }

    debug!(
        chunks = report.metadata.len(),
        errors = report.errors.len(),
        "png scan finished"
    );
    report
}

/// Width/height straight from a fixed-offset IHDR, for first-chunk probing.
pub fn quick_dimensions(data: &[u8]) -> Option<Dimensions> {
    if data.len() < 24 || data[..8] != PNG_SIGNATURE || read_bytes(data, 12, 4)? != b"IHDR" {
        return None;
    }
    Some(Dimensions {
        width: read_u32_be(data, 16)?,
        height: read_u32_be(data, 20)?,
    })
}

fn crc_matches(data: &[u8], chunk_start: usize, type_bytes: &[u8], payload: &[u8]) -> bool {
    let crc_offset = chunk_start + 8 + payload.len();
    let Some(stored) = read_u32_be(data, crc_offset) else {
        return false;
    };
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(type_bytes);
    hasher.update(payload);
    hasher.finalize() == stored
}

/// Splits tEXt/iTXt data on the first null into keyword and truncated text.
fn split_text_chunk(payload: &[u8]) -> ItemPayload {
    let split = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
    let keyword = String::from_utf8_lossy(&payload[..split]).into_owned();
    let text = String::from_utf8_lossy(&payload[(split + 1).min(payload.len())..]);
    let preview: String = text.chars().take(TEXT_PREVIEW_LEN).collect();
    ItemPayload::TextChunk { keyword, preview }
}

fn chunk_description(type_bytes: &[u8]) -> &'static str {
    match type_bytes {
        b"IHDR" => "image header",
        b"PLTE" => "palette",
        b"IDAT" => "image data",
        b"IEND" => "image trailer",
        b"acTL" => "animation control",
        b"fcTL" => "frame control",
        b"fdAT" => "frame data",
        b"tEXt" => "text",
        b"iTXt" => "international text",
        b"zTXt" => "compressed text",
        b"gAMA" => "gamma",
        b"cHRM" => "chromaticities",
        b"sRGB" => "standard RGB",
        b"iCCP" => "ICC profile",
        b"pHYs" => "physical dimensions",
        b"bKGD" => "background color",
        b"tRNS" => "transparency",
        b"tIME" => "modification time",
        _ => "chunk",
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct IhdrData {
    width: u32,
    height: u32,
    bit_depth: u8,
    color_type: u8,
    compression: u8,
    filter: u8,
    interlace: u8,
}

impl IhdrData {
    fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < 13 {
            return None;
        }
        Some(Self {
            width: read_u32_be(data, 0)?,
            height: read_u32_be(data, 4)?,
            bit_depth: data[8],
            color_type: data[9],
            compression: data[10],
            filter: data[11],
            interlace: data[12],
        })
    }

    fn is_valid(&self) -> bool {
        if self.width == 0 || self.height == 0 {
            return false;
        }
        let depth_ok = match self.color_type {
            0 => matches!(self.bit_depth, 1 | 2 | 4 | 8 | 16),
            2 | 4 | 6 => matches!(self.bit_depth, 8 | 16),
            3 => matches!(self.bit_depth, 1 | 2 | 4 | 8),
            _ => false,
        };
        depth_ok && self.compression == 0 && self.filter == 0 && self.interlace <= 1
    }
}
