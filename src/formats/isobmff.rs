//! ISOBMFF box scanner for JPEG 2000, AVIF and HEIC.
//!
//! All three wrap their payload in ISO base media boxes: big-endian u32
//! size plus fourcc. A size of 0 means the box runs to the end of the file
//! and is only legal as the last box; a size of 1 announces a 64-bit
//! extended size, which this scanner rejects rather than trusts. Dimensions
//! come from a raw probe for the `ihdr` (JP2) or `ispe` (AVIF/HEIC)
//! property box, which avoids decoding the full `meta` hierarchy.

use memchr::memmem;
use tracing::debug;

use crate::cursor::{read_bytes, read_u32_be};
use crate::signature::JP2_SIGNATURE;
use crate::types::{Dimensions, MetadataItem, ScanReport};

pub fn scan_jp2(data: &[u8]) -> ScanReport {
    let mut report = ScanReport::new();

    if data.len() < 12 || data[..12] != JP2_SIGNATURE {
        report.error("missing JP2 signature box");
        return report;
    }

    walk_boxes(data, &mut report);

    if report.errors.is_empty() {
        if !report.has_item("ftyp") {
            report.error("missing ftyp box");
        } else if !report.has_item("jp2h") {
            report.error("missing jp2h header box");
        }
    }

    // ihdr payload: height then width, both big-endian
    if let Some(pos) = memmem::find(data, b"ihdr") {
        if let (Some(height), Some(width)) =
            (read_u32_be(data, pos + 4), read_u32_be(data, pos + 8))
        {
            if width > 0 && height > 0 {
                report.dimensions = Some(Dimensions { width, height });
            }
        }
    }

    debug!(
        boxes = report.metadata.len(),
        errors = report.errors.len(),
        "jp2 scan finished"
    );
    report
}

pub fn scan_avif(data: &[u8]) -> ScanReport {
    scan_ftyp_based(data, &[b"avif", b"avis"], "avif")
}

pub fn scan_heic(data: &[u8]) -> ScanReport {
    scan_ftyp_based(data, &[b"heic", b"heix", b"hevc", b"heim", b"mif1"], "heic")
}

fn scan_ftyp_based(data: &[u8], brands: &[&[u8; 4]], label: &str) -> ScanReport {
    let mut report = ScanReport::new();

    if read_bytes(data, 4, 4) != Some(b"ftyp") {
        report.error("first box is not ftyp");
        return report;
    }

    walk_boxes(data, &mut report);

    if report.errors.is_empty() {
        let size = read_u32_be(data, 0).unwrap_or(0) as usize;
        if !ftyp_carries_brand(data, size, brands) {
            report.error(format!("ftyp box carries no {label} brand"));
        }
        if !report.has_item("meta") {
            report.warning("no meta box; item properties are absent");
        }
        if !report.has_item("mdat") {
            report.error("missing mdat box");
        }
    }

    // ispe payload: version/flags, then width and height, big-endian
    if let Some(pos) = memmem::find(data, b"ispe") {
        if let (Some(width), Some(height)) =
            (read_u32_be(data, pos + 8), read_u32_be(data, pos + 12))
        {
            if width > 0 && height > 0 {
                report.dimensions = Some(Dimensions { width, height });
            }
        }
    }

    debug!(
        boxes = report.metadata.len(),
        errors = report.errors.len(),
        "{label} scan finished"
    );
    report
}

/// Top-level box walk shared by all ISOBMFF flavors.
fn walk_boxes(data: &[u8], report: &mut ScanReport) {
    let mut pos = 0usize;

    while pos < data.len() {
        let (Some(size), Some(fourcc)) = (read_u32_be(data, pos), read_bytes(data, pos + 4, 4))
        else {
            report.error(format!("truncated box header at offset {pos}"));
            return;
        };
        let name = String::from_utf8_lossy(fourcc).into_owned();

        let end = match size {
            0 => data.len(), // rest-of-file box, terminal by definition
            1 => {
                report.error(format!(
                    "box {name} at offset {pos} uses a 64-bit extended size"
                ));
                return;
            }
            2..=7 => {
                report.error(format!("box {name} at offset {pos} declares size {size}"));
                return;
            }
            _ => {
                let Some(end) = pos.checked_add(size as usize).filter(|&e| e <= data.len())
                else {
                    report.error(format!(
                        "box {name} at offset {pos} extends past end of file"
                    ));
                    return;
                };
                end
            }
        };

        let mut item = MetadataItem::new(&name, box_description(fourcc))
            .at(pos as u64)
            .sized((end - pos) as u64);
        if fourcc == b"ftyp" {
            if let Some(text) = describe_ftyp(&data[pos..end]) {
                item = item.detail(text);
            }
        }
        report.push(item);

        pos = end;
    }
}

fn ftyp_carries_brand(data: &[u8], ftyp_size: usize, brands: &[&[u8; 4]]) -> bool {
    if ftyp_size < 16 || ftyp_size > data.len() {
        return false;
    }
    // major brand, then compatible brands after the minor version
    let mut candidates = vec![&data[8..12]];
    let mut pos = 16;
    while pos + 4 <= ftyp_size {
        candidates.push(&data[pos..pos + 4]);
        pos += 4;
    }
    candidates
        .iter()
        .any(|c| brands.iter().any(|b| *c == *b as &[u8]))
}

fn describe_ftyp(boxed: &[u8]) -> Option<String> {
    let major = String::from_utf8_lossy(read_bytes(boxed, 8, 4)?).into_owned();
    let compatible: Vec<String> = boxed[16.min(boxed.len())..]
        .chunks_exact(4)
        .map(|c| String::from_utf8_lossy(c).trim_end().to_string())
        .collect();
    Some(if compatible.is_empty() {
        format!("major brand {major}")
    } else {
        format!("major brand {major}, compatible [{}]", compatible.join(", "))
    })
}

fn box_description(fourcc: &[u8]) -> &'static str {
    match fourcc {
        b"jP  " => "JP2 signature",
        b"ftyp" => "file type",
        b"jp2h" => "JP2 header",
        b"jp2c" => "codestream",
        b"meta" => "metadata container",
        b"mdat" => "media data",
        b"moov" => "movie metadata",
        b"free" | b"skip" => "padding",
        b"uuid" => "vendor extension",
        b"xml " => "XML metadata",
        _ => "box",
    }
}

/// `ispe`-probe dimensions, for first-chunk probing of AVIF/HEIC buffers.
pub fn quick_dimensions(data: &[u8]) -> Option<Dimensions> {
    let pos = memmem::find(data, b"ispe")?;
    let width = read_u32_be(data, pos + 8)?;
    let height = read_u32_be(data, pos + 12)?;
    (width > 0 && height > 0).then_some(Dimensions { width, height })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iso_box(fourcc: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = ((payload.len() + 8) as u32).to_be_bytes().to_vec();
        out.extend_from_slice(fourcc);
        out.extend_from_slice(payload);
        out
    }

    fn ispe_box(width: u32, height: u32) -> Vec<u8> {
        let mut payload = 0u32.to_be_bytes().to_vec();
        payload.extend_from_slice(&width.to_be_bytes());
        payload.extend_from_slice(&height.to_be_bytes());
        iso_box(b"ispe", &payload)
    }

    fn create_minimal_avif() -> Vec<u8> {
        let mut ftyp = b"avif".to_vec();
        ftyp.extend_from_slice(&[0u8; 4]);
        ftyp.extend_from_slice(b"avifmif1");
        let mut data = iso_box(b"ftyp", &ftyp);
        data.extend(iso_box(b"meta", &ispe_box(1920, 1080)));
        data.extend(iso_box(b"mdat", &[0u8; 16]));
        data
    }

    fn create_minimal_jp2() -> Vec<u8> {
        let mut data = JP2_SIGNATURE.to_vec();
        let mut ftyp = b"jp2 ".to_vec();
        ftyp.extend_from_slice(&[0u8; 4]);
        ftyp.extend_from_slice(b"jp2 ");
        data.extend(iso_box(b"ftyp", &ftyp));
        let mut ihdr_payload = 480u32.to_be_bytes().to_vec(); // height first
        ihdr_payload.extend_from_slice(&640u32.to_be_bytes());
        ihdr_payload.extend_from_slice(&[0, 3, 7, 7, 0, 0]);
        data.extend(iso_box(b"jp2h", &iso_box(b"ihdr", &ihdr_payload)));
        data.extend(iso_box(b"jp2c", &[0xFF, 0x4F, 0xFF, 0x51]));
        data
    }

    #[test]
    fn test_scan_minimal_avif() {
        let report = scan_avif(&create_minimal_avif());
        assert!(report.is_structurally_valid(), "errors: {:?}", report.errors);
        assert!(report.has_item("ftyp"));
        assert!(report.has_item("mdat"));
        assert_eq!(
            report.dimensions,
            Some(Dimensions {
                width: 1920,
                height: 1080
            })
        );
    }

    #[test]
    fn test_scan_minimal_jp2() {
        let report = scan_jp2(&create_minimal_jp2());
        assert!(report.is_structurally_valid(), "errors: {:?}", report.errors);
        assert_eq!(
            report.dimensions,
            Some(Dimensions {
                width: 640,
                height: 480
            })
        );
    }

    #[test]
    fn test_wrong_brand_is_fatal() {
        let report = scan_heic(&create_minimal_avif());
        // brand mismatch: an avif ftyp carries mif1 too, which HEIC accepts
        assert!(report.is_structurally_valid());

        let mut ftyp = b"isom".to_vec();
        ftyp.extend_from_slice(&[0u8; 4]);
        ftyp.extend_from_slice(b"isomiso2");
        let mut data = iso_box(b"ftyp", &ftyp);
        data.extend(iso_box(b"mdat", &[0u8; 4]));
        let report = scan_avif(&data);
        assert!(!report.is_structurally_valid());
        assert!(report.errors[0].contains("brand"));
    }

    #[test]
    fn test_extended_size_is_rejected() {
        let mut data = create_minimal_avif();
        let mut huge = 1u32.to_be_bytes().to_vec();
        huge.extend_from_slice(b"mdat");
        huge.extend_from_slice(&16u64.to_be_bytes());
        data.extend(huge);
        let report = scan_avif(&data);
        assert!(!report.is_structurally_valid());
        assert!(report.errors[0].contains("64-bit"));
    }

    #[test]
    fn test_rest_of_file_box_is_terminal() {
        let mut data = create_minimal_avif();
        let mut tail = 0u32.to_be_bytes().to_vec();
        tail.extend_from_slice(b"free");
        tail.extend_from_slice(&[0u8; 32]);
        data.extend(tail);
        let report = scan_avif(&data);
        assert!(report.is_structurally_valid(), "errors: {:?}", report.errors);
        assert!(report.has_item("free"));
    }

    #[test]
    fn test_box_past_eof_is_fatal() {
        let mut data = create_minimal_avif();
        data.extend(iso_box(b"mdat", &[0u8; 4]));
        data.truncate(data.len() - 2);
        let report = scan_avif(&data);
        assert!(!report.is_structurally_valid());
        assert!(report.errors[0].contains("past end of file"));
    }

    #[test]
    fn test_jp2_missing_signature_box() {
        let report = scan_jp2(&create_minimal_avif());
        assert!(report.errors[0].contains("signature"));
    }
}
