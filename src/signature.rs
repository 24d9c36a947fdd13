//! Format detection from leading bytes.
//!
//! Two-pass, extension-guided: the extension hint selects an ordered list of
//! primary candidates whose matchers run first; if none hit, every remaining
//! matcher runs in [`ImageFormat::DETECTION_ORDER`]. A `.png` that is really
//! a JPEG is therefore still identified as JPEG, while the common case costs
//! one matcher invocation.

use tracing::debug;

use crate::cursor::{read_bytes, read_u32_be};
use crate::types::ImageFormat;

pub const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
pub const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
pub const JP2_SIGNATURE: [u8; 12] = [
    0x00, 0x00, 0x00, 0x0C, 0x6A, 0x50, 0x20, 0x20, 0x0D, 0x0A, 0x87, 0x0A,
];

/// How far into the buffer the SVG text heuristic looks.
const SVG_SNIFF_LEN: usize = 256;

const HEIC_BRANDS: [&[u8; 4]; 4] = [b"heic", b"heix", b"hevc", b"heim"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureMatch {
    pub format: ImageFormat,
    /// The bytes that matched the signature rule.
    pub magic: Vec<u8>,
}

/// Detects a format from the leading bytes of `data`, guided by the file's
/// extension (lowercased, without the dot). Returns `None` when no matcher
/// recognizes the buffer.
pub fn detect_format(data: &[u8], extension_hint: &str) -> Option<SignatureMatch> {
    let primary = primary_candidates(extension_hint);

    for &format in primary {
        if let Some(magic) = match_signature(format, data) {
            debug!(%format, hint = extension_hint, "signature matched primary candidate");
            return Some(SignatureMatch { format, magic });
        }
    }

    for &format in &ImageFormat::DETECTION_ORDER {
        if primary.contains(&format) {
            continue;
        }
        if let Some(magic) = match_signature(format, data) {
            debug!(%format, hint = extension_hint, "signature matched in fallback pass");
            return Some(SignatureMatch { format, magic });
        }
    }

    None
}

/// Ordered primary candidates for an extension hint. APNG precedes PNG for
/// `.png` because the APNG signature is a strict superset.
pub fn primary_candidates(extension: &str) -> &'static [ImageFormat] {
    match extension {
        "png" => &[ImageFormat::Apng, ImageFormat::Png],
        "apng" => &[ImageFormat::Apng, ImageFormat::Png],
        "jpg" | "jpeg" | "jfif" => &[ImageFormat::Jpeg],
        "gif" => &[ImageFormat::Gif],
        "webp" => &[ImageFormat::WebP],
        "svg" => &[ImageFormat::Svg],
        "bmp" => &[ImageFormat::Bmp],
        "ico" => &[ImageFormat::Ico],
        "tif" | "tiff" => &[ImageFormat::Tiff],
        "jp2" | "jpx" => &[ImageFormat::Jpeg2000],
        "avif" => &[ImageFormat::Avif],
        "heic" | "heif" => &[ImageFormat::Heic],
        _ => &[],
    }
}

/// Runs one format's matcher; returns the matched signature bytes.
pub fn match_signature(format: ImageFormat, data: &[u8]) -> Option<Vec<u8>> {
    match format {
        ImageFormat::Png => matches_png(data),
        ImageFormat::Apng => matches_apng(data),
        ImageFormat::Jpeg => prefix_match(data, &JPEG_SOI),
        ImageFormat::Gif => prefix_match(data, b"GIF8"),
        ImageFormat::WebP => matches_webp(data),
        ImageFormat::Svg => matches_svg(data),
        ImageFormat::Bmp => prefix_match(data, b"BM"),
        ImageFormat::Ico => prefix_match(data, &[0x00, 0x00, 0x01, 0x00]),
        ImageFormat::Tiff => matches_tiff(data),
        ImageFormat::Jpeg2000 => prefix_match(data, &JP2_SIGNATURE),
        ImageFormat::Avif => matches_ftyp_brand(data, &[b"avif"]),
        ImageFormat::Heic => matches_ftyp_brand(data, &HEIC_BRANDS),
    }
}

fn prefix_match(data: &[u8], signature: &[u8]) -> Option<Vec<u8>> {
    let head = read_bytes(data, 0, signature.len())?;
    (head == signature).then(|| head.to_vec())
}

fn matches_png(data: &[u8]) -> Option<Vec<u8>> {
    prefix_match(data, &PNG_SIGNATURE)
}

/// APNG: PNG signature plus an `acTL` chunk before any `IDAT` chunk.
fn matches_apng(data: &[u8]) -> Option<Vec<u8>> {
    let magic = matches_png(data)?;
    let mut pos = PNG_SIGNATURE.len();

    while let (Some(length), Some(chunk_type)) =
        (read_u32_be(data, pos), read_bytes(data, pos + 4, 4))
    {
        match chunk_type {
            b"acTL" => return Some(magic),
            b"IDAT" => return None,
            _ => {}
        }
        // length + type + data + CRC; stop on any non-advancing offset
        let next = pos
            .checked_add(12)
            .and_then(|n| n.checked_add(length as usize))?;
        if next <= pos || next > data.len() {
            return None;
        }
        pos = next;
    }

    None
}

fn matches_webp(data: &[u8]) -> Option<Vec<u8>> {
    if read_bytes(data, 0, 4)? == b"RIFF" && read_bytes(data, 8, 4)? == b"WEBP" {
        return Some(data[..12].to_vec());
    }
    None
}

/// Text heuristic, not a binary magic number: the first 256 bytes, decoded
/// best-effort and lowercased, contain `<svg`.
fn matches_svg(data: &[u8]) -> Option<Vec<u8>> {
    let head = &data[..data.len().min(SVG_SNIFF_LEN)];
    let text = String::from_utf8_lossy(head).to_lowercase();
    text.contains("<svg").then(|| b"<svg".to_vec())
}

fn matches_tiff(data: &[u8]) -> Option<Vec<u8>> {
    let head = read_bytes(data, 0, 4)?;
    (head == [0x49, 0x49, 0x2A, 0x00] || head == [0x4D, 0x4D, 0x00, 0x2A]).then(|| head.to_vec())
}

fn matches_ftyp_brand(data: &[u8], brands: &[&[u8; 4]]) -> Option<Vec<u8>> {
    if read_bytes(data, 4, 4)? != b"ftyp" {
        return None;
    }
    let brand = read_bytes(data, 8, 4)?;
    brands
        .iter()
        .any(|b| brand == *b)
        .then(|| data[4..12].to_vec())
}
