//! EXIF tag extraction.
//!
//! EXIF is a TIFF stream embedded in a JPEG APP1 segment. [`TagReader`] is
//! a plain synchronous IFD walker over that stream; [`extract`] runs it on
//! the blocking pool under a hard timeout, because tag data in uploads is
//! fully attacker-controlled and a pathological stream must cost at most
//! the deadline, never the worker.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use tracing::{debug, warn};

use crate::cursor::{read_bytes, Endian};

/// Tag name to rendered value, ordered for stable output.
pub type ExifTags = BTreeMap<String, String>;

const EXTRACT_TIMEOUT: Duration = Duration::from_secs(2);
const MAX_IFD_ENTRIES: u16 = 512;
const VALUE_PREVIEW_LEN: usize = 80;

/// Substrings in text tags that indicate script injection attempts.
const SCRIPT_FRAGMENTS: [&str; 3] = ["<script", "eval(", "javascript:"];

/// Parses the tags out of `payload` on the blocking pool. Timeouts, panics
/// and malformed streams all degrade to an empty map; EXIF is advisory and
/// must never fail an analysis.
pub async fn extract(payload: Vec<u8>) -> ExifTags {
    let handle = tokio::task::spawn_blocking(move || TagReader::new(&payload).read_tags());
    match tokio::time::timeout(EXTRACT_TIMEOUT, handle).await {
        Ok(Ok(tags)) => tags,
        Ok(Err(join_error)) => {
            warn!(%join_error, "exif reader task failed");
            ExifTags::new()
        }
        Err(_) => {
            warn!("exif extraction exceeded {EXTRACT_TIMEOUT:?}");
            ExifTags::new()
        }
    }
}

/// Warnings derived from extracted tags: GPS presence (location privacy)
/// and script fragments hiding in text-valued tags.
pub fn scan_tags(tags: &ExifTags) -> Vec<String> {
    let mut warnings = Vec::new();

    if tags.keys().any(|k| k.starts_with("GPS")) {
        warnings.push("EXIF contains GPS position data".to_string());
    }

    for key in ["UserComment", "Software", "ImageDescription"] {
        if let Some(value) = tags.get(key) {
            let lower = value.to_lowercase();
            if SCRIPT_FRAGMENTS.iter().any(|f| lower.contains(f)) {
                warnings.push(format!("EXIF {key} tag contains script fragments"));
            }
        }
    }

    warnings
}

/// Synchronous reader over one TIFF stream.
pub struct TagReader<'a> {
    data: &'a [u8],
}

impl<'a> TagReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn read_tags(&self) -> ExifTags {
        let mut tags = ExifTags::new();
        let Some((endian, first_ifd)) = self.parse_header() else {
            return tags;
        };

        let mut visited: HashSet<u32> = HashSet::new();
        let mut exif_ifd = None;
        let mut gps_ifd = None;

        self.walk_ifd(endian, first_ifd, &mut visited, &mut tags, |tag, value| {
            match tag {
                0x8769 => exif_ifd = Some(value),
                0x8825 => gps_ifd = Some(value),
                _ => {}
            }
        });
        if let Some(offset) = exif_ifd {
            self.walk_ifd(endian, offset, &mut visited, &mut tags, |_, _| {});
        }
        if let Some(offset) = gps_ifd {
            self.walk_ifd(endian, offset, &mut visited, &mut tags, |_, _| {});
        }

        debug!(tags = tags.len(), "exif tags read");
        tags
    }

    fn parse_header(&self) -> Option<(Endian, u32)> {
        let endian = match read_bytes(self.data, 0, 2)? {
            b"II" => Endian::Little,
            b"MM" => Endian::Big,
            _ => return None,
        };
        if endian.read_u16(self.data, 2)? != 42 {
            return None;
        }
        Some((endian, endian.read_u32(self.data, 4)?))
    }

    /// Walks one IFD, rendering known tags into `tags` and reporting
    /// sub-IFD pointer tags through `on_pointer`.
    fn walk_ifd(
        &self,
        endian: Endian,
        offset: u32,
        visited: &mut HashSet<u32>,
        tags: &mut ExifTags,
        mut on_pointer: impl FnMut(u16, u32),
    ) {
        if offset == 0 || !visited.insert(offset) {
            return;
        }
        let base = offset as usize;
        let Some(count) = endian.read_u16(self.data, base) else {
            return;
        };

        for i in 0..count.min(MAX_IFD_ENTRIES) as usize {
            let entry = base + 2 + i * 12;
            let (Some(tag), Some(field_type), Some(value_count)) = (
                endian.read_u16(self.data, entry),
                endian.read_u16(self.data, entry + 2),
                endian.read_u32(self.data, entry + 4),
            ) else {
                return;
            };

            if matches!(tag, 0x8769 | 0x8825) {
                if let Some(pointer) = endian.read_u32(self.data, entry + 8) {
                    on_pointer(tag, pointer);
                }
                continue;
            }

            let Some(name) = tag_name(tag) else {
                continue;
            };
            if let Some(value) = self.render_value(endian, entry, field_type, value_count) {
                tags.insert(name.to_string(), value);
            }
        }
    }

    fn render_value(
        &self,
        endian: Endian,
        entry: usize,
        field_type: u16,
        count: u32,
    ) -> Option<String> {
        match field_type {
            // ASCII
            2 => {
                let len = count as usize;
                let bytes = if len <= 4 {
                    read_bytes(self.data, entry + 8, len)?
                } else {
                    let offset = endian.read_u32(self.data, entry + 8)? as usize;
                    read_bytes(self.data, offset, len)?
                };
                let text = String::from_utf8_lossy(bytes);
                let trimmed = text.trim_end_matches('\0').trim();
                (!trimmed.is_empty())
                    .then(|| trimmed.chars().take(VALUE_PREVIEW_LEN).collect())
            }
            // SHORT
            3 if count == 1 => Some(endian.read_u16(self.data, entry + 8)?.to_string()),
            // LONG
            4 if count == 1 => Some(endian.read_u32(self.data, entry + 8)?.to_string()),
            // RATIONAL, possibly an array (GPS coordinates are three)
            5 if (1..=4).contains(&count) => {
                let offset = endian.read_u32(self.data, entry + 8)? as usize;
                let parts: Option<Vec<String>> = (0..count as usize)
                    .map(|i| {
                        let num = endian.read_u32(self.data, offset + i * 8)?;
                        let den = endian.read_u32(self.data, offset + i * 8 + 4)?;
                        Some(format!("{num}/{den}"))
                    })
                    .collect();
                Some(parts?.join(" "))
            }
            // UNDEFINED: UserComment carries an 8-byte encoding prefix
            7 if count > 8 => {
                let offset = endian.read_u32(self.data, entry + 8)? as usize;
                let bytes = read_bytes(self.data, offset + 8, count as usize - 8)?;
                let text = String::from_utf8_lossy(bytes);
                let trimmed = text.trim_matches('\0').trim();
                (!trimmed.is_empty())
                    .then(|| trimmed.chars().take(VALUE_PREVIEW_LEN).collect())
            }
            _ => None,
        }
    }
}

fn tag_name(tag: u16) -> Option<&'static str> {
    Some(match tag {
        0x010F => "Make",
        0x0110 => "Model",
        0x0112 => "Orientation",
        0x0131 => "Software",
        0x0132 => "DateTime",
        0x010E => "ImageDescription",
        0x9003 => "DateTimeOriginal",
        0x9286 => "UserComment",
        0x0001 => "GPSLatitudeRef",
        0x0002 => "GPSLatitude",
        0x0003 => "GPSLongitudeRef",
        0x0004 => "GPSLongitude",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TiffBuilder {
        data: Vec<u8>,
    }

    impl TiffBuilder {
        fn new() -> Self {
            let mut data = b"II".to_vec();
            data.extend_from_slice(&42u16.to_le_bytes());
            data.extend_from_slice(&8u32.to_le_bytes());
            Self { data }
        }

        fn ifd(&mut self, entries: &[Vec<u8>], next: u32) -> &mut Self {
            self.data
                .extend_from_slice(&(entries.len() as u16).to_le_bytes());
            for e in entries {
                self.data.extend_from_slice(e);
            }
            self.data.extend_from_slice(&next.to_le_bytes());
            self
        }

        fn append(&mut self, bytes: &[u8]) -> u32 {
            let offset = self.data.len() as u32;
            self.data.extend_from_slice(bytes);
            offset
        }
    }

    fn entry(tag: u16, field_type: u16, count: u32, value: u32) -> Vec<u8> {
        let mut e = tag.to_le_bytes().to_vec();
        e.extend_from_slice(&field_type.to_le_bytes());
        e.extend_from_slice(&count.to_le_bytes());
        e.extend_from_slice(&value.to_le_bytes());
        e
    }

    #[test]
    fn test_read_ascii_and_short_tags() {
        let mut b = TiffBuilder::new();
        // two entries: 2 + 24 + 4 = 30 bytes of IFD starting at 8
        let make_offset = 8 + 30;
        b.ifd(
            &[
                entry(0x010F, 2, 9, make_offset),
                entry(0x0112, 3, 1, 6),
            ],
            0,
        );
        b.append(b"CanonCam\0");

        let tags = TagReader::new(&b.data).read_tags();
        assert_eq!(tags.get("Make").map(String::as_str), Some("CanonCam"));
        assert_eq!(tags.get("Orientation").map(String::as_str), Some("6"));
    }

    #[test]
    fn test_exif_sub_ifd_user_comment() {
        let mut b = TiffBuilder::new();
        let sub_ifd_offset = 8 + (2 + 12 + 4); // after the 1-entry IFD0
        b.ifd(&[entry(0x8769, 4, 1, sub_ifd_offset as u32)], 0);
        let comment_offset = sub_ifd_offset + 2 + 12 + 4;
        b.ifd(
            &[entry(0x9286, 7, 8 + 13, comment_offset as u32)],
            0,
        );
        b.append(b"ASCII\0\0\0hello comment");

        let tags = TagReader::new(&b.data).read_tags();
        assert_eq!(
            tags.get("UserComment").map(String::as_str),
            Some("hello comment")
        );
    }

    #[test]
    fn test_looping_sub_ifd_terminates() {
        let mut b = TiffBuilder::new();
        // the Exif sub-IFD pointer loops back to IFD0
        b.ifd(&[entry(0x0112, 3, 1, 1), entry(0x8769, 4, 1, 8)], 0);
        let tags = TagReader::new(&b.data).read_tags();
        assert_eq!(tags.get("Orientation").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_garbage_stream_yields_no_tags() {
        assert!(TagReader::new(b"definitely not tiff").read_tags().is_empty());
        assert!(TagReader::new(&[]).read_tags().is_empty());
    }

    #[test]
    fn test_scan_tags_gps_warning() {
        let mut tags = ExifTags::new();
        tags.insert("GPSLatitude".into(), "51/1 30/1 0/1".into());
        let warnings = scan_tags(&tags);
        assert!(warnings.iter().any(|w| w.contains("GPS")));
    }

    #[test]
    fn test_scan_tags_script_fragment_warning() {
        let mut tags = ExifTags::new();
        tags.insert("UserComment".into(), "<script>alert(1)</script>".into());
        tags.insert("Software".into(), "GIMP 2.10".into());
        let warnings = scan_tags(&tags);
        assert!(warnings.iter().any(|w| w.contains("UserComment")));
        assert!(!warnings.iter().any(|w| w.contains("Software")));
    }

    #[tokio::test]
    async fn test_extract_is_infallible() {
        let tags = extract(b"garbage".to_vec()).await;
        assert!(tags.is_empty());
    }
}
