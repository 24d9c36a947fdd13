//! SVG text scanner.
//!
//! SVG is XML, not a binary container, so this scanner works on a lossy
//! UTF-8 decode with case-insensitive substring matching instead of a full
//! parser. The goal is structural sanity plus flagging embedded script,
//! which is the main reason uploaded SVGs get rejected. All searches run
//! directly over the original text (the markup being matched is pure
//! ASCII), so byte offsets stay valid even when the document contains
//! characters whose lowercase form has a different byte length.

use tracing::debug;

use crate::types::{Dimensions, ItemPayload, MetadataItem, ScanReport};

const METADATA_PREVIEW_LEN: usize = 200;

pub fn scan(data: &[u8]) -> ScanReport {
    let mut report = ScanReport::new();

    let text = String::from_utf8_lossy(data);

    let Some(svg_pos) = find_ci(&text, "<svg") else {
        report.error("missing <svg> root element");
        return report;
    };
    report.push(
        MetadataItem::new("svg", "root element")
            .at(svg_pos as u64),
    );

    if find_ci(&text, "</svg>").is_none() {
        report.error("unterminated <svg> root element");
    }

    if let Some(script_pos) = find_ci(&text, "<script") {
        report.warning(format!(
            "embedded <script> element at offset {script_pos}"
        ));
    }
    for handler in ["onload=", "onclick=", "onerror="] {
        if find_ci(&text, handler).is_some() {
            report.warning(format!("inline event handler {handler} present"));
        }
    }

    if let Some(content) = extract_between(&text, "<metadata", "</metadata>") {
        let preview: String = content.chars().take(METADATA_PREVIEW_LEN).collect();
        report.push(
            MetadataItem::new("metadata", "embedded metadata element").with_payload(
                ItemPayload::TextChunk {
                    keyword: "metadata".into(),
                    preview,
                },
            ),
        );
    }

    let tag_end = text[svg_pos..]
        .find('>')
        .map_or(text.len(), |p| svg_pos + p);
    let root_tag = &text[svg_pos..tag_end];
    if let (Some(width), Some(height)) = (
        numeric_attribute(root_tag, "width="),
        numeric_attribute(root_tag, "height="),
    ) {
        if width > 0 && height > 0 {
            report.dimensions = Some(Dimensions { width, height });
        }
    }

    debug!(
        warnings = report.warnings.len(),
        errors = report.errors.len(),
        "svg scan finished"
    );
    report
}

/// ASCII-case-insensitive substring search. The needle must be ASCII; a
/// match can then only begin at a character boundary, because no UTF-8
/// continuation byte case-folds to an ASCII byte.
fn find_ci(haystack: &str, needle: &str) -> Option<usize> {
    let h = haystack.as_bytes();
    let n = needle.as_bytes();
    if n.is_empty() {
        return Some(0);
    }
    if h.len() < n.len() {
        return None;
    }
    h.windows(n.len()).position(|w| w.eq_ignore_ascii_case(n))
}

/// Slice of `text` between the end of `open`'s tag and `close`.
fn extract_between<'a>(text: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let open_pos = find_ci(text, open)?;
    let content_start = open_pos + text[open_pos..].find('>')? + 1;
    let content_end = content_start + find_ci(&text[content_start..], close)?;
    Some(text[content_start..content_end].trim())
}

/// Plain numeric width/height attribute; unit-qualified values other than
/// `px` (percentages, em) are not dimensions in pixels and are skipped.
fn numeric_attribute(tag: &str, name: &str) -> Option<u32> {
    let attr = find_ci(tag, name)?;
    let rest = tag.get(attr + name.len()..)?;
    let rest = rest.strip_prefix(['"', '\'']).unwrap_or(rest);
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    let after = &rest[digits.len()..];
    if !(after.starts_with(['"', '\'']) || after.starts_with("px")) {
        return None;
    }
    digits.parse().ok()
}
