//! Streaming analysis orchestration.
//!
//! Pulls chunks from a [`ChunkSource`], runs signature detection on the
//! first chunk, and cancels the transfer immediately when nothing matches:
//! an upload that is not an image never gets fully received. Recognized
//! uploads are buffered to completion, scanned structurally, enriched with
//! EXIF findings for JPEG, and folded into one [`AnalysisVerdict`].

use tracing::{debug, info};

use crate::error::Result;
use crate::extension::{extension_of, is_extension_valid};
use crate::formats;
use crate::signature::{detect_format, SignatureMatch};
use crate::stream::{ChunkSource, FileInput};
use crate::types::{
    AnalysisVerdict, ImageFormat, MetadataItem, ScanReport, StructuralVerification,
};
use crate::{exif, formats::jpeg};

/// Upper bound on what the declared size may pre-allocate; the buffer still
/// grows past this if the stream actually delivers more.
const MAX_PREALLOC: u64 = 16 * 1024 * 1024;

/// Bytes buffered before signature detection gives its verdict. Covers the
/// deepest sniff (the SVG text heuristic); a stream that ends sooner is
/// detected on whatever arrived.
const MIN_SNIFF_LEN: usize = 256;

/// Where the analysis is in the stream lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
enum AnalysisState {
    AwaitingFirstChunk,
    Streaming(SignatureMatch),
    Cancelled,
    Complete(SignatureMatch),
}

/// Progress callback, called once per buffered chunk with the fraction of
/// the declared size received so far and the chunk's byte count.
pub type ProgressFn<'a> = &'a (dyn Fn(f64, usize) + Sync);

/// Analyzes one upload end to end.
pub async fn analyze_file<S: ChunkSource>(
    mut input: FileInput<S>,
    progress: Option<ProgressFn<'_>>,
) -> Result<AnalysisVerdict> {
    let extension = extension_of(&input.name);
    let mut buffer = Vec::with_capacity(input.size.min(MAX_PREALLOC) as usize);
    let mut state = AnalysisState::AwaitingFirstChunk;
    let mut received = 0u64;

    while let Some(chunk) = input.source.next_chunk().await? {
        received += chunk.len() as u64;
        buffer.extend_from_slice(&chunk);

        // every buffered chunk is reported, including one that triggers
        // cancellation below
        if let Some(progress) = progress {
            let fraction = received as f64 / input.size.max(1) as f64;
            progress(fraction.min(1.0), chunk.len());
        }

        if state == AnalysisState::AwaitingFirstChunk && buffer.len() >= MIN_SNIFF_LEN {
            match detect_format(&buffer, &extension) {
                Some(matched) => {
                    debug!(format = %matched.format, name = %input.name, "format detected");
                    state = AnalysisState::Streaming(matched);
                }
                None => {
                    info!(name = %input.name, "leading bytes unrecognized, cancelling stream");
                    input.source.cancel().await?;
                    state = AnalysisState::Cancelled;
                    break;
                }
            }
        }
    }

    // streams shorter than the sniff threshold get detected at EOF
    if state == AnalysisState::AwaitingFirstChunk {
        if let Some(matched) = detect_format(&buffer, &extension) {
            state = AnalysisState::Streaming(matched);
        }
    }
    state = match state {
        AnalysisState::Streaming(matched) => AnalysisState::Complete(matched),
        other => other,
    };

    let verdict = match state {
        AnalysisState::Complete(matched) => {
            let mut report = formats::scan(Some(matched.format), &buffer);
            if matched.format == ImageFormat::Jpeg {
                attach_exif_findings(&buffer, &mut report).await;
            }
            if report.dimensions.is_none() {
                report.dimensions = formats::probe_dimensions(matched.format, &buffer);
            }
            build_verdict(Some(matched), &extension, &report)
        }
        // empty stream or unrecognized leading bytes
        _ => {
            let report = ScanReport::skipped("unsupported format");
            build_verdict(None, &extension, &report)
        }
    };

    info!(
        name = %input.name,
        valid = verdict.is_valid,
        format = verdict.detected_format.map(|f| f.name()),
        "analysis finished"
    );
    Ok(verdict)
}

/// Convenience wrapper over an in-memory buffer.
pub async fn analyze_bytes(name: &str, data: Vec<u8>) -> Result<AnalysisVerdict> {
    let size = data.len() as u64;
    let input = FileInput::new(name, size, crate::stream::BytesSource::new(data));
    analyze_file(input, None).await
}

/// EXIF tags become `exif:` metadata items; privacy and injection findings
/// become warnings. The step is advisory and never fails the scan.
async fn attach_exif_findings(buffer: &[u8], report: &mut ScanReport) {
    let Some(range) = jpeg::exif_payload(buffer) else {
        return;
    };
    let tags = exif::extract(buffer[range].to_vec()).await;
    for warning in exif::scan_tags(&tags) {
        report.warning(warning);
    }
    for (key, value) in &tags {
        report.push(MetadataItem::new(format!("exif:{key}"), value));
    }
}

fn build_verdict(
    matched: Option<SignatureMatch>,
    extension: &str,
    report: &ScanReport,
) -> AnalysisVerdict {
    let detected_format = matched.as_ref().map(|m| m.format);
    let is_extension_valid = is_extension_valid(detected_format, extension);
    let structure = StructuralVerification::from_report(report);
    let is_valid = is_extension_valid && structure.is_valid;

    // extension mismatch outranks structural failure in the reported cause
    let reason = if !is_extension_valid {
        Some(match detected_format {
            Some(format) => {
                format!("extension .{extension} does not match detected format {format}")
            }
            None => "unsupported format".to_string(),
        })
    } else if !structure.is_valid {
        structure.reason.clone()
    } else {
        None
    };

    AnalysisVerdict {
        is_valid,
        is_extension_valid,
        detected_format,
        magic_number: matched.map(|m| m.magic),
        extension: extension.to_string(),
        dimensions: report.dimensions,
        structure,
        reason,
    }
}
