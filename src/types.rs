use serde::Serialize;

/// The closed set of formats this engine recognizes.
///
/// Adding a format is a compile-checked enum extension: the dispatcher in
/// `formats` matches exhaustively over these variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Apng,
    Jpeg,
    Gif,
    WebP,
    Svg,
    Bmp,
    Ico,
    Tiff,
    Jpeg2000,
    Avif,
    Heic,
}

impl ImageFormat {
    /// Fallback detection order. APNG precedes PNG because its signature is
    /// a strict superset of the PNG signature.
    pub const DETECTION_ORDER: [ImageFormat; 12] = [
        Self::Apng,
        Self::Png,
        Self::Jpeg,
        Self::Gif,
        Self::WebP,
        Self::Svg,
        Self::Bmp,
        Self::Ico,
        Self::Tiff,
        Self::Jpeg2000,
        Self::Avif,
        Self::Heic,
    ];

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Apng => "apng",
            Self::Jpeg => "jpeg",
            Self::Gif => "gif",
            Self::WebP => "webp",
            Self::Svg => "svg",
            Self::Bmp => "bmp",
            Self::Ico => "ico",
            Self::Tiff => "tiff",
            Self::Jpeg2000 => "jpeg2000",
            Self::Avif => "avif",
            Self::Heic => "heic",
        }
    }

    /// Canonical extension for messages.
    #[must_use]
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Apng => "apng",
            Self::Jpeg => "jpg",
            Self::Gif => "gif",
            Self::WebP => "webp",
            Self::Svg => "svg",
            Self::Bmp => "bmp",
            Self::Ico => "ico",
            Self::Tiff => "tiff",
            Self::Jpeg2000 => "jp2",
            Self::Avif => "avif",
            Self::Heic => "heic",
        }
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Format-specific payload attached to a [`MetadataItem`].
///
/// The variants make "which optional fields go together" a type-level fact:
/// a text chunk always carries keyword and preview, a missing-marker item
/// never carries raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ItemPayload {
    None,
    /// Parsed sub-fields rendered as text (e.g. "precision=8, table=0").
    Detail { text: String },
    /// PNG tEXt/iTXt, GIF comment, JPEG COM: keyword plus truncated preview.
    TextChunk { keyword: String, preview: String },
    /// Raw bytes of the unit, kept for inspection.
    Raw { bytes: Vec<u8> },
    /// An essential JPEG marker was expected but never found.
    MissingMarker,
}

/// One structural unit discovered in the file: a chunk, box, marker,
/// segment or block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetadataItem {
    /// Short type code, e.g. "IHDR", "APP1", "ftyp".
    pub key: String,
    /// Human-readable summary.
    pub value: String,
    pub offset: Option<u64>,
    pub length: Option<u64>,
    pub payload: ItemPayload,
}

impl MetadataItem {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            offset: None,
            length: None,
            payload: ItemPayload::None,
        }
    }

    #[must_use]
    pub fn at(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    #[must_use]
    pub fn sized(mut self, length: u64) -> Self {
        self.length = Some(length);
        self
    }

    #[must_use]
    pub fn detail(mut self, text: impl Into<String>) -> Self {
        self.payload = ItemPayload::Detail { text: text.into() };
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: ItemPayload) -> Self {
        self.payload = payload;
        self
    }
}

/// Outcome of one structural scan over a complete file buffer.
///
/// Invariant: `skipped == true` implies `errors` and `metadata` are empty —
/// scanning did not occur because no scanner covers the input.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub metadata: Vec<MetadataItem>,
    pub dimensions: Option<Dimensions>,
    pub skipped: bool,
}

impl ScanReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A report for input that has no dedicated scanner. The reason lands
    /// in `warnings` so the skipped invariant holds.
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            warnings: vec![reason.into()],
            skipped: true,
            ..Self::default()
        }
    }

    pub fn push(&mut self, item: MetadataItem) {
        self.metadata.push(item);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    #[inline]
    pub fn is_structurally_valid(&self) -> bool {
        !self.skipped && self.errors.is_empty()
    }

    pub fn has_item(&self, key: &str) -> bool {
        self.metadata.iter().any(|m| m.key == key)
    }
}

/// Structural-soundness part of the final verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StructuralVerification {
    pub is_valid: bool,
    pub reason: Option<String>,
    pub warning: Option<String>,
}

impl StructuralVerification {
    pub fn from_report(report: &ScanReport) -> Self {
        Self {
            is_valid: report.is_structurally_valid(),
            reason: report.errors.first().cloned().or_else(|| {
                report
                    .skipped
                    .then(|| report.warnings.first().cloned())
                    .flatten()
            }),
            warning: if report.skipped {
                None
            } else {
                report.warnings.first().cloned()
            },
        }
    }
}

/// Terminal object returned to the caller for one analyzed file.
///
/// Invariant: `is_valid == (is_extension_valid && structure.is_valid)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisVerdict {
    pub is_valid: bool,
    pub is_extension_valid: bool,
    pub detected_format: Option<ImageFormat>,
    /// The matched signature bytes, when a format was detected.
    pub magic_number: Option<Vec<u8>>,
    /// Lowercased extension taken from the file name.
    pub extension: String,
    pub dimensions: Option<Dimensions>,
    pub structure: StructuralVerification,
    /// Consolidated human-readable failure cause, `None` when valid.
    pub reason: Option<String>,
}
