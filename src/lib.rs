//! Structural validation of untrusted image uploads.
//!
//! Detects the real format of a byte stream from its leading bytes, walks
//! the container structure of eleven image families, checks the result
//! against the claimed file extension, and folds everything into a single
//! [`AnalysisVerdict`]. Scanners never decode pixel data and never trust a
//! length field without bounds-checking it first.

pub mod cursor;
pub mod error;
pub mod exif;
pub mod extension;
pub mod formats;
pub mod orchestrator;
pub mod signature;
pub mod stream;
pub mod types;

pub use error::{AnalysisError, Result};
pub use orchestrator::{analyze_bytes, analyze_file};
pub use signature::{detect_format, SignatureMatch};
pub use stream::{BytesSource, ChunkSource, FileInput, FileSource};
pub use types::{
    AnalysisVerdict, Dimensions, ImageFormat, ItemPayload, MetadataItem, ScanReport,
    StructuralVerification,
};
