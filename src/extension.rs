//! Extension-consistency validation.
//!
//! Maps file extensions to the set of formats that legitimately produce
//! them. The PNG/APNG pair is asymmetric by design: an animated body behind
//! a `.png` extension is tolerated, but a plain PNG behind `.apng` claims an
//! animation it does not have and is rejected.

use crate::types::ImageFormat;

/// Formats accepted for a lowercased extension (without the dot).
pub fn accepted_formats(extension: &str) -> &'static [ImageFormat] {
    match extension {
        "jpg" | "jpeg" | "jfif" => &[ImageFormat::Jpeg],
        "png" => &[ImageFormat::Apng, ImageFormat::Png],
        "apng" => &[ImageFormat::Apng],
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

/// Whether the detected format is legitimate for the file's extension.
/// An undetected format is never valid.
pub fn is_extension_valid(detected: Option<ImageFormat>, extension: &str) -> bool {
    match detected {
        Some(format) => accepted_formats(extension).contains(&format),
        None => false,
    }
}

/// Lowercased extension from a file name; empty when there is none.
pub fn extension_of(file_name: &str) -> String {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_ascii_lowercase(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_mappings() {
        assert!(is_extension_valid(Some(ImageFormat::Jpeg), "jpg"));
        assert!(is_extension_valid(Some(ImageFormat::Jpeg), "jfif"));
        assert!(is_extension_valid(Some(ImageFormat::Tiff), "tif"));
        assert!(is_extension_valid(Some(ImageFormat::Jpeg2000), "jpx"));
        assert!(is_extension_valid(Some(ImageFormat::Heic), "heif"));
        assert!(!is_extension_valid(Some(ImageFormat::Jpeg), "png"));
    }

    #[test]
    fn test_apng_asymmetry() {
        // animated content behind the static extension: tolerated
        assert!(is_extension_valid(Some(ImageFormat::Apng), "png"));
        assert!(is_extension_valid(Some(ImageFormat::Apng), "apng"));
        assert!(is_extension_valid(Some(ImageFormat::Png), "png"));
        // static content claiming animation: rejected
        assert!(!is_extension_valid(Some(ImageFormat::Png), "apng"));
    }

    #[test]
    fn test_unknown_inputs() {
        assert!(!is_extension_valid(None, "png"));
        assert!(!is_extension_valid(Some(ImageFormat::Png), "xyz"));
        assert!(!is_extension_valid(Some(ImageFormat::Png), ""));
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("photo.JPG"), "jpg");
        assert_eq!(extension_of("archive.tar.png"), "png");
        assert_eq!(extension_of("noext"), "");
        assert_eq!(extension_of(".hidden"), "");
    }
}
