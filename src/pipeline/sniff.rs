//! Media-type inference: byte signatures and file extensions.
//!
//! Two independent sources of truth exist for "what kind of image is this":
//! the name it was given and the bytes it actually contains. The decoder
//! consults the name first (callers usually know what they uploaded) and only
//! falls back to the magic-number table when the name says nothing.

use std::path::Path;

/// Media type used when neither the name nor the bytes identify the image.
pub const GENERIC_MEDIA_TYPE: &str = "application/octet-stream";

/// Ordered signature table. First matching prefix wins.
const SIGNATURES: &[(&[u8], &str)] = &[
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"\xff\xd8\xff", "image/jpeg"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"BM", "image/bmp"),
];

/// Guess a media type from the leading bytes of `bytes`.
///
/// Returns `None` for an empty buffer or when no signature matches.
pub fn sniff(bytes: &[u8]) -> Option<&'static str> {
    SIGNATURES
        .iter()
        .find(|(magic, _)| bytes.starts_with(magic))
        .map(|(_, media_type)| *media_type)
}

/// Map a file name or path to a media type using its extension.
pub fn media_type_from_path(path: impl AsRef<Path>) -> Option<&'static str> {
    let ext = path.as_ref().extension()?.to_str()?.to_ascii_lowercase();
    let media_type = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" | "jpe" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "ico" => "image/vnd.microsoft.icon",
        "tif" | "tiff" => "image/tiff",
        "avif" => "image/avif",
        _ => return None,
    };
    Some(media_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniff_known_signatures() {
        assert_eq!(sniff(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR"), Some("image/png"));
        assert_eq!(sniff(b"\xff\xd8\xff\xe0\0\x10JFIF"), Some("image/jpeg"));
        assert_eq!(sniff(b"GIF87a\x01\0"), Some("image/gif"));
        assert_eq!(sniff(b"GIF89a\x01\0"), Some("image/gif"));
        assert_eq!(sniff(b"BM\x36\0\0\0"), Some("image/bmp"));
    }

    #[test]
    fn sniff_exact_prefix_is_enough() {
        assert_eq!(sniff(b"\x89PNG\r\n\x1a\n"), Some("image/png"));
        assert_eq!(sniff(b"BM"), Some("image/bmp"));
    }

    #[test]
    fn sniff_unknown_and_empty() {
        assert_eq!(sniff(b""), None);
        assert_eq!(sniff(b"hello"), None);
        // Truncated PNG signature must not match.
        assert_eq!(sniff(b"\x89PNG"), None);
        assert_eq!(sniff(b"GIF88a"), None);
    }

    #[test]
    fn extension_lookup_is_case_insensitive() {
        assert_eq!(media_type_from_path("photo.PNG"), Some("image/png"));
        assert_eq!(media_type_from_path("a/b/c.JpEg"), Some("image/jpeg"));
        assert_eq!(media_type_from_path("logo.svg"), Some("image/svg+xml"));
    }

    #[test]
    fn extension_lookup_unknown() {
        assert_eq!(media_type_from_path("README"), None);
        assert_eq!(media_type_from_path("notes.txt"), None);
        assert_eq!(media_type_from_path(""), None);
    }
}
