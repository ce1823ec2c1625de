//! Image decoding: turn an ambiguous [`ImageValue`] into bytes + media type.
//!
//! Clients send images in whatever shape their HTTP library produced: a
//! `data:` URL, bare base64, a raw upload, a Python `repr()` of a bytes
//! object, or a JSON object wrapping any of those. None of these carry a
//! reliable type tag, so decoding is an ordered chain of rules. Each rule
//! either claims the value (returns `Some`) or passes it on. The first claim
//! wins.
//!
//! ## Rule Order
//!
//! 1. Raw byte buffer
//! 2. Mapping with a `data:` URL field
//! 3. Mapping with a payload field (+ optional media-type field)
//! 4. `data:` URL string
//! 5. Byte-literal string (`b'\x89PNG…'`)
//! 6. Strict padded base64 string
//! 7. Raw text, one byte per char (never fails)
//!
//! Structured forms go first because they are unambiguous. Strict base64
//! goes after the byte literal because `b'…'` can never be valid base64,
//! while plenty of short English words are.

use crate::error::DecodeError;
use crate::pipeline::sniff::{media_type_from_path, sniff, GENERIC_MEDIA_TYPE};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::trace;

/// Mapping keys holding a complete `data:` URL.
const URL_KEYS: &[&str] = &["data_url", "dataUrl", "data_uri", "dataUri", "uri", "src"];

/// Mapping keys holding a raw payload (itself any [`ImageValue`]).
const PAYLOAD_KEYS: &[&str] = &["data", "content", "bytes", "base64"];

/// Mapping keys holding an explicit media type.
const MEDIA_TYPE_KEYS: &[&str] = &[
    "mime_type",
    "mimeType",
    "media_type",
    "content_type",
    "contentType",
    "type",
];

/// Image data as received from a client, before any interpretation.
///
/// Deserialises untagged from JSON: a string is [`ImageValue::Text`], an
/// array of byte values is [`ImageValue::Bytes`], an object is
/// [`ImageValue::Mapping`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ImageValue {
    Text(String),
    Bytes(Vec<u8>),
    Mapping(BTreeMap<String, ImageValue>),
}

impl From<&str> for ImageValue {
    fn from(s: &str) -> Self {
        ImageValue::Text(s.to_string())
    }
}

impl From<String> for ImageValue {
    fn from(s: String) -> Self {
        ImageValue::Text(s)
    }
}

impl From<Vec<u8>> for ImageValue {
    fn from(b: Vec<u8>) -> Self {
        ImageValue::Bytes(b)
    }
}

impl ImageValue {
    fn field(&self, keys: &[&str]) -> Option<&ImageValue> {
        match self {
            ImageValue::Mapping(map) => keys.iter().find_map(|k| map.get(*k)),
            _ => None,
        }
    }

    fn as_text(&self) -> Option<&str> {
        match self {
            ImageValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Bytes of a successfully decoded image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    /// Media type, if the value declared one or it could be inferred.
    pub media_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl DecodedImage {
    /// Media type, falling back to `application/octet-stream`.
    pub fn media_type_or_generic(&self) -> &str {
        self.media_type.as_deref().unwrap_or(GENERIC_MEDIA_TYPE)
    }

    /// Encode as a self-contained `data:<type>;base64,<payload>` URL.
    pub fn to_data_url(&self) -> String {
        data_url(self.media_type_or_generic(), &self.bytes)
    }

    /// Fill in a missing media type: filename hint first, then byte sniffing.
    fn infer_media_type(mut self, filename_hint: Option<&str>) -> Self {
        if self.media_type.is_none() {
            self.media_type = filename_hint
                .and_then(media_type_from_path)
                .or_else(|| sniff(&self.bytes))
                .map(str::to_string);
        }
        self
    }
}

/// Build a base64 `data:` URL from a media type and bytes.
pub fn data_url(media_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", media_type, STANDARD.encode(bytes))
}

type Decoded = Result<DecodedImage, DecodeError>;
type Rule = fn(&ImageValue, Option<&str>) -> Option<Decoded>;

const RULES: &[(&str, Rule)] = &[
    ("raw-bytes", rule_raw_bytes as Rule),
    ("mapping-url", rule_mapping_url as Rule),
    ("mapping-payload", rule_mapping_payload as Rule),
    ("data-url", rule_data_url as Rule),
    ("byte-literal", rule_byte_literal as Rule),
    ("strict-base64", rule_strict_base64 as Rule),
    ("raw-text", rule_raw_text as Rule),
];

/// Decode an image value into bytes and (when knowable) a media type.
///
/// `filename_hint` is the name the image was registered or uploaded under;
/// its extension takes priority over byte sniffing when the value itself
/// does not declare a type.
///
/// # Errors
/// - [`DecodeError::InvalidBase64`] when a `data:` URL declares base64 but
///   the payload does not decode. The declared media type is preserved.
/// - [`DecodeError::Unrecognized`] for a mapping with no known keys.
///
/// Every string value decodes successfully (rule 7 is a catch-all).
pub fn decode(value: &ImageValue, filename_hint: Option<&str>) -> Decoded {
    for (name, rule) in RULES {
        if let Some(outcome) = rule(value, filename_hint) {
            trace!(rule = name, "Image value matched decode rule");
            return outcome.map(|img| img.infer_media_type(filename_hint));
        }
    }
    Err(DecodeError::Unrecognized)
}

// ── Rule 1: Raw byte buffer ──────────────────────────────────────────────────

fn rule_raw_bytes(value: &ImageValue, _hint: Option<&str>) -> Option<Decoded> {
    match value {
        ImageValue::Bytes(bytes) => Some(Ok(DecodedImage {
            media_type: None,
            bytes: bytes.clone(),
        })),
        _ => None,
    }
}

// ── Rule 2: Mapping with a data URL field ────────────────────────────────────

fn rule_mapping_url(value: &ImageValue, hint: Option<&str>) -> Option<Decoded> {
    let url = value.field(URL_KEYS)?.as_text()?;
    parse_data_url(url, hint)
}

// ── Rule 3: Mapping with a payload field ─────────────────────────────────────

fn rule_mapping_payload(value: &ImageValue, hint: Option<&str>) -> Option<Decoded> {
    let payload = value.field(PAYLOAD_KEYS)?;
    let explicit = value
        .field(MEDIA_TYPE_KEYS)
        .and_then(ImageValue::as_text)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    let outcome = match decode(payload, hint) {
        Ok(mut img) => {
            if explicit.is_some() {
                img.media_type = explicit;
            }
            Ok(img)
        }
        Err(DecodeError::InvalidBase64 { media_type, reason }) => Err(DecodeError::InvalidBase64 {
            media_type: explicit.or(media_type),
            reason,
        }),
        Err(e) => Err(e),
    };
    Some(outcome)
}

// ── Rule 4: data URL string ──────────────────────────────────────────────────

fn rule_data_url(value: &ImageValue, hint: Option<&str>) -> Option<Decoded> {
    parse_data_url(value.as_text()?, hint)
}

/// Parse `data:[<media type>][;base64],<payload>`.
///
/// Returns `None` when `s` is not a data URL at all (wrong prefix or no `,`).
fn parse_data_url(s: &str, hint: Option<&str>) -> Option<Decoded> {
    let rest = s
        .get(..5)
        .filter(|prefix| prefix.eq_ignore_ascii_case("data:"))
        .map(|_| &s[5..])?;
    let (header, payload) = rest.split_once(',')?;

    let mut media_type: Option<String> = None;
    let mut is_base64 = false;
    for segment in header.split(';') {
        let seg = segment.trim();
        if seg.eq_ignore_ascii_case("base64") {
            is_base64 = true;
        } else if media_type.is_none() && seg.contains('/') {
            media_type = Some(seg.to_string());
        }
    }

    if !is_base64 {
        return Some(Ok(DecodedImage {
            media_type,
            bytes: percent_decode(payload),
        }));
    }

    let cleaned: String = payload
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    let outcome = match STANDARD.decode(cleaned.as_bytes()) {
        Ok(bytes) => Ok(DecodedImage { media_type, bytes }),
        Err(e) => Err(DecodeError::InvalidBase64 {
            media_type: media_type
                .or_else(|| hint.and_then(media_type_from_path).map(str::to_string)),
            reason: e.to_string(),
        }),
    };
    Some(outcome)
}

/// Lenient percent-decoding: malformed escapes are copied through as-is.
fn percent_decode(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0usize;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hi = bytes.get(i + 1).and_then(|b| (*b as char).to_digit(16));
            let lo = bytes.get(i + 2).and_then(|b| (*b as char).to_digit(16));
            if let (Some(hi), Some(lo)) = (hi, lo) {
                out.push(((hi << 4) | lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

// ── Rule 5: Byte literal ─────────────────────────────────────────────────────

fn rule_byte_literal(value: &ImageValue, _hint: Option<&str>) -> Option<Decoded> {
    let bytes = parse_byte_literal(value.as_text()?.trim())?;
    Some(Ok(DecodedImage {
        media_type: None,
        bytes,
    }))
}

/// Parse a `b'…'` / `b"…"` literal as produced by Python's `repr(bytes)`.
///
/// Returns `None` on anything that is not a well-formed ASCII literal.
fn parse_byte_literal(s: &str) -> Option<Vec<u8>> {
    let body = s.strip_prefix('b').or_else(|| s.strip_prefix('B'))?;
    let quote = match body.as_bytes().first()? {
        q @ (b'\'' | b'"') => *q,
        _ => return None,
    };
    let inner = body[1..].strip_suffix(quote as char)?;
    if !inner.is_ascii() {
        return None;
    }

    let bytes = inner.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0usize;
    while i < bytes.len() {
        let b = bytes[i];
        if b == quote || b == b'\n' {
            return None;
        }
        if b != b'\\' {
            out.push(b);
            i += 1;
            continue;
        }

        // A trailing backslash escapes the closing quote: unterminated.
        let esc = *bytes.get(i + 1)?;
        i += 2;
        match esc {
            b'\\' | b'\'' | b'"' => out.push(esc),
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'a' => out.push(0x07),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0c),
            b'v' => out.push(0x0b),
            b'\n' => {}
            b'x' => {
                let hex = bytes.get(i..i + 2)?;
                if !hex.iter().all(u8::is_ascii_hexdigit) {
                    return None;
                }
                let value = u8::from_str_radix(std::str::from_utf8(hex).ok()?, 16).ok()?;
                out.push(value);
                i += 2;
            }
            b'0'..=b'7' => {
                let start = i - 1;
                let mut end = i;
                while end < bytes.len() && end < start + 3 && (b'0'..=b'7').contains(&bytes[end]) {
                    end += 1;
                }
                let digits = std::str::from_utf8(&bytes[start..end]).ok()?;
                out.push(u8::try_from(u32::from_str_radix(digits, 8).ok()?).ok()?);
                i = end;
            }
            other => {
                out.push(b'\\');
                out.push(other);
            }
        }
    }
    Some(out)
}

// ── Rule 6: Strict base64 ────────────────────────────────────────────────────

fn rule_strict_base64(value: &ImageValue, _hint: Option<&str>) -> Option<Decoded> {
    let text = value.as_text()?;
    if text.is_empty() {
        return None;
    }
    let bytes = STANDARD.decode(text.as_bytes()).ok()?;
    Some(Ok(DecodedImage {
        media_type: None,
        bytes,
    }))
}

// ── Rule 7: Raw text fallback ────────────────────────────────────────────────

fn rule_raw_text(value: &ImageValue, _hint: Option<&str>) -> Option<Decoded> {
    let text = value.as_text()?;
    let bytes = text
        .chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect();
    Some(Ok(DecodedImage {
        media_type: None,
        bytes,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 1×1 PNG.
    const PNG_B64: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mP8/5+hHgAHggJ/PchI7wAAAABJRU5ErkJggg==";
    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

    fn text(s: &str) -> ImageValue {
        ImageValue::from(s)
    }

    fn mapping(pairs: &[(&str, ImageValue)]) -> ImageValue {
        ImageValue::Mapping(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn png_data_url_decodes_with_declared_type() {
        let img = decode(&text(&format!("data:image/png;base64,{PNG_B64}")), None).unwrap();
        assert_eq!(img.media_type.as_deref(), Some("image/png"));
        assert!(img.bytes.starts_with(PNG_MAGIC));
    }

    #[test]
    fn media_type_may_follow_parameters() {
        let url = format!("data:charset=binary;image/png;base64,{PNG_B64}");
        let img = decode(&text(&url), None).unwrap();
        assert_eq!(img.media_type.as_deref(), Some("image/png"));

        let url = format!("data:image/gif;name=a/b.png;base64,{PNG_B64}");
        let img = decode(&text(&url), None).unwrap();
        assert_eq!(img.media_type.as_deref(), Some("image/gif"));
    }

    #[test]
    fn data_url_round_trip() {
        let original: Vec<u8> = (0u8..=255).rev().collect();
        let url = data_url("application/x-test", &original);
        let img = decode(&text(&url), None).unwrap();
        assert_eq!(img.bytes, original);
        assert_eq!(img.media_type.as_deref(), Some("application/x-test"));
        assert_eq!(img.to_data_url(), url);
    }

    #[test]
    fn data_url_prefix_is_case_insensitive_and_tolerates_whitespace() {
        let wrapped = format!("DATA:image/png;BASE64,{}\n{}", &PNG_B64[..20], &PNG_B64[20..]);
        let img = decode(&text(&wrapped), None).unwrap();
        assert!(img.bytes.starts_with(PNG_MAGIC));
    }

    #[test]
    fn invalid_base64_keeps_media_type() {
        let err = decode(&text("data:image/jpeg;base64,!!!not-base64!!!"), None).unwrap_err();
        assert_eq!(err.media_type(), Some("image/jpeg"));
        assert!(matches!(err, DecodeError::InvalidBase64 { .. }));
    }

    #[test]
    fn invalid_base64_without_declared_type_uses_hint() {
        let err = decode(&text("data:;base64,@@@@"), Some("avatar.gif")).unwrap_err();
        assert_eq!(err.media_type(), Some("image/gif"));
    }

    #[test]
    fn percent_encoded_data_url() {
        let img = decode(&text("data:image/svg+xml,%3Csvg%2F%3E"), None).unwrap();
        assert_eq!(img.media_type.as_deref(), Some("image/svg+xml"));
        assert_eq!(img.bytes, b"<svg/>");
    }

    #[test]
    fn percent_decode_is_lenient() {
        assert_eq!(percent_decode("100%"), b"100%");
        assert_eq!(percent_decode("%zz%41"), b"%zzA");
        assert_eq!(percent_decode("%4"), b"%4");
    }

    #[test]
    fn data_url_without_comma_falls_through() {
        // Not a data URL, not base64: raw text.
        let img = decode(&text("data:image/png"), None).unwrap();
        assert_eq!(img.bytes, b"data:image/png");
    }

    #[test]
    fn raw_bytes_use_hint_before_sniffing() {
        let png = STANDARD.decode(PNG_B64).unwrap();
        let sniffed = decode(&ImageValue::Bytes(png.clone()), None).unwrap();
        assert_eq!(sniffed.media_type.as_deref(), Some("image/png"));

        let hinted = decode(&ImageValue::Bytes(png.clone()), Some("upload.jpg")).unwrap();
        assert_eq!(hinted.media_type.as_deref(), Some("image/jpeg"));
        assert_eq!(hinted.bytes, png);
    }

    #[test]
    fn raw_bytes_unknown_type_stays_absent() {
        let img = decode(&ImageValue::Bytes(vec![1, 2, 3]), None).unwrap();
        assert_eq!(img.media_type, None);
        assert_eq!(img.media_type_or_generic(), GENERIC_MEDIA_TYPE);
        assert!(img.to_data_url().starts_with("data:application/octet-stream;base64,"));
    }

    #[test]
    fn bare_base64_is_sniffed() {
        let img = decode(&text(PNG_B64), None).unwrap();
        assert_eq!(img.media_type.as_deref(), Some("image/png"));
        assert!(img.bytes.starts_with(PNG_MAGIC));
    }

    #[test]
    fn base64_must_be_padded() {
        // "aGVsbG8gd29ybGQ" is "hello world" without its padding.
        let img = decode(&text("aGVsbG8gd29ybGQ"), None).unwrap();
        assert_eq!(img.bytes, b"aGVsbG8gd29ybGQ");
        let img = decode(&text("aGVsbG8gd29ybGQ="), None).unwrap();
        assert_eq!(img.bytes, b"hello world");
    }

    #[test]
    fn plain_text_falls_back_to_raw_bytes() {
        let img = decode(&text("hello"), None).unwrap();
        assert_eq!(img.bytes, b"hello");
        assert_eq!(img.media_type, None);
    }

    #[test]
    fn raw_text_is_single_byte_per_char() {
        let img = decode(&text("caf\u{e9} \u{65e5}"), None).unwrap();
        assert_eq!(img.bytes, vec![b'c', b'a', b'f', 0xe9, b' ', b'?']);
    }

    #[test]
    fn empty_string_decodes_to_empty_bytes() {
        let img = decode(&text(""), None).unwrap();
        assert!(img.bytes.is_empty());
    }

    #[test]
    fn byte_literal_with_escapes() {
        let img = decode(&text(r"b'\x89PNG\r\n\x1a\n'"), None).unwrap();
        assert_eq!(img.bytes, PNG_MAGIC);
        assert_eq!(img.media_type.as_deref(), Some("image/png"));
    }

    #[test]
    fn byte_literal_variants() {
        assert_eq!(parse_byte_literal(r#"b"it's""#), Some(b"it's".to_vec()));
        assert_eq!(parse_byte_literal(r"B'a\'b'"), Some(b"a'b".to_vec()));
        assert_eq!(parse_byte_literal(r"b'\0\101\7'"), Some(vec![0, b'A', 7]));
        assert_eq!(parse_byte_literal(r"b'\q'"), Some(b"\\q".to_vec()));
        assert_eq!(parse_byte_literal("b''"), Some(Vec::new()));
    }

    #[test]
    fn malformed_byte_literal_falls_through() {
        assert_eq!(parse_byte_literal(r"b'\x8'"), None);
        assert_eq!(parse_byte_literal(r"b'abc\'"), None);
        assert_eq!(parse_byte_literal("b'caf\u{e9}'"), None);
        assert_eq!(parse_byte_literal(r"b'\777'"), None);
        assert_eq!(parse_byte_literal("b'a'b'"), None);
        assert_eq!(parse_byte_literal("b'"), None);

        // Falls all the way through to the raw-text rule.
        let img = decode(&text(r"b'\x8'"), None).unwrap();
        assert_eq!(img.bytes, br"b'\x8'");
    }

    #[test]
    fn mapping_with_data_url() {
        let value = mapping(&[("dataUrl", text(&format!("data:image/png;base64,{PNG_B64}")))]);
        let img = decode(&value, None).unwrap();
        assert_eq!(img.media_type.as_deref(), Some("image/png"));
        assert!(img.bytes.starts_with(PNG_MAGIC));
    }

    #[test]
    fn mapping_payload_type_overrides_inferred() {
        let value = mapping(&[("data", text(PNG_B64)), ("mime_type", text("image/x-custom"))]);
        let img = decode(&value, None).unwrap();
        assert_eq!(img.media_type.as_deref(), Some("image/x-custom"));
        assert!(img.bytes.starts_with(PNG_MAGIC));
    }

    #[test]
    fn mapping_payload_without_type_is_inferred() {
        let value = mapping(&[("bytes", ImageValue::Bytes(b"GIF89a\x01\x00".to_vec()))]);
        let img = decode(&value, None).unwrap();
        assert_eq!(img.media_type.as_deref(), Some("image/gif"));
    }

    #[test]
    fn mapping_url_field_that_is_not_a_data_url_uses_payload() {
        let value = mapping(&[("src", text("photo.png")), ("data", text(PNG_B64))]);
        let img = decode(&value, None).unwrap();
        assert!(img.bytes.starts_with(PNG_MAGIC));
    }

    #[test]
    fn mapping_payload_invalid_base64_keeps_explicit_type() {
        let value = mapping(&[
            ("data", text("data:;base64,####")),
            ("type", text("image/webp")),
        ]);
        let err = decode(&value, None).unwrap_err();
        assert_eq!(err.media_type(), Some("image/webp"));
    }

    #[test]
    fn mapping_without_known_keys_is_unrecognized() {
        let value = mapping(&[("name", text("x.png"))]);
        assert_eq!(decode(&value, None), Err(DecodeError::Unrecognized));
    }

    #[test]
    fn json_shapes_deserialize_untagged() {
        let v: ImageValue = serde_json::from_str(r#""abc""#).unwrap();
        assert_eq!(v, text("abc"));

        let v: ImageValue = serde_json::from_str("[137, 80, 78, 71]").unwrap();
        assert_eq!(v, ImageValue::Bytes(vec![137, 80, 78, 71]));

        let v: ImageValue = serde_json::from_str(r#"{"data": "abc", "type": "image/png"}"#).unwrap();
        assert!(matches!(v, ImageValue::Mapping(ref m) if m.len() == 2));

        assert!(serde_json::from_str::<ImageValue>("42").is_err());
        assert!(serde_json::from_str::<ImageValue>("[1, 999]").is_err());
    }
}
