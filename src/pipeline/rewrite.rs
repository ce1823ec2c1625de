//! HTML image rewriting: replace image references with embedded `data:` URLs.
//!
//! The renderer runs with no network access and no notion of where the
//! caller's files live, so every image has to travel inside the document.
//! This pass finds image-reference attributes and swaps each value for a
//! `data:` URL, taking the bytes from one of two sources:
//!
//! * **Caller-supplied**: images sent with the request, looked up by the
//!   exact reference and then by its basename.
//! * **Local files**: used only when the request carried no images; the
//!   reference is read from disk through [`crate::pipeline::resolve`].
//!
//! ## Why regexes and not an HTML parser?
//!
//! The only mutation is replacing one attribute value with another string.
//! Matching `<img …>` / `<image …>` tags and walking their attributes keeps
//! every other byte of the document exactly as the caller wrote it, which a
//! parse/serialise round-trip would not.
//!
//! Comments and all other start tags are matched too and copied through
//! unchanged, so `<img …>` text inside a comment or inside another tag's
//! attribute value is never rewritten. Raw-text elements are not tracked:
//! an `<img …>` string literal inside `<script>` or `<style>` is still
//! treated as a tag.

use crate::error::ResolveError;
use crate::pipeline::decode::{data_url, decode, ImageValue};
use crate::pipeline::resolve::{resolve, TrustedBaseDir};
use crate::pipeline::sniff::{media_type_from_path, GENERIC_MEDIA_TYPE};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

// ── Caller-supplied images ───────────────────────────────────────────────────

/// Named images supplied with a request, in the order they were received.
///
/// Order matters: when two names share a basename, the first one claims it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageSet(Vec<(String, ImageValue)>);

impl ImageSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an image. A name that is already present has its value replaced
    /// in place.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ImageValue>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ImageValue)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v))
    }
}

impl<K: Into<String>, V: Into<ImageValue>> FromIterator<(K, V)> for ImageSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = ImageSet::new();
        for (name, value) in iter {
            set.insert(name, value);
        }
        set
    }
}

impl<'de> Deserialize<'de> for ImageSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ImageSetVisitor;

        impl<'de> Visitor<'de> for ImageSetVisitor {
            type Value = ImageSet;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of image names to image values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<ImageSet, A::Error> {
                let mut set = ImageSet::new();
                while let Some((name, value)) = map.next_entry::<String, ImageValue>()? {
                    set.insert(name, value);
                }
                Ok(set)
            }
        }

        deserializer.deserialize_map(ImageSetVisitor)
    }
}

/// Reference name → embedded `data:` URL, built once per rewrite pass.
#[derive(Debug, Default)]
pub struct ImageRegistry {
    entries: HashMap<String, String>,
}

impl ImageRegistry {
    /// Decode every image in `images` and register it under its name and
    /// its basename. Undecodable or empty images are skipped.
    pub fn build(images: &ImageSet) -> Self {
        let mut entries = HashMap::with_capacity(images.len() * 2);
        for (name, value) in images.iter() {
            let img = match decode(value, Some(name)) {
                Ok(img) if img.bytes.is_empty() => {
                    warn!(image = %name, "Skipping image with no bytes");
                    continue;
                }
                Ok(img) => img,
                Err(e) => {
                    warn!(image = %name, media_type = ?e.media_type(), "Skipping image: {e}");
                    continue;
                }
            };
            debug!(
                image = %name,
                media_type = img.media_type_or_generic(),
                bytes = img.bytes.len(),
                "Registered image"
            );
            let url = img.to_data_url();
            let alias = basename(name);
            if !alias.is_empty() {
                entries
                    .entry(alias.to_string())
                    .or_insert_with(|| url.clone());
            }
            entries.insert(name.to_string(), url);
        }
        Self { entries }
    }

    /// Look `reference` up verbatim, then by basename.
    pub fn lookup(&self, reference: &str) -> Option<&str> {
        self.entries
            .get(reference)
            .or_else(|| self.entries.get(basename(reference)))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Last path segment, splitting on both `/` and `\`.
fn basename(reference: &str) -> &str {
    reference
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(reference)
}

// ── Rewrite pass ─────────────────────────────────────────────────────────────

/// Where a rewrite pass takes image bytes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteMode {
    CallerSupplied,
    LocalFiles,
}

impl fmt::Display for RewriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RewriteMode::CallerSupplied => f.write_str("caller-supplied"),
            RewriteMode::LocalFiles => f.write_str("local-files"),
        }
    }
}

/// Counts of what a rewrite pass did with each image reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewriteReport {
    pub mode: RewriteMode,
    /// References replaced with a `data:` URL.
    pub embedded: usize,
    /// References left untouched because no bytes were found for them.
    pub unresolved: usize,
    /// References left untouched on purpose: empty, already embedded, or
    /// pointing at a network / `file:` URL.
    pub skipped: usize,
}

/// Output of [`rewrite_with_report`].
#[derive(Debug, Clone)]
pub struct Rewritten {
    pub html: String,
    pub report: RewriteReport,
}

enum Source<'a> {
    Registry(ImageRegistry),
    LocalFiles(&'a TrustedBaseDir),
}

/// Schemes whose references are never rewritten.
const PASSTHROUGH_SCHEMES: &[&str] = &["data:", "http:", "https:", "ftp:", "file:", "blob:"];

/// One attribute, `name`, `name=value`, or a stray `/`. Values may be
/// double-quoted, single-quoted or bare; bare values run to whitespace or `>`.
macro_rules! attribute {
    () => {
        r#"(?:\s*(?:[^\s"'>/=]+(?:\s*=\s*(?:"[^"]*"|'[^']*'|[^\s>]+))?|/))"#
    };
}

/// Comments, image tags and every other start tag, each consumed whole so
/// markup inside a comment or an attribute value is never seen as a tag.
static RE_MARKUP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?is)(?P<comment><!--.*?-->)",
        r"|(?P<image><(?P<name>img|image)\b",
        attribute!(),
        r"*\s*>)",
        r"|<[a-z][^\s>/]*",
        attribute!(),
        r"*\s*>",
    ))
    .unwrap()
});

static RE_ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([^\s"'>/=]+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+)))?"#).unwrap()
});

/// Embed every resolvable image reference in `html`.
///
/// Uses `images` when it is non-empty, local files under `base` otherwise.
/// References that cannot be resolved are left as they are.
pub fn rewrite(html: &str, images: Option<&ImageSet>, base: &TrustedBaseDir) -> String {
    rewrite_with_report(html, images, base).html
}

/// Like [`rewrite`], also reporting what happened to each reference.
pub fn rewrite_with_report(
    html: &str,
    images: Option<&ImageSet>,
    base: &TrustedBaseDir,
) -> Rewritten {
    let source = match images.filter(|set| !set.is_empty()) {
        Some(set) => Source::Registry(ImageRegistry::build(set)),
        None => Source::LocalFiles(base),
    };
    let mut report = RewriteReport {
        mode: match source {
            Source::Registry(_) => RewriteMode::CallerSupplied,
            Source::LocalFiles(_) => RewriteMode::LocalFiles,
        },
        embedded: 0,
        unresolved: 0,
        skipped: 0,
    };

    let html = RE_MARKUP
        .replace_all(html, |caps: &Captures| {
            match (caps.name("image"), caps.name("name")) {
                (Some(tag), Some(name)) => {
                    rewrite_tag(tag.as_str(), name.as_str(), &source, &mut report)
                }
                _ => caps[0].to_string(),
            }
        })
        .into_owned();

    debug!(
        mode = %report.mode,
        embedded = report.embedded,
        unresolved = report.unresolved,
        skipped = report.skipped,
        "Rewrite pass complete"
    );
    Rewritten { html, report }
}

/// Rewrite the reference attributes of one tag, copying everything else.
fn rewrite_tag(
    tag: &str,
    tag_name: &str,
    source: &Source<'_>,
    report: &mut RewriteReport,
) -> String {
    let wanted: &[&str] = if tag_name.eq_ignore_ascii_case("img") {
        &["src"]
    } else {
        &["href", "xlink:href"]
    };

    // Skip "<" and the tag name so the name itself is never read as an attribute.
    let (head, attrs) = tag.split_at(1 + tag_name.len());
    let mut out = String::with_capacity(tag.len());
    out.push_str(head);
    let mut copied = 0usize;

    for caps in RE_ATTRIBUTE.captures_iter(attrs) {
        let name = &caps[1];
        if !wanted.iter().any(|w| name.eq_ignore_ascii_case(w)) {
            continue;
        }
        let (value, span, quote) = if let Some(m) = caps.get(2) {
            (m.as_str(), (m.start() - 1, m.end() + 1), '"')
        } else if let Some(m) = caps.get(3) {
            (m.as_str(), (m.start() - 1, m.end() + 1), '\'')
        } else if let Some(m) = caps.get(4) {
            (m.as_str(), (m.start(), m.end()), '"')
        } else {
            continue;
        };

        if let Some(url) = resolve_reference(value, source, report) {
            out.push_str(&attrs[copied..span.0]);
            out.push(quote);
            out.push_str(&url);
            out.push(quote);
            copied = span.1;
        }
    }

    out.push_str(&attrs[copied..]);
    out
}

/// Produce the `data:` URL for one reference, or `None` to leave it alone.
fn resolve_reference(raw: &str, source: &Source<'_>, report: &mut RewriteReport) -> Option<String> {
    let reference = raw.trim();
    if reference.is_empty() || is_passthrough(reference) {
        report.skipped += 1;
        return None;
    }

    let resolved = match source {
        Source::Registry(registry) => registry.lookup(reference).map(str::to_string),
        Source::LocalFiles(base) => match resolve(reference, base) {
            Ok(bytes) => {
                let media_type = media_type_from_path(reference).unwrap_or(GENERIC_MEDIA_TYPE);
                Some(data_url(media_type, &bytes))
            }
            Err(ResolveError::OutOfBounds) => {
                warn!(reference = %reference, "Image reference escapes the base directory");
                None
            }
            Err(ResolveError::NotFound) => None,
        },
    };

    match resolved {
        Some(url) => {
            debug!(reference = %reference, "Embedded image");
            report.embedded += 1;
            Some(url)
        }
        None => {
            debug!(reference = %reference, "Image reference left unresolved");
            report.unresolved += 1;
            None
        }
    }
}

/// Already embedded, protocol-relative, or carrying a network / file scheme.
fn is_passthrough(reference: &str) -> bool {
    reference.starts_with("//")
        || PASSTHROUGH_SCHEMES.iter().any(|scheme| {
            reference
                .get(..scheme.len())
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
        })
}
