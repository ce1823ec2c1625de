//! # html2pdf-server
//!
//! An HTTP service that turns an HTML document, plus the images that go with
//! it, into a PDF.
//!
//! ## Why embed every image?
//!
//! The renderer only ever sees one HTML string. Relative paths mean nothing
//! to it and network fetches are slow and unsafe, so before rendering every
//! `<img src>` and SVG `<image href>` is rewritten to a `data:` URL. The
//! bytes come either from images the caller sent with the request or, when
//! there are none, from files under a trusted base directory.
//!
//! ## Pipeline Overview
//!
//! ```text
//! request (JSON / form / multipart / raw)
//!  │
//!  ├─ 1. Extract  html + named image values
//!  ├─ 2. Decode   base64 / data: URL / bytes / mapping → (media type, bytes)
//!  ├─ 3. Resolve  local files, confined to the base directory
//!  ├─ 4. Rewrite  image references → data: URLs (spawn_blocking)
//!  └─ 5. Render   external program, HTML on stdin, PDF on stdout
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use html2pdf_server::{convert, ConversionRequest, ImageSet, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::builder().base_dir("./templates").build()?;
//!
//!     let mut images = ImageSet::new();
//!     images.insert("logo.png", std::fs::read("logo.png")?);
//!
//!     let request = ConversionRequest::new(r#"<img src="logo.png">"#).with_images(images);
//!     let output = convert(request, &config).await?;
//!     std::fs::write("out.pdf", output.pdf)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `html2pdf-server` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when embedding only the library:
//! ```toml
//! html2pdf-server = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod pipeline;
pub mod render;
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ServerConfig, ServerConfigBuilder};
pub use convert::{convert, prepare, ConversionOutput, ConversionRequest, Prepared};
pub use error::{DecodeError, ResolveError, ServerError};
pub use pipeline::decode::{decode, DecodedImage, ImageValue};
pub use pipeline::resolve::{resolve, TrustedBaseDir};
pub use pipeline::rewrite::{
    rewrite, rewrite_with_report, ImageRegistry, ImageSet, RewriteMode, RewriteReport,
};
pub use pipeline::sniff::sniff;
pub use render::{CommandRenderer, HtmlRenderer};
pub use server::router;
