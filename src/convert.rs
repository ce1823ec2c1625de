//! Conversion entry points.
//!
//! [`prepare`] makes a document self-contained; [`convert`] prepares it and
//! hands the result to the configured renderer. The HTTP layer is a thin
//! wrapper around these two functions, so they are also the API to use when
//! embedding the library without the server.

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::pipeline::rewrite::{self, ImageSet, RewriteReport};
use std::time::Instant;
use tracing::info;

/// An HTML document plus the images the caller supplied with it.
#[derive(Debug, Clone, Default)]
pub struct ConversionRequest {
    pub html: String,
    pub images: ImageSet,
}

impl ConversionRequest {
    pub fn new(html: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            images: ImageSet::new(),
        }
    }

    pub fn with_images(mut self, images: ImageSet) -> Self {
        self.images = images;
        self
    }
}

/// A self-contained document, ready for the renderer.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub html: String,
    pub report: RewriteReport,
}

/// The rendered artifact.
#[derive(Debug, Clone)]
pub struct ConversionOutput {
    pub pdf: Vec<u8>,
    pub report: RewriteReport,
}

/// Rewrite every image reference in the request's HTML to a `data:` URL.
///
/// Rewriting reads files and decodes base64, so it runs on the blocking
/// pool rather than on the async executor.
///
/// # Errors
/// [`ServerError::MissingHtml`] if the document is blank. Per-image failures
/// are never errors; the affected references are left as they were.
pub async fn prepare(
    request: ConversionRequest,
    config: &ServerConfig,
) -> Result<Prepared, ServerError> {
    if request.html.trim().is_empty() {
        return Err(ServerError::MissingHtml);
    }

    let base = config.base_dir.clone();
    let ConversionRequest { html, images } = request;
    let images = (!images.is_empty()).then_some(images);

    let rewritten = tokio::task::spawn_blocking(move || {
        rewrite::rewrite_with_report(&html, images.as_ref(), &base)
    })
    .await
    .map_err(|e| ServerError::Internal(format!("rewrite task failed: {e}")))?;

    Ok(Prepared {
        html: rewritten.html,
        report: rewritten.report,
    })
}

/// Prepare the document and render it with the configured renderer.
///
/// # Errors
/// Anything [`prepare`] returns, plus the renderer's own failures
/// ([`ServerError::RenderFailed`], [`ServerError::RendererUnavailable`],
/// [`ServerError::RenderTimeout`]).
pub async fn convert(
    request: ConversionRequest,
    config: &ServerConfig,
) -> Result<ConversionOutput, ServerError> {
    let total_start = Instant::now();

    // ── Step 1: Make the document self-contained ─────────────────────────
    let rewrite_start = Instant::now();
    let prepared = prepare(request, config).await?;
    let rewrite_ms = rewrite_start.elapsed().as_millis() as u64;

    // ── Step 2: Render ───────────────────────────────────────────────────
    let renderer = config.renderer();
    let render_start = Instant::now();
    let pdf = renderer.render(&prepared.html).await?;
    let render_ms = render_start.elapsed().as_millis() as u64;

    info!(
        renderer = renderer.name(),
        mode = %prepared.report.mode,
        embedded = prepared.report.embedded,
        unresolved = prepared.report.unresolved,
        bytes = pdf.len(),
        rewrite_ms,
        render_ms,
        total_ms = total_start.elapsed().as_millis() as u64,
        "Conversion complete"
    );

    Ok(ConversionOutput {
        pdf,
        report: prepared.report,
    })
}
