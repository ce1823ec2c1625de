//! Error types for the html2pdf-server library.
//!
//! Two tiers of error reflect two distinct failure modes:
//!
//! * [`ServerError`]: **request-level**, the request cannot be served at all
//!   (no HTML, malformed image mapping, renderer crashed). Returned as
//!   `Err(ServerError)` from [`crate::convert`] and turned into an HTTP error
//!   response by the server.
//!
//! * [`DecodeError`] / [`ResolveError`]: **per-image**, one image could not
//!   be produced. These never leave the rewriter; the affected reference is
//!   left untouched in the output document and the rest of the document is
//!   processed normally.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Message returned when a request carries no usable HTML.
pub const MISSING_HTML_MESSAGE: &str =
    "No HTML provided. Send as JSON {\"html\": \"...\"}, form field 'html', or raw body.";

/// All request-level errors returned by the html2pdf-server library.
#[derive(Debug, Error)]
pub enum ServerError {
    // ── Request errors ────────────────────────────────────────────────────
    /// No HTML could be extracted from the request.
    #[error("{}", MISSING_HTML_MESSAGE)]
    MissingHtml,

    /// The body or the caller-supplied image mapping could not be parsed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The request body exceeded the configured limit.
    #[error("Request body exceeds the {limit} byte limit")]
    BodyTooLarge { limit: usize },

    // ── Renderer errors ───────────────────────────────────────────────────
    /// The renderer ran but reported failure.
    #[error("Rendering failed: {detail}")]
    RenderFailed { detail: String },

    /// The renderer program could not be started.
    #[error("Renderer '{program}' is not available: {detail}")]
    RendererUnavailable { program: String, detail: String },

    /// The renderer did not finish within the configured timeout.
    #[error("Rendering timed out after {elapsed_ms}ms")]
    RenderTimeout { elapsed_ms: u64 },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// HTTP status the server answers with for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::MissingHtml | ServerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ServerError::RenderFailed { .. } => StatusCode::BAD_GATEWAY,
            ServerError::RendererUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::RenderTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ServerError::InvalidConfig(_) | ServerError::Io(_) | ServerError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = %status, "{}", self);
        } else {
            tracing::debug!(status = %status, "{}", self);
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// A single image value could not be turned into bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// A `data:` URL declared base64 but its payload is not valid base64.
    ///
    /// The media type from the URL header is kept: callers know what the
    /// image was meant to be, only the bytes are unavailable.
    #[error("invalid base64 payload in data URL: {reason}")]
    InvalidBase64 {
        media_type: Option<String>,
        reason: String,
    },

    /// A structured mapping carried none of the recognised keys.
    #[error("unrecognised image value")]
    Unrecognized,
}

impl DecodeError {
    /// The media type known at the point of failure, if any.
    pub fn media_type(&self) -> Option<&str> {
        match self {
            DecodeError::InvalidBase64 { media_type, .. } => media_type.as_deref(),
            DecodeError::Unrecognized => None,
        }
    }
}

/// A local image reference could not be read.
///
/// Deliberately carries no path or OS error so nothing about the
/// filesystem layout leaks into logs shipped to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("image file not found")]
    NotFound,

    #[error("image path escapes the trusted base directory")]
    OutOfBounds,
}
