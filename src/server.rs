//! HTTP surface: health check, conversion and rewrite-only endpoints.
//!
//! | Route           | Response                                             |
//! |-----------------|------------------------------------------------------|
//! | `GET /`         | `{"status": "ok"}`                                   |
//! | `POST /convert` | `application/pdf`, rendered by the configured renderer |
//! | `POST /rewrite` | `text/html`, the self-contained document only        |
//!
//! Both POST routes accept the document as a JSON body, an urlencoded or
//! multipart form, or a raw body. See [`extract_request`] for the rules.

use crate::config::ServerConfig;
use crate::convert::{self, ConversionRequest};
use crate::error::ServerError;
use crate::pipeline::decode::ImageValue;
use crate::pipeline::rewrite::{ImageSet, RewriteReport};
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Request, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Number of references replaced with `data:` URLs.
pub const IMAGES_EMBEDDED_HEADER: HeaderName = HeaderName::from_static("x-images-embedded");
/// Number of references left unresolved.
pub const IMAGES_UNRESOLVED_HEADER: HeaderName = HeaderName::from_static("x-images-unresolved");

type AppState = Arc<ServerConfig>;

/// Build the application router.
pub fn router(config: Arc<ServerConfig>) -> Router {
    let limit = config.max_body_bytes;
    Router::new()
        .route("/", get(health))
        .route("/convert", post(convert_handler))
        .route("/rewrite", post(rewrite_handler))
        .layer(DefaultBodyLimit::max(limit))
        .with_state(config)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn convert_handler(
    State(config): State<AppState>,
    request: Request,
) -> Result<Response, ServerError> {
    let request = extract_request(request, &config).await?;
    let output = convert::convert(request, &config).await?;

    let disposition = HeaderValue::from_str(&format!(
        "inline; filename=\"{}\"",
        config.output_filename
    ))
    .map_err(|e| ServerError::Internal(format!("invalid Content-Disposition: {e}")))?;

    let mut headers = report_headers(&output.report);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/pdf"));
    headers.insert(CONTENT_DISPOSITION, disposition);
    Ok((StatusCode::OK, headers, output.pdf).into_response())
}

async fn rewrite_handler(
    State(config): State<AppState>,
    request: Request,
) -> Result<Response, ServerError> {
    let request = extract_request(request, &config).await?;
    let prepared = convert::prepare(request, &config).await?;

    let mut headers = report_headers(&prepared.report);
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    Ok((StatusCode::OK, headers, prepared.html).into_response())
}

fn report_headers(report: &RewriteReport) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(IMAGES_EMBEDDED_HEADER, HeaderValue::from(report.embedded));
    headers.insert(IMAGES_UNRESOLVED_HEADER, HeaderValue::from(report.unresolved));
    headers
}

// ── Request extraction ───────────────────────────────────────────────────────

/// JSON request body.
#[derive(Debug, Default, Deserialize)]
struct JsonBody {
    html: Option<String>,
    /// Named images, in the order the caller wrote them.
    images: Option<ImageSet>,
    /// A single image registered under the configured image name.
    image: Option<ImageValue>,
}

/// Urlencoded form body.
#[derive(Debug, Default, Deserialize)]
struct FormBody {
    html: Option<String>,
    image: Option<String>,
}

/// Pull the HTML document and any images out of a request.
///
/// The body shape is chosen by `Content-Type`:
///
/// * `application/json`: `html`, plus `images` (name → value) and/or
///   `image` (one value, registered under [`ServerConfig::image_name`]).
///   Without a non-blank `html` string the body is used as raw HTML.
/// * `application/x-www-form-urlencoded`: `html` and `image` fields.
/// * `multipart/form-data`: an `html` field; every part with a filename is
///   an image keyed by that filename; an `image` field without a filename is
///   treated like the form field.
/// * anything else: the whole body is the HTML document.
///
/// # Errors
/// [`ServerError::MissingHtml`] when no non-blank document is found,
/// [`ServerError::InvalidRequest`] when a form or an image value cannot be
/// parsed, and
/// [`ServerError::BodyTooLarge`] when it exceeds the configured limit.
pub async fn extract_request(
    request: Request,
    config: &ServerConfig,
) -> Result<ConversionRequest, ServerError> {
    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();
    let limit = config.max_body_bytes;

    let (html, images) = if is_json(&content_type) {
        let body = Bytes::from_request(request, &())
            .await
            .map_err(|r| rejection(r.status(), r.body_text(), limit))?;
        parse_json_body(&body, config)?
    } else if content_type.starts_with("application/x-www-form-urlencoded") {
        let Form(body) = Form::<FormBody>::from_request(request, &())
            .await
            .map_err(|r| rejection(r.status(), r.body_text(), limit))?;
        let mut images = ImageSet::new();
        if let Some(image) = body.image.filter(|v| !v.trim().is_empty()) {
            images.insert(config.image_name.clone(), image);
        }
        (body.html, images)
    } else if content_type.starts_with("multipart/form-data") {
        let multipart = Multipart::from_request(request, &())
            .await
            .map_err(|r| rejection(r.status(), r.body_text(), limit))?;
        read_multipart(multipart, config).await?
    } else {
        let body = Bytes::from_request(request, &())
            .await
            .map_err(|r| rejection(r.status(), r.body_text(), limit))?;
        (
            Some(String::from_utf8_lossy(&body).into_owned()),
            ImageSet::new(),
        )
    };

    let html = html
        .filter(|h| !h.trim().is_empty())
        .ok_or(ServerError::MissingHtml)?;

    info!(
        bytes = html.len(),
        images = images.len(),
        content_type = %content_type,
        "Received document"
    );
    Ok(ConversionRequest { html, images })
}

/// Read a JSON-typed body.
///
/// A body that is not JSON, or whose `html` field is missing or blank, is
/// taken as the HTML document itself. Once `html` is present, a malformed
/// `images` / `image` value is an error.
fn parse_json_body(
    body: &[u8],
    config: &ServerConfig,
) -> Result<(Option<String>, ImageSet), ServerError> {
    let raw = || (Some(String::from_utf8_lossy(body).into_owned()), ImageSet::new());

    let value: serde_json::Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(e) => {
            debug!("JSON body did not parse, using it as HTML: {e}");
            return Ok(raw());
        }
    };
    let has_html = value
        .get("html")
        .and_then(serde_json::Value::as_str)
        .is_some_and(|h| !h.trim().is_empty());
    if !has_html {
        debug!("JSON body has no html field, using it as HTML");
        return Ok(raw());
    }

    let body: JsonBody = serde_json::from_value(value)
        .map_err(|e| ServerError::InvalidRequest(format!("invalid image value: {e}")))?;
    let mut images = body.images.unwrap_or_default();
    if let Some(image) = body.image {
        images.insert(config.image_name.clone(), image);
    }
    Ok((body.html, images))
}

async fn read_multipart(
    mut multipart: Multipart,
    config: &ServerConfig,
) -> Result<(Option<String>, ImageSet), ServerError> {
    let limit = config.max_body_bytes;
    let mut html = None;
    let mut images = ImageSet::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| rejection(e.status(), e.body_text(), limit))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);

        match file_name.filter(|f| !f.is_empty()) {
            Some(file_name) => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| rejection(e.status(), e.body_text(), limit))?;
                debug!(field = %name, file = %file_name, bytes = bytes.len(), "Multipart image");
                images.insert(file_name, bytes.to_vec());
            }
            None if name == "html" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| rejection(e.status(), e.body_text(), limit))?;
                html = Some(text);
            }
            None if name == "image" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| rejection(e.status(), e.body_text(), limit))?;
                if !text.trim().is_empty() {
                    images.insert(config.image_name.clone(), text);
                }
            }
            None => debug!(field = %name, "Ignoring multipart field"),
        }
    }

    Ok((html, images))
}

fn is_json(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or("").trim();
    essence == "application/json" || essence.ends_with("+json")
}

fn rejection(status: StatusCode, body: String, limit: usize) -> ServerError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        ServerError::BodyTooLarge { limit }
    } else {
        ServerError::InvalidRequest(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use tempfile::TempDir;

    fn config(tmp: &TempDir) -> ServerConfig {
        ServerConfig::builder()
            .base_dir(tmp.path())
            .image_name("upload")
            .build()
            .unwrap()
    }

    fn request(content_type: &str, body: impl Into<Body>) -> Request {
        axum::http::Request::builder()
            .method("POST")
            .uri("/convert")
            .header(CONTENT_TYPE, content_type)
            .body(body.into())
            .unwrap()
    }

    #[test]
    fn json_content_types() {
        assert!(is_json("application/json"));
        assert!(is_json("application/json; charset=utf-8"));
        assert!(is_json("application/vnd.api+json"));
        assert!(!is_json("text/html"));
        assert!(!is_json(""));
    }

    #[tokio::test]
    async fn json_body_with_images_and_single_image() {
        let tmp = TempDir::new().unwrap();
        let body = concat!(
            r#"{"html": "<img src=\"a.png\">", "#,
            r#""images": {"b.png": "x", "a.png": "y"}, "image": "z"}"#,
        );
        let req = extract_request(request("application/json", body), &config(&tmp))
            .await
            .unwrap();
        assert_eq!(req.html, r#"<img src="a.png">"#);
        let names: Vec<&str> = req.images.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["b.png", "a.png", "upload"]);
    }

    #[tokio::test]
    async fn non_json_body_falls_back_to_raw_html() {
        let tmp = TempDir::new().unwrap();
        let req = extract_request(request("application/json", "<p>not json</p>"), &config(&tmp))
            .await
            .unwrap();
        assert_eq!(req.html, "<p>not json</p>");
        assert!(req.images.is_empty());
    }

    #[tokio::test]
    async fn json_without_html_falls_back_to_raw_body() {
        let tmp = TempDir::new().unwrap();
        let body = r#"{"page": "<p>x</p>", "image": "aGk="}"#;
        let req = extract_request(request("application/json", body), &config(&tmp))
            .await
            .unwrap();
        assert_eq!(req.html, body);
        assert!(req.images.is_empty());
    }

    #[tokio::test]
    async fn blank_json_body_is_missing() {
        let tmp = TempDir::new().unwrap();
        let err = extract_request(request("application/json", "  "), &config(&tmp))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::MissingHtml));
    }

    #[tokio::test]
    async fn malformed_image_value_is_invalid_request() {
        let tmp = TempDir::new().unwrap();
        let body = r#"{"html": "<p>x</p>", "images": {"a.png": 42}}"#;
        let err = extract_request(request("application/json", body), &config(&tmp))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn urlencoded_form() {
        let tmp = TempDir::new().unwrap();
        let req = extract_request(
            request(
                "application/x-www-form-urlencoded",
                "html=%3Cp%3Ehi%3C%2Fp%3E&image=aGk%3D",
            ),
            &config(&tmp),
        )
        .await
        .unwrap();
        assert_eq!(req.html, "<p>hi</p>");
        let (name, value) = req.images.iter().next().unwrap();
        assert_eq!(name, "upload");
        assert_eq!(value, &ImageValue::Text("aGk=".into()));
    }

    #[tokio::test]
    async fn multipart_file_parts_become_images() {
        let tmp = TempDir::new().unwrap();
        let body = concat!(
            "--XBOUNDARY\r\n",
            "Content-Disposition: form-data; name=\"html\"\r\n\r\n",
            "<img src=\"logo.png\">\r\n",
            "--XBOUNDARY\r\n",
            "Content-Disposition: form-data; name=\"files\"; filename=\"logo.png\"\r\n",
            "Content-Type: image/png\r\n\r\n",
            "\u{0089}PNG\r\n",
            "--XBOUNDARY--\r\n",
        );
        let req = extract_request(
            request("multipart/form-data; boundary=XBOUNDARY", body),
            &config(&tmp),
        )
        .await
        .unwrap();
        assert_eq!(req.html, r#"<img src="logo.png">"#);
        let (name, value) = req.images.iter().next().unwrap();
        assert_eq!(name, "logo.png");
        assert!(matches!(value, ImageValue::Bytes(_)));
    }

    #[tokio::test]
    async fn raw_body_is_html() {
        let tmp = TempDir::new().unwrap();
        let req = extract_request(request("text/html", "<h1>Title</h1>"), &config(&tmp))
            .await
            .unwrap();
        assert_eq!(req.html, "<h1>Title</h1>");
        assert!(req.images.is_empty());
    }

    #[tokio::test]
    async fn blank_raw_body_is_missing() {
        let tmp = TempDir::new().unwrap();
        let err = extract_request(request("text/plain", "   \n"), &config(&tmp))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::MissingHtml));
    }
}
