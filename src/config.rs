//! Configuration for the conversion server.
//!
//! Everything the server needs at request time lives in [`ServerConfig`],
//! built via [`ServerConfigBuilder`]. The config is constructed once at
//! startup, wrapped in an `Arc`, and shared read-only by every request.
//!
//! # Validation happens in `build()`
//! The trusted base directory is canonicalised when the config is built, so
//! a typo in `--base-dir` fails at startup instead of silently turning every
//! local image reference into a miss.

use crate::error::ServerError;
use crate::pipeline::resolve::TrustedBaseDir;
use crate::render::{CommandRenderer, HtmlRenderer};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default request body limit: 25 MiB.
pub const DEFAULT_MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

/// Runtime configuration shared by every request.
///
/// Built via [`ServerConfig::builder()`].
///
/// # Example
/// ```rust,no_run
/// use html2pdf_server::ServerConfig;
///
/// let config = ServerConfig::builder()
///     .port(8080)
///     .base_dir("/srv/templates")
///     .render_timeout_secs(30)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ServerConfig {
    /// Interface to bind. Default: `0.0.0.0`.
    pub host: String,

    /// TCP port. Default: 8000.
    pub port: u16,

    /// Root that local image references are confined to.
    pub base_dir: TrustedBaseDir,

    /// Reference name a lone `image` request field is registered under.
    /// Default: `image`.
    pub image_name: String,

    /// Largest accepted request body in bytes. Default: 25 MiB.
    pub max_body_bytes: usize,

    /// Renderer timeout in seconds. Default: 60.
    pub render_timeout_secs: u64,

    /// Program used by the default [`CommandRenderer`]. Default: `weasyprint`.
    pub renderer_program: String,

    /// Arguments passed to `renderer_program`. Default: `["-", "-"]`
    /// (HTML on stdin, PDF on stdout).
    pub renderer_args: Vec<String>,

    /// Pre-constructed renderer. Takes precedence over `renderer_program`.
    pub renderer: Option<Arc<dyn HtmlRenderer>>,

    /// Filename advertised in `Content-Disposition`. Default: `document.pdf`.
    pub output_filename: String,
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("base_dir", &self.base_dir.path())
            .field("image_name", &self.image_name)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("render_timeout_secs", &self.render_timeout_secs)
            .field("renderer_program", &self.renderer_program)
            .field("renderer_args", &self.renderer_args)
            .field("renderer", &self.renderer.as_ref().map(|r| r.name().to_string()))
            .field("output_filename", &self.output_filename)
            .finish()
    }
}

impl ServerConfig {
    /// Create a new builder with default values.
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// `host:port` string suitable for `TcpListener::bind`.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_secs(self.render_timeout_secs)
    }

    /// The renderer requests are handed to.
    ///
    /// Returns the injected renderer when one was supplied, otherwise a
    /// [`CommandRenderer`] for the configured program.
    pub fn renderer(&self) -> Arc<dyn HtmlRenderer> {
        match &self.renderer {
            Some(r) => Arc::clone(r),
            None => Arc::new(
                CommandRenderer::new(&self.renderer_program, self.renderer_args.clone())
                    .with_timeout(self.render_timeout()),
            ),
        }
    }
}

/// Builder for [`ServerConfig`].
pub struct ServerConfigBuilder {
    host: String,
    port: u16,
    base_dir: Option<PathBuf>,
    image_name: String,
    max_body_bytes: usize,
    render_timeout_secs: u64,
    renderer_program: String,
    renderer_args: Vec<String>,
    renderer: Option<Arc<dyn HtmlRenderer>>,
    output_filename: String,
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            base_dir: None,
            image_name: "image".to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            render_timeout_secs: 60,
            renderer_program: "weasyprint".to_string(),
            renderer_args: vec!["-".to_string(), "-".to_string()],
            renderer: None,
            output_filename: "document.pdf".to_string(),
        }
    }
}

impl ServerConfigBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Trusted base directory. Defaults to the current working directory.
    pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    pub fn image_name(mut self, name: impl Into<String>) -> Self {
        self.image_name = name.into();
        self
    }

    pub fn max_body_bytes(mut self, n: usize) -> Self {
        self.max_body_bytes = n;
        self
    }

    pub fn render_timeout_secs(mut self, secs: u64) -> Self {
        self.render_timeout_secs = secs;
        self
    }

    pub fn renderer_program(mut self, program: impl Into<String>) -> Self {
        self.renderer_program = program.into();
        self
    }

    pub fn renderer_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.renderer_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn HtmlRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn output_filename(mut self, name: impl Into<String>) -> Self {
        self.output_filename = name.into();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServerConfig, ServerError> {
        if self.host.trim().is_empty() {
            return Err(ServerError::InvalidConfig("host must not be empty".into()));
        }
        if self.image_name.trim().is_empty() {
            return Err(ServerError::InvalidConfig(
                "image name must not be empty".into(),
            ));
        }
        if self.max_body_bytes == 0 {
            return Err(ServerError::InvalidConfig(
                "max body size must be ≥ 1 byte".into(),
            ));
        }
        if self.render_timeout_secs == 0 {
            return Err(ServerError::InvalidConfig(
                "render timeout must be ≥ 1 second".into(),
            ));
        }
        if self.renderer.is_none() && self.renderer_program.trim().is_empty() {
            return Err(ServerError::InvalidConfig(
                "renderer program must not be empty".into(),
            ));
        }
        if self.output_filename.contains('"') || self.output_filename.trim().is_empty() {
            return Err(ServerError::InvalidConfig(format!(
                "invalid output filename '{}'",
                self.output_filename
            )));
        }

        let base_dir = match self.base_dir {
            Some(dir) => TrustedBaseDir::new(dir)?,
            None => TrustedBaseDir::new(std::env::current_dir()?)?,
        };

        Ok(ServerConfig {
            host: self.host,
            port: self.port,
            base_dir,
            image_name: self.image_name,
            max_body_bytes: self.max_body_bytes,
            render_timeout_secs: self.render_timeout_secs,
            renderer_program: self.renderer_program,
            renderer_args: self.renderer_args,
            renderer: self.renderer,
            output_filename: self.output_filename,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults() {
        let tmp = TempDir::new().unwrap();
        let config = ServerConfig::builder().base_dir(tmp.path()).build().unwrap();
        assert_eq!(config.bind_address(), "0.0.0.0:8000");
        assert_eq!(config.image_name, "image");
        assert_eq!(config.max_body_bytes, 25 * 1024 * 1024);
        assert_eq!(config.render_timeout(), Duration::from_secs(60));
        assert_eq!(config.renderer_program, "weasyprint");
        assert_eq!(config.renderer_args, vec!["-", "-"]);
        assert_eq!(config.output_filename, "document.pdf");
        assert_eq!(config.renderer().name(), "weasyprint");
    }

    #[test]
    fn base_dir_is_canonicalised() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("assets")).unwrap();
        let config = ServerConfig::builder()
            .base_dir(tmp.path().join("assets/../assets"))
            .build()
            .unwrap();
        assert_eq!(
            config.base_dir.path(),
            tmp.path().join("assets").canonicalize().unwrap()
        );
    }

    #[test]
    fn missing_base_dir_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let err = ServerConfig::builder()
            .base_dir(tmp.path().join("nope"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ServerError::InvalidConfig(_)));
    }

    #[test]
    fn zero_limits_are_rejected() {
        let tmp = TempDir::new().unwrap();
        assert!(ServerConfig::builder()
            .base_dir(tmp.path())
            .max_body_bytes(0)
            .build()
            .is_err());
        assert!(ServerConfig::builder()
            .base_dir(tmp.path())
            .render_timeout_secs(0)
            .build()
            .is_err());
        assert!(ServerConfig::builder()
            .base_dir(tmp.path())
            .image_name("  ")
            .build()
            .is_err());
    }

    #[test]
    fn quoted_output_filename_is_rejected() {
        let tmp = TempDir::new().unwrap();
        assert!(ServerConfig::builder()
            .base_dir(tmp.path())
            .output_filename("a\"b.pdf")
            .build()
            .is_err());
    }

    #[test]
    fn debug_does_not_require_renderer_debug() {
        let tmp = TempDir::new().unwrap();
        let config = ServerConfig::builder()
            .base_dir(tmp.path())
            .renderer_program("wkhtmltopdf")
            .renderer_args(["-q", "-", "-"])
            .build()
            .unwrap();
        let dbg = format!("{config:?}");
        assert!(dbg.contains("wkhtmltopdf"));
        assert!(dbg.contains("\"-q\""));
    }
}
