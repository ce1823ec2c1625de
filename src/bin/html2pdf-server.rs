//! Server binary for html2pdf-server.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ServerConfig`, binds the listener and serves until Ctrl-C / SIGTERM.

use anyhow::{Context, Result};
use clap::Parser;
use html2pdf_server::{router, ServerConfig};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Serve on :8000, resolving local images under ./templates
  html2pdf-server --base-dir ./templates

  # Convert a document with one caller-supplied image
  curl -s localhost:8000/convert -H 'Content-Type: application/json' \
    -d '{"html": "<img src=\"logo.png\">", "images": {"logo.png": "iVBORw0K..."}}' \
    -o out.pdf

  # Inspect the self-contained HTML the renderer would receive
  curl -s localhost:8000/rewrite -H 'Content-Type: text/html' --data-binary @page.html

RENDERER:
  The renderer reads HTML on stdin and writes the PDF to stdout.
  Default: weasyprint - -
  Example: --renderer wkhtmltopdf --renderer-arg=-q --renderer-arg=- --renderer-arg=-
"#;

/// Serve HTML-to-PDF conversion over HTTP.
#[derive(Parser, Debug)]
#[command(
    name = "html2pdf-server",
    version,
    about = "Serve HTML-to-PDF conversion over HTTP",
    long_about = "Accepts an HTML document and its images over HTTP, embeds every image \
reference as a data: URL, and renders the self-contained document to PDF with an external \
renderer.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Interface to bind.
    #[arg(long, env = "HTML2PDF_HOST", default_value = "0.0.0.0")]
    host: String,

    /// TCP port.
    #[arg(short, long, env = "PORT", default_value_t = 8000)]
    port: u16,

    /// Directory local image references are confined to. Default: current directory.
    #[arg(long, env = "HTML2PDF_BASE_DIR")]
    base_dir: Option<PathBuf>,

    /// Reference name a single `image` field is registered under.
    #[arg(long, env = "HTML2PDF_IMAGE_NAME", default_value = "image")]
    image_name: String,

    /// Maximum request body size in MiB.
    #[arg(long, env = "HTML2PDF_MAX_BODY_MB", default_value_t = 25,
          value_parser = clap::value_parser!(u64).range(1..=1024))]
    max_body_mb: u64,

    /// Renderer timeout in seconds.
    #[arg(long, env = "HTML2PDF_RENDER_TIMEOUT", default_value_t = 60,
          value_parser = clap::value_parser!(u64).range(1..))]
    render_timeout: u64,

    /// Renderer program (reads HTML on stdin, writes PDF to stdout).
    #[arg(long, env = "HTML2PDF_RENDERER", default_value = "weasyprint")]
    renderer: String,

    /// Renderer argument; repeat for several. Default: `- -`.
    #[arg(long = "renderer-arg", allow_hyphen_values = true)]
    renderer_args: Vec<String>,

    /// Enable debug logging.
    #[arg(short, long, env = "HTML2PDF_VERBOSE")]
    verbose: bool,

    /// Only log errors.
    #[arg(short, long, env = "HTML2PDF_QUIET", conflicts_with = "verbose")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Config ───────────────────────────────────────────────────────────
    let mut builder = ServerConfig::builder()
        .host(&cli.host)
        .port(cli.port)
        .image_name(&cli.image_name)
        .max_body_bytes((cli.max_body_mb * 1024 * 1024) as usize)
        .render_timeout_secs(cli.render_timeout)
        .renderer_program(&cli.renderer);
    if let Some(dir) = &cli.base_dir {
        builder = builder.base_dir(dir);
    }
    if !cli.renderer_args.is_empty() {
        builder = builder.renderer_args(cli.renderer_args.iter().cloned());
    }
    let config = Arc::new(builder.build().context("Invalid configuration")?);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        base_dir = %config.base_dir.path().display(),
        renderer = %config.renderer_program,
        "Starting html2pdf-server"
    );

    // ── Bind and serve ───────────────────────────────────────────────────
    let bind_addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to address {bind_addr}"))?;
    let addr = listener.local_addr()?;
    info!(address = %addr, "Server listening");

    axum::serve(listener, router(Arc::clone(&config)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shut down gracefully");
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received, draining connections");
}
