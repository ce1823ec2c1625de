//! The external HTML renderer.
//!
//! Layout, CSS and PDF generation are not done in-process. The server hands
//! the self-contained HTML to an [`HtmlRenderer`] and returns whatever bytes
//! come back. [`CommandRenderer`] drives an external program (WeasyPrint by
//! default) over stdin/stdout; tests and embedders inject their own
//! implementation through [`crate::ServerConfigBuilder::renderer`].

use crate::error::ServerError;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// How many trailing stderr lines are kept in a failure message.
const STDERR_TAIL_LINES: usize = 5;

/// Turns a self-contained HTML document into the output artifact.
#[async_trait]
pub trait HtmlRenderer: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Render `html` and return the artifact bytes.
    async fn render(&self, html: &str) -> Result<Vec<u8>, ServerError>;
}

/// Renders by piping HTML through an external program.
///
/// The program must read the document from stdin and write the artifact to
/// stdout, e.g. `weasyprint - -`.
#[derive(Debug, Clone)]
pub struct CommandRenderer {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandRenderer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl HtmlRenderer for CommandRenderer {
    fn name(&self) -> &str {
        &self.program
    }

    async fn render(&self, html: &str) -> Result<Vec<u8>, ServerError> {
        let start = Instant::now();
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ServerError::RendererUnavailable {
                program: self.program.clone(),
                detail: e.to_string(),
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ServerError::Internal("renderer stdin was not captured".into()))?;

        // Feed stdin from its own task: a renderer that streams output before
        // it has consumed all input would otherwise deadlock on a full pipe.
        let input = html.as_bytes().to_vec();
        let writer = tokio::spawn(async move {
            stdin.write_all(&input).await?;
            stdin.shutdown().await
        });

        // Dropping the future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                writer.abort();
                return Err(ServerError::RenderTimeout {
                    elapsed_ms: start.elapsed().as_millis() as u64,
                });
            }
        };

        match writer.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(renderer = %self.program, "stdin closed early: {e}"),
            Err(e) => debug!(renderer = %self.program, "stdin writer aborted: {e}"),
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(ServerError::RenderFailed {
                detail: format!(
                    "{} exited with {}: {}",
                    self.program,
                    output.status,
                    stderr_tail(&stderr)
                ),
            });
        }
        if !stderr.trim().is_empty() {
            warn!(renderer = %self.program, "{}", stderr_tail(&stderr));
        }
        if output.stdout.is_empty() {
            return Err(ServerError::RenderFailed {
                detail: format!("{} produced no output", self.program),
            });
        }

        debug!(
            renderer = %self.program,
            bytes = output.stdout.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Rendered document"
        );
        Ok(output.stdout)
    }
}

/// Last few non-empty lines of `stderr`, joined with ` | `.
fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let skip = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[skip..].join(" | ")
}
