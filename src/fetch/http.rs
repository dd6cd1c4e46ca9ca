//! Streaming HTTP engine for direct media file URLs.
//!
//! Downloads stream straight to a `.partial` staging file next to the final
//! path and are renamed into place on success, so an interrupted transfer
//! never leaves a half-written file under the final name. The interrupt
//! signal is consulted once per received chunk, which bounds pause/cancel
//! latency to one network read.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::CONTENT_LENGTH;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info};
use url::Url;

use super::{FetchEngine, FetchError, FetchOutcome, FetchRequest, MediaProbe};
use crate::interrupt::InterruptSignal;
use crate::progress::ProgressReporter;

/// Default HTTP connect timeout.
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (large files).
const READ_TIMEOUT_SECS: u64 = 300;

/// Minimum interval between emitted progress samples.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Fetch engine for plain file URLs, streaming the body to disk.
///
/// A bare HTTP GET cannot express a collection, so `probe` always
/// classifies sources as single items.
#[derive(Debug, Clone)]
pub struct HttpFetchEngine {
    client: Client,
}

impl Default for HttpFetchEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpFetchEngine {
    /// Creates an engine with default timeouts.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(READ_TIMEOUT_SECS))
            .gzip(true)
            .build()
            .expect("failed to build HTTP client with static configuration");
        Self { client }
    }
}

#[async_trait]
impl FetchEngine for HttpFetchEngine {
    async fn probe(&self, url: &str) -> Result<MediaProbe, FetchError> {
        let parsed =
            Url::parse(url).map_err(|e| FetchError::unsupported(url, e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::unsupported(
                url,
                format!("scheme '{}' is not fetchable over HTTP", parsed.scheme()),
            ));
        }
        Ok(MediaProbe {
            title: Some(filename_from_url(&parsed)),
            ..MediaProbe::default()
        })
    }

    async fn run(
        &self,
        request: &FetchRequest,
        interrupt: &InterruptSignal,
        reporter: &ProgressReporter,
    ) -> Result<FetchOutcome, FetchError> {
        let parsed = Url::parse(&request.url)
            .map_err(|e| FetchError::unsupported(&request.url, e.to_string()))?;

        tokio::fs::create_dir_all(&request.dest_dir)
            .await
            .map_err(|e| FetchError::output(format!("cannot create destination: {e}")))?;

        let filename = filename_from_url(&parsed);
        let final_path = request.dest_dir.join(&filename);
        let partial_path = request.dest_dir.join(format!("{filename}.partial"));

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| FetchError::network(&request.url, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::network(
                &request.url,
                format!("HTTP {}", status.as_u16()),
            ));
        }

        let content_length = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        debug!(
            url = %request.url,
            path = %final_path.display(),
            content_length,
            "starting streamed download"
        );

        let bytes_written = self
            .stream_body(
                response,
                &partial_path,
                content_length,
                interrupt,
                reporter,
                &request.url,
            )
            .await?;

        if let Some(expected) = content_length {
            if bytes_written != expected {
                return Err(FetchError::output(format!(
                    "size mismatch for {}: expected {expected} bytes, got {bytes_written}",
                    final_path.display()
                )));
            }
        }

        tokio::fs::rename(&partial_path, &final_path)
            .await
            .map_err(|e| FetchError::output(format!("cannot finalize output: {e}")))?;

        reporter.finished();
        info!(path = %final_path.display(), bytes = bytes_written, "download completed");

        Ok(FetchOutcome {
            output: Some(final_path),
        })
    }
}

impl HttpFetchEngine {
    /// Streams the response body into `partial_path`, checkpointing and
    /// reporting per chunk. Returns bytes written. The staging file is left
    /// in place on interrupt or error; the caller decides its fate.
    async fn stream_body(
        &self,
        response: reqwest::Response,
        partial_path: &Path,
        content_length: Option<u64>,
        interrupt: &InterruptSignal,
        reporter: &ProgressReporter,
        url: &str,
    ) -> Result<u64, FetchError> {
        let file = File::create(partial_path)
            .await
            .map_err(|e| FetchError::output(format!("cannot create staging file: {e}")))?;
        let mut writer = BufWriter::new(file);
        let mut stream = response.bytes_stream();

        let started = Instant::now();
        let mut last_emit: Option<Instant> = None;
        let mut bytes_written: u64 = 0;

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(|e| FetchError::network(url, e.to_string()))?;
            writer
                .write_all(&chunk)
                .await
                .map_err(|e| FetchError::output(format!("write failed: {e}")))?;
            bytes_written += chunk.len() as u64;

            if last_emit.is_none_or(|at| at.elapsed() >= PROGRESS_INTERVAL) {
                last_emit = Some(Instant::now());
                emit_sample(reporter, bytes_written, content_length, started.elapsed());
            }

            if let Err(kind) = interrupt.checkpoint() {
                // Keep the bytes received so far; a pause may resume them.
                let _ = writer.flush().await;
                debug!(path = %partial_path.display(), bytes = bytes_written, "transfer interrupted");
                return Err(FetchError::from_interrupt(
                    kind,
                    Some(partial_path.to_path_buf()),
                ));
            }
        }

        writer
            .flush()
            .await
            .map_err(|e| FetchError::output(format!("flush failed: {e}")))?;
        Ok(bytes_written)
    }
}

/// Emits one progress sample from raw transfer counters.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn emit_sample(
    reporter: &ProgressReporter,
    bytes_written: u64,
    content_length: Option<u64>,
    elapsed: Duration,
) {
    let elapsed_secs = elapsed.as_secs_f64().max(0.001);
    let speed = bytes_written as f64 / elapsed_secs;
    let fraction = content_length
        .filter(|total| *total > 0)
        .map_or(0.0, |total| bytes_written as f64 / total as f64);
    let eta = content_length.and_then(|total| {
        if speed > 0.0 && bytes_written < total {
            Some(((total - bytes_written) as f64 / speed) as u64)
        } else {
            None
        }
    });
    reporter.downloading(fraction, Some(speed), eta);
}

/// Derives an output filename from the last URL path segment.
///
/// Percent-encoded segments are decoded and the result sanitized; URLs with
/// no usable segment fall back to a fixed name.
fn filename_from_url(url: &Url) -> String {
    let segment = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|s| !s.is_empty());

    let Some(raw) = segment else {
        return "download.bin".to_string();
    };

    let decoded = urlencoding::decode(raw).map_or_else(|_| raw.to_string(), |d| d.into_owned());
    let sanitized = sanitize_filename(&decoded);
    if sanitized.is_empty() {
        "download.bin".to_string()
    } else {
        sanitized
    }
}

/// Strips path separators and control characters from a candidate filename.
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim_matches(['.', ' '])
        .to_string()
}
