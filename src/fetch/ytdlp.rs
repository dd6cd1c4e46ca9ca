//! `yt-dlp` subprocess engine for platform URLs and playlists.
//!
//! The engine shells out to `yt-dlp` with `--newline` so every progress step
//! arrives as one parseable stdout line. The interrupt signal is consulted
//! after each progress line; an observed pause or stop kills the child
//! process, which bounds pause/cancel latency to one progress step.
//! Collections are downloaded as a whole into a per-collection subdirectory
//! with index-prefixed member filenames.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{FetchEngine, FetchError, FetchMode, FetchOutcome, FetchRequest, MediaProbe};
use crate::interrupt::InterruptSignal;
use crate::progress::{ProgressPhase, ProgressReporter, ProgressUpdate};
use crate::queue::ItemKind;

/// Output template for single items.
const SINGLE_TEMPLATE: &str = "%(title)s.%(ext)s";

/// Output template for collections: one subfolder per collection, members
/// prefixed with their playlist index.
const COLLECTION_TEMPLATE: &str = "%(playlist_title)s/%(playlist_index)s - %(title)s.%(ext)s";

#[allow(clippy::expect_used)]
static PROGRESS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\[download\]\s+(?P<pct>\d+(?:\.\d+)?)%(?:\s+of\s+~?\s*\S+)?(?:\s+at\s+(?P<speed>\S+))?(?:\s+ETA\s+(?P<eta>[\d:]+))?",
    )
    .expect("yt-dlp progress pattern is valid")
});

/// Fetch engine backed by the `yt-dlp` executable.
#[derive(Debug, Clone)]
pub struct YtDlpEngine {
    program: PathBuf,
    ffmpeg: Option<PathBuf>,
}

impl Default for YtDlpEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl YtDlpEngine {
    /// Creates an engine resolving `yt-dlp` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("yt-dlp"),
            ffmpeg: None,
        }
    }

    /// Uses an explicit `yt-dlp` binary.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Points the engine at an ffmpeg binary for audio extraction and
    /// format merging.
    #[must_use]
    pub fn with_ffmpeg(mut self, ffmpeg: impl Into<PathBuf>) -> Self {
        self.ffmpeg = Some(ffmpeg.into());
        self
    }

    /// Builds the argument list for a run.
    fn build_args(&self, request: &FetchRequest) -> Vec<String> {
        let mut args = vec![
            request.url.clone(),
            "--newline".to_string(),
            "--no-warnings".to_string(),
            "--continue".to_string(),
        ];

        let template = match request.kind {
            ItemKind::Single => {
                args.push("--no-playlist".to_string());
                request.dest_dir.join(SINGLE_TEMPLATE)
            }
            ItemKind::Collection => {
                args.push("--yes-playlist".to_string());
                request.dest_dir.join(COLLECTION_TEMPLATE)
            }
        };
        args.push("-o".to_string());
        args.push(template.to_string_lossy().into_owned());

        match request.mode {
            FetchMode::Video => {
                args.push("-f".to_string());
                args.push("bestvideo+bestaudio/best".to_string());
            }
            FetchMode::Audio => {
                args.push("-f".to_string());
                args.push("bestaudio/best".to_string());
                args.push("-x".to_string());
                args.push("--audio-format".to_string());
                args.push("mp3".to_string());
                args.push("--audio-quality".to_string());
                args.push("192K".to_string());
            }
            FetchMode::Auto => {}
        }

        if let Some(ffmpeg) = &self.ffmpeg {
            args.push("--ffmpeg-location".to_string());
            args.push(ffmpeg.to_string_lossy().into_owned());
        }

        args
    }
}

#[async_trait]
impl FetchEngine for YtDlpEngine {
    async fn probe(&self, url: &str) -> Result<MediaProbe, FetchError> {
        let output = Command::new(&self.program)
            .arg(url)
            .args(["--dump-single-json", "--flat-playlist", "--no-warnings"])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                FetchError::output(format!(
                    "failed to launch {}: {e}",
                    self.program.display()
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(url, &stderr, output.status.code()));
        }

        let doc: ProbeDoc = serde_json::from_slice(&output.stdout)
            .map_err(|e| FetchError::output(format!("unreadable probe document: {e}")))?;
        Ok(doc.into_probe())
    }

    async fn run(
        &self,
        request: &FetchRequest,
        interrupt: &InterruptSignal,
        reporter: &ProgressReporter,
    ) -> Result<FetchOutcome, FetchError> {
        tokio::fs::create_dir_all(&request.dest_dir)
            .await
            .map_err(|e| FetchError::output(format!("cannot create destination: {e}")))?;

        let args = self.build_args(request);
        debug!(program = %self.program.display(), ?args, "spawning yt-dlp");

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                FetchError::output(format!(
                    "failed to launch {}: {e}",
                    self.program.display()
                ))
            })?;

        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut collected = Vec::new();
            if let Some(stderr) = stderr {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    collected.push(line);
                }
            }
            collected
        });

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FetchError::output("yt-dlp stdout unavailable"))?;
        let mut lines = BufReader::new(stdout).lines();
        let mut last_destination: Option<PathBuf> = None;

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| FetchError::output(format!("cannot read yt-dlp output: {e}")))?
        {
            if let Some(destination) = parse_destination(&line) {
                debug!(path = %destination.display(), "yt-dlp destination");
                last_destination = Some(destination);
                continue;
            }

            let Some(progress) = parse_progress(&line) else {
                continue;
            };
            reporter.emit(ProgressUpdate {
                phase: ProgressPhase::Downloading,
                fraction: progress.fraction,
                speed_label: progress.speed,
                eta_label: progress.eta,
            });

            if let Err(kind) = interrupt.checkpoint() {
                if let Err(error) = child.kill().await {
                    warn!(error = %error, "failed to kill yt-dlp after interrupt");
                }
                stderr_task.abort();
                let partial = partial_candidate(last_destination.as_deref()).await;
                info!(?kind, "yt-dlp transfer interrupted");
                return Err(FetchError::from_interrupt(kind, partial));
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| FetchError::output(format!("cannot wait on yt-dlp: {e}")))?;
        let stderr_lines = stderr_task.await.unwrap_or_default();

        if status.success() {
            reporter.finished();
            info!(url = %request.url, "yt-dlp completed");
            Ok(FetchOutcome {
                output: last_destination,
            })
        } else {
            let stderr = stderr_lines.join("\n");
            Err(classify_failure(&request.url, &stderr, status.code()))
        }
    }
}

/// Probe document subset emitted by `yt-dlp --dump-single-json`.
#[derive(Debug, Deserialize)]
struct ProbeDoc {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde(default)]
    entries: Option<Vec<serde_json::Value>>,
}

impl ProbeDoc {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn into_probe(self) -> MediaProbe {
        MediaProbe {
            title: self.title,
            duration_secs: self
                .duration
                .filter(|d| d.is_finite() && *d >= 0.0)
                .map(|d| d as u64),
            thumbnail_url: self.thumbnail,
            entry_count: self.entries.map(|entries| entries.len()),
        }
    }
}

/// One parsed `[download]` progress line.
#[derive(Debug, PartialEq)]
struct ParsedProgress {
    fraction: f64,
    speed: Option<String>,
    eta: Option<String>,
}

fn parse_progress(line: &str) -> Option<ParsedProgress> {
    let captures = PROGRESS_LINE.captures(line)?;
    let fraction = captures
        .name("pct")
        .and_then(|m| m.as_str().parse::<f64>().ok())?
        / 100.0;
    let speed = captures
        .name("speed")
        .map(|m| m.as_str().to_string())
        .filter(|s| !s.eq_ignore_ascii_case("unknown"));
    let eta = captures.name("eta").map(|m| m.as_str().to_string());
    Some(ParsedProgress {
        fraction,
        speed,
        eta,
    })
}

fn parse_destination(line: &str) -> Option<PathBuf> {
    line.strip_prefix("[download] Destination: ")
        .map(|path| PathBuf::from(path.trim()))
}

/// Picks the on-disk partial to report after a kill: yt-dlp writes
/// `<destination>.part` while transferring and may have renamed it already.
async fn partial_candidate(destination: Option<&Path>) -> Option<PathBuf> {
    let destination = destination?;
    let mut part = destination.as_os_str().to_os_string();
    part.push(".part");
    let part = PathBuf::from(part);
    if tokio::fs::try_exists(&part).await.unwrap_or(false) {
        return Some(part);
    }
    if tokio::fs::try_exists(destination).await.unwrap_or(false) {
        return Some(destination.to_path_buf());
    }
    None
}

/// Maps a failed exit to the error taxonomy using the stderr text.
fn classify_failure(url: &str, stderr: &str, exit_code: Option<i32>) -> FetchError {
    let lowered = stderr.to_lowercase();
    if lowered.contains("unsupported url") || lowered.contains("is not a valid url") {
        return FetchError::unsupported(url, last_error_line(stderr));
    }
    if lowered.contains("unable to download")
        || lowered.contains("http error")
        || lowered.contains("timed out")
        || lowered.contains("connection")
        || lowered.contains("network")
    {
        return FetchError::network(url, last_error_line(stderr));
    }
    let detail = if stderr.trim().is_empty() {
        format!(
            "yt-dlp exited with status {}",
            exit_code.map_or_else(|| "unknown".to_string(), |c| c.to_string())
        )
    } else {
        last_error_line(stderr)
    };
    FetchError::output(detail)
}

fn last_error_line(stderr: &str) -> String {
    stderr
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("unknown failure")
        .trim()
        .to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_progress_full_line() {
        let parsed =
            parse_progress("[download]  42.5% of 10.00MiB at 1.25MiB/s ETA 00:05").unwrap();
        assert!((parsed.fraction - 0.425).abs() < f64::EPSILON);
        assert_eq!(parsed.speed.as_deref(), Some("1.25MiB/s"));
        assert_eq!(parsed.eta.as_deref(), Some("00:05"));
    }

    #[test]
    fn test_parse_progress_unknown_speed_is_dropped() {
        let parsed = parse_progress("[download]   0.0% of ~ 5.00MiB at Unknown B/s").unwrap();
        assert_eq!(parsed.fraction, 0.0);
        assert_eq!(parsed.speed, None);
        assert_eq!(parsed.eta, None);
    }

    #[test]
    fn test_parse_progress_ignores_unrelated_lines() {
        assert!(parse_progress("[youtube] abc: Downloading webpage").is_none());
        assert!(parse_progress("[download] Destination: clip.mp4").is_none());
    }

    #[test]
    fn test_parse_destination_line() {
        let path = parse_destination("[download] Destination: /tmp/out/My Clip.webm").unwrap();
        assert_eq!(path, PathBuf::from("/tmp/out/My Clip.webm"));
        assert!(parse_destination("[download]  10.0%").is_none());
    }

    #[test]
    fn test_build_args_single_video() {
        let engine = YtDlpEngine::new();
        let request = FetchRequest {
            url: "https://youtu.be/abc".to_string(),
            kind: ItemKind::Single,
            mode: FetchMode::Video,
            dest_dir: PathBuf::from("/downloads"),
        };

        let args = engine.build_args(&request);
        assert!(args.contains(&"--no-playlist".to_string()));
        assert!(args.contains(&"bestvideo+bestaudio/best".to_string()));
        let template_pos = args.iter().position(|a| a == "-o").unwrap();
        assert_eq!(args[template_pos + 1], "/downloads/%(title)s.%(ext)s");
    }

    #[test]
    fn test_build_args_collection_expands_into_subfolder() {
        let engine = YtDlpEngine::new();
        let request = FetchRequest {
            url: "https://youtube.com/playlist?list=x".to_string(),
            kind: ItemKind::Collection,
            mode: FetchMode::Auto,
            dest_dir: PathBuf::from("/downloads"),
        };

        let args = engine.build_args(&request);
        assert!(args.contains(&"--yes-playlist".to_string()));
        assert!(!args.contains(&"-f".to_string()));
        let template_pos = args.iter().position(|a| a == "-o").unwrap();
        assert_eq!(
            args[template_pos + 1],
            "/downloads/%(playlist_title)s/%(playlist_index)s - %(title)s.%(ext)s"
        );
    }

    #[test]
    fn test_build_args_audio_requests_mp3_extraction() {
        let engine = YtDlpEngine::new().with_ffmpeg("/usr/bin/ffmpeg");
        let request = FetchRequest {
            url: "https://youtu.be/abc".to_string(),
            kind: ItemKind::Single,
            mode: FetchMode::Audio,
            dest_dir: PathBuf::from("/downloads"),
        };

        let args = engine.build_args(&request);
        assert!(args.contains(&"-x".to_string()));
        assert!(args.contains(&"mp3".to_string()));
        assert!(args.contains(&"--ffmpeg-location".to_string()));
        assert!(args.contains(&"/usr/bin/ffmpeg".to_string()));
    }

    #[test]
    fn test_classify_failure_variants() {
        let unsupported = classify_failure("https://x", "ERROR: Unsupported URL: https://x", Some(1));
        assert!(matches!(unsupported, FetchError::Unsupported { .. }));

        let network = classify_failure("https://x", "ERROR: unable to download video data", Some(1));
        assert!(matches!(network, FetchError::Network { .. }));

        let other = classify_failure("https://x", "", Some(2));
        match other {
            FetchError::Output { message } => assert!(message.contains("status 2")),
            other => panic!("expected Output, got {other:?}"),
        }
    }

    #[test]
    fn test_probe_doc_classifies_playlists() {
        let doc: ProbeDoc = serde_json::from_str(
            r#"{"title": "Mix", "entries": [{"id": "a"}, {"id": "b"}]}"#,
        )
        .unwrap();
        let probe = doc.into_probe();
        assert_eq!(probe.entry_count, Some(2));
        assert_eq!(probe.kind(), ItemKind::Collection);

        let doc: ProbeDoc = serde_json::from_str(
            r#"{"title": "Clip", "duration": 212.4, "thumbnail": "https://i.example/t.jpg"}"#,
        )
        .unwrap();
        let probe = doc.into_probe();
        assert_eq!(probe.entry_count, None);
        assert_eq!(probe.duration_secs, Some(212));
        assert_eq!(probe.kind(), ItemKind::Single);
    }
}
