//! Fetch engine contract and configuration.
//!
//! The core never resolves how to fetch a media URL itself: codec selection,
//! container negotiation and transport belong to an engine consumed through
//! the [`FetchEngine`] trait. Engines receive a per-item [`FetchRequest`], an
//! [`InterruptSignal`](crate::interrupt::InterruptSignal) they must consult
//! at safe points, and a [`ProgressReporter`](crate::progress::ProgressReporter)
//! they must feed at a bounded interval.
//!
//! # Overview
//!
//! - [`FetchEngine`] - Async trait implemented by concrete engines
//! - [`HttpFetchEngine`] - Streaming GET for direct media file URLs
//! - [`YtDlpEngine`] - `yt-dlp` subprocess for platform URLs and playlists
//! - [`FetchError`] - Typed failures, including the pause/stop control signals

mod http;
mod ytdlp;

pub use http::HttpFetchEngine;
pub use ytdlp::YtDlpEngine;

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::interrupt::{Interrupt, InterruptSignal};
use crate::progress::ProgressReporter;
use crate::queue::{ItemKind, WorkItem};

/// Output selection for a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
    /// Best available video with audio.
    #[default]
    Video,
    /// Audio only, extracted to mp3.
    Audio,
    /// Let the engine pick its default format.
    Auto,
}

impl FetchMode {
    /// Returns the string label used in logs and display.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Auto => "auto",
        }
    }
}

/// Caller-selected destination for a run.
#[derive(Debug, Clone)]
pub struct DestinationConfig {
    /// Writable directory receiving the outputs.
    pub dir: PathBuf,
    /// Output selection applied to every item in the run.
    pub mode: FetchMode,
}

impl DestinationConfig {
    /// Creates a config for the given directory with the default mode.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            mode: FetchMode::default(),
        }
    }

    /// Sets the output mode.
    #[must_use]
    pub fn with_mode(mut self, mode: FetchMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Engine configuration for one queue item.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Source URL.
    pub url: String,
    /// Single file or expanded collection.
    pub kind: ItemKind,
    /// Output selection.
    pub mode: FetchMode,
    /// Destination directory root. Collection items expand into a
    /// per-collection subdirectory; single items land at the root.
    pub dest_dir: PathBuf,
}

impl FetchRequest {
    /// Builds the engine configuration for a queue item.
    #[must_use]
    pub fn for_item(item: &WorkItem, config: &DestinationConfig) -> Self {
        Self {
            url: item.url().to_string(),
            kind: item.kind(),
            mode: config.mode,
            dest_dir: config.dir.clone(),
        }
    }
}

/// Lightweight metadata from a probe. No bytes are downloaded.
#[derive(Debug, Clone, Default)]
pub struct MediaProbe {
    /// Source title (or collection title for multi-entry sources).
    pub title: Option<String>,
    /// Duration in seconds, when the source reports one.
    pub duration_secs: Option<u64>,
    /// Thumbnail image URL, for presentation layers to fetch themselves.
    pub thumbnail_url: Option<String>,
    /// Number of member entries when the source is a collection.
    pub entry_count: Option<usize>,
}

impl MediaProbe {
    /// Classifies the probed source.
    #[must_use]
    pub fn kind(&self) -> ItemKind {
        if self.entry_count.is_some() {
            ItemKind::Collection
        } else {
            ItemKind::Single
        }
    }
}

/// Successful fetch result.
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    /// Final output path for single items; collection members land under
    /// their subdirectory and are not enumerated here.
    pub output: Option<PathBuf>,
}

/// Errors raised by fetch engines.
///
/// `Paused` and `Stopped` are expected control-flow signals that drive state
/// transitions silently; the remaining variants surface as a terminal error
/// state with a human-readable message.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The pause flag was observed at a checkpoint. Partial output stays in
    /// place for a byte-level resume by engines that support one.
    #[error("fetch paused by request")]
    Paused,

    /// The stop flag was observed at a checkpoint.
    #[error("fetch stopped by request")]
    Stopped {
        /// Last-known partial output, for cleanup by the controller.
        partial: Option<PathBuf>,
    },

    /// Network-level failure (DNS, connect, TLS, mid-transfer drop, bad
    /// HTTP status).
    #[error("network error fetching {url}: {message}")]
    Network {
        /// The URL that failed.
        url: String,
        /// Underlying failure description.
        message: String,
    },

    /// The source is not one this engine can fetch.
    #[error("unsupported source {url}: {message}")]
    Unsupported {
        /// The rejected URL.
        url: String,
        /// Why it was rejected.
        message: String,
    },

    /// Filesystem or engine-output failure.
    #[error("output error: {message}")]
    Output {
        /// Underlying failure description.
        message: String,
    },
}

impl FetchError {
    /// Creates a network error.
    pub fn network(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Network {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates an unsupported-source error.
    pub fn unsupported(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unsupported {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates an output error.
    pub fn output(message: impl Into<String>) -> Self {
        Self::Output {
            message: message.into(),
        }
    }

    /// Maps an observed interrupt to the engine error, attaching the
    /// last-known partial output for the stop case.
    #[must_use]
    pub fn from_interrupt(interrupt: Interrupt, partial: Option<PathBuf>) -> Self {
        match interrupt {
            Interrupt::Paused => Self::Paused,
            Interrupt::Stopped => Self::Stopped { partial },
        }
    }

    /// True for the pause/stop control-flow variants.
    #[must_use]
    pub fn is_interrupt(&self) -> bool {
        matches!(self, Self::Paused | Self::Stopped { .. })
    }
}

/// External capability that transfers one work item.
///
/// Implementations must call `interrupt.checkpoint()` at a bounded interval
/// during transfer (at minimum once per reported progress step) and must
/// emit progress through the reporter at roughly sub-second granularity. A
/// stop observed mid-transfer must carry the last-known partial output path
/// in [`FetchError::Stopped`] so the controller can clean it up.
#[async_trait]
pub trait FetchEngine: Send + Sync {
    /// Metadata-only probe of a source. Classifies single vs. collection and
    /// supplies display metadata; no bytes are downloaded.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`] when the source cannot be inspected. Callers
    /// on the enqueue path swallow probe failures and fall back to treating
    /// the source as a single item.
    async fn probe(&self, url: &str) -> Result<MediaProbe, FetchError>;

    /// Transfers the requested item, honoring `interrupt` and reporting
    /// through `reporter`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Paused`]/[`FetchError::Stopped`] when an
    /// interrupt was observed, or a failure variant for real errors.
    async fn run(
        &self,
        request: &FetchRequest,
        interrupt: &InterruptSignal,
        reporter: &ProgressReporter,
    ) -> Result<FetchOutcome, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_classification() {
        let single = MediaProbe::default();
        assert_eq!(single.kind(), ItemKind::Single);

        let collection = MediaProbe {
            entry_count: Some(12),
            ..MediaProbe::default()
        };
        assert_eq!(collection.kind(), ItemKind::Collection);
    }

    #[test]
    fn test_interrupt_mapping_carries_partial_only_for_stop() {
        let paused = FetchError::from_interrupt(Interrupt::Paused, Some(PathBuf::from("/tmp/x")));
        assert!(matches!(paused, FetchError::Paused));

        let stopped = FetchError::from_interrupt(Interrupt::Stopped, Some(PathBuf::from("/tmp/x")));
        match stopped {
            FetchError::Stopped { partial } => {
                assert_eq!(partial, Some(PathBuf::from("/tmp/x")));
            }
            other => panic!("expected Stopped, got {other:?}"),
        }
    }

    #[test]
    fn test_is_interrupt_excludes_real_failures() {
        assert!(FetchError::Paused.is_interrupt());
        assert!(FetchError::Stopped { partial: None }.is_interrupt());
        assert!(!FetchError::network("https://x", "refused").is_interrupt());
        assert!(!FetchError::output("disk full").is_interrupt());
    }

    #[test]
    fn test_request_for_item_copies_destination() {
        let queue = crate::queue::QueueStore::new();
        let item = queue.enqueue(ItemKind::Collection, "https://youtube.com/playlist?list=a");
        let config = DestinationConfig::new("/downloads").with_mode(FetchMode::Audio);

        let request = FetchRequest::for_item(&item, &config);
        assert_eq!(request.url, "https://youtube.com/playlist?list=a");
        assert_eq!(request.kind, ItemKind::Collection);
        assert_eq!(request.mode, FetchMode::Audio);
        assert_eq!(request.dest_dir, PathBuf::from("/downloads"));
    }
}
