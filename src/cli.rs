//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use vidqueue_core::FetchMode;

/// Queued media downloader with cooperative pause, resume and cancel.
///
/// URLs are classified as single items or collections (playlists) on
/// enqueue, then fetched one at a time by a single worker. Ctrl-C cancels
/// the in-flight download and removes its partial output.
#[derive(Parser, Debug)]
#[command(name = "vidqueue")]
#[command(author, version, about)]
pub struct Args {
    /// Media URLs to enqueue (platform links or direct media file links)
    pub urls: Vec<String>,

    /// Destination directory for downloads
    #[arg(short, long, default_value = ".")]
    pub dest: PathBuf,

    /// Output selection
    #[arg(short, long, value_enum, default_value_t = ModeArg::Video)]
    pub mode: ModeArg,

    /// Fetch engine
    #[arg(long, value_enum, default_value_t = EngineArg::Ytdlp)]
    pub engine: EngineArg,

    /// Path to the yt-dlp binary
    #[arg(long, default_value = "yt-dlp")]
    pub ytdlp_path: PathBuf,

    /// Path to an ffmpeg binary for audio extraction and format merging
    #[arg(long)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

/// Output selection flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// Best available video with audio
    Video,
    /// Audio only, extracted to mp3
    Audio,
    /// Let the engine pick its default format
    Auto,
}

impl From<ModeArg> for FetchMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Video => Self::Video,
            ModeArg::Audio => Self::Audio,
            ModeArg::Auto => Self::Auto,
        }
    }
}

/// Fetch engine flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EngineArg {
    /// yt-dlp subprocess (platform links and playlists)
    Ytdlp,
    /// Plain streaming HTTP (direct media file links)
    Http,
}
