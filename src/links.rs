//! Supported-link detection for enqueue validation.
//!
//! The core treats validation as a caller concern: these predicates are the
//! allow-list glue a caller runs before constructing a work item. Platform
//! links go to the `yt-dlp` engine; bare media file URLs can be fetched over
//! plain HTTP.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

#[allow(clippy::expect_used)]
static SUPPORTED_HOST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(https?://)?(www\.)?(youtube\.com|youtu\.be|tiktok\.com|vimeo\.com|facebook\.com|instagram\.com)",
    )
    .expect("supported-host pattern is valid")
});

/// File extensions accepted as direct media downloads.
const MEDIA_EXTENSIONS: [&str; 10] = [
    "mp4", "m4a", "mp3", "webm", "mkv", "mov", "wav", "flac", "ogg", "avi",
];

/// Returns true when the string names a supported media platform.
#[must_use]
pub fn is_supported_link(input: &str) -> bool {
    SUPPORTED_HOST.is_match(input)
}

/// Returns true for an `http(s)` URL whose path ends in a known media file
/// extension.
#[must_use]
pub fn is_direct_file_link(input: &str) -> bool {
    let Ok(url) = Url::parse(input) else {
        return false;
    };
    if !matches!(url.scheme(), "http" | "https") {
        return false;
    }
    let path = url.path().to_ascii_lowercase();
    MEDIA_EXTENSIONS
        .iter()
        .any(|ext| path.ends_with(&format!(".{ext}")))
}
