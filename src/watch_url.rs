//! Acceptance checks for YouTube watch URLs.

use std::sync::LazyLock;

use regex::Regex;

static WATCH_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(https?://)?(www\.)?youtube\.com/watch\?v=[\w-]+(&\S*)?$")
        .expect("watch url pattern")
});

/// Whether `url` has the canonical watch-URL shape. Short links, playlists
/// and embed URLs are rejected.
pub fn is_valid_watch_url(url: &str) -> bool {
    WATCH_URL.is_match(url)
}

/// Pull the `v` query parameter out of a watch URL.
///
/// This is a plain split on the first `"v="` followed by `"&"`, not a query
/// parser. A URL that embeds `v=` inside another parameter yields whatever
/// sits between the two markers.
pub fn extract_video_id(url: &str) -> Option<&str> {
    let (_, rest) = url.split_once("v=")?;
    rest.split('&').next()
}
