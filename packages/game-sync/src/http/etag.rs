//! ETag helpers for the game snapshot resource.
//!
//! The client only ever *reads* server-issued ETags. `game_etag` exists so
//! tests and diagnostics can build the exact value the backend emits; it must
//! never be used to fabricate an `If-None-Match` value.

use crate::error::SyncError;

/// Format: `"game-{id}-v{version}"` including the surrounding quotes of an HTTP entity tag
///
/// # Example
/// ```
/// # use game_sync::http::etag::game_etag;
/// assert_eq!(game_etag(123, 5), r#""game-123-v5""#);
/// ```
pub fn game_etag(id: i64, version: i32) -> String {
    format!(r#""game-{id}-v{version}""#)
}

/// Parse the lock version from a game ETag value.
///
/// Accepts ETags in the format `"game-{id}-v{version}"`, optionally weak (`W/`).
pub fn parse_game_version_from_etag(s: &str) -> Result<i32, SyncError> {
    let s = s.trim().trim_start_matches("W/").trim_matches('"');

    let version_prefix = "-v";
    let version_start = s.rfind(version_prefix).ok_or_else(|| {
        SyncError::decode(format!(
            "Invalid ETag format: missing version marker, got: \"{s}\""
        ))
    })? + version_prefix.len();

    let version_str = &s[version_start..];
    version_str.parse::<i32>().map_err(|_| {
        SyncError::decode(format!(
            "Invalid ETag format: version must be a valid integer, got: \"{version_str}\""
        ))
    })
}
