//! Upstream video metadata model
//!
//! Field renames match the upstream wire format. Validity of a cached row is
//! decided by the signed-URL expiry embedded in a format URL: the origin
//! rejects the URL past that timestamp, so the cache must never outlive it.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// The only container the proxy serves directly.
const PLAYABLE_CONTAINER: &str = "mp4";

/// One downloadable rendition of a video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Format {
    /// Quality label, e.g. "720p".
    #[serde(rename = "qualityLabel", default)]
    pub label: String,
    /// Container or mime hint, e.g. "mp4".
    #[serde(default)]
    pub container: String,
    /// Signed source URL.
    #[serde(default)]
    pub url: String,
    /// Upstream size hint, e.g. "1280x720".
    #[serde(rename = "size", default)]
    pub size_hint: String,
}

/// Resolved metadata for one content ID. Owns its format list exclusively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    #[serde(rename = "videoId")]
    pub video_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "author", default)]
    pub uploader: String,
    #[serde(rename = "lengthSeconds", default)]
    pub duration_seconds: i64,
    /// Formats in upstream order (ascending quality).
    #[serde(rename = "formatStreams", default)]
    pub formats: Vec<Format>,
    /// When the row stops being servable. Signature-derived, not wall-clock
    /// plus a fixed duration.
    #[serde(default = "epoch")]
    pub expires_at: DateTime<Utc>,
    #[serde(default = "now_secs")]
    pub fetched_at: DateTime<Utc>,
}

/// Unix epoch: the "already expired" sentinel for rows that carry no signed
/// expiry at all.
pub fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(0, 0).unwrap()
}

/// Current time truncated to whole seconds, the precision the store keeps.
fn now_secs() -> DateTime<Utc> {
    Utc.timestamp_opt(Utc::now().timestamp(), 0).unwrap()
}

impl VideoMetadata {
    /// Whether the signed URLs behind this row have lapsed.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Whether any format survived the container filter. Zero playable
    /// formats is a valid result, not an error.
    pub fn has_playable_source(&self) -> bool {
        !self.formats.is_empty()
    }

    /// Candidate formats most-preferred first. Upstream lists ascending
    /// quality, so iteration runs from the back.
    pub fn ranked_formats(&self) -> impl Iterator<Item = &Format> {
        self.formats.iter().rev()
    }

    /// Post-fetch normalization: keep only playable formats, derive the
    /// signed-URL expiry and stamp the fetch time.
    ///
    /// Expiry is taken from the first retained format that carries one,
    /// falling back to any returned format. A fetch with no signed expiry
    /// anywhere is stored already expired so it never serves from cache.
    pub fn normalize(&mut self) {
        let retained: Vec<Format> = self
            .formats
            .iter()
            .filter(|f| f.container == PLAYABLE_CONTAINER)
            .cloned()
            .collect();

        self.expires_at = retained
            .iter()
            .chain(self.formats.iter())
            .filter_map(|f| signed_url_expiry(&f.url))
            .next()
            .unwrap_or_else(epoch);

        self.formats = retained;
        self.fetched_at = now_secs();
    }
}

/// Extract the `expire` query parameter (unix seconds) from a signed URL.
pub fn signed_url_expiry(raw: &str) -> Option<DateTime<Utc>> {
    let url = Url::parse(raw).ok()?;
    let secs = url
        .query_pairs()
        .find(|(k, _)| k.eq_ignore_ascii_case("expire"))
        .and_then(|(_, v)| v.parse::<i64>().ok())?;
    Utc.timestamp_opt(secs, 0).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(label: &str, container: &str, url: &str) -> Format {
        Format {
            label: label.to_string(),
            container: container.to_string(),
            url: url.to_string(),
            size_hint: String::new(),
        }
    }

    #[test]
    fn test_signed_url_expiry() {
        let expiry =
            signed_url_expiry("https://cdn.example.org/videoplayback?expire=1700000000&sig=abc")
                .expect("should parse expire param");
        assert_eq!(expiry.timestamp(), 1_700_000_000);

        assert!(signed_url_expiry("https://cdn.example.org/videoplayback?sig=abc").is_none());
        assert!(signed_url_expiry("not a url").is_none());
    }

    #[test]
    fn test_normalize_filters_and_derives_expiry() {
        let mut meta = VideoMetadata {
            video_id: "abc".to_string(),
            title: "t".to_string(),
            description: String::new(),
            uploader: "u".to_string(),
            duration_seconds: 10,
            formats: vec![
                format("480p", "webm", "https://a.example/v?expire=1000"),
                format("360p", "mp4", "https://b.example/v?expire=1700000000"),
                format("720p", "mp4", "https://c.example/v?expire=1700000300"),
            ],
            expires_at: epoch(),
            fetched_at: epoch(),
        };
        meta.normalize();

        assert_eq!(meta.formats.len(), 2);
        assert!(meta.formats.iter().all(|f| f.container == "mp4"));
        // First retained format wins
        assert_eq!(meta.expires_at.timestamp(), 1_700_000_000);
        // Highest quality first when ranked
        let first = meta.ranked_formats().next().unwrap();
        assert_eq!(first.label, "720p");
    }

    #[test]
    fn test_normalize_without_playable_formats_falls_back_to_any_url() {
        let mut meta = VideoMetadata {
            video_id: "abc".to_string(),
            title: String::new(),
            description: String::new(),
            uploader: String::new(),
            duration_seconds: 0,
            formats: vec![format("480p", "webm", "https://a.example/v?expire=1700000000")],
            expires_at: epoch(),
            fetched_at: epoch(),
        };
        meta.normalize();

        assert!(!meta.has_playable_source());
        assert_eq!(meta.expires_at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_normalize_without_any_expiry_stores_row_expired() {
        let mut meta = VideoMetadata {
            video_id: "abc".to_string(),
            title: String::new(),
            description: String::new(),
            uploader: String::new(),
            duration_seconds: 0,
            formats: vec![format("360p", "mp4", "https://a.example/v")],
            expires_at: epoch(),
            fetched_at: epoch(),
        };
        meta.normalize();

        assert!(meta.has_playable_source());
        assert!(meta.is_expired());
    }

    #[test]
    fn test_wire_deserialization() {
        let body = r#"{
            "videoId": "dQw4w9WgXcQ",
            "title": "Title",
            "description": "Desc",
            "author": "Uploader",
            "lengthSeconds": 212,
            "formatStreams": [
                {"qualityLabel": "360p", "container": "mp4", "url": "https://x/v?expire=1700000000", "size": "640x360"}
            ]
        }"#;
        let meta: VideoMetadata = serde_json::from_str(body).expect("should deserialize");
        assert_eq!(meta.video_id, "dQw4w9WgXcQ");
        assert_eq!(meta.uploader, "Uploader");
        assert_eq!(meta.duration_seconds, 212);
        assert_eq!(meta.formats[0].size_hint, "640x360");
    }
}
