//! Upstream provider access
//!
//! The directory endpoint hands out candidate instance hosts; each instance
//! exposes the same per-video metadata endpoint. Any single instance is
//! unreliable, so everything above this module goes through [`InstancePool`]
//! for failover.

mod instance;
mod video;

pub use instance::{FailureRecord, InstancePool};
pub use video::{epoch, signed_url_expiry, Format, VideoMetadata};

use async_trait::async_trait;
use url::Url;

use crate::error::{Error, Result};

/// Fields requested from the per-video endpoint.
const VIDEO_FIELDS: &str = "videoId,title,description,author,lengthSeconds,size,formatStreams";

/// Network seam to the upstream directory and metadata endpoints. Tests
/// inject fakes through this trait.
#[async_trait]
pub trait UpstreamApi: Send + Sync {
    /// Candidate instance hosts, in the directory's own preference order.
    async fn list_instances(&self) -> Result<Vec<String>>;

    /// Raw metadata for one video from the given instance. `NotFound` is
    /// terminal; any other failure is transient and carries its status.
    async fn fetch_video(&self, instance: &str, video_id: &str) -> Result<VideoMetadata>;
}

/// reqwest-backed implementation against real upstream endpoints.
pub struct HttpUpstream {
    client: reqwest::Client,
    directory_endpoint: String,
}

impl HttpUpstream {
    pub fn new(client: reqwest::Client, directory_endpoint: String) -> Self {
        Self {
            client,
            directory_endpoint,
        }
    }

    fn video_endpoint(&self, instance: &str, video_id: &str) -> Result<Url> {
        let mut url = Url::parse(&format!("https://{instance}"))
            .map_err(|_| Error::UpstreamTransient { status: 502 })?;
        url.set_path(&format!("/api/v1/videos/{video_id}"));
        url.set_query(Some(&format!("fields={VIDEO_FIELDS}")));
        Ok(url)
    }
}

#[async_trait]
impl UpstreamApi for HttpUpstream {
    async fn list_instances(&self) -> Result<Vec<String>> {
        let resp = self
            .client
            .get(&self.directory_endpoint)
            .send()
            .await
            .map_err(Error::transport)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::UpstreamTransient {
                status: status.as_u16(),
            });
        }

        // The directory returns an array of arrays; the first element of
        // each inner array is the candidate host.
        let rows: Vec<serde_json::Value> = resp
            .json()
            .await
            .map_err(|_| Error::UpstreamTransient { status: 502 })?;

        Ok(rows
            .iter()
            .filter_map(|row| row.get(0)?.as_str().map(str::to_string))
            .collect())
    }

    async fn fetch_video(&self, instance: &str, video_id: &str) -> Result<VideoMetadata> {
        let endpoint = self.video_endpoint(instance, video_id)?;
        let resp = self
            .client
            .get(endpoint)
            .send()
            .await
            .map_err(Error::transport)?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound(video_id.to_string()));
        }
        if !status.is_success() {
            return Err(Error::UpstreamTransient {
                status: status.as_u16(),
            });
        }

        // A malformed body means the instance is inconsistent; treat it as
        // transient so the pool rotates away from it.
        resp.json::<VideoMetadata>()
            .await
            .map_err(|_| Error::UpstreamTransient { status: 502 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_endpoint_escapes_id() {
        let upstream = HttpUpstream::new(reqwest::Client::new(), "https://d.example".to_string());
        let url = upstream
            .video_endpoint("inv.example.org", "abc?def")
            .expect("should build url");
        assert_eq!(url.host_str(), Some("inv.example.org"));
        assert!(url.path().starts_with("/api/v1/videos/abc"));
        assert!(!url.path().contains('?'));
        assert!(url.query().unwrap().starts_with("fields="));
    }
}
