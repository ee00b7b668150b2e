//! Video metadata endpoint
//!
//! GET /api/videos/{id} resolves metadata through the cache-then-upstream
//! pipeline and returns it as JSON.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use std::sync::Arc;
use tracing::warn;

use crate::routes::valid_video_id;
use crate::server::http::{bad_request_response, error_response, json_response};
use crate::server::AppState;

pub async fn video_metadata(state: Arc<AppState>, video_id: &str) -> Response<Full<Bytes>> {
    if !valid_video_id(video_id) {
        return bad_request_response("invalid video id");
    }

    match state.resolver.resolve(video_id, true).await {
        Ok(meta) => {
            let body = match serde_json::to_string(&meta) {
                Ok(body) => body,
                Err(e) => {
                    warn!(video_id, error = %e, "Failed to serialize metadata");
                    return json_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        r#"{"error":"serialization failed"}"#.to_string(),
                    );
                }
            };
            json_response(StatusCode::OK, body)
        }
        Err(e) => error_response(&e),
    }
}
