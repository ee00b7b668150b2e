//! Payload proxy endpoint
//!
//! GET /proxy/{id} resolves the video and relays the best playable payload
//! back to the client with an exact Content-Length.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use std::sync::Arc;

use crate::routes::valid_video_id;
use crate::server::http::{bad_request_response, error_response, json_response};
use crate::server::AppState;

pub async fn proxy_video(state: Arc<AppState>, video_id: &str) -> Response<Full<Bytes>> {
    if !valid_video_id(video_id) {
        return bad_request_response("invalid video id");
    }

    let meta = match state.resolver.resolve(video_id, true).await {
        Ok(meta) => meta,
        Err(e) => return error_response(&e),
    };

    match state.proxy.fetch_payload(&meta).await {
        Ok(buffer) => {
            match Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "video/mp4")
                .header("Content-Length", buffer.length)
                .body(Full::new(buffer.data))
            {
                Ok(resp) => resp,
                Err(_) => json_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    r#"{"error":"response build failed"}"#.to_string(),
                ),
            }
        }
        Err(e) => error_response(&e),
    }
}
