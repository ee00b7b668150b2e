//! Admin endpoint
//!
//! POST /clear drops every caching layer at once: the SQLite metadata rows,
//! the negative-lookup memo and the payload buffers. Guarded by the shared
//! API key, submitted as an urlencoded form field.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::server::http::{bad_request_response, error_response, json_response};
use crate::server::AppState;

#[derive(Deserialize)]
struct ClearForm {
    #[serde(rename = "apiKey")]
    api_key: String,
}

pub async fn clear_caches(
    state: Arc<AppState>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let body = req.collect().await?.to_bytes();

    let form: ClearForm = match serde_urlencoded::from_bytes(&body) {
        Ok(form) => form,
        Err(_) => return Ok(bad_request_response("missing apiKey field")),
    };

    if form.api_key != state.args.api_key {
        warn!("Cache clear rejected: wrong API key");
        return Ok(json_response(
            StatusCode::FORBIDDEN,
            r#"{"error":"invalid api key"}"#.to_string(),
        ));
    }

    if let Err(e) = state.store.clear() {
        return Ok(error_response(&e));
    }
    let misses = state.misses.len();
    let buffers = state.buffers.len();
    state.misses.clear();
    state.buffers.clear();

    info!(misses, buffers, "All caches cleared");
    Ok(json_response(
        StatusCode::OK,
        r#"{"cleared":true}"#.to_string(),
    ))
}
