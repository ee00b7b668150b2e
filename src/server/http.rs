//! HTTP server implementation
//!
//! hyper http1 with TokioIo, one spawned task per connection.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::cache::TtlStore;
use crate::config::Args;
use crate::proxy::{ProxyEngine, VideoBuffer};
use crate::resolve::Resolver;
use crate::routes;
use crate::store::MetadataStore;

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub resolver: Arc<Resolver>,
    pub proxy: Arc<ProxyEngine>,
    pub store: Arc<MetadataStore>,
    /// Negative-lookup memo, flushed by the admin clear endpoint
    pub misses: Arc<TtlStore<String, ()>>,
    /// Payload buffer cache, flushed by the admin clear endpoint
    pub buffers: Arc<TtlStore<String, VideoBuffer>>,
}

pub async fn run(state: Arc<AppState>) -> std::io::Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!("Vidgate listening on {}", state.args.listen);

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    info!("[{}] {} {}", addr, method, path);

    let response = match (method, path.as_str()) {
        (Method::GET, "/health") | (Method::GET, "/healthz") => {
            routes::health::health_check(state)
        }

        (Method::GET, p) if p.starts_with("/api/videos/") => {
            let video_id = &p["/api/videos/".len()..];
            routes::videos::video_metadata(state, video_id).await
        }

        (Method::GET, p) if p.starts_with("/proxy/") => {
            let video_id = &p["/proxy/".len()..];
            routes::proxy::proxy_video(state, video_id).await
        }

        (Method::POST, "/clear") => routes::admin::clear_caches(state, req).await?,

        _ => not_found_response(&path),
    };

    Ok(response)
}

pub fn json_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    match Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
    {
        Ok(resp) => resp,
        Err(_) => {
            let mut resp = Response::new(Full::new(Bytes::new()));
            *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            resp
        }
    }
}

/// Map a pipeline error onto its HTTP status with a JSON body.
pub fn error_response(err: &crate::error::Error) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": err.to_string(),
    });
    json_response(err.status(), body.to_string())
}

pub fn bad_request_response(message: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": "Bad Request",
        "message": message,
    });
    json_response(StatusCode::BAD_REQUEST, body.to_string())
}

fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": "Not Found",
        "path": path,
    });
    json_response(StatusCode::NOT_FOUND, body.to_string())
}
