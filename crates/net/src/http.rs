//! Client-facing HTTP/1.1 surface of a coordinator.
//!
//! The key is the request path without its leading `/`, taken verbatim.
//!
//! | request        | outcome                                            |
//! |----------------|----------------------------------------------------|
//! | `GET /key`     | `302` + `Status: Ok` + value, or `404` + `Status: No such key` |
//! | `PUT /key`     | `201`; unreadable body gives `404`                 |
//! | `DELETE /key`  | `501`                                              |
//! | other method   | `405`                                              |
//!
//! Quorum failures map to `503` (not reached) and `504` (timed out).

use abd_common::DisplayKey;
use abd_kv::coordinator::{Coordinator, KvError};
use abd_kv::replica_client::ReplicaClient;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::header::HeaderValue;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Name of the response header carrying a short outcome description.
pub const STATUS_HEADER: &str = "status";

fn respond(status: StatusCode, message: Option<&str>, body: Bytes) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(body));
    *resp.status_mut() = status;
    if let Some(value) = message.and_then(|m| HeaderValue::from_str(m).ok()) {
        resp.headers_mut().insert(STATUS_HEADER, value);
    }
    resp
}

fn kv_error_response(err: &KvError) -> Response<Full<Bytes>> {
    let status = match err {
        KvError::QuorumNotReached { .. } => StatusCode::SERVICE_UNAVAILABLE,
        KvError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        KvError::TimestampExhausted(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    respond(status, Some(&err.to_string()), Bytes::new())
}

/// Serve one client request against `coordinator`.
pub async fn handle<R, B>(coordinator: &Coordinator<R>, req: Request<B>) -> Response<Full<Bytes>>
where
    R: ReplicaClient,
    B: Body,
    B::Error: std::fmt::Display,
{
    let path = req.uri().path();
    let key = path.strip_prefix('/').unwrap_or(path).as_bytes().to_vec();
    tracing::info!("{} {}", req.method(), req.uri());

    if key.is_empty() {
        return respond(StatusCode::BAD_REQUEST, Some("Missing key"), Bytes::new());
    }

    match *req.method() {
        Method::GET => match coordinator.get(&key).await {
            Ok(Some(value)) => respond(StatusCode::FOUND, Some("Ok"), Bytes::from(value)),
            Ok(None) => {
                tracing::info!("no such key: {}", DisplayKey(&key));
                respond(StatusCode::NOT_FOUND, Some("No such key"), Bytes::new())
            }
            Err(e) => {
                tracing::warn!("GET {} failed: {}", DisplayKey(&key), e);
                kv_error_response(&e)
            }
        },
        Method::PUT => {
            let value = match req.into_body().collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    tracing::warn!("cannot read body for {}: {}", DisplayKey(&key), e);
                    return respond(
                        StatusCode::NOT_FOUND,
                        Some("Cannot read value from request body"),
                        Bytes::new(),
                    );
                }
            };
            match coordinator.set(&key, value.to_vec()).await {
                Ok(_) => respond(StatusCode::CREATED, None, Bytes::new()),
                Err(e) => {
                    tracing::warn!("PUT {} failed: {}", DisplayKey(&key), e);
                    kv_error_response(&e)
                }
            }
        }
        Method::DELETE => respond(
            StatusCode::NOT_IMPLEMENTED,
            Some("Delete is not supported"),
            Bytes::new(),
        ),
        _ => respond(StatusCode::METHOD_NOT_ALLOWED, None, Bytes::new()),
    }
}

/// Accept HTTP/1.1 connections on `listener` and serve each one on its own
/// task. Runs until the listener fails. Call from a `tokio::spawn` or a
/// `select!`.
pub async fn serve_http<R: ReplicaClient>(
    listener: TcpListener,
    coordinator: Arc<Coordinator<R>>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing::info!("HTTP surface listening on http://{}", listener.local_addr()?);

    loop {
        let (stream, peer) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let coordinator = coordinator.clone();
                async move { Ok::<_, Infallible>(handle(&coordinator, req).await) }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::debug!("HTTP connection from {} ended with error: {}", peer, e);
            }
        });
    }
}
