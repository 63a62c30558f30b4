//! HTTP ingestion and query boundary
//!
//! Routes:
//! - `POST /ble-data` - apply one beacon report
//! - `GET /get-proximity-data` - full beacon and device snapshot
//! - `GET /devices/{id}` - one device
//! - `POST /proximity` - distance difference between two readings
//! - `GET /metrics` - Prometheus text exposition
//! - `GET /health` - liveness
//!
//! Request bodies are capped at [`MAX_BODY_BYTES`]. Handlers are plain
//! functions over a body slice so they can be tested without a socket.

use crate::domain::error::EngineError;
use crate::domain::types::{epoch_ms, BeaconReport};
use crate::io::prometheus::format_prometheus_metrics;
use crate::services::tracker::ProximityTracker;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::error::Error as StdError;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Largest accepted request body
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Shared request handler state
pub struct AppState {
    pub tracker: Arc<ProximityTracker>,
    pub site_id: String,
}

/// Status code plus JSON (or text) body produced by a route
#[derive(Debug)]
pub struct Reply {
    pub status: StatusCode,
    pub content_type: &'static str,
    pub body: String,
}

const JSON: &str = "application/json";
const PROMETHEUS_TEXT: &str = "text/plain; version=0.0.4; charset=utf-8";

impl Reply {
    fn json<T: Serialize>(status: StatusCode, value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(body) => Self { status, content_type: JSON, body },
            Err(e) => Self::error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
        }
    }

    fn error(status: StatusCode, message: &str) -> Self {
        let body = serde_json::json!({ "status": "error", "message": message }).to_string();
        Self { status, content_type: JSON, body }
    }

    fn text(status: StatusCode, content_type: &'static str, body: String) -> Self {
        Self { status, content_type, body }
    }

    fn into_response(self) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(Bytes::from(self.body)));
        *response.status_mut() = self.status;
        response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(self.content_type));
        response
    }
}

#[derive(Debug, Serialize)]
struct IngestReply {
    status: &'static str,
    device_count: usize,
    applied: usize,
    dropped: usize,
}

#[derive(Debug, Deserialize)]
struct ProximityRequest {
    device1_rssi: f64,
    device2_rssi: f64,
}

#[derive(Debug, Serialize)]
struct ProximityReply {
    proximity: f64,
}

/// `POST /ble-data`
pub fn handle_ble_data(state: &AppState, body: &[u8], now: u64) -> Reply {
    let report: BeaconReport = match serde_json::from_slice(body) {
        Ok(report) => report,
        Err(e) => {
            debug!(error = %e, "ble_data_malformed");
            return Reply::error(StatusCode::BAD_REQUEST, &format!("invalid report: {e}"));
        }
    };
    let outcome = state.tracker.ingest(&report, now);
    Reply::json(
        StatusCode::OK,
        &IngestReply {
            status: "success",
            device_count: outcome.device_count,
            applied: outcome.applied,
            dropped: outcome.dropped,
        },
    )
}

/// `POST /proximity`
pub fn handle_proximity(state: &AppState, body: &[u8]) -> Reply {
    match serde_json::from_slice::<ProximityRequest>(body) {
        Ok(req) => Reply::json(
            StatusCode::OK,
            &ProximityReply { proximity: state.tracker.proximity(req.device1_rssi, req.device2_rssi) },
        ),
        Err(e) => Reply::error(StatusCode::BAD_REQUEST, &format!("invalid request: {e}")),
    }
}

/// `GET /get-proximity-data`
pub fn handle_snapshot(state: &AppState) -> Reply {
    Reply::json(StatusCode::OK, &state.tracker.snapshot())
}

/// `GET /devices/{id}`
pub fn handle_device(state: &AppState, device_id: &str) -> Reply {
    match state.tracker.device(device_id) {
        Ok(view) => Reply::json(StatusCode::OK, &view),
        Err(e @ EngineError::UnknownDevice(_)) => Reply::error(StatusCode::NOT_FOUND, &e.to_string()),
        Err(e) => Reply::error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

/// Dispatch one request by method and path
pub fn route(state: &AppState, method: &Method, path: &str, body: &[u8], now: u64) -> Reply {
    match (method, path) {
        (&Method::POST, "/ble-data") => handle_ble_data(state, body, now),
        (&Method::GET, "/get-proximity-data") => handle_snapshot(state),
        (&Method::POST, "/proximity") => handle_proximity(state, body),
        (&Method::GET, "/metrics") => Reply::text(
            StatusCode::OK,
            PROMETHEUS_TEXT,
            format_prometheus_metrics(state.tracker.metrics(), &state.site_id),
        ),
        (&Method::GET, "/health") => Reply::text(StatusCode::OK, "text/plain", "ok".to_string()),
        (&Method::GET, p) if p.starts_with("/devices/") => {
            handle_device(state, &p["/devices/".len()..])
        }
        _ => Reply::error(StatusCode::NOT_FOUND, "not found"),
    }
}

/// Collect a request body, failing once it exceeds [`MAX_BODY_BYTES`]
async fn read_body<B>(body: B) -> Result<Bytes, Box<dyn StdError + Send + Sync>>
where
    B: Body,
    B::Error: Into<Box<dyn StdError + Send + Sync>>,
{
    Ok(Limited::new(body, MAX_BODY_BYTES).collect().await?.to_bytes())
}

/// 413 for an oversized body, 400 for anything else that broke the read
fn body_error_status(err: &(dyn StdError + Send + Sync + 'static)) -> StatusCode {
    if err.is::<LengthLimitError>() {
        StatusCode::PAYLOAD_TOO_LARGE
    } else {
        StatusCode::BAD_REQUEST
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let body = match read_body(req.into_body()).await {
        Ok(body) => body,
        Err(e) => {
            let status = body_error_status(&*e);
            warn!(path = %path, status = %status.as_u16(), error = %e, "request_body_rejected");
            let message = if status == StatusCode::PAYLOAD_TOO_LARGE {
                "request body too large"
            } else {
                "failed to read request body"
            };
            return Ok(Reply::error(status, message).into_response());
        }
    };

    let reply = route(&state, &method, &path, &body, epoch_ms());
    debug!(method = %method, path = %path, status = %reply.status.as_u16(), "http_request");
    Ok(reply.into_response())
}

/// Run the HTTP server until shutdown
pub async fn start_http_server(
    addr: SocketAddr,
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, site = %state.site_id, "http_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _peer)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let state = state.clone();
                                async move { handle_request(req, state).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                debug!(error = %e, "http_connection_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "http_accept_failed");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("http_server_shutdown");
                    break;
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::config::{Config, FixedBeacon};
    use crate::infra::metrics::Metrics;

    const NOW: u64 = 1_767_617_600_000;

    fn test_state() -> AppState {
        let config = Config::default().with_beacons(vec![
            FixedBeacon { id: "B1".to_string(), x: 0.0, y: 0.0 },
            FixedBeacon { id: "B2".to_string(), x: 5.0, y: 0.0 },
        ]);
        let tracker = ProximityTracker::new(&config, Arc::new(Metrics::new()), None, NOW);
        AppState { tracker: Arc::new(tracker), site_id: "test".to_string() }
    }

    fn json(reply: &Reply) -> serde_json::Value {
        serde_json::from_str(&reply.body).unwrap()
    }

    #[test]
    fn test_ble_data_success() {
        let state = test_state();
        let body = br#"{"beacon":"B1","battery":87,"devices":[{"id":"D1","rssi":-61,"type":"phone"}]}"#;
        let reply = route(&state, &Method::POST, "/ble-data", body, NOW);

        assert_eq!(reply.status, StatusCode::OK);
        let value = json(&reply);
        assert_eq!(value["status"], "success");
        assert_eq!(value["device_count"], 1);
        assert_eq!(value["applied"], 1);
        assert_eq!(value["dropped"], 0);
    }

    #[test]
    fn test_ble_data_all_invalid_still_success() {
        let state = test_state();
        let body = br#"{"beacon":"B1","devices":[{"id":"D1","rssi":20},{"id":"D2","rssi":-300}]}"#;
        let reply = route(&state, &Method::POST, "/ble-data", body, NOW);

        assert_eq!(reply.status, StatusCode::OK);
        let value = json(&reply);
        assert_eq!(value["status"], "success");
        assert_eq!(value["applied"], 0);
        assert_eq!(value["dropped"], 2);
        assert_eq!(value["device_count"], 0);
    }

    #[test]
    fn test_ble_data_malformed() {
        let state = test_state();
        let bodies: [&[u8]; 3] =
            [b"not json", br#"{"devices":[]}"#, br#"{"beacon":"B1","devices":[{"id":"D1"}]}"#];
        for body in bodies {
            let reply = route(&state, &Method::POST, "/ble-data", body, NOW);
            assert_eq!(reply.status, StatusCode::BAD_REQUEST);
            assert_eq!(json(&reply)["status"], "error");
        }
    }

    #[test]
    fn test_snapshot_route() {
        let state = test_state();
        let body = br#"{"beacon":"B2","battery":55,"devices":[{"id":"D1","rssi":-70}]}"#;
        route(&state, &Method::POST, "/ble-data", body, NOW);

        let reply = route(&state, &Method::GET, "/get-proximity-data", b"", NOW);
        assert_eq!(reply.status, StatusCode::OK);
        let value = json(&reply);
        assert_eq!(value["beacons"]["B2"]["battery"], 55.0);
        assert_eq!(value["devices"]["D1"]["device_type"], "unknown");
        assert_eq!(value["devices"]["D1"]["last_seen"], NOW);
    }

    #[test]
    fn test_device_route() {
        let state = test_state();
        route(
            &state,
            &Method::POST,
            "/ble-data",
            br#"{"beacon":"B1","devices":[{"id":"D1","rssi":-60}]}"#,
            NOW,
        );

        let found = route(&state, &Method::GET, "/devices/D1", b"", NOW);
        assert_eq!(found.status, StatusCode::OK);
        assert_eq!(json(&found)["rssi_readings"]["B1"], -60.0);

        let missing = route(&state, &Method::GET, "/devices/D404", b"", NOW);
        assert_eq!(missing.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_proximity_route() {
        let state = test_state();
        let reply = route(
            &state,
            &Method::POST,
            "/proximity",
            br#"{"device1_rssi":-60,"device2_rssi":-60}"#,
            NOW,
        );
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(json(&reply)["proximity"], 0.0);

        let bad = route(&state, &Method::POST, "/proximity", br#"{"device1_rssi":-60}"#, NOW);
        assert_eq!(bad.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_metrics_and_health() {
        let state = test_state();
        route(&state, &Method::POST, "/ble-data", br#"{"beacon":"B1","devices":[]}"#, NOW);

        let metrics = route(&state, &Method::GET, "/metrics", b"", NOW);
        assert_eq!(metrics.content_type, PROMETHEUS_TEXT);
        assert!(metrics.body.contains("ble_reports_total{site=\"test\"} 1"));

        let health = route(&state, &Method::GET, "/health", b"", NOW);
        assert_eq!(health.body, "ok");
    }

    #[tokio::test]
    async fn test_read_body_within_limit() {
        let body = read_body(Full::new(Bytes::from_static(b"{}"))).await.unwrap();
        assert_eq!(&body[..], b"{}");
    }

    #[tokio::test]
    async fn test_oversized_body_is_payload_too_large() {
        let oversized = Full::new(Bytes::from(vec![b' '; MAX_BODY_BYTES + 1]));
        let err = read_body(oversized).await.unwrap_err();
        assert_eq!(body_error_status(&*err), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_transport_error_is_bad_request() {
        let err: Box<dyn StdError + Send + Sync> =
            Box::new(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"));
        assert_eq!(body_error_status(&*err), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_unknown_route() {
        let state = test_state();
        let reply = route(&state, &Method::GET, "/nope", b"", NOW);
        assert_eq!(reply.status, StatusCode::NOT_FOUND);
        let reply = route(&state, &Method::GET, "/ble-data", b"", NOW);
        assert_eq!(reply.status, StatusCode::NOT_FOUND);
    }
}
