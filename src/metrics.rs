//! Prometheus metrics for the harvester.
//!
//! Exposes:
//! - `telegram_harvester_users_total` (counter by source and outcome)
//! - `telegram_harvester_chats_total` (counter by classification decision)
//! - `telegram_harvester_member_batches_total` (counter by strategy)
//! - `telegram_harvester_accumulated_chats` (gauge)
//! - process metrics via `process` collector

use std::convert::Infallible;
use std::net::SocketAddr;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use once_cell::sync::Lazy;
use prometheus::process_collector::ProcessCollector;
use prometheus::{
    default_registry, register_int_counter_vec, register_int_gauge, Encoder, IntCounterVec,
    IntGauge, TextEncoder,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

static PROCESS_COLLECTOR: Lazy<()> = Lazy::new(|| {
    if let Err(err) = default_registry().register(Box::new(ProcessCollector::for_self())) {
        warn!("Failed to register process collector: {}", err);
    }
});

static USERS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "telegram_harvester_users_total",
        "Observed users by source and outcome",
        &["source", "outcome"]
    )
    .expect("failed to register users counter")
});

static CHATS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "telegram_harvester_chats_total",
        "Classified chats by decision",
        &["decision"]
    )
    .expect("failed to register chats counter")
});

static MEMBER_BATCHES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "telegram_harvester_member_batches_total",
        "Member windows fetched by strategy",
        &["strategy"]
    )
    .expect("failed to register member batch counter")
});

static ACCUMULATED_CHATS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "telegram_harvester_accumulated_chats",
        "Chats in the accumulated chat list"
    )
    .expect("failed to register accumulated chats gauge")
});

/// Ensure collectors are registered.
fn init_collectors() {
    Lazy::force(&PROCESS_COLLECTOR);
    Lazy::force(&USERS_TOTAL);
    Lazy::force(&CHATS_TOTAL);
    Lazy::force(&MEMBER_BATCHES_TOTAL);
    Lazy::force(&ACCUMULATED_CHATS);
}

/// Count one pass through the insert-if-new path.
pub fn record_user(source: &'static str, outcome: &'static str) {
    USERS_TOTAL.with_label_values(&[source, outcome]).inc();
}

/// Count one classified chat.
pub fn record_chat_decision(decision: &'static str) {
    CHATS_TOTAL.with_label_values(&[decision]).inc();
}

/// Count one fetched member window.
pub fn record_member_batch(strategy: &'static str) {
    MEMBER_BATCHES_TOTAL.with_label_values(&[strategy]).inc();
}

pub fn set_accumulated_chats(count: usize) {
    ACCUMULATED_CHATS.set(count as i64);
}

async fn metrics_response() -> Result<Response<Full<Bytes>>, Infallible> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", err);
        let mut response = Response::new(Full::from("encode error"));
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        return Ok(response);
    }

    let mut response = Response::new(Full::from(buffer));
    if let Ok(content_type) = encoder.format_type().parse() {
        response
            .headers_mut()
            .insert(hyper::header::CONTENT_TYPE, content_type);
    }
    Ok(response)
}

async fn handle_request(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    match req.uri().path() {
        "/metrics" => metrics_response().await,
        _ => {
            let mut response = Response::new(Full::new(Bytes::new()));
            *response.status_mut() = StatusCode::NOT_FOUND;
            Ok(response)
        }
    }
}

async fn serve(addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Prometheus metrics endpoint started");

    loop {
        let (stream, peer) = listener.accept().await?;
        let service = service_fn(handle_request);
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                warn!(?peer, "Metrics connection error: {}", err);
            }
        });
    }
}

/// Spawn the metrics HTTP endpoint on the given address.
pub fn spawn_metrics_server(addr: SocketAddr) {
    init_collectors();
    tokio::spawn(async move {
        if let Err(err) = serve(addr).await {
            error!(%addr, "Metrics server failed: {}", err);
        }
    });
}
