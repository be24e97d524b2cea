//! Admin HTTP surface: `GET /status` with the live counters.

use std::io;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::service::Service;

#[derive(Serialize)]
struct StatusBody {
    client_conn_num: i32,
    ip: String,
    port: u16,
    kcp_send_bps: u64,
    kcp_recv_bps: u64,
    udp_send_bps: u64,
    udp_recv_bps: u64,
    udp_send_pps: u64,
    udp_recv_pps: u64,
}

async fn status(State(service): State<Arc<Service>>) -> Json<StatusBody> {
    let rates = &service.rates;
    Json(StatusBody {
        client_conn_num: service.client_count.load(Ordering::Relaxed),
        ip: service.config.ip.clone(),
        port: service.config.port,
        kcp_send_bps: rates.kcp_send_bps.load(Ordering::Relaxed),
        kcp_recv_bps: rates.kcp_recv_bps.load(Ordering::Relaxed),
        udp_send_bps: rates.udp_send_bps.load(Ordering::Relaxed),
        udp_recv_bps: rates.udp_recv_bps.load(Ordering::Relaxed),
        udp_send_pps: rates.udp_send_pps.load(Ordering::Relaxed),
        udp_recv_pps: rates.udp_recv_pps.load(Ordering::Relaxed),
    })
}

/// Serve the admin endpoint on the configured HTTP port.
pub async fn serve(service: Arc<Service>) -> io::Result<()> {
    let port = service.config.http_port;
    let app = Router::new().route("/status", get(status)).with_state(service);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    axum::serve(listener, app).await
}
