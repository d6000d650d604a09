use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::json;

use crate::dispatcher::DispatchStats;
use crate::gate::GateController;

/// 启动状态接口：GET /status 返回控制器运行状态 JSON。
pub fn start_status_server(
    addr: &str,
    facility_id: String,
    gate: Arc<GateController>,
    stats: Arc<DispatchStats>,
    stop: Arc<AtomicBool>,
) -> Result<thread::JoinHandle<()>, Box<dyn std::error::Error + Send + Sync + 'static>> {
    let server = tiny_http::Server::http(addr)?;
    let handle = thread::spawn(move || {
        while !stop.load(Ordering::SeqCst) {
            let request = match server.recv_timeout(Duration::from_millis(500)) {
                Ok(Some(request)) => request,
                Ok(None) => continue,
                Err(err) => {
                    log::warn!("Status server recv failed: {:?}", err);
                    break;
                }
            };
            respond(request, &facility_id, &gate, &stats);
        }
    });
    Ok(handle)
}

fn respond(
    request: tiny_http::Request,
    facility_id: &str,
    gate: &GateController,
    stats: &DispatchStats,
) {
    if request.url() != "/status" {
        let _ = request.respond(tiny_http::Response::empty(404));
        return;
    }
    let body = status_payload(facility_id, gate, stats).to_string();
    let mut response = tiny_http::Response::from_string(body);
    if let Ok(header) =
        tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
    {
        response = response.with_header(header);
    }
    let _ = request.respond(response);
}

/// 汇总当前闸机相位与调度计数。
fn status_payload(
    facility_id: &str,
    gate: &GateController,
    stats: &DispatchStats,
) -> serde_json::Value {
    json!({
        "facility_id": facility_id,
        "gate": {
            "phase": gate.phase().as_str(),
            "busy": gate.is_busy(),
            "phase_age_ms": gate.phase_age().as_millis() as u64,
        },
        "scans": stats.scans.load(Ordering::Relaxed),
        "suppressed": stats.suppressed.load(Ordering::Relaxed),
        "granted": stats.granted.load(Ordering::Relaxed),
        "rejected": stats.rejected.load(Ordering::Relaxed),
        "last_decision": stats.last_decision(),
    })
}
