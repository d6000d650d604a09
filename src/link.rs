use std::io::{BufRead, BufReader};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::Sender;
use std::thread;

use crate::model::{current_epoch_millis, LaneType, ScanEvent};

/// 解析一行扫描输入：`entry|<raw>` 或 `exit|<raw>`。
///
/// 车道前缀之后的内容原样作为凭证串，帧格式错误返回 None。
pub fn parse_scan_line(line: &str) -> Option<ScanEvent> {
    let line = line.trim();
    let (lane, raw) = line.split_once('|')?;
    let lane = match lane {
        "entry" => LaneType::Entry,
        "exit" => LaneType::Exit,
        _ => return None,
    };
    if raw.is_empty() {
        return None;
    }
    Some(ScanEvent {
        raw: raw.to_string(),
        lane,
        received_at_ms: current_epoch_millis(),
    })
}

/// 启动扫描接入监听：每个连接一个读线程，逐行推入调度通道。
///
/// 坏帧只记日志并跳过，不触发指示灯（属于传输层问题而非凭证问题）。
pub fn spawn_feed_listener(
    listener: TcpListener,
    scan_tx: Sender<ScanEvent>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let scan_tx = scan_tx.clone();
                    thread::spawn(move || read_feed(stream, scan_tx));
                }
                Err(err) => {
                    log::warn!("Feed accept failed: {:?}", err);
                }
            }
        }
    })
}

fn read_feed(stream: TcpStream, scan_tx: Sender<ScanEvent>) {
    let peer = stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    log::info!("Feed connected: {}", peer);
    let reader = BufReader::new(stream);
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                log::warn!("Feed read failed: {:?}", err);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match parse_scan_line(&line) {
            Some(scan) => {
                // 调度端退出后发送失败，连接线程随之结束
                if scan_tx.send(scan).is_err() {
                    break;
                }
            }
            None => log::warn!("Feed line skipped (bad framing): {}", line),
        }
    }
    log::info!("Feed disconnected: {}", peer);
}
