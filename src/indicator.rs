use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::actuator::IndicatorLamp;
use crate::gate::GateController;
use crate::model::IndicatorMode;

/// 错误闪烁请求（次数 + 亮灭时长）。
#[derive(Clone, Copy, Debug)]
pub struct BlinkRequest {
    pub count: u32,
    pub on_ms: u64,
    pub off_ms: u64,
}

/// 启动指示灯任务。
///
/// 常态下每个 tick 由闸机 busy 状态推导 Granted/Standby；
/// 收到错误闪烁请求时临时接管灯位，闪完恢复推导。
/// 排队的闪烁请求依次执行，不会破坏恢复后的状态。
pub fn spawn_indicator_task(
    lamp: Arc<dyn IndicatorLamp>,
    gate: Arc<GateController>,
    blink_rx: Receiver<BlinkRequest>,
    stop: Arc<AtomicBool>,
    tick_ms: u64,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut last_mode: Option<IndicatorMode> = None;
        while !stop.load(Ordering::SeqCst) {
            match blink_rx.recv_timeout(Duration::from_millis(tick_ms)) {
                Ok(request) => {
                    run_blink(lamp.as_ref(), &request, &stop);
                    // 闪烁后清空缓存，下个 tick 重新推导灯位
                    last_mode = None;
                }
                Err(RecvTimeoutError::Timeout) => {
                    let mode = if gate.is_busy() {
                        IndicatorMode::Granted
                    } else {
                        IndicatorMode::Standby
                    };
                    if last_mode != Some(mode) {
                        set_mode(lamp.as_ref(), mode);
                        last_mode = Some(mode);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        // 停机时熄灯
        set_mode(lamp.as_ref(), IndicatorMode::Off);
    })
}

fn run_blink(lamp: &dyn IndicatorLamp, request: &BlinkRequest, stop: &AtomicBool) {
    for _ in 0..request.count {
        if stop.load(Ordering::SeqCst) {
            return;
        }
        set_mode(lamp, IndicatorMode::Error);
        thread::sleep(Duration::from_millis(request.on_ms));
        set_mode(lamp, IndicatorMode::Off);
        thread::sleep(Duration::from_millis(request.off_ms));
    }
}

fn set_mode(lamp: &dyn IndicatorLamp, mode: IndicatorMode) {
    if let Err(err) = lamp.set_mode(mode) {
        log::warn!("Indicator update failed: {:?}", err);
    }
}
