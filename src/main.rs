// 模块划分：模型、解析、去重、校验、闸机、执行器、指示灯、调度、台账、接入与状态
mod actuator;
mod cache;
mod dispatcher;
mod gate;
mod indicator;
mod ledger;
mod link;
mod model;
mod parser;
mod status;
mod validator;

use std::io;
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use actuator::{GateMotor, IndicatorLamp, SimGateMotor, SimIndicatorLamp};
use dispatcher::{spawn_dispatch_loop, ControllerChannels, DispatchStats, GateDispatcher};
use gate::GateController;
use ledger::{Ledger, RtdbLedger};
use model::{ControllerSettings, IndicatorMode};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = match ControllerSettings::from_env() {
        Ok(settings) => settings,
        Err(missing) => {
            log::error!("Missing required environment variable {}", missing);
            return;
        }
    };
    log::info!(
        "Gate controller booting for facility {}",
        settings.facility_id
    );

    // 可能失败的外部资源先就绪，再启动任何后台任务
    let feed_listener = match TcpListener::bind(&settings.listen_addr) {
        Ok(listener) => listener,
        Err(err) => {
            log::error!("Feed listen failed on {}: {:?}", settings.listen_addr, err);
            return;
        }
    };
    let ledger: Arc<dyn Ledger> = match RtdbLedger::new(
        &settings.ledger_base_url,
        settings.ledger_auth.clone(),
        settings.ledger_timeout_ms,
    ) {
        Ok(client) => Arc::new(client),
        Err(err) => {
            log::error!("Ledger client init failed: {:?}", err);
            return;
        }
    };

    let motor: Arc<dyn GateMotor> = Arc::new(SimGateMotor::new(settings.gate_move_ms));
    let lamp: Arc<dyn IndicatorLamp> = Arc::new(SimIndicatorLamp);
    let gate = Arc::new(GateController::new(motor.clone(), settings.dwell_ms));
    let stats = Arc::new(DispatchStats::default());
    let stop = Arc::new(AtomicBool::new(false));

    let ControllerChannels {
        scan_tx,
        scan_rx,
        blink_tx,
        blink_rx,
        stamp_tx,
        stamp_rx,
    } = ControllerChannels::new();

    let indicator_handle = indicator::spawn_indicator_task(
        lamp.clone(),
        gate.clone(),
        blink_rx,
        stop.clone(),
        settings.indicator_tick_ms,
    );
    let stamp_handle = ledger::spawn_stamp_worker(ledger.clone(), stamp_rx);
    let dispatcher = GateDispatcher::new(
        &settings,
        gate.clone(),
        ledger,
        blink_tx,
        stamp_tx,
        stats.clone(),
    );
    let dispatch_handle = spawn_dispatch_loop(dispatcher, scan_rx, stop.clone());

    // 接入线程阻塞在 accept 上，停机时不等待它
    let _feed_handle = link::spawn_feed_listener(feed_listener, scan_tx);

    // 状态接口失败不阻塞主流程
    let status_handle = match status::start_status_server(
        &settings.status_addr,
        settings.facility_id.clone(),
        gate.clone(),
        stats.clone(),
        stop.clone(),
    ) {
        Ok(handle) => Some(handle),
        Err(err) => {
            log::warn!("Status server start failed: {:?}", err);
            None
        }
    };

    // 收尾守卫先于运行循环建立，异常退出路径同样会执行清理
    let mut handles = vec![
        ("dispatch", dispatch_handle),
        ("indicator", indicator_handle),
        ("stamp", stamp_handle),
    ];
    if let Some(handle) = status_handle {
        handles.push(("status", handle));
    }
    let _teardown = Teardown {
        stop: stop.clone(),
        gate: gate.clone(),
        motor,
        lamp,
        handles,
    };

    log::info!(
        "Controller ready - feed on {}, status on {} (stdin EOF stops)",
        settings.listen_addr,
        settings.status_addr
    );

    let mut line = String::new();
    loop {
        line.clear();
        match io::stdin().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                log::warn!("Stdin read failed: {:?}", err);
                break;
            }
        }
    }
}

/// 停机守卫：统一的收尾路径。
///
/// 已开始的开闸周期不打断，等待其自然回到 Idle；
/// 随后停掉各任务并把闸机关闭、指示灯熄灭。
struct Teardown {
    stop: Arc<AtomicBool>,
    gate: Arc<GateController>,
    motor: Arc<dyn GateMotor>,
    lamp: Arc<dyn IndicatorLamp>,
    handles: Vec<(&'static str, thread::JoinHandle<()>)>,
}

impl Drop for Teardown {
    fn drop(&mut self) {
        log::info!("Shutting down...");
        self.stop.store(true, Ordering::SeqCst);

        let deadline = Instant::now() + Duration::from_secs(15);
        while self.gate.is_busy() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(50));
        }
        if self.gate.is_busy() {
            log::warn!("Gate sequence still running at shutdown deadline");
        }

        for (name, handle) in self.handles.drain(..) {
            if handle.join().is_err() {
                log::warn!("{} task panicked during shutdown", name);
            }
        }

        if let Err(err) = self.motor.close_gate() {
            log::error!("Final gate close failed: {:?}", err);
        }
        if let Err(err) = self.lamp.set_mode(IndicatorMode::Off) {
            log::warn!("Final indicator off failed: {:?}", err);
        }
        log::info!("Shutdown complete");
    }
}
