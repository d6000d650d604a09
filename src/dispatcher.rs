use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::cache::ScanDebounce;
use crate::gate::GateController;
use crate::indicator::BlinkRequest;
use crate::ledger::{AccessStamp, Ledger, StampJob};
use crate::model::{current_epoch_millis, ControllerSettings, LaneType, ScanEvent};
use crate::parser;
use crate::validator::SpotValidator;

/// 控制器各任务之间的通道集合（扫描、闪烁、记账）。
pub struct ControllerChannels {
    pub scan_tx: Sender<ScanEvent>,
    pub scan_rx: Receiver<ScanEvent>,
    pub blink_tx: Sender<BlinkRequest>,
    pub blink_rx: Receiver<BlinkRequest>,
    pub stamp_tx: Sender<StampJob>,
    pub stamp_rx: Receiver<StampJob>,
}

impl ControllerChannels {
    /// 创建默认的 mpsc 通道。
    pub fn new() -> Self {
        let (scan_tx, scan_rx) = mpsc::channel();
        let (blink_tx, blink_rx) = mpsc::channel();
        let (stamp_tx, stamp_rx) = mpsc::channel();
        Self {
            scan_tx,
            scan_rx,
            blink_tx,
            blink_rx,
            stamp_tx,
            stamp_rx,
        }
    }
}

/// 调度计数（状态接口展示用）。
#[derive(Default)]
pub struct DispatchStats {
    pub scans: AtomicU64,
    pub suppressed: AtomicU64,
    pub granted: AtomicU64,
    pub rejected: AtomicU64,
    last_decision: Mutex<String>,
}

impl DispatchStats {
    fn note_decision(&self, decision: &str) {
        if let Ok(mut last) = self.last_decision.lock() {
            *last = decision.to_string();
        }
    }

    pub fn last_decision(&self) -> String {
        self.last_decision
            .lock()
            .map(|last| last.clone())
            .unwrap_or_default()
    }
}

/// 事件调度器：busy 检查 -> 去重 -> 解析 -> 校验 -> 记账 + 开闸。
///
/// 唯一掌握全链路的组件；运行在单一调度线程上，
/// 去重表因此无需加锁。
pub struct GateDispatcher {
    validator: SpotValidator,
    entry_debounce: ScanDebounce,
    exit_debounce: ScanDebounce,
    gate: Arc<GateController>,
    ledger: Arc<dyn Ledger>,
    blink_tx: Sender<BlinkRequest>,
    stamp_tx: Sender<StampJob>,
    stats: Arc<DispatchStats>,
    error_blink: BlinkRequest,
}

impl GateDispatcher {
    pub fn new(
        settings: &ControllerSettings,
        gate: Arc<GateController>,
        ledger: Arc<dyn Ledger>,
        blink_tx: Sender<BlinkRequest>,
        stamp_tx: Sender<StampJob>,
        stats: Arc<DispatchStats>,
    ) -> Self {
        Self {
            validator: SpotValidator::new(settings.facility_id.clone()),
            entry_debounce: ScanDebounce::new(
                settings.entry_debounce_window_ms,
                settings.debounce_max_entries,
            ),
            exit_debounce: ScanDebounce::new(
                settings.exit_debounce_window_ms,
                settings.debounce_max_entries,
            ),
            gate,
            ledger,
            blink_tx,
            stamp_tx,
            stats,
            error_blink: BlinkRequest {
                count: settings.error_blink_count,
                on_ms: settings.error_blink_on_ms,
                off_ms: settings.error_blink_off_ms,
            },
        }
    }

    /// 处理一次扫描事件。
    pub fn handle_scan(&mut self, scan: ScanEvent) {
        self.stats.scans.fetch_add(1, Ordering::Relaxed);

        // 开闸周期内的新扫描直接忽略，不打断当前周期
        if self.gate.is_busy() {
            log::debug!("Gate busy - ignoring {} scan", scan.lane.as_str());
            return;
        }

        let debounce = match scan.lane {
            LaneType::Entry => &mut self.entry_debounce,
            LaneType::Exit => &mut self.exit_debounce,
        };
        if !debounce.allow(&scan.raw, scan.received_at_ms) {
            self.stats.suppressed.fetch_add(1, Ordering::Relaxed);
            log::debug!("Duplicate {} scan suppressed", scan.lane.as_str());
            return;
        }

        let credential = match parser::parse_credential(&scan.raw, scan.lane) {
            Ok(credential) => credential,
            Err(err) => {
                log::warn!("Credential parse failed: {:?}", err);
                self.reject("malformed_payload");
                return;
            }
        };

        let now_ms = current_epoch_millis();
        let record = match self
            .validator
            .validate(&credential, self.ledger.as_ref(), now_ms)
        {
            Ok(record) => record,
            Err(reason) => {
                log::warn!("Credential rejected ({}): {}", reason.as_str(), credential);
                self.reject(reason.as_str());
                return;
            }
        };

        // 记账是尽力而为，失败不回滚已判定的放行
        let _ = self.stamp_tx.send(StampJob {
            path: credential.record_path(),
            stamp: AccessStamp {
                lane: credential.lane,
                access_time_ms: now_ms,
            },
        });

        if self.gate.try_acquire() {
            log::info!(
                "Access granted: {} (prior count {:?})",
                credential,
                record.access_count
            );
            self.stats.granted.fetch_add(1, Ordering::Relaxed);
            self.stats.note_decision("granted");
            let _ = self.gate.spawn_sequence();
        } else {
            // busy 检查之后被抢占的竞争路径：静默丢弃
            log::debug!("Gate acquired elsewhere - dropping {}", credential);
        }
    }

    fn reject(&self, reason: &str) {
        self.stats.rejected.fetch_add(1, Ordering::Relaxed);
        self.stats.note_decision(reason);
        let _ = self.blink_tx.send(self.error_blink);
    }
}

/// 启动调度线程：消费扫描事件直到停止信号或通道关闭。
pub fn spawn_dispatch_loop(
    mut dispatcher: GateDispatcher,
    scan_rx: Receiver<ScanEvent>,
    stop: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || loop {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        match scan_rx.recv_timeout(Duration::from_millis(200)) {
            Ok(scan) => dispatcher.handle_scan(scan),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::{ActuatorError, GateMotor};
    use crate::ledger::LedgerError;
    use crate::model::{GatePhase, LedgerRecord, EXIT_RECORD_TYPE};
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    struct TestLedger {
        record: Option<LedgerRecord>,
        fetches: AtomicUsize,
    }

    impl TestLedger {
        fn new(record: Option<LedgerRecord>) -> Arc<Self> {
            Arc::new(Self {
                record,
                fetches: AtomicUsize::new(0),
            })
        }
    }

    impl Ledger for TestLedger {
        fn fetch_record(&self, _path: &str) -> Result<Option<LedgerRecord>, LedgerError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.record.clone())
        }

        fn stamp_access(&self, _path: &str, _stamp: &AccessStamp) -> Result<(), LedgerError> {
            Ok(())
        }
    }

    struct CountingMotor {
        opens: AtomicUsize,
        closes: AtomicUsize,
    }

    impl CountingMotor {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                opens: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
            })
        }
    }

    impl GateMotor for CountingMotor {
        fn open_gate(&self) -> Result<(), ActuatorError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn close_gate(&self) -> Result<(), ActuatorError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Fixture {
        dispatcher: GateDispatcher,
        gate: Arc<GateController>,
        motor: Arc<CountingMotor>,
        ledger: Arc<TestLedger>,
        blink_rx: Receiver<BlinkRequest>,
        stamp_rx: Receiver<StampJob>,
    }

    fn fixture(record: Option<LedgerRecord>, dwell_ms: u64) -> Fixture {
        let settings = ControllerSettings::with_facility("F1", "http://unused");
        let motor = CountingMotor::new();
        let gate = Arc::new(GateController::new(motor.clone(), dwell_ms));
        let ledger = TestLedger::new(record);
        let channels = ControllerChannels::new();
        let stats = Arc::new(DispatchStats::default());
        let dispatcher = GateDispatcher::new(
            &settings,
            gate.clone(),
            ledger.clone(),
            channels.blink_tx,
            channels.stamp_tx,
            stats,
        );
        Fixture {
            dispatcher,
            gate,
            motor,
            ledger,
            blink_rx: channels.blink_rx,
            stamp_rx: channels.stamp_rx,
        }
    }

    fn active_record() -> LedgerRecord {
        LedgerRecord {
            user_id: Some("U9".to_string()),
            status: Some("active".to_string()),
            expiry_time: Some(current_epoch_millis() + 60_000),
            record_type: Some(EXIT_RECORD_TYPE.to_string()),
            access_count: Some(1),
        }
    }

    fn entry_scan(received_at_ms: u64) -> ScanEvent {
        ScanEvent {
            raw: r#"{"parkingId":"F1","spotNumber":"A3","userId":"U9"}"#.to_string(),
            lane: LaneType::Entry,
            received_at_ms,
        }
    }

    fn wait_for_idle(gate: &GateController) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while gate.is_busy() {
            assert!(Instant::now() < deadline, "gate did not return to idle");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn accepted_credential_runs_one_sequence_and_one_stamp() {
        let mut fx = fixture(Some(active_record()), 10);
        fx.dispatcher.handle_scan(entry_scan(1_000));

        let job = fx.stamp_rx.try_recv().unwrap();
        assert_eq!(job.path, "qrcode/F1/A3");
        assert!(fx.stamp_rx.try_recv().is_err());

        wait_for_idle(&fx.gate);
        assert_eq!(fx.motor.opens.load(Ordering::SeqCst), 1);
        assert_eq!(fx.motor.closes.load(Ordering::SeqCst), 1);
        assert!(fx.blink_rx.try_recv().is_err());
    }

    #[test]
    fn busy_gate_drops_event_without_side_effects() {
        let mut fx = fixture(Some(active_record()), 10);
        assert!(fx.gate.try_acquire());

        fx.dispatcher.handle_scan(entry_scan(1_000));
        assert_eq!(fx.ledger.fetches.load(Ordering::SeqCst), 0);
        assert!(fx.stamp_rx.try_recv().is_err());
        assert!(fx.blink_rx.try_recv().is_err());
        assert_eq!(fx.gate.phase(), GatePhase::Opening);
        assert_eq!(fx.motor.opens.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn second_scan_during_sequence_is_idempotent() {
        let mut fx = fixture(Some(active_record()), 300);
        fx.dispatcher.handle_scan(entry_scan(1_000));
        assert!(fx.gate.is_busy());
        // 第一个周期仍在保持阶段，重复凭证被 busy 检查拦下
        fx.dispatcher.handle_scan(entry_scan(1_050));

        assert!(fx.stamp_rx.try_recv().is_ok());
        assert!(fx.stamp_rx.try_recv().is_err());
        wait_for_idle(&fx.gate);
        assert_eq!(fx.motor.opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rejected_credential_blinks_and_leaves_gate_idle() {
        let mut record = active_record();
        record.status = Some("consumed".to_string());
        let mut fx = fixture(Some(record), 10);
        fx.dispatcher.handle_scan(entry_scan(1_000));

        let blink = fx.blink_rx.try_recv().unwrap();
        assert_eq!(blink.count, 3);
        assert!(fx.stamp_rx.try_recv().is_err());
        assert_eq!(fx.gate.phase(), GatePhase::Idle);
        assert_eq!(fx.motor.opens.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn malformed_payload_blinks() {
        let mut fx = fixture(Some(active_record()), 10);
        fx.dispatcher.handle_scan(ScanEvent {
            raw: "not json".to_string(),
            lane: LaneType::Entry,
            received_at_ms: 1_000,
        });
        assert!(fx.blink_rx.try_recv().is_ok());
        assert_eq!(fx.ledger.fetches.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn exit_lane_duplicates_are_suppressed_by_window() {
        // 使用已消费记录，让每次放行都走拒绝路径，便于数闪烁次数
        let mut record = active_record();
        record.status = Some("consumed".to_string());
        let mut fx = fixture(Some(record), 10);
        let raw =
            r#"{"parkingId":"F1","spotId":"B2","userId":"U9","type":"payment_exit"}"#.to_string();
        let scan = |at: u64| ScanEvent {
            raw: raw.clone(),
            lane: LaneType::Exit,
            received_at_ms: at,
        };

        fx.dispatcher.handle_scan(scan(10_000));
        assert!(fx.blink_rx.try_recv().is_ok());
        // 2 秒后重复：被去重窗口抑制，不再闪烁
        fx.dispatcher.handle_scan(scan(12_000));
        assert!(fx.blink_rx.try_recv().is_err());
        // 6 秒后重复:窗口已过，重新处理
        fx.dispatcher.handle_scan(scan(16_000));
        assert!(fx.blink_rx.try_recv().is_ok());
    }

    #[test]
    fn entry_lane_has_no_debounce() {
        let mut record = active_record();
        record.status = Some("consumed".to_string());
        let mut fx = fixture(Some(record), 10);
        fx.dispatcher.handle_scan(entry_scan(10_000));
        fx.dispatcher.handle_scan(entry_scan(10_100));
        assert!(fx.blink_rx.try_recv().is_ok());
        assert!(fx.blink_rx.try_recv().is_ok());
    }
}
