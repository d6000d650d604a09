use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::actuator::GateMotor;
use crate::model::GatePhase;

/// 闸机控制器。
///
/// 相位是全进程唯一的可变共享状态，由单把锁守护；
/// try_acquire 是离开 Idle 的唯一入口，成功一次即独占整个开闸周期。
pub struct GateController {
    phase: Mutex<PhaseState>,
    motor: Arc<dyn GateMotor>,
    dwell_ms: u64,
}

struct PhaseState {
    phase: GatePhase,
    entered_at: Instant,
}

impl GateController {
    pub fn new(motor: Arc<dyn GateMotor>, dwell_ms: u64) -> Self {
        Self {
            phase: Mutex::new(PhaseState {
                phase: GatePhase::Idle,
                entered_at: Instant::now(),
            }),
            motor,
            dwell_ms,
        }
    }

    /// 尝试占用闸机：仅当相位为 Idle 时置为 Opening 并返回 true。
    pub fn try_acquire(&self) -> bool {
        let mut state = self.phase.lock().expect("gate phase lock poisoned");
        if state.phase != GatePhase::Idle {
            return false;
        }
        state.phase = GatePhase::Opening;
        state.entered_at = Instant::now();
        true
    }

    /// 非阻塞读取是否处于开闸周期。
    pub fn is_busy(&self) -> bool {
        self.phase() != GatePhase::Idle
    }

    pub fn phase(&self) -> GatePhase {
        self.phase.lock().expect("gate phase lock poisoned").phase
    }

    /// 当前相位已持续的时长。
    pub fn phase_age(&self) -> Duration {
        self.phase
            .lock()
            .expect("gate phase lock poisoned")
            .entered_at
            .elapsed()
    }

    fn set_phase(&self, phase: GatePhase) {
        let mut state = self.phase.lock().expect("gate phase lock poisoned");
        state.phase = phase;
        state.entered_at = Instant::now();
    }

    /// 执行完整开闸周期：开门 -> 保持 -> 关门 -> Idle。
    ///
    /// 仅在 try_acquire 成功后调用，通常运行在独立线程上。
    /// 执行器报错不会中断周期：关门总会被尝试，相位总会回到 Idle。
    pub fn run_sequence(&self) {
        log::info!(
            "Gate sequence started - holding {} ms before close",
            self.dwell_ms
        );
        if let Err(err) = self.motor.open_gate() {
            log::warn!("Gate open failed: {:?}", err);
        }
        self.set_phase(GatePhase::Holding);
        thread::sleep(Duration::from_millis(self.dwell_ms));
        self.set_phase(GatePhase::Closing);
        if let Err(err) = self.motor.close_gate() {
            // 本周期致命：闸机可能停在打开位，留给告警层处理
            log::error!(
                "Gate close failed - cycle ended with gate possibly open: {:?}",
                err
            );
        }
        self.set_phase(GatePhase::Idle);
        log::info!("Gate sequence completed - ready for new scans");
    }

    /// 在独立线程上运行开闸周期，调用方不被阻塞。
    pub fn spawn_sequence(self: &Arc<Self>) -> thread::JoinHandle<()> {
        let gate = Arc::clone(self);
        thread::spawn(move || gate.run_sequence())
    }
}
