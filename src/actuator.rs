use std::thread;
use std::time::Duration;

use crate::model::IndicatorMode;

/// 执行器调用失败（驱动层错误原样带回）。
#[derive(Clone, Debug)]
pub struct ActuatorError(pub String);

/// 闸机电机驱动接口。
pub trait GateMotor: Send + Sync {
    fn open_gate(&self) -> Result<(), ActuatorError>;
    fn close_gate(&self) -> Result<(), ActuatorError>;
}

/// 指示灯驱动接口。
pub trait IndicatorLamp: Send + Sync {
    fn set_mode(&self, mode: IndicatorMode) -> Result<(), ActuatorError>;
}

/// 仿真电机：只打日志，按舵机行程时间阻塞。
pub struct SimGateMotor {
    move_ms: u64,
}

impl SimGateMotor {
    pub fn new(move_ms: u64) -> Self {
        Self { move_ms }
    }

    fn travel(&self) {
        if self.move_ms > 0 {
            thread::sleep(Duration::from_millis(self.move_ms));
        }
    }
}

impl GateMotor for SimGateMotor {
    fn open_gate(&self) -> Result<(), ActuatorError> {
        log::info!("Gate motor: opening");
        self.travel();
        Ok(())
    }

    fn close_gate(&self) -> Result<(), ActuatorError> {
        log::info!("Gate motor: closing");
        self.travel();
        Ok(())
    }
}

/// 仿真指示灯：只打日志。
pub struct SimIndicatorLamp;

impl IndicatorLamp for SimIndicatorLamp {
    fn set_mode(&self, mode: IndicatorMode) -> Result<(), ActuatorError> {
        log::debug!("Indicator lamp -> {}", mode.as_str());
        Ok(())
    }
}
