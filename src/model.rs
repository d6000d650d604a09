use std::env;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Deserialize;

/// 出口记录的类型标记（台账与凭证中均为该字面值）。
pub const EXIT_RECORD_TYPE: &str = "payment_exit";

/// 车道类型（入口/出口）。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LaneType {
    Entry,
    Exit,
}

impl LaneType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LaneType::Entry => "entry",
            LaneType::Exit => "exit",
        }
    }

    /// 台账记录路径（入口与出口使用不同的顶层节点）。
    pub fn record_path(&self, facility_id: &str, spot_id: &str) -> String {
        match self {
            LaneType::Entry => format!("qrcode/{}/{}", facility_id, spot_id),
            LaneType::Exit => format!("payment_qrcodes/{}/{}", facility_id, spot_id),
        }
    }
}

/// 台账记录状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordStatus {
    Active,
    Consumed,
    Expired,
    Unknown,
}

impl RecordStatus {
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("active") => RecordStatus::Active,
            Some("consumed") => RecordStatus::Consumed,
            Some("expired") => RecordStatus::Expired,
            _ => RecordStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Active => "active",
            RecordStatus::Consumed => "consumed",
            RecordStatus::Expired => "expired",
            RecordStatus::Unknown => "unknown",
        }
    }
}

/// 闸机相位。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GatePhase {
    Idle,
    Opening,
    Holding,
    Closing,
}

impl GatePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatePhase::Idle => "idle",
            GatePhase::Opening => "opening",
            GatePhase::Holding => "holding",
            GatePhase::Closing => "closing",
        }
    }
}

/// 指示灯模式。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndicatorMode {
    Standby,
    Granted,
    Off,
    Error,
}

impl IndicatorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndicatorMode::Standby => "standby",
            IndicatorMode::Granted => "granted",
            IndicatorMode::Off => "off",
            IndicatorMode::Error => "error",
        }
    }
}

/// 解析后的凭证（单次调度内使用，处理完即丢弃）。
#[derive(Clone, Debug)]
pub struct Credential {
    pub facility_id: String,
    pub lane: LaneType,
    pub spot_id: String,
    pub subject_id: String,
    pub credential_type: Option<String>,
    pub payment_ref: Option<String>,
}

impl Credential {
    pub fn record_path(&self) -> String {
        self.lane.record_path(&self.facility_id, &self.spot_id)
    }
}

impl fmt::Display for Credential {
    /// 便于日志输出的格式化展示。
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} lane={} spot={} subject={}",
            self.facility_id,
            self.lane.as_str(),
            self.spot_id,
            self.subject_id
        )?;
        if let Some(payment_ref) = &self.payment_ref {
            write!(f, " payment={}", payment_ref)?;
        }
        Ok(())
    }
}

/// 台账记录（远端文档反序列化，仅在单次校验内存活）。
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct LedgerRecord {
    #[serde(rename = "userId", default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(rename = "expiryTime", default)]
    pub expiry_time: Option<u64>,
    #[serde(rename = "type", default)]
    pub record_type: Option<String>,
    #[serde(rename = "accessCount", default)]
    pub access_count: Option<u64>,
}

impl LedgerRecord {
    pub fn record_status(&self) -> RecordStatus {
        RecordStatus::parse(self.status.as_deref())
    }
}

/// 扫描事件（feed link 推入调度通道）。
#[derive(Clone, Debug)]
pub struct ScanEvent {
    pub raw: String,
    pub lane: LaneType,
    pub received_at_ms: u64,
}

/// 控制器运行参数（可配置项）。
#[derive(Clone, Debug)]
pub struct ControllerSettings {
    pub facility_id: String,
    pub ledger_base_url: String,
    pub ledger_auth: Option<String>,
    pub listen_addr: String,
    pub status_addr: String,
    pub exit_debounce_window_ms: u64,
    pub entry_debounce_window_ms: u64,
    pub debounce_max_entries: usize,
    pub dwell_ms: u64,
    pub gate_move_ms: u64,
    pub indicator_tick_ms: u64,
    pub error_blink_count: u32,
    pub error_blink_on_ms: u64,
    pub error_blink_off_ms: u64,
    pub ledger_timeout_ms: u64,
}

impl ControllerSettings {
    /// 使用指定车场 ID 与台账地址构建默认参数。
    pub fn with_facility(facility_id: impl Into<String>, ledger_base_url: impl Into<String>) -> Self {
        Self {
            facility_id: facility_id.into(),
            ledger_base_url: ledger_base_url.into(),
            ledger_auth: None,
            listen_addr: "0.0.0.0:7300".to_string(),
            status_addr: "0.0.0.0:7301".to_string(),
            exit_debounce_window_ms: 5_000,
            entry_debounce_window_ms: 0,
            debounce_max_entries: 64,
            dwell_ms: 10_000,
            gate_move_ms: 1_000,
            indicator_tick_ms: 100,
            error_blink_count: 3,
            error_blink_on_ms: 500,
            error_blink_off_ms: 500,
            ledger_timeout_ms: 5_000,
        }
    }

    /// 从环境变量读取配置，缺少必填项时报告变量名。
    pub fn from_env() -> Result<Self, &'static str> {
        let facility_id = env::var("FACILITY_ID").map_err(|_| "FACILITY_ID")?;
        let ledger_base_url = env::var("LEDGER_BASE_URL").map_err(|_| "LEDGER_BASE_URL")?;
        let mut settings = Self::with_facility(facility_id, ledger_base_url);
        settings.ledger_auth = env::var("LEDGER_AUTH").ok().filter(|v| !v.is_empty());
        if let Ok(addr) = env::var("LISTEN_ADDR") {
            settings.listen_addr = addr;
        }
        if let Ok(addr) = env::var("STATUS_ADDR") {
            settings.status_addr = addr;
        }
        if let Some(ms) = env_u64("GATE_DWELL_MS") {
            settings.dwell_ms = ms;
        }
        if let Some(ms) = env_u64("EXIT_DEBOUNCE_MS") {
            settings.exit_debounce_window_ms = ms;
        }
        Ok(settings)
    }
}

fn env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|value| value.parse::<u64>().ok())
}

/// 获取当前毫秒时间戳。
pub fn current_epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_path_differs_per_lane() {
        assert_eq!(LaneType::Entry.record_path("F1", "A3"), "qrcode/F1/A3");
        assert_eq!(
            LaneType::Exit.record_path("F1", "A3"),
            "payment_qrcodes/F1/A3"
        );
    }

    #[test]
    fn record_status_parses_known_values() {
        assert_eq!(RecordStatus::parse(Some("active")), RecordStatus::Active);
        assert_eq!(RecordStatus::parse(Some("consumed")), RecordStatus::Consumed);
        assert_eq!(RecordStatus::parse(Some("held")), RecordStatus::Unknown);
        assert_eq!(RecordStatus::parse(None), RecordStatus::Unknown);
    }

    #[test]
    fn ledger_record_deserializes_wire_names() {
        let record: LedgerRecord = serde_json::from_str(
            r#"{"userId":"U9","status":"active","expiryTime":1000,"type":"payment_exit","accessCount":2}"#,
        )
        .unwrap();
        assert_eq!(record.user_id.as_deref(), Some("U9"));
        assert_eq!(record.record_status(), RecordStatus::Active);
        assert_eq!(record.expiry_time, Some(1000));
        assert_eq!(record.record_type.as_deref(), Some(EXIT_RECORD_TYPE));
    }
}
