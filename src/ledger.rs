use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::json;

use crate::model::{LaneType, LedgerRecord};

/// 台账访问错误。
#[derive(Debug)]
pub enum LedgerError {
    Http(reqwest::Error),
    Json(serde_json::Error),
    Status(u16),
}

impl From<reqwest::Error> for LedgerError {
    fn from(err: reqwest::Error) -> Self {
        LedgerError::Http(err)
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::Json(err)
    }
}

/// 台账读写接口。
///
/// 读路径服务于校验，写路径只做通行后的补记账。
pub trait Ledger: Send + Sync {
    fn fetch_record(&self, path: &str) -> Result<Option<LedgerRecord>, LedgerError>;
    fn stamp_access(&self, path: &str, stamp: &AccessStamp) -> Result<(), LedgerError>;
}

/// 通行记账字段（访问时间戳 + 计数自增）。
#[derive(Clone, Debug)]
pub struct AccessStamp {
    pub lane: LaneType,
    pub access_time_ms: u64,
}

impl AccessStamp {
    /// 生成局部更新文档；计数使用服务端原子自增哨兵。
    pub fn to_update_json(&self) -> serde_json::Value {
        match self.lane {
            LaneType::Entry => json!({
                "lastAccess": self.access_time_ms,
                "accessCount": { ".sv": { "increment": 1 } },
            }),
            LaneType::Exit => json!({
                "lastExitAccess": self.access_time_ms,
                "exitAccessCount": { ".sv": { "increment": 1 } },
            }),
        }
    }
}

/// 记账任务（调度线程投递，worker 线程执行）。
#[derive(Clone, Debug)]
pub struct StampJob {
    pub path: String,
    pub stamp: AccessStamp,
}

/// RTDB 风格的 REST 台账客户端。
///
/// 节点读取 GET {base}/{path}.json，缺失节点返回字面 null；
/// 局部更新 PATCH 同一地址。
pub struct RtdbLedger {
    base_url: String,
    auth: Option<String>,
    client: reqwest::blocking::Client,
}

impl RtdbLedger {
    pub fn new(
        base_url: &str,
        auth: Option<String>,
        timeout_ms: u64,
    ) -> Result<Self, LedgerError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
            client,
        })
    }

    fn node_url(&self, path: &str) -> String {
        match &self.auth {
            Some(auth) => format!("{}/{}.json?auth={}", self.base_url, path, auth),
            None => format!("{}/{}.json", self.base_url, path),
        }
    }
}

impl Ledger for RtdbLedger {
    fn fetch_record(&self, path: &str) -> Result<Option<LedgerRecord>, LedgerError> {
        let response = self.client.get(self.node_url(path)).send()?;
        let status = response.status().as_u16();
        let body = response.text()?;
        if !(200..300).contains(&status) {
            return Err(LedgerError::Status(status));
        }
        let record: Option<LedgerRecord> = serde_json::from_str(&body)?;
        Ok(record)
    }

    fn stamp_access(&self, path: &str, stamp: &AccessStamp) -> Result<(), LedgerError> {
        let response = self
            .client
            .patch(self.node_url(path))
            .header("content-type", "application/json")
            .body(stamp.to_update_json().to_string())
            .send()?;
        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(LedgerError::Status(status));
        }
        Ok(())
    }
}

/// 启动记账 worker：消费记账任务，失败只记日志不回传。
///
/// 通道全部发送端关闭后线程自然退出。
pub fn spawn_stamp_worker(
    ledger: Arc<dyn Ledger>,
    stamp_rx: Receiver<StampJob>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while let Ok(job) = stamp_rx.recv() {
            if let Err(err) = ledger.stamp_access(&job.path, &job.stamp) {
                log::warn!("Access stamp failed for {}: {:?}", job.path, err);
            }
        }
    })
}
