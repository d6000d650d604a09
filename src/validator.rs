use crate::ledger::Ledger;
use crate::model::{Credential, LaneType, LedgerRecord, RecordStatus, EXIT_RECORD_TYPE};

/// 校验拒绝原因（按判定顺序排列）。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
    WrongFacility,
    RecordNotFound,
    SubjectMismatch,
    RecordNotActive,
    RecordTypeMismatch,
    Expired,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::WrongFacility => "wrong_facility",
            RejectReason::RecordNotFound => "record_not_found",
            RejectReason::SubjectMismatch => "subject_mismatch",
            RejectReason::RecordNotActive => "record_not_active",
            RejectReason::RecordTypeMismatch => "record_type_mismatch",
            RejectReason::Expired => "expired",
        }
    }
}

/// 凭证校验器。
///
/// 六步判定按固定顺序短路，保证拒绝原因的确定性；
/// 除一次台账读取外无副作用。
pub struct SpotValidator {
    facility_id: String,
}

impl SpotValidator {
    pub fn new(facility_id: impl Into<String>) -> Self {
        Self {
            facility_id: facility_id.into(),
        }
    }

    pub fn validate(
        &self,
        credential: &Credential,
        ledger: &dyn Ledger,
        now_ms: u64,
    ) -> Result<LedgerRecord, RejectReason> {
        if credential.facility_id != self.facility_id {
            return Err(RejectReason::WrongFacility);
        }

        let path = credential.record_path();
        let record = match ledger.fetch_record(&path) {
            Ok(Some(record)) => record,
            Ok(None) => return Err(RejectReason::RecordNotFound),
            Err(err) => {
                // 读取失败按记录缺失处理：存疑即拒绝
                log::warn!("Ledger read failed for {}: {:?}", path, err);
                return Err(RejectReason::RecordNotFound);
            }
        };

        if record.user_id.as_deref() != Some(credential.subject_id.as_str()) {
            return Err(RejectReason::SubjectMismatch);
        }

        if record.record_status() != RecordStatus::Active {
            log::debug!("Record status is {}", record.record_status().as_str());
            return Err(RejectReason::RecordNotActive);
        }

        if credential.lane == LaneType::Exit {
            // 凭证与台账记录的类型标记都必须是出口字面值
            let credential_ok = credential.credential_type.as_deref() == Some(EXIT_RECORD_TYPE);
            let record_ok = record.record_type.as_deref() == Some(EXIT_RECORD_TYPE);
            if !credential_ok || !record_ok {
                return Err(RejectReason::RecordTypeMismatch);
            }
        }

        match record.expiry_time {
            // 与有效期恰好相等仍放行，严格大于才算过期
            Some(expiry) if now_ms > expiry => return Err(RejectReason::Expired),
            Some(_) => {}
            // 有效期缺失：入口记录视为不过期，出口记录视为已过期
            None => {
                if credential.lane == LaneType::Exit {
                    return Err(RejectReason::Expired);
                }
            }
        }

        Ok(record)
    }
}
