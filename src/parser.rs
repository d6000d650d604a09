use serde::Deserialize;

use crate::model::{Credential, LaneType};

/// 凭证解析失败（载荷非法或缺字段）。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseError {
    MalformedPayload(String),
}

/// 凭证载荷的原始字段集合。
///
/// 入口码使用 spotNumber，出口码使用 spotId，字段名差异来自
/// 两类码各自的签发方，解析时按车道取对应字段。
#[derive(Deserialize)]
struct RawPayload {
    #[serde(rename = "parkingId", default)]
    parking_id: Option<String>,
    #[serde(rename = "spotNumber", default)]
    spot_number: Option<String>,
    #[serde(rename = "spotId", default)]
    spot_id: Option<String>,
    #[serde(rename = "userId", default)]
    user_id: Option<String>,
    #[serde(rename = "type", default)]
    credential_type: Option<String>,
    #[serde(rename = "paymentId", default)]
    payment_ref: Option<String>,
}

/// 将原始扫描串解析为结构化凭证。
///
/// 缺失必填字段一律报错，不做默认值兜底。
pub fn parse_credential(raw: &str, lane: LaneType) -> Result<Credential, ParseError> {
    let payload: RawPayload = serde_json::from_str(raw)
        .map_err(|err| ParseError::MalformedPayload(format!("invalid JSON: {}", err)))?;

    let facility_id = require(payload.parking_id, "parkingId")?;
    let subject_id = require(payload.user_id, "userId")?;
    let spot_id = match lane {
        LaneType::Entry => require(payload.spot_number, "spotNumber")?,
        LaneType::Exit => require(payload.spot_id, "spotId")?,
    };
    let credential_type = match lane {
        // 出口码必须携带 type 字段；取值是否匹配由校验器判定
        LaneType::Exit => Some(require(payload.credential_type, "type")?),
        LaneType::Entry => payload.credential_type,
    };

    Ok(Credential {
        facility_id,
        lane,
        spot_id,
        subject_id,
        credential_type,
        payment_ref: payload.payment_ref,
    })
}

fn require(value: Option<String>, field: &str) -> Result<String, ParseError> {
    match value {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(ParseError::MalformedPayload(format!(
            "missing field {}",
            field
        ))),
    }
}
