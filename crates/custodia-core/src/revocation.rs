//! 撤销原因与撤销信息

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// RFC 5280 撤销原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CrlReason {
    /// 未指定
    Unspecified,
    /// 密钥泄露
    KeyCompromise,
    /// CA密钥泄露
    CaCompromise,
    /// 从属关系改变
    AffiliationChanged,
    /// 被取代
    Superseded,
    /// 停止操作
    CessationOfOperation,
    /// 证书暂停
    CertificateHold,
    /// 从CRL中移除（仅用于解除暂停）
    RemoveFromCrl,
    /// 特权撤销
    PrivilegeWithdrawn,
    /// AA泄露
    AaCompromise,
}

impl CrlReason {
    /// RFC 5280 reason code.
    pub fn code(&self) -> u8 {
        match self {
            CrlReason::Unspecified => 0,
            CrlReason::KeyCompromise => 1,
            CrlReason::CaCompromise => 2,
            CrlReason::AffiliationChanged => 3,
            CrlReason::Superseded => 4,
            CrlReason::CessationOfOperation => 5,
            CrlReason::CertificateHold => 6,
            CrlReason::RemoveFromCrl => 8,
            CrlReason::PrivilegeWithdrawn => 9,
            CrlReason::AaCompromise => 10,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => CrlReason::Unspecified,
            1 => CrlReason::KeyCompromise,
            2 => CrlReason::CaCompromise,
            3 => CrlReason::AffiliationChanged,
            4 => CrlReason::Superseded,
            5 => CrlReason::CessationOfOperation,
            6 => CrlReason::CertificateHold,
            8 => CrlReason::RemoveFromCrl,
            9 => CrlReason::PrivilegeWithdrawn,
            10 => CrlReason::AaCompromise,
            _ => return None,
        })
    }

    /// 是否为"暂停"类原因
    pub fn is_hold(&self) -> bool {
        matches!(self, CrlReason::CertificateHold)
    }
}

/// 一次撤销的完整描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertRevocationInfo {
    pub reason: CrlReason,
    #[serde(with = "time::serde::rfc3339")]
    pub revocation_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub invalidity_time: Option<OffsetDateTime>,
}

impl CertRevocationInfo {
    pub fn new(
        reason: CrlReason,
        revocation_time: OffsetDateTime,
        invalidity_time: Option<OffsetDateTime>,
    ) -> Self {
        Self {
            reason,
            revocation_time,
            invalidity_time,
        }
    }

    /// 紧凑编码: `<code>,<rev_epoch_s>[,<inv_epoch_s>]`
    ///
    /// 与状态表 REV_INFO 列保持一致。
    pub fn to_encoded(&self) -> String {
        match self.invalidity_time {
            Some(inv) => format!(
                "{},{},{}",
                self.reason.code(),
                self.revocation_time.unix_timestamp(),
                inv.unix_timestamp()
            ),
            None => format!(
                "{},{}",
                self.reason.code(),
                self.revocation_time.unix_timestamp()
            ),
        }
    }

    pub fn from_encoded(encoded: &str) -> Option<Self> {
        let mut parts = encoded.split(',');
        let reason = CrlReason::from_code(parts.next()?.trim().parse().ok()?)?;
        let rev_time =
            OffsetDateTime::from_unix_timestamp(parts.next()?.trim().parse().ok()?).ok()?;
        let invalidity_time = match parts.next() {
            Some(s) => Some(OffsetDateTime::from_unix_timestamp(s.trim().parse().ok()?).ok()?),
            None => None,
        };

        if parts.next().is_some() {
            return None;
        }

        Some(Self {
            reason,
            revocation_time: rev_time,
            invalidity_time,
        })
    }
}
