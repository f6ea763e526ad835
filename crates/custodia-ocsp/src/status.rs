//! 状态模型

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use custodia_core::CertRevocationInfo;

use crate::issuer::HashAlgo;

/// 未知证书的对外答复策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UnknownCertBehaviour {
    #[default]
    Unknown,
    Good,
}

/// CRL 元数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrlInfo {
    pub crl_id: i64,
    pub crl_number: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub this_update: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub next_update: Option<OffsetDateTime>,
}

/// 单个序列号的状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertStatus {
    Good,
    Revoked(CertRevocationInfo),
    Unknown,
    /// 配置要求忽略（未生效或已过期的证书）
    Ignore,
    /// CRL 已过期，无法给出可靠答复
    CrlExpired,
}

/// 状态查询的完整回答
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertStatusInfo {
    pub status: CertStatus,
    pub this_update: OffsetDateTime,
    pub next_update: Option<OffsetDateTime>,
    pub cert_hash: Option<Vec<u8>>,
    pub cert_hash_algo: Option<HashAlgo>,
    pub archive_cutoff: Option<OffsetDateTime>,
    pub crl_id: Option<i64>,
}

impl CertStatusInfo {
    pub fn good(this_update: OffsetDateTime, next_update: Option<OffsetDateTime>) -> Self {
        Self::new(CertStatus::Good, this_update, next_update)
    }

    pub fn revoked(
        rev_info: CertRevocationInfo,
        this_update: OffsetDateTime,
        next_update: Option<OffsetDateTime>,
    ) -> Self {
        Self::new(CertStatus::Revoked(rev_info), this_update, next_update)
    }

    pub fn unknown(this_update: OffsetDateTime, next_update: Option<OffsetDateTime>) -> Self {
        Self::new(CertStatus::Unknown, this_update, next_update)
    }

    pub fn ignore(this_update: OffsetDateTime, next_update: Option<OffsetDateTime>) -> Self {
        Self::new(CertStatus::Ignore, this_update, next_update)
    }

    pub fn crl_expired(this_update: OffsetDateTime) -> Self {
        Self::new(CertStatus::CrlExpired, this_update, None)
    }

    fn new(
        status: CertStatus,
        this_update: OffsetDateTime,
        next_update: Option<OffsetDateTime>,
    ) -> Self {
        Self {
            status,
            this_update,
            next_update,
            cert_hash: None,
            cert_hash_algo: None,
            archive_cutoff: None,
            crl_id: None,
        }
    }

    pub fn with_cert_hash(mut self, algo: HashAlgo, hash: Vec<u8>) -> Self {
        self.cert_hash = Some(hash);
        self.cert_hash_algo = Some(algo);
        self
    }

    pub fn is_revoked(&self) -> bool {
        matches!(self.status, CertStatus::Revoked(_))
    }
}

#[cfg(test)]
mod tests {
    use custodia_core::CrlReason;

    use super::*;

    #[test]
    fn test_constructors() {
        let now = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let info = CertStatusInfo::good(now, None);
        assert_eq!(info.status, CertStatus::Good);
        assert!(!info.is_revoked());

        let rev = CertRevocationInfo::new(CrlReason::KeyCompromise, now, None);
        let info = CertStatusInfo::revoked(rev, now, None);
        assert!(info.is_revoked());

        let info = CertStatusInfo::unknown(now, None)
            .with_cert_hash(HashAlgo::Sha256, vec![1, 2, 3]);
        assert_eq!(info.cert_hash_algo, Some(HashAlgo::Sha256));
    }
}
