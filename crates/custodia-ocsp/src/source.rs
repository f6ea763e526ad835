//! 状态数据源
//!
//! 刷新管道从这里读取签发者、证书状态与 CRL 元数据，
//! 生产部署可换成只读副本库。

use thiserror::Error;

use crate::status::CrlInfo;

#[derive(Debug, Error)]
#[error("data access error: {0}")]
pub struct SourceError(pub String);

/// 快路径用的签发者摘要行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuerDigestRow {
    pub id: u32,
    /// 撤销信息的紧凑编码
    pub rev_info: Option<String>,
    pub sha1_fp: String,
}

/// 慢路径用的完整签发者行
#[derive(Debug, Clone)]
pub struct IssuerRow {
    pub id: u32,
    pub not_before: i64,
    pub rev_info: Option<String>,
    pub sha1_fp: String,
    pub cert_der: Vec<u8>,
    pub crl_id: i64,
}

/// 单个证书的状态行
#[derive(Debug, Clone)]
pub struct CertStatusRow {
    pub not_before: i64,
    pub not_after: i64,
    pub revoked: bool,
    pub reason: u8,
    pub rev_time: i64,
    pub invalidity_time: Option<i64>,
    /// base64 编码的证书哈希，仅在请求时填充
    pub cert_hash: Option<String>,
    pub crl_id: i64,
}

/// 状态引擎消费的数据源接口
pub trait StatusSource: Send + Sync {
    fn issuer_digests(&self) -> Result<Vec<IssuerDigestRow>, SourceError>;

    fn issuers(&self) -> Result<Vec<IssuerRow>, SourceError>;

    fn crl_infos(&self) -> Result<Vec<CrlInfo>, SourceError>;

    /// (签发者, 序列号) 的状态行查询
    fn cert_status(
        &self,
        issuer_id: u32,
        serial_hex: &str,
        include_cert_hash: bool,
        include_invalidity: bool,
    ) -> Result<Option<CertStatusRow>, SourceError>;

    /// DBSCHEMA 表取值
    fn dbschema(&self, name: &str) -> Result<Option<String>, SourceError>;
}
