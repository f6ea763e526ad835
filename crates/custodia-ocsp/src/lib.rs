//! Custodia OCSP - 状态引擎
//!
//! 内存签发者索引加周期性刷新管道，按 (签发者指纹, 序列号)
//! 回答证书状态查询，支持 CRL 新鲜度与 CA 撤销继承。

pub mod engine;
pub mod issuer;
pub mod source;
pub mod status;
pub mod store;

pub use engine::{CertStatusStore, OcspStoreConf, OcspStoreError};
pub use issuer::{HashAlgo, IssuerEntry, RequestIssuer};
pub use source::{CertStatusRow, IssuerDigestRow, IssuerRow, SourceError, StatusSource};
pub use status::{CertStatus, CertStatusInfo, CrlInfo, UnknownCertBehaviour};
pub use store::{IssuerSnapshot, IssuerStore};
