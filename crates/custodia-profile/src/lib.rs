//! Custodia profile - 证书模板引擎
//!
//! 解释证书模板配置，对请求执行主体模板化、公钥检查与扩展计算，
//! 产出待签名证书所需的 (granted subject, extension set)。

pub mod baseline;
pub mod conf;
pub mod error;
pub mod extensions;
pub mod iso3166;
pub mod keycheck;
pub mod oids;
pub mod profile;
pub mod roca;
pub mod serial;
pub mod subject;
pub mod types;

pub use conf::ProfileConf;
pub use error::{ProfileError, Result};
pub use extensions::{ExtensionValue, ExtensionValues, RequestedExtension};
pub use profile::Certprofile;
pub use serial::SerialNumberMode;
pub use types::{
    AiaControl, CaUris, CertDomain, CertLevel, CrlDpControl, EcCurve, ExtKeyUsageControl,
    ExtensionControl, KeySpec, KeyUsageBit, KeyUsageControl, KeypairGenControl, NotAfterMode,
    NotBeforeMode, PublicCaInfo, SignAlgo, SubjectInfo,
};
