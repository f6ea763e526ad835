//! # Custodia - 证书签发与状态服务平台
//!
//! X.509 证书颁发机构核心与 OCSP 状态引擎
//!
//! ## 模块
//!
//! - `custodia_core` - 共享数据模型（标识、ID 生成、撤销信息）
//! - `custodia_profile` - 证书模板引擎
//! - `custodia_ca` - CA 签发核心
//! - `custodia_ocsp` - OCSP 状态引擎
//! - `custodia_qa` - 扩展检查器

// Re-export all sub-crates
pub use custodia_ca;
pub use custodia_core;
pub use custodia_ocsp;
pub use custodia_profile;
pub use custodia_qa;
