//! Custodia QA - 扩展检查器
//!
//! 用模板重算已签发证书的扩展集合并逐字节比对，
//! 既是测试 oracle，也是 QA 服务的后端。

pub mod checker;

pub use checker::{ExtensionsChecker, ValidationIssue};
