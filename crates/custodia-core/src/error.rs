use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 签发与管理操作的稳定错误码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// 证书已存在（同一主体或同一序列号）
    AlreadyIssued,
    /// 请求模板不符合证书模板策略
    BadCertTemplate,
    /// 请求本身非法
    BadRequest,
    /// CRL 生成失败
    CrlFailure,
    /// 数据库访问失败
    DatabaseFailure,
    /// 策略禁止该操作
    NotPermitted,
    /// 内部系统错误
    SystemFailure,
    /// 未知的证书模板
    UnknownCertProfile,
}

impl ErrorCode {
    /// Stable wire identifier of this code.
    pub fn name(&self) -> &'static str {
        match self {
            ErrorCode::AlreadyIssued => "ALREADY_ISSUED",
            ErrorCode::BadCertTemplate => "BAD_CERT_TEMPLATE",
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::CrlFailure => "CRL_FAILURE",
            ErrorCode::DatabaseFailure => "DATABASE_FAILURE",
            ErrorCode::NotPermitted => "NOT_PERMITTED",
            ErrorCode::SystemFailure => "SYSTEM_FAILURE",
            ErrorCode::UnknownCertProfile => "UNKNOWN_CERT_PROFILE",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// 携带稳定错误码的操作错误
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct OperationError {
    pub code: ErrorCode,
    pub message: String,
}

impl OperationError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn already_issued(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AlreadyIssued, message)
    }

    pub fn bad_cert_template(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadCertTemplate, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    pub fn crl_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::CrlFailure, message)
    }

    pub fn database_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseFailure, message)
    }

    pub fn not_permitted(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotPermitted, message)
    }

    pub fn system_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SystemFailure, message)
    }

    pub fn unknown_cert_profile(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnknownCertProfile, message)
    }
}

/// Result类型别名
pub type Result<T> = std::result::Result<T, OperationError>;
