use thiserror::Error;

/// 模板引擎错误
#[derive(Debug, Error)]
pub enum ProfileError {
    /// 模板配置自身有问题，在加载时报告
    #[error("profile configuration error: {0}")]
    Config(String),

    /// 请求与模板策略冲突
    #[error("bad certificate template: {0}")]
    BadTemplate(String),

    /// DER编解码错误
    #[error("encoding error: {0}")]
    Encoding(#[from] der::Error),
}

impl ProfileError {
    pub fn config(message: impl Into<String>) -> Self {
        ProfileError::Config(message.into())
    }

    pub fn bad_template(message: impl Into<String>) -> Self {
        ProfileError::BadTemplate(message.into())
    }
}

/// Result类型别名
pub type Result<T> = std::result::Result<T, ProfileError>;
