//! 系统事件
//!
//! 集群锁（LOCK）与配置变更通知（CA_CHANGE）都通过系统事件行表达。

use serde::{Deserialize, Serialize};

/// 集群主锁事件名
pub const EVENT_LOCK: &str = "LOCK";

/// CA 配置变更事件名
pub const EVENT_CA_CHANGE: &str = "CA_CHANGE";

/// 一条系统事件记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemEvent {
    pub name: String,
    pub owner: String,
    /// 事件时间，epoch 秒
    pub event_time: i64,
}

impl SystemEvent {
    pub fn new(name: impl Into<String>, owner: impl Into<String>, event_time: i64) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
            event_time,
        }
    }
}
