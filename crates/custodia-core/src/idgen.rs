//! 唯一 ID 生成器
//!
//! 64 位 ID 布局: `(epoch_offset_seconds << 24) | (shard_id << 16) | counter`。
//! 秒内计数器耗尽时阻塞到下一个整秒，同一分片内严格递增。

use std::{
    sync::Mutex,
    thread,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use thiserror::Error;

/// 2010-01-01T00:00:00Z，ID 时间戳的纪元
const EPOCH_2010: u64 = 1_262_304_000;

/// 允许的时钟回拨容忍（秒）
const CLOCK_TOLERANCE_SECS: u64 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdGenError {
    /// 系统时钟回拨超出容忍范围
    #[error("wall clock regressed from {last} to {now}")]
    ClockRegression { last: u64, now: u64 },

    /// 时钟早于纪元
    #[error("wall clock {0} is before the id epoch")]
    BeforeEpoch(u64),
}

struct State {
    last_second: u64,
    counter: u32,
}

/// 按分片参数化的单调 ID 生成器
///
/// 不同分片生成的 ID 由构造保证不相交；证书行 ID 与 CRL 号都从这里取。
pub struct UniqueIdGenerator {
    shard_id: u8,
    state: Mutex<State>,
}

impl UniqueIdGenerator {
    pub fn new(shard_id: u8) -> Self {
        Self {
            shard_id,
            state: Mutex::new(State {
                last_second: 0,
                counter: 0,
            }),
        }
    }

    pub fn shard_id(&self) -> u8 {
        self.shard_id
    }

    /// 生成下一个 ID
    pub fn next_id(&self) -> Result<i64, IdGenError> {
        let mut state = self.state.lock().expect("idgen state poisoned");

        loop {
            let now = unix_seconds();
            if now < EPOCH_2010 {
                return Err(IdGenError::BeforeEpoch(now));
            }

            if now < state.last_second {
                if state.last_second - now > CLOCK_TOLERANCE_SECS {
                    return Err(IdGenError::ClockRegression {
                        last: state.last_second,
                        now,
                    });
                }
                // small regression: stay on the already-issued second
                if state.counter <= 0xFFFF {
                    break;
                }
                thread::sleep(Duration::from_millis(100));
                continue;
            }

            if now > state.last_second {
                state.last_second = now;
                state.counter = 0;
                break;
            }

            // same second
            if state.counter <= 0xFFFF {
                break;
            }

            // counter exhausted within this second, wait for the next one
            thread::sleep(Duration::from_millis(100));
        }

        let id = (((state.last_second - EPOCH_2010) as i64) << 24)
            | ((self.shard_id as i64) << 16)
            | state.counter as i64;
        state.counter += 1;
        Ok(id)
    }
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
