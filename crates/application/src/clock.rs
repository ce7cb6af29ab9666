//! 时间源抽象
//!
//! 服务端时间戳、编辑窗口判定、最近在线时间都取自注入的时钟，
//! 测试里换成固定时刻就能复现窗口边界，不用真等。

use domain::Timestamp;

/// 当前时刻的提供方
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// 系统 UTC 时钟，生产装配使用的唯一实现
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        chrono::Utc::now()
    }
}
