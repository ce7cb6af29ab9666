//! 在线状态模型

use serde::{Deserialize, Serialize};

use crate::value_objects::{Timestamp, UserId};

/// 用户在线状态。TYPING 仅作为瞬时事件广播，不会被持久化。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PresenceStatus {
    Online,
    Offline,
    Typing,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "ONLINE",
            Self::Offline => "OFFLINE",
            Self::Typing => "TYPING",
        }
    }
}

/// 某一时刻的用户在线快照。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceSnapshot {
    pub user_id: UserId,
    pub online: bool,
    /// 最近一次离线时间；从未在线过的用户为 None。
    pub last_seen: Option<Timestamp>,
}
