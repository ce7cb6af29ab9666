//! 投递状态模型
//!
//! 每条消息对每个接收者维护一条回执记录，
//! 状态只能沿 SENT → DELIVERED → READ 单调推进。

use serde::{Deserialize, Serialize};

use crate::value_objects::{MessageId, Timestamp, UserId};

/// 投递状态。排序即推进顺序。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    /// 状态序号，用于存储层的单调推进判断。
    pub fn rank(&self) -> i16 {
        match self {
            Self::Sent => 0,
            Self::Delivered => 1,
            Self::Read => 2,
        }
    }

    /// 是否允许从当前状态推进到目标状态（必须严格变大）。
    pub fn can_advance_to(&self, next: MessageStatus) -> bool {
        next.rank() > self.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "SENT",
            Self::Delivered => "DELIVERED",
            Self::Read => "READ",
        }
    }
}

impl TryFrom<i16> for MessageStatus {
    type Error = String;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Sent),
            1 => Ok(Self::Delivered),
            2 => Ok(Self::Read),
            other => Err(format!("无效的投递状态序号: {other}")),
        }
    }
}

/// 单条投递回执记录。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub status: MessageStatus,
    pub updated_at: Timestamp,
}

/// 批量已读操作中被推进的一条回执。
///
/// 携带原消息发送者，便于向其广播状态更新。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadUpdate {
    pub message_id: MessageId,
    pub sender_id: UserId,
}
