//! 通话信令模型
//!
//! 服务端只做信令转发，媒体流经由客户端之间的 WebRTC 通道传输。

use serde::{Deserialize, Serialize};

use crate::value_objects::{CallId, Timestamp, UserId};

/// 通话类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallType {
    Voice,
    Video,
}

/// 通话结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallEndReason {
    /// 正常挂断
    Ended,
    /// 被叫拒绝
    Declined,
    /// 被叫不在线
    Missed,
    /// 被叫正忙
    Busy,
    /// 连接异常中断
    Failed,
}

/// 进行中的通话会话。仅保存在发起方连接所在实例的内存里。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSession {
    pub call_id: CallId,
    pub caller_id: UserId,
    pub callee_id: UserId,
    pub call_type: CallType,
    pub started_at: Timestamp,
}

impl CallSession {
    /// 返回会话中另一方的用户ID；给定用户不在会话中时返回 None。
    pub fn peer_of(&self, user_id: UserId) -> Option<UserId> {
        if self.caller_id == user_id {
            Some(self.callee_id)
        } else if self.callee_id == user_id {
            Some(self.caller_id)
        } else {
            None
        }
    }
}
