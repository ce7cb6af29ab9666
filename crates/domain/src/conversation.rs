//! 会话与成员关系模型

use serde::{Deserialize, Serialize};

use crate::value_objects::{ConversationId, Timestamp, UserId};

/// 会话类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationKind {
    /// 一对一私聊
    Direct,
    /// 群聊
    Group,
}

/// 群成员角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberRole {
    Owner,
    Admin,
    Member,
}

/// 会话实体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub kind: ConversationKind,
    /// 群聊标题；私聊为 None。
    pub title: Option<String>,
    pub created_at: Timestamp,
}

/// 会话成员关系
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMember {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub role: MemberRole,
    pub joined_at: Timestamp,
}
