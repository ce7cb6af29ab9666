//! 内存仓储实现
//!
//! 测试与单机开发用。语义对齐 PostgreSQL 实现，
//! 特别是投递状态的单调推进与重复插入的冲突判定。

use std::collections::HashMap;
use std::sync::Arc;

use domain::repositories::{
    ConversationRepository, DeliveryRepository, MessageRepository, RepositoryError,
    RepositoryResult, UserRepository,
};
use domain::{
    ConversationId, Message, MessageContent, MessageId, MessageStatus, ReadUpdate, Timestamp,
    UserId,
};
use tokio::sync::RwLock;

/// 内存消息仓储
#[derive(Default)]
pub struct MemoryMessageRepository {
    messages: RwLock<HashMap<MessageId, Message>>,
}

impl MemoryMessageRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 某会话的全部消息，按服务端时间戳排序
    pub async fn conversation_messages(&self, conversation_id: ConversationId) -> Vec<Message> {
        let messages = self.messages.read().await;
        let mut result: Vec<Message> = messages
            .values()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        result.sort_by_key(|m| m.server_timestamp);
        result
    }
}

#[async_trait::async_trait]
impl MessageRepository for MemoryMessageRepository {
    async fn insert(&self, message: &Message) -> RepositoryResult<()> {
        let mut messages = self.messages.write().await;
        if messages.contains_key(&message.id) {
            return Err(RepositoryError::Conflict);
        }
        messages.insert(message.id, message.clone());
        Ok(())
    }

    async fn exists(&self, message_id: MessageId) -> RepositoryResult<bool> {
        Ok(self.messages.read().await.contains_key(&message_id))
    }

    async fn find(&self, message_id: MessageId) -> RepositoryResult<Option<Message>> {
        Ok(self.messages.read().await.get(&message_id).cloned())
    }

    async fn mark_edited(
        &self,
        message_id: MessageId,
        content: &MessageContent,
        edited_at: Timestamp,
    ) -> RepositoryResult<()> {
        let mut messages = self.messages.write().await;
        let message = messages
            .get_mut(&message_id)
            .filter(|m| !m.deleted)
            .ok_or(RepositoryError::NotFound)?;
        message.content = content.clone();
        message.edited_at = Some(edited_at);
        Ok(())
    }

    async fn mark_deleted(&self, message_id: MessageId) -> RepositoryResult<()> {
        let mut messages = self.messages.write().await;
        let message = messages
            .get_mut(&message_id)
            .ok_or(RepositoryError::NotFound)?;
        message.deleted = true;
        Ok(())
    }
}

/// 内存会话成员仓储
#[derive(Default)]
pub struct MemoryConversationRepository {
    members: RwLock<HashMap<ConversationId, Vec<UserId>>>,
}

impl MemoryConversationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一个会话及其成员
    pub async fn add_conversation(&self, conversation_id: ConversationId, member_ids: Vec<UserId>) {
        self.members
            .write()
            .await
            .insert(conversation_id, member_ids);
    }
}

#[async_trait::async_trait]
impl ConversationRepository for MemoryConversationRepository {
    async fn member_ids(&self, conversation_id: ConversationId) -> RepositoryResult<Vec<UserId>> {
        Ok(self
            .members
            .read()
            .await
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn is_member(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> RepositoryResult<bool> {
        Ok(self
            .members
            .read()
            .await
            .get(&conversation_id)
            .map(|members| members.contains(&user_id))
            .unwrap_or(false))
    }

    async fn co_member_ids(&self, user_id: UserId) -> RepositoryResult<Vec<UserId>> {
        let members = self.members.read().await;
        let mut result: Vec<UserId> = Vec::new();
        for conversation_members in members.values() {
            if !conversation_members.contains(&user_id) {
                continue;
            }
            for member in conversation_members {
                if *member != user_id && !result.contains(member) {
                    result.push(*member);
                }
            }
        }
        Ok(result)
    }
}

/// 内存投递状态仓储
///
/// 批量已读需要查消息归属，所以持有消息仓储的引用，
/// 对应数据库实现里的表连接。
pub struct MemoryDeliveryRepository {
    messages: Arc<MemoryMessageRepository>,
    statuses: RwLock<HashMap<(MessageId, UserId), MessageStatus>>,
}

impl MemoryDeliveryRepository {
    pub fn new(messages: Arc<MemoryMessageRepository>) -> Self {
        Self {
            messages,
            statuses: RwLock::new(HashMap::new()),
        }
    }

    pub async fn status_of(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> Option<MessageStatus> {
        self.statuses
            .read()
            .await
            .get(&(message_id, user_id))
            .copied()
    }
}

#[async_trait::async_trait]
impl DeliveryRepository for MemoryDeliveryRepository {
    async fn insert_pending(
        &self,
        message_id: MessageId,
        recipient_ids: &[UserId],
    ) -> RepositoryResult<()> {
        let mut statuses = self.statuses.write().await;
        for recipient_id in recipient_ids {
            statuses
                .entry((message_id, *recipient_id))
                .or_insert(MessageStatus::Sent);
        }
        Ok(())
    }

    async fn advance(
        &self,
        message_id: MessageId,
        user_id: UserId,
        status: MessageStatus,
    ) -> RepositoryResult<bool> {
        let mut statuses = self.statuses.write().await;
        match statuses.get_mut(&(message_id, user_id)) {
            Some(current) if current.can_advance_to(status) => {
                *current = status;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => {
                statuses.insert((message_id, user_id), status);
                Ok(true)
            }
        }
    }

    async fn mark_conversation_read(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> RepositoryResult<Vec<ReadUpdate>> {
        let conversation_messages = self.messages.conversation_messages(conversation_id).await;
        let mut statuses = self.statuses.write().await;
        let mut updates = Vec::new();

        for message in conversation_messages {
            if let Some(current) = statuses.get_mut(&(message.id, user_id)) {
                if current.can_advance_to(MessageStatus::Read) {
                    *current = MessageStatus::Read;
                    updates.push(ReadUpdate {
                        message_id: message.id,
                        sender_id: message.sender_id,
                    });
                }
            }
        }
        Ok(updates)
    }
}

/// 内存用户仓储
#[derive(Default)]
pub struct MemoryUserRepository {
    last_seen: RwLock<HashMap<UserId, Timestamp>>,
    push_tokens: RwLock<HashMap<UserId, String>>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_push_token(&self, user_id: UserId, token: impl Into<String>) {
        self.push_tokens.write().await.insert(user_id, token.into());
    }

    pub async fn last_seen_of(&self, user_id: UserId) -> Option<Timestamp> {
        self.last_seen.read().await.get(&user_id).copied()
    }
}

#[async_trait::async_trait]
impl UserRepository for MemoryUserRepository {
    async fn update_last_seen(&self, user_id: UserId, seen_at: Timestamp) -> RepositoryResult<()> {
        let mut last_seen = self.last_seen.write().await;
        let entry = last_seen.entry(user_id).or_insert(seen_at);
        if seen_at > *entry {
            *entry = seen_at;
        }
        Ok(())
    }

    async fn push_token(&self, user_id: UserId) -> RepositoryResult<Option<String>> {
        Ok(self.push_tokens.read().await.get(&user_id).cloned())
    }
}
