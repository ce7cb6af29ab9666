//! 消息业务服务
//!
//! 发送、编辑、删除与表情回应。发送路径先落库后广播：
//! 给发送方的OK确认以本地持久化成功为准，广播与推送随后异步铺开。

use std::sync::Arc;

use domain::repositories::{
    ConversationRepository, DeliveryRepository, MessageRepository, RepositoryError,
};
use domain::{
    ContentType, ConversationId, DomainError, Message, MessageContent, MessageId, UserId,
};

use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::protocol::ServerEvent;
use crate::router::BroadcastRouter;

/// 一次消息发送请求，字段与 message.send 帧一致
#[derive(Debug, Clone)]
pub struct SendMessageRequest {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub content: String,
    pub content_type: ContentType,
    pub reply_to_id: Option<MessageId>,
    pub media_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub forwarded_from: Option<MessageId>,
}

/// 消息服务
pub struct MessagingService {
    messages: Arc<dyn MessageRepository>,
    conversations: Arc<dyn ConversationRepository>,
    deliveries: Arc<dyn DeliveryRepository>,
    router: Arc<BroadcastRouter>,
    clock: Arc<dyn Clock>,
}

impl MessagingService {
    pub fn new(
        messages: Arc<dyn MessageRepository>,
        conversations: Arc<dyn ConversationRepository>,
        deliveries: Arc<dyn DeliveryRepository>,
        router: Arc<BroadcastRouter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            messages,
            conversations,
            deliveries,
            router,
            clock,
        }
    }

    /// 发送一条消息
    ///
    /// 消息ID由客户端生成，重复ID直接拒绝，这是重发去重的依据。
    /// 返回时消息已持久化；广播结果不影响返回值。
    pub async fn send_message(
        &self,
        sender_id: UserId,
        request: SendMessageRequest,
    ) -> Result<Message, ApplicationError> {
        if !self
            .conversations
            .is_member(request.conversation_id, sender_id)
            .await?
        {
            return Err(DomainError::NotAMember.into());
        }

        if self.messages.exists(request.message_id).await? {
            return Err(DomainError::DuplicateMessage {
                message_id: request.message_id,
            }
            .into());
        }

        let message = Message::new(
            request.message_id,
            request.conversation_id,
            sender_id,
            request.content,
            request.content_type,
            request.reply_to_id,
            request.media_url,
            request.thumbnail_url,
            request.forwarded_from,
            self.clock.now(),
        )?;

        // 两个并发的同ID插入只有一个能赢，输家按重复处理
        if let Err(e) = self.messages.insert(&message).await {
            return match e {
                RepositoryError::Conflict => Err(DomainError::DuplicateMessage {
                    message_id: message.id,
                }
                .into()),
                other => Err(other.into()),
            };
        }

        let recipients: Vec<UserId> = self
            .conversations
            .member_ids(message.conversation_id)
            .await?
            .into_iter()
            .filter(|id| *id != sender_id)
            .collect();

        self.deliveries
            .insert_pending(message.id, &recipients)
            .await?;

        tracing::info!(
            message_id = %message.id,
            conversation_id = %message.conversation_id,
            sender_id = %sender_id,
            recipients = recipients.len(),
            "消息已落库，开始广播"
        );

        self.router.broadcast_message(&message, &recipients).await?;
        Ok(message)
    }

    /// 编辑自己的消息，超出编辑窗口后拒绝
    pub async fn edit_message(
        &self,
        editor_id: UserId,
        message_id: MessageId,
        new_content: impl Into<String>,
    ) -> Result<(), ApplicationError> {
        let message = self
            .messages
            .find(message_id)
            .await?
            .filter(|m| !m.deleted)
            .ok_or_else(|| DomainError::MessageNotFound { message_id })?;

        if !message.is_sent_by(editor_id) {
            return Err(DomainError::NotMessageSender.into());
        }

        let now = self.clock.now();
        if !message.within_edit_window(now) {
            return Err(DomainError::EditWindowExpired.into());
        }

        let content = MessageContent::new(new_content)?;
        self.messages.mark_edited(message_id, &content, now).await?;

        let member_ids = self
            .conversations
            .member_ids(message.conversation_id)
            .await?;
        let event = ServerEvent::MessageEdited {
            message_id,
            conversation_id: message.conversation_id,
            content: content.as_str().to_owned(),
            edited_at: now,
        };
        self.router.broadcast_to_users(&event, &member_ids).await
    }

    /// 删除自己的消息（墓碑标记，不物理删除）
    pub async fn delete_message(
        &self,
        requester_id: UserId,
        message_id: MessageId,
    ) -> Result<(), ApplicationError> {
        let message = self
            .messages
            .find(message_id)
            .await?
            .ok_or_else(|| DomainError::MessageNotFound { message_id })?;

        if !message.is_sent_by(requester_id) {
            return Err(DomainError::NotMessageSender.into());
        }

        self.messages.mark_deleted(message_id).await?;

        let member_ids = self
            .conversations
            .member_ids(message.conversation_id)
            .await?;
        let event = ServerEvent::MessageDeleted {
            message_id,
            conversation_id: message.conversation_id,
        };
        self.router.broadcast_to_users(&event, &member_ids).await
    }

    /// 对消息添加或移除表情回应
    ///
    /// 回应只在会话成员间实时扩散，不落库也不推送；
    /// 离线成员通过历史同步补齐。
    pub async fn toggle_reaction(
        &self,
        user_id: UserId,
        message_id: MessageId,
        emoji: impl Into<String>,
        added: bool,
    ) -> Result<(), ApplicationError> {
        let message = self
            .messages
            .find(message_id)
            .await?
            .ok_or_else(|| DomainError::MessageNotFound { message_id })?;

        if !self
            .conversations
            .is_member(message.conversation_id, user_id)
            .await?
        {
            return Err(DomainError::NotAMember.into());
        }

        let member_ids = self
            .conversations
            .member_ids(message.conversation_id)
            .await?;
        let event = ServerEvent::MessageReaction {
            message_id,
            conversation_id: message.conversation_id,
            user_id,
            emoji: emoji.into(),
            added,
        };
        self.router.broadcast_to_users(&event, &member_ids).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use super::*;
    use crate::clock::SystemClock;
    use crate::local_relay::LocalRelay;
    use crate::presence::memory::MemoryPresenceStore;
    use crate::push::NoopPushSender;
    use crate::registry::{ConnectionHandle, ConnectionRegistry};
    use domain::{
        ConnectionId, DeviceId, MockConversationRepository, MockDeliveryRepository,
        MockMessageRepository, MockUserRepository,
    };

    fn make_request() -> SendMessageRequest {
        SendMessageRequest {
            message_id: MessageId::from(Uuid::new_v4()),
            conversation_id: ConversationId::from(Uuid::new_v4()),
            content: "测试消息".to_string(),
            content_type: ContentType::Text,
            reply_to_id: None,
            media_url: None,
            thumbnail_url: None,
            forwarded_from: None,
        }
    }

    struct Fixture {
        registry: Arc<ConnectionRegistry>,
        presence: Arc<MemoryPresenceStore>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                registry: Arc::new(ConnectionRegistry::new(Duration::from_secs(1))),
                presence: Arc::new(MemoryPresenceStore::new()),
            }
        }

        fn service(
            &self,
            messages: MockMessageRepository,
            conversations: MockConversationRepository,
            deliveries: MockDeliveryRepository,
        ) -> MessagingService {
            let mut users = MockUserRepository::new();
            users.expect_push_token().returning(|_| Ok(None));
            let router = Arc::new(BroadcastRouter::new(
                self.registry.clone(),
                Arc::new(LocalRelay::new()),
                Arc::new(NoopPushSender),
                Arc::new(users),
                self.presence.clone(),
            ));
            MessagingService::new(
                Arc::new(messages),
                Arc::new(conversations),
                Arc::new(deliveries),
                router,
                Arc::new(SystemClock),
            )
        }

        async fn connect(&self, user_id: UserId) -> mpsc::Receiver<String> {
            let (tx, rx) = mpsc::channel(16);
            self.registry
                .register(ConnectionHandle {
                    id: ConnectionId::generate(),
                    user_id,
                    device_id: DeviceId::new("dev-1"),
                    sender: tx,
                })
                .await;
            rx
        }
    }

    #[tokio::test]
    async fn test_send_message_persists_then_broadcasts() {
        let fixture = Fixture::new();
        let sender_id = UserId::from(Uuid::new_v4());
        let recipient_id = UserId::from(Uuid::new_v4());
        let mut recipient_rx = fixture.connect(recipient_id).await;
        let request = make_request();
        let conversation_id = request.conversation_id;

        let mut messages = MockMessageRepository::new();
        messages.expect_exists().returning(|_| Ok(false));
        messages.expect_insert().returning(|_| Ok(()));
        let mut conversations = MockConversationRepository::new();
        conversations.expect_is_member().returning(|_, _| Ok(true));
        conversations
            .expect_member_ids()
            .returning(move |_| Ok(vec![sender_id, recipient_id]));
        let mut deliveries = MockDeliveryRepository::new();
        deliveries
            .expect_insert_pending()
            .withf(move |_, recipients| recipients == [recipient_id])
            .returning(|_, _| Ok(()));

        let service = fixture.service(messages, conversations, deliveries);
        let message = service.send_message(sender_id, request).await.unwrap();

        assert_eq!(message.conversation_id, conversation_id);
        let frame = recipient_rx.recv().await.unwrap();
        assert!(frame.contains("\"type\":\"message.new\""));
        assert!(frame.contains("测试消息"));
    }

    #[tokio::test]
    async fn test_send_rejects_non_member() {
        let fixture = Fixture::new();
        let sender_id = UserId::from(Uuid::new_v4());

        let mut messages = MockMessageRepository::new();
        messages.expect_exists().never();
        let mut conversations = MockConversationRepository::new();
        conversations.expect_is_member().returning(|_, _| Ok(false));
        let deliveries = MockDeliveryRepository::new();

        let service = fixture.service(messages, conversations, deliveries);
        let result = service.send_message(sender_id, make_request()).await;

        assert!(matches!(
            result,
            Err(ApplicationError::Domain(DomainError::NotAMember))
        ));
    }

    #[tokio::test]
    async fn test_send_rejects_duplicate_message_id() {
        let fixture = Fixture::new();
        let sender_id = UserId::from(Uuid::new_v4());

        let mut messages = MockMessageRepository::new();
        messages.expect_exists().returning(|_| Ok(true));
        messages.expect_insert().never();
        let mut conversations = MockConversationRepository::new();
        conversations.expect_is_member().returning(|_, _| Ok(true));
        let deliveries = MockDeliveryRepository::new();

        let service = fixture.service(messages, conversations, deliveries);
        let result = service.send_message(sender_id, make_request()).await;

        assert!(matches!(
            result,
            Err(ApplicationError::Domain(DomainError::DuplicateMessage { .. }))
        ));
    }

    #[tokio::test]
    async fn test_insert_conflict_maps_to_duplicate() {
        let fixture = Fixture::new();
        let sender_id = UserId::from(Uuid::new_v4());

        let mut messages = MockMessageRepository::new();
        messages.expect_exists().returning(|_| Ok(false));
        messages
            .expect_insert()
            .returning(|_| Err(RepositoryError::Conflict));
        let mut conversations = MockConversationRepository::new();
        conversations.expect_is_member().returning(|_, _| Ok(true));
        let deliveries = MockDeliveryRepository::new();

        let service = fixture.service(messages, conversations, deliveries);
        let result = service.send_message(sender_id, make_request()).await;

        assert!(matches!(
            result,
            Err(ApplicationError::Domain(DomainError::DuplicateMessage { .. }))
        ));
    }

    #[tokio::test]
    async fn test_edit_rejected_outside_window() {
        let fixture = Fixture::new();
        let sender_id = UserId::from(Uuid::new_v4());
        let message_id = MessageId::from(Uuid::new_v4());

        let old = Message::new(
            message_id,
            ConversationId::from(Uuid::new_v4()),
            sender_id,
            "旧内容",
            ContentType::Text,
            None,
            None,
            None,
            None,
            Utc::now() - chrono::Duration::minutes(16),
        )
        .unwrap();

        let mut messages = MockMessageRepository::new();
        messages
            .expect_find()
            .returning(move |_| Ok(Some(old.clone())));
        messages.expect_mark_edited().never();
        let conversations = MockConversationRepository::new();
        let deliveries = MockDeliveryRepository::new();

        let service = fixture.service(messages, conversations, deliveries);
        let result = service.edit_message(sender_id, message_id, "新内容").await;

        assert!(matches!(
            result,
            Err(ApplicationError::Domain(DomainError::EditWindowExpired))
        ));
    }

    #[tokio::test]
    async fn test_edit_by_non_sender_rejected() {
        let fixture = Fixture::new();
        let sender_id = UserId::from(Uuid::new_v4());
        let other_id = UserId::from(Uuid::new_v4());
        let message_id = MessageId::from(Uuid::new_v4());

        let old = Message::new(
            message_id,
            ConversationId::from(Uuid::new_v4()),
            sender_id,
            "旧内容",
            ContentType::Text,
            None,
            None,
            None,
            None,
            Utc::now(),
        )
        .unwrap();

        let mut messages = MockMessageRepository::new();
        messages
            .expect_find()
            .returning(move |_| Ok(Some(old.clone())));
        let conversations = MockConversationRepository::new();
        let deliveries = MockDeliveryRepository::new();

        let service = fixture.service(messages, conversations, deliveries);
        let result = service.edit_message(other_id, message_id, "新内容").await;

        assert!(matches!(
            result,
            Err(ApplicationError::Domain(DomainError::NotMessageSender))
        ));
    }

    #[tokio::test]
    async fn test_delete_broadcasts_tombstone() {
        let fixture = Fixture::new();
        let sender_id = UserId::from(Uuid::new_v4());
        let member_id = UserId::from(Uuid::new_v4());
        let message_id = MessageId::from(Uuid::new_v4());
        let mut member_rx = fixture.connect(member_id).await;

        let conversation_id = ConversationId::from(Uuid::new_v4());
        let old = Message::new(
            message_id,
            conversation_id,
            sender_id,
            "将被删除",
            ContentType::Text,
            None,
            None,
            None,
            None,
            Utc::now(),
        )
        .unwrap();

        let mut messages = MockMessageRepository::new();
        messages
            .expect_find()
            .returning(move |_| Ok(Some(old.clone())));
        messages.expect_mark_deleted().returning(|_| Ok(()));
        let mut conversations = MockConversationRepository::new();
        conversations
            .expect_member_ids()
            .returning(move |_| Ok(vec![sender_id, member_id]));
        let deliveries = MockDeliveryRepository::new();

        let service = fixture.service(messages, conversations, deliveries);
        service.delete_message(sender_id, message_id).await.unwrap();

        let frame = member_rx.recv().await.unwrap();
        assert!(frame.contains("\"type\":\"message.deleted\""));
    }
}
