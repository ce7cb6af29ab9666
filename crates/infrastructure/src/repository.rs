//! PostgreSQL 仓储实现
//!
//! 投递状态的单调推进直接压进带条件的UPSERT里，并发回执
//! 不需要事务也不会把状态写回退。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use domain::repositories::{
    ConversationRepository, DeliveryRepository, MessageRepository, RepositoryError,
    RepositoryResult, UserRepository,
};
use domain::{
    ContentType, ConversationId, Message, MessageContent, MessageId, MessageStatus, ReadUpdate,
    Timestamp, UserId,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// 创建数据库连接池
pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
    acquire_timeout: Duration,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(acquire_timeout)
        .connect(database_url)
        .await
}

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.is_unique_violation() {
            return RepositoryError::Conflict;
        }
    }
    RepositoryError::storage(err.to_string())
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: Uuid,
    conversation_id: Uuid,
    sender_id: Uuid,
    content: String,
    content_type: String,
    reply_to_id: Option<Uuid>,
    media_url: Option<String>,
    thumbnail_url: Option<String>,
    forwarded_from: Option<Uuid>,
    server_timestamp: DateTime<Utc>,
    edited_at: Option<DateTime<Utc>>,
    deleted: bool,
}

impl TryFrom<MessageRecord> for Message {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        let content =
            MessageContent::new(value.content).map_err(|err| invalid_data(err.to_string()))?;
        let content_type = value
            .content_type
            .parse::<ContentType>()
            .map_err(|err| invalid_data(err.to_string()))?;

        Ok(Message {
            id: MessageId::from(value.id),
            conversation_id: ConversationId::from(value.conversation_id),
            sender_id: UserId::from(value.sender_id),
            content,
            content_type,
            reply_to_id: value.reply_to_id.map(MessageId::from),
            media_url: value.media_url,
            thumbnail_url: value.thumbnail_url,
            forwarded_from: value.forwarded_from.map(MessageId::from),
            server_timestamp: value.server_timestamp,
            edited_at: value.edited_at,
            deleted: value.deleted,
        })
    }
}

/// 消息仓储
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl MessageRepository for PgMessageRepository {
    async fn insert(&self, message: &Message) -> RepositoryResult<()> {
        sqlx::query(
            r#"INSERT INTO messages
               (id, conversation_id, sender_id, content, content_type, reply_to_id,
                media_url, thumbnail_url, forwarded_from, server_timestamp, edited_at, deleted)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"#,
        )
        .bind(Uuid::from(message.id))
        .bind(Uuid::from(message.conversation_id))
        .bind(Uuid::from(message.sender_id))
        .bind(message.content.as_str())
        .bind(message.content_type.as_str())
        .bind(message.reply_to_id.map(Uuid::from))
        .bind(message.media_url.as_deref())
        .bind(message.thumbnail_url.as_deref())
        .bind(message.forwarded_from.map(Uuid::from))
        .bind(message.server_timestamp)
        .bind(message.edited_at)
        .bind(message.deleted)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn exists(&self, message_id: MessageId) -> RepositoryResult<bool> {
        sqlx::query_scalar::<_, bool>(r#"SELECT EXISTS(SELECT 1 FROM messages WHERE id = $1)"#)
            .bind(Uuid::from(message_id))
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)
    }

    async fn find(&self, message_id: MessageId) -> RepositoryResult<Option<Message>> {
        let record = sqlx::query_as::<_, MessageRecord>(
            r#"SELECT id, conversation_id, sender_id, content, content_type, reply_to_id,
                      media_url, thumbnail_url, forwarded_from, server_timestamp, edited_at, deleted
               FROM messages WHERE id = $1"#,
        )
        .bind(Uuid::from(message_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Message::try_from).transpose()
    }

    async fn mark_edited(
        &self,
        message_id: MessageId,
        content: &MessageContent,
        edited_at: Timestamp,
    ) -> RepositoryResult<()> {
        let result = sqlx::query(
            r#"UPDATE messages SET content = $2, edited_at = $3 WHERE id = $1 AND NOT deleted"#,
        )
        .bind(Uuid::from(message_id))
        .bind(content.as_str())
        .bind(edited_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn mark_deleted(&self, message_id: MessageId) -> RepositoryResult<()> {
        let result = sqlx::query(r#"UPDATE messages SET deleted = TRUE WHERE id = $1"#)
            .bind(Uuid::from(message_id))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}

/// 会话成员仓储
pub struct PgConversationRepository {
    pool: PgPool,
}

impl PgConversationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ConversationRepository for PgConversationRepository {
    async fn member_ids(&self, conversation_id: ConversationId) -> RepositoryResult<Vec<UserId>> {
        let rows = sqlx::query_scalar::<_, Uuid>(
            r#"SELECT user_id FROM conversation_members WHERE conversation_id = $1"#,
        )
        .bind(Uuid::from(conversation_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(rows.into_iter().map(UserId::from).collect())
    }

    async fn is_member(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> RepositoryResult<bool> {
        sqlx::query_scalar::<_, bool>(
            r#"SELECT EXISTS(
                   SELECT 1 FROM conversation_members
                   WHERE conversation_id = $1 AND user_id = $2
               )"#,
        )
        .bind(Uuid::from(conversation_id))
        .bind(Uuid::from(user_id))
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)
    }

    async fn co_member_ids(&self, user_id: UserId) -> RepositoryResult<Vec<UserId>> {
        let rows = sqlx::query_scalar::<_, Uuid>(
            r#"SELECT DISTINCT other.user_id
               FROM conversation_members AS own
               JOIN conversation_members AS other
                 ON own.conversation_id = other.conversation_id
               WHERE own.user_id = $1 AND other.user_id <> $1"#,
        )
        .bind(Uuid::from(user_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(rows.into_iter().map(UserId::from).collect())
    }
}

#[derive(Debug, FromRow)]
struct ReadUpdateRecord {
    message_id: Uuid,
    sender_id: Uuid,
}

/// 投递状态仓储
pub struct PgDeliveryRepository {
    pool: PgPool,
}

impl PgDeliveryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl DeliveryRepository for PgDeliveryRepository {
    async fn insert_pending(
        &self,
        message_id: MessageId,
        recipient_ids: &[UserId],
    ) -> RepositoryResult<()> {
        if recipient_ids.is_empty() {
            return Ok(());
        }

        let user_ids: Vec<Uuid> = recipient_ids.iter().copied().map(Uuid::from).collect();
        sqlx::query(
            r#"INSERT INTO message_deliveries (message_id, user_id, status, updated_at)
               SELECT $1, unnest($2::uuid[]), $3, now()
               ON CONFLICT (message_id, user_id) DO NOTHING"#,
        )
        .bind(Uuid::from(message_id))
        .bind(&user_ids)
        .bind(MessageStatus::Sent.rank())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn advance(
        &self,
        message_id: MessageId,
        user_id: UserId,
        status: MessageStatus,
    ) -> RepositoryResult<bool> {
        // 条件UPSERT：只有序号严格变大才写入，返回是否真的推进了。
        // 没有既有行时视同从 SENT 起步，直接落到目标状态。
        let result = sqlx::query(
            r#"INSERT INTO message_deliveries (message_id, user_id, status, updated_at)
               VALUES ($1, $2, $3, now())
               ON CONFLICT (message_id, user_id)
               DO UPDATE SET status = EXCLUDED.status, updated_at = EXCLUDED.updated_at
               WHERE message_deliveries.status < EXCLUDED.status"#,
        )
        .bind(Uuid::from(message_id))
        .bind(Uuid::from(user_id))
        .bind(status.rank())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_conversation_read(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> RepositoryResult<Vec<ReadUpdate>> {
        let rows = sqlx::query_as::<_, ReadUpdateRecord>(
            r#"UPDATE message_deliveries AS d
               SET status = $3, updated_at = now()
               FROM messages AS m
               WHERE m.id = d.message_id
                 AND m.conversation_id = $1
                 AND d.user_id = $2
                 AND d.status < $3
               RETURNING d.message_id, m.sender_id"#,
        )
        .bind(Uuid::from(conversation_id))
        .bind(Uuid::from(user_id))
        .bind(MessageStatus::Read.rank())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(rows
            .into_iter()
            .map(|row| ReadUpdate {
                message_id: MessageId::from(row.message_id),
                sender_id: UserId::from(row.sender_id),
            })
            .collect())
    }
}

/// 用户仓储
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl UserRepository for PgUserRepository {
    async fn update_last_seen(&self, user_id: UserId, seen_at: Timestamp) -> RepositoryResult<()> {
        // 最近在线时间只增不减，乱序写入取较大值
        sqlx::query(
            r#"UPDATE users
               SET last_seen_at = GREATEST(COALESCE(last_seen_at, $2), $2)
               WHERE id = $1"#,
        )
        .bind(Uuid::from(user_id))
        .bind(seen_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn push_token(&self, user_id: UserId) -> RepositoryResult<Option<String>> {
        let token = sqlx::query_scalar::<_, Option<String>>(
            r#"SELECT push_token FROM users WHERE id = $1"#,
        )
        .bind(Uuid::from(user_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(token.flatten())
    }
}

/// 一次性构建全套仓储
pub struct PgStorage {
    pub message_repository: Arc<PgMessageRepository>,
    pub conversation_repository: Arc<PgConversationRepository>,
    pub delivery_repository: Arc<PgDeliveryRepository>,
    pub user_repository: Arc<PgUserRepository>,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            message_repository: Arc::new(PgMessageRepository::new(pool.clone())),
            conversation_repository: Arc::new(PgConversationRepository::new(pool.clone())),
            delivery_repository: Arc::new(PgDeliveryRepository::new(pool.clone())),
            user_repository: Arc::new(PgUserRepository::new(pool)),
        }
    }
}
