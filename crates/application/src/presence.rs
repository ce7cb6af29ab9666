//! 在线状态存储
//!
//! 在线标记是带TTL的键，由心跳刷新；最近在线时间是独立的持久键。
//! 两者互不混淆：TTL键缺失即离线，即使没有收到任何断开事件。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use domain::{Timestamp, UserId};

use crate::error::ApplicationError;

/// 在线状态存储接口
#[async_trait::async_trait]
pub trait PresenceStore: Send + Sync {
    /// 标记用户在线并刷新TTL。幂等，同时刷新最近在线时间。
    async fn set_online(&self, user_id: UserId, ttl: Duration) -> Result<(), ApplicationError>;

    /// 标记用户离线并写入最近在线时间。
    async fn set_offline(&self, user_id: UserId) -> Result<(), ApplicationError>;

    /// 用户当前是否在线（任意实例）。
    async fn is_online(&self, user_id: UserId) -> Result<bool, ApplicationError>;

    /// 批量筛选出给定用户中当前在线的子集。
    async fn online_user_ids(&self, user_ids: &[UserId]) -> Result<Vec<UserId>, ApplicationError>;

    /// 用户最近一次在线时间；从未记录过时为 None。
    async fn last_seen(&self, user_id: UserId) -> Result<Option<Timestamp>, ApplicationError>;
}

/// Redis实现的在线状态存储
pub struct RedisPresenceStore {
    redis_client: Arc<redis::Client>,
}

impl RedisPresenceStore {
    pub fn new(redis_client: Arc<redis::Client>) -> Self {
        Self { redis_client }
    }

    /// 在线标记键（带TTL）
    fn presence_key(&self, user_id: UserId) -> String {
        format!("presence:{}", user_id)
    }

    /// 最近在线时间键（持久）
    fn last_seen_key(&self, user_id: UserId) -> String {
        format!("lastseen:{}", user_id)
    }

    /// 获取连接
    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection, ApplicationError> {
        self.redis_client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                ApplicationError::infrastructure_with_source("Redis connection failed", e)
            })
    }
}

#[async_trait::async_trait]
impl PresenceStore for RedisPresenceStore {
    async fn set_online(&self, user_id: UserId, ttl: Duration) -> Result<(), ApplicationError> {
        let mut conn = self.get_connection().await?;
        let presence_key = self.presence_key(user_id);
        let last_seen_key = self.last_seen_key(user_id);
        let ttl_seconds = ttl.as_secs().max(1);

        let _: () = redis::pipe()
            .set_ex(&presence_key, "1", ttl_seconds)
            .set(&last_seen_key, Utc::now().to_rfc3339())
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                ApplicationError::infrastructure_with_source("Redis operation failed", e)
            })?;

        tracing::debug!(user_id = %user_id, ttl_seconds, "在线标记已刷新");
        Ok(())
    }

    async fn set_offline(&self, user_id: UserId) -> Result<(), ApplicationError> {
        let mut conn = self.get_connection().await?;
        let presence_key = self.presence_key(user_id);
        let last_seen_key = self.last_seen_key(user_id);

        let _: () = redis::pipe()
            .del(&presence_key)
            .set(&last_seen_key, Utc::now().to_rfc3339())
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                ApplicationError::infrastructure_with_source("Redis operation failed", e)
            })?;

        tracing::info!(user_id = %user_id, "用户已标记离线");
        Ok(())
    }

    async fn is_online(&self, user_id: UserId) -> Result<bool, ApplicationError> {
        let mut conn = self.get_connection().await?;
        let presence_key = self.presence_key(user_id);

        let exists: bool = redis::cmd("EXISTS")
            .arg(&presence_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                ApplicationError::infrastructure_with_source("Redis operation failed", e)
            })?;

        Ok(exists)
    }

    async fn online_user_ids(&self, user_ids: &[UserId]) -> Result<Vec<UserId>, ApplicationError> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.get_connection().await?;
        let mut cmd = redis::cmd("MGET");
        for user_id in user_ids {
            cmd.arg(self.presence_key(*user_id));
        }

        let values: Vec<Option<String>> = cmd.query_async(&mut conn).await.map_err(|e| {
            ApplicationError::infrastructure_with_source("Redis operation failed", e)
        })?;

        Ok(user_ids
            .iter()
            .zip(values)
            .filter_map(|(user_id, value)| value.map(|_| *user_id))
            .collect())
    }

    async fn last_seen(&self, user_id: UserId) -> Result<Option<Timestamp>, ApplicationError> {
        let mut conn = self.get_connection().await?;
        let last_seen_key = self.last_seen_key(user_id);

        let value: Option<String> = redis::cmd("GET")
            .arg(&last_seen_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                ApplicationError::infrastructure_with_source("Redis operation failed", e)
            })?;

        match value {
            Some(raw) => {
                let parsed = DateTime::parse_from_rfc3339(&raw).map_err(|e| {
                    ApplicationError::infrastructure_with_source("Invalid timestamp in Redis", e)
                })?;
                Ok(Some(parsed.with_timezone(&Utc)))
            }
            None => Ok(None),
        }
    }
}

/// 内存实现的在线状态存储（用于测试与单实例场景）
pub mod memory {
    use std::collections::HashMap;

    use tokio::sync::RwLock;
    use tokio::time::Instant;

    use super::*;

    pub struct MemoryPresenceStore {
        online: RwLock<HashMap<UserId, Instant>>,
        last_seen: RwLock<HashMap<UserId, Timestamp>>,
    }

    impl Default for MemoryPresenceStore {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MemoryPresenceStore {
        pub fn new() -> Self {
            Self {
                online: RwLock::new(HashMap::new()),
                last_seen: RwLock::new(HashMap::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl PresenceStore for MemoryPresenceStore {
        async fn set_online(&self, user_id: UserId, ttl: Duration) -> Result<(), ApplicationError> {
            self.online
                .write()
                .await
                .insert(user_id, Instant::now() + ttl);
            self.last_seen.write().await.insert(user_id, Utc::now());
            Ok(())
        }

        async fn set_offline(&self, user_id: UserId) -> Result<(), ApplicationError> {
            self.online.write().await.remove(&user_id);
            self.last_seen.write().await.insert(user_id, Utc::now());
            Ok(())
        }

        async fn is_online(&self, user_id: UserId) -> Result<bool, ApplicationError> {
            let online = self.online.read().await;
            Ok(online
                .get(&user_id)
                .map(|expiry| *expiry > Instant::now())
                .unwrap_or(false))
        }

        async fn online_user_ids(
            &self,
            user_ids: &[UserId],
        ) -> Result<Vec<UserId>, ApplicationError> {
            let online = self.online.read().await;
            let now = Instant::now();
            Ok(user_ids
                .iter()
                .filter(|user_id| {
                    online
                        .get(user_id)
                        .map(|expiry| *expiry > now)
                        .unwrap_or(false)
                })
                .copied()
                .collect())
        }

        async fn last_seen(&self, user_id: UserId) -> Result<Option<Timestamp>, ApplicationError> {
            Ok(self.last_seen.read().await.get(&user_id).copied())
        }
    }

    #[cfg(test)]
    mod tests {
        use uuid::Uuid;

        use super::*;

        #[tokio::test(start_paused = true)]
        async fn test_ttl_expiry_means_offline() {
            let store = MemoryPresenceStore::new();
            let user_id = UserId::from(Uuid::new_v4());

            store
                .set_online(user_id, Duration::from_secs(60))
                .await
                .unwrap();
            assert!(store.is_online(user_id).await.unwrap());

            tokio::time::advance(Duration::from_secs(61)).await;
            assert!(!store.is_online(user_id).await.unwrap());
        }

        #[tokio::test(start_paused = true)]
        async fn test_heartbeat_refreshes_ttl() {
            let store = MemoryPresenceStore::new();
            let user_id = UserId::from(Uuid::new_v4());

            store
                .set_online(user_id, Duration::from_secs(60))
                .await
                .unwrap();
            tokio::time::advance(Duration::from_secs(45)).await;
            store
                .set_online(user_id, Duration::from_secs(60))
                .await
                .unwrap();
            tokio::time::advance(Duration::from_secs(45)).await;

            assert!(store.is_online(user_id).await.unwrap());
        }

        #[tokio::test]
        async fn test_offline_records_last_seen() {
            let store = MemoryPresenceStore::new();
            let user_id = UserId::from(Uuid::new_v4());

            assert!(store.last_seen(user_id).await.unwrap().is_none());

            store
                .set_online(user_id, Duration::from_secs(60))
                .await
                .unwrap();
            store.set_offline(user_id).await.unwrap();

            assert!(!store.is_online(user_id).await.unwrap());
            assert!(store.last_seen(user_id).await.unwrap().is_some());
        }

        #[tokio::test]
        async fn test_batch_filter() {
            let store = MemoryPresenceStore::new();
            let online_user = UserId::from(Uuid::new_v4());
            let offline_user = UserId::from(Uuid::new_v4());

            store
                .set_online(online_user, Duration::from_secs(60))
                .await
                .unwrap();

            let online = store
                .online_user_ids(&[online_user, offline_user])
                .await
                .unwrap();
            assert_eq!(online, vec![online_user]);
        }
    }
}
