//! 连接注册表
//!
//! 维护 用户 -> 活跃连接集合 的内存映射。一个用户可以有多个设备
//! 同时在线；只有当最后一条连接被移除时，用户才算离线。
//!
//! 出站写经过每连接的有界通道，写超时的连接视为死连接被摘除，
//! 保证单个慢客户端不会拖住对其他接收者的扇出。

use std::collections::HashMap;
use std::time::Duration;

use domain::{ConnectionId, DeviceId, UserId};
use tokio::sync::{mpsc, RwLock};

/// 单条连接的注册句柄。
///
/// 注册表持有该连接出站通道的唯一发送端：
/// 句柄被移除（注销、摘除、drain）后写任务随之结束。
#[derive(Debug)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub user_id: UserId,
    pub device_id: DeviceId,
    pub sender: mpsc::Sender<String>,
}

pub struct ConnectionRegistry {
    connections: RwLock<HashMap<UserId, HashMap<ConnectionId, ConnectionHandle>>>,
    send_timeout: Duration,
}

impl ConnectionRegistry {
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            send_timeout,
        }
    }

    /// 注册一条已认证的连接。
    pub async fn register(&self, handle: ConnectionHandle) {
        let user_id = handle.user_id;
        let connection_id = handle.id;
        let device_id = handle.device_id.clone();

        let mut connections = self.connections.write().await;
        connections
            .entry(user_id)
            .or_default()
            .insert(connection_id, handle);

        tracing::info!(
            user_id = %user_id,
            connection_id = %connection_id,
            device_id = %device_id,
            "连接已注册"
        );
    }

    /// 注销一条连接，返回该用户是否因此不再持有任何连接。
    ///
    /// 写超时摘除可能先于本调用移除句柄；此时用户条目已不存在，
    /// 仍返回 true，由调用方执行离线转换。
    pub async fn unregister(&self, user_id: UserId, connection_id: ConnectionId) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get_mut(&user_id) {
            Some(user_connections) => {
                user_connections.remove(&connection_id);
                if user_connections.is_empty() {
                    connections.remove(&user_id);
                    tracing::info!(user_id = %user_id, connection_id = %connection_id, "最后一条连接已注销");
                    true
                } else {
                    tracing::debug!(
                        user_id = %user_id,
                        connection_id = %connection_id,
                        remaining = user_connections.len(),
                        "连接已注销"
                    );
                    false
                }
            }
            None => true,
        }
    }

    /// 用户当前是否在本实例持有至少一条连接。
    pub async fn is_online(&self, user_id: UserId) -> bool {
        self.connections.read().await.contains_key(&user_id)
    }

    /// 用户在本实例的连接数，测试与诊断用。
    pub async fn connection_count(&self, user_id: UserId) -> usize {
        self.connections
            .read()
            .await
            .get(&user_id)
            .map(|c| c.len())
            .unwrap_or(0)
    }

    /// 向用户的全部连接扇出一条载荷，返回成功写入的连接数。
    ///
    /// 在写超时内无法接收的连接被摘除；其写任务会因通道关闭而
    /// 结束，由连接处理器走正常的清理路径。
    pub async fn send_to_user(&self, user_id: UserId, payload: &str) -> usize {
        let targets: Vec<(ConnectionId, mpsc::Sender<String>)> = {
            let connections = self.connections.read().await;
            match connections.get(&user_id) {
                Some(user_connections) => user_connections
                    .values()
                    .map(|handle| (handle.id, handle.sender.clone()))
                    .collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (connection_id, sender) in targets {
            match sender
                .send_timeout(payload.to_owned(), self.send_timeout)
                .await
            {
                Ok(()) => delivered += 1,
                Err(err) => {
                    tracing::warn!(
                        user_id = %user_id,
                        connection_id = %connection_id,
                        error = %err,
                        "出站写失败，摘除连接"
                    );
                    dead.push(connection_id);
                }
            }
        }

        if !dead.is_empty() {
            let mut connections = self.connections.write().await;
            if let Some(user_connections) = connections.get_mut(&user_id) {
                for connection_id in dead {
                    user_connections.remove(&connection_id);
                }
                if user_connections.is_empty() {
                    connections.remove(&user_id);
                }
            }
        }

        delivered
    }

    /// 关停时移除全部连接，返回受影响的用户列表。
    ///
    /// 句柄被丢弃后各连接的写任务结束，连接处理器随之执行
    /// 各自的离线清理。
    pub async fn drain(&self) -> Vec<UserId> {
        let mut connections = self.connections.write().await;
        let drained = std::mem::take(&mut *connections);
        let users: Vec<UserId> = drained.keys().copied().collect();
        tracing::info!(users = users.len(), "注册表已清空");
        users
    }

    /// 摘除写端已关闭的残留连接，返回因此不再在线的用户。
    /// 兜底清理处理器异常退出时泄漏的条目。
    pub async fn sweep_stale(&self) -> Vec<UserId> {
        let mut connections = self.connections.write().await;
        let mut emptied = Vec::new();

        connections.retain(|user_id, user_connections| {
            user_connections.retain(|connection_id, handle| {
                let alive = !handle.sender.is_closed();
                if !alive {
                    tracing::warn!(
                        user_id = %user_id,
                        connection_id = %connection_id,
                        "清扫到已关闭的残留连接"
                    );
                }
                alive
            });
            if user_connections.is_empty() {
                emptied.push(*user_id);
                false
            } else {
                true
            }
        });

        emptied
    }
}
