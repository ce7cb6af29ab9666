//! 通话信令服务
//!
//! 服务端只做转发与会话登记，不碰媒体流。SDP原样透传。
//! 通话会话登记在本实例内存里：信令帧都经由同一条长连接进来，
//! 跨实例的那一端通过中继收到转发帧即可，无需共享会话表。

use std::collections::HashMap;
use std::sync::Arc;

use domain::{CallEndReason, CallId, CallSession, CallType, UserId};
use tokio::sync::RwLock;

use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::presence::PresenceStore;
use crate::protocol::ServerEvent;
use crate::router::BroadcastRouter;

/// 进行中的通话登记表
#[derive(Default)]
struct CallBoard {
    sessions: HashMap<CallId, CallSession>,
    by_user: HashMap<UserId, CallId>,
}

/// 通话服务
pub struct CallService {
    presence: Arc<dyn PresenceStore>,
    router: Arc<BroadcastRouter>,
    clock: Arc<dyn Clock>,
    board: RwLock<CallBoard>,
}

impl CallService {
    pub fn new(
        presence: Arc<dyn PresenceStore>,
        router: Arc<BroadcastRouter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            presence,
            router,
            clock,
            board: RwLock::new(CallBoard::default()),
        }
    }

    /// 发起通话
    ///
    /// 被叫忙线回 BUSY，被叫离线回 MISSED，两种都只通知主叫，
    /// 不建立会话。被叫在线则登记会话并把来电转发过去。
    pub async fn initiate(
        &self,
        caller_id: UserId,
        call_id: CallId,
        callee_id: UserId,
        call_type: CallType,
        sdp: Option<String>,
    ) -> Result<(), ApplicationError> {
        {
            let board = self.board.read().await;
            if board.by_user.contains_key(&callee_id) || board.by_user.contains_key(&caller_id) {
                drop(board);
                tracing::info!(call_id = %call_id, caller_id = %caller_id, callee_id = %callee_id, "通话一方忙线");
                return self
                    .router
                    .broadcast_to_user(
                        caller_id,
                        &ServerEvent::CallEnd {
                            call_id,
                            reason: CallEndReason::Busy,
                        },
                    )
                    .await;
            }
        }

        let callee_online = match self.presence.is_online(callee_id).await {
            Ok(online) => online,
            Err(e) => {
                tracing::warn!(callee_id = %callee_id, error = %e, "查询被叫在线状态失败");
                false
            }
        };
        if !callee_online {
            tracing::info!(call_id = %call_id, callee_id = %callee_id, "被叫不在线，通话未接");
            return self
                .router
                .broadcast_to_user(
                    caller_id,
                    &ServerEvent::CallEnd {
                        call_id,
                        reason: CallEndReason::Missed,
                    },
                )
                .await;
        }

        {
            let mut board = self.board.write().await;
            // 在线检查期间可能有别的通话抢先登记
            if board.by_user.contains_key(&callee_id) || board.by_user.contains_key(&caller_id) {
                drop(board);
                return self
                    .router
                    .broadcast_to_user(
                        caller_id,
                        &ServerEvent::CallEnd {
                            call_id,
                            reason: CallEndReason::Busy,
                        },
                    )
                    .await;
            }
            board.sessions.insert(
                call_id,
                CallSession {
                    call_id,
                    caller_id,
                    callee_id,
                    call_type,
                    started_at: self.clock.now(),
                },
            );
            board.by_user.insert(caller_id, call_id);
            board.by_user.insert(callee_id, call_id);
        }

        tracing::info!(call_id = %call_id, caller_id = %caller_id, callee_id = %callee_id, "来电转发给被叫");
        self.router
            .broadcast_to_user(
                callee_id,
                &ServerEvent::CallInitiate {
                    call_id,
                    caller_id,
                    call_type,
                    sdp,
                },
            )
            .await
    }

    /// 被叫应答，转发给主叫；拒接时顺带清掉会话
    pub async fn answer(
        &self,
        answerer_id: UserId,
        call_id: CallId,
        accepted: bool,
        sdp: Option<String>,
    ) -> Result<(), ApplicationError> {
        let session = {
            let board = self.board.read().await;
            board.sessions.get(&call_id).cloned()
        };

        let Some(session) = session else {
            tracing::warn!(call_id = %call_id, "应答的通话不存在，忽略");
            return Ok(());
        };
        if session.callee_id != answerer_id {
            tracing::warn!(call_id = %call_id, user_id = %answerer_id, "应答者不是被叫，忽略");
            return Ok(());
        }

        if !accepted {
            self.remove_call(call_id).await;
        }

        self.router
            .broadcast_to_user(
                session.caller_id,
                &ServerEvent::CallAnswer {
                    call_id,
                    accepted,
                    sdp,
                },
            )
            .await
    }

    /// 任意一方结束通话，通知对端
    pub async fn end(
        &self,
        by_user_id: UserId,
        call_id: CallId,
        reason: CallEndReason,
    ) -> Result<(), ApplicationError> {
        let Some(session) = self.remove_call(call_id).await else {
            tracing::debug!(call_id = %call_id, "结束的通话不存在，忽略");
            return Ok(());
        };

        let Some(peer_id) = session.peer_of(by_user_id) else {
            tracing::warn!(call_id = %call_id, user_id = %by_user_id, "结束者不是通话参与方");
            return Ok(());
        };

        tracing::info!(call_id = %call_id, reason = ?reason, "通话结束");
        self.router
            .broadcast_to_user(peer_id, &ServerEvent::CallEnd { call_id, reason })
            .await
    }

    /// 用户最后一条连接断开时挂断其进行中的通话
    pub async fn handle_disconnect(&self, user_id: UserId) -> Result<(), ApplicationError> {
        let call_id = {
            let board = self.board.read().await;
            board.by_user.get(&user_id).copied()
        };
        match call_id {
            Some(call_id) => self.end(user_id, call_id, CallEndReason::Failed).await,
            None => Ok(()),
        }
    }

    async fn remove_call(&self, call_id: CallId) -> Option<CallSession> {
        let mut board = self.board.write().await;
        let session = board.sessions.remove(&call_id)?;
        if board.by_user.get(&session.caller_id) == Some(&call_id) {
            board.by_user.remove(&session.caller_id);
        }
        if board.by_user.get(&session.callee_id) == Some(&call_id) {
            board.by_user.remove(&session.callee_id);
        }
        Some(session)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;
    use uuid::Uuid;

    use super::*;
    use crate::clock::SystemClock;
    use crate::local_relay::LocalRelay;
    use crate::presence::memory::MemoryPresenceStore;
    use crate::push::NoopPushSender;
    use crate::registry::{ConnectionHandle, ConnectionRegistry};
    use domain::{ConnectionId, DeviceId, MockUserRepository};

    struct Fixture {
        registry: Arc<ConnectionRegistry>,
        presence: Arc<MemoryPresenceStore>,
        service: CallService,
    }

    impl Fixture {
        fn new() -> Self {
            let registry = Arc::new(ConnectionRegistry::new(Duration::from_secs(1)));
            let presence = Arc::new(MemoryPresenceStore::new());
            let router = Arc::new(BroadcastRouter::new(
                registry.clone(),
                Arc::new(LocalRelay::new()),
                Arc::new(NoopPushSender),
                Arc::new(MockUserRepository::new()),
                presence.clone(),
            ));
            let service = CallService::new(presence.clone(), router, Arc::new(SystemClock));
            Self {
                registry,
                presence,
                service,
            }
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
            self.presence
                .set_online(user_id, Duration::from_secs(60))
                .await
                .unwrap();
            rx
        }
    }

    #[tokio::test]
    async fn test_initiate_forwards_to_online_callee() {
        let fixture = Fixture::new();
        let caller = UserId::from(Uuid::new_v4());
        let callee = UserId::from(Uuid::new_v4());
        let _caller_rx = fixture.connect(caller).await;
        let mut callee_rx = fixture.connect(callee).await;

        fixture
            .service
            .initiate(
                caller,
                CallId::from(Uuid::new_v4()),
                callee,
                CallType::Voice,
                Some("offer-sdp".to_string()),
            )
            .await
            .unwrap();

        let frame = callee_rx.recv().await.unwrap();
        assert!(frame.contains("\"type\":\"call.initiate\""));
        assert!(frame.contains("offer-sdp"));
    }

    #[tokio::test]
    async fn test_initiate_to_offline_callee_reports_missed() {
        let fixture = Fixture::new();
        let caller = UserId::from(Uuid::new_v4());
        let callee = UserId::from(Uuid::new_v4());
        let mut caller_rx = fixture.connect(caller).await;

        fixture
            .service
            .initiate(
                caller,
                CallId::from(Uuid::new_v4()),
                callee,
                CallType::Video,
                None,
            )
            .await
            .unwrap();

        let frame = caller_rx.recv().await.unwrap();
        assert!(frame.contains("\"type\":\"call.end\""));
        assert!(frame.contains("\"reason\":\"MISSED\""));
    }

    #[tokio::test]
    async fn test_initiate_to_busy_callee_reports_busy() {
        let fixture = Fixture::new();
        let caller1 = UserId::from(Uuid::new_v4());
        let caller2 = UserId::from(Uuid::new_v4());
        let callee = UserId::from(Uuid::new_v4());
        let _c1 = fixture.connect(caller1).await;
        let mut caller2_rx = fixture.connect(caller2).await;
        let mut callee_rx = fixture.connect(callee).await;

        fixture
            .service
            .initiate(
                caller1,
                CallId::from(Uuid::new_v4()),
                callee,
                CallType::Voice,
                None,
            )
            .await
            .unwrap();
        assert!(callee_rx.recv().await.is_some());

        fixture
            .service
            .initiate(
                caller2,
                CallId::from(Uuid::new_v4()),
                callee,
                CallType::Voice,
                None,
            )
            .await
            .unwrap();

        let frame = caller2_rx.recv().await.unwrap();
        assert!(frame.contains("\"reason\":\"BUSY\""));
        assert!(callee_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_answer_forwarded_to_caller() {
        let fixture = Fixture::new();
        let caller = UserId::from(Uuid::new_v4());
        let callee = UserId::from(Uuid::new_v4());
        let mut caller_rx = fixture.connect(caller).await;
        let mut callee_rx = fixture.connect(callee).await;
        let call_id = CallId::from(Uuid::new_v4());

        fixture
            .service
            .initiate(caller, call_id, callee, CallType::Voice, None)
            .await
            .unwrap();
        assert!(callee_rx.recv().await.is_some());

        fixture
            .service
            .answer(callee, call_id, true, Some("answer-sdp".to_string()))
            .await
            .unwrap();

        let frame = caller_rx.recv().await.unwrap();
        assert!(frame.contains("\"type\":\"call.answer\""));
        assert!(frame.contains("\"accepted\":true"));
    }

    #[tokio::test]
    async fn test_decline_clears_session() {
        let fixture = Fixture::new();
        let caller = UserId::from(Uuid::new_v4());
        let callee = UserId::from(Uuid::new_v4());
        let mut caller_rx = fixture.connect(caller).await;
        let mut callee_rx = fixture.connect(callee).await;
        let call_id = CallId::from(Uuid::new_v4());

        fixture
            .service
            .initiate(caller, call_id, callee, CallType::Voice, None)
            .await
            .unwrap();
        assert!(callee_rx.recv().await.is_some());

        fixture
            .service
            .answer(callee, call_id, false, None)
            .await
            .unwrap();
        assert!(caller_rx.recv().await.is_some());

        // 拒接后双方都不再忙线，新的通话可以建立
        fixture
            .service
            .initiate(caller, CallId::from(Uuid::new_v4()), callee, CallType::Voice, None)
            .await
            .unwrap();
        let frame = callee_rx.recv().await.unwrap();
        assert!(frame.contains("\"type\":\"call.initiate\""));
    }

    #[tokio::test]
    async fn test_disconnect_hangs_up_with_failed() {
        let fixture = Fixture::new();
        let caller = UserId::from(Uuid::new_v4());
        let callee = UserId::from(Uuid::new_v4());
        let _caller_rx = fixture.connect(caller).await;
        let mut callee_rx = fixture.connect(callee).await;
        let call_id = CallId::from(Uuid::new_v4());

        fixture
            .service
            .initiate(caller, call_id, callee, CallType::Voice, None)
            .await
            .unwrap();
        assert!(callee_rx.recv().await.is_some());

        fixture.service.handle_disconnect(caller).await.unwrap();

        let frame = callee_rx.recv().await.unwrap();
        assert!(frame.contains("\"type\":\"call.end\""));
        assert!(frame.contains("\"reason\":\"FAILED\""));
    }
}
