//! 双实例扇出集成测试
//!
//! 用两套连接注册表加同一个进程内中继模拟两台服务器实例，
//! 验证本地投递、跨实例中继和离线推送三条路径各走各的：
//! 本地在线的收本地帧，别的实例在线的恰好收到一次中继帧，
//! 全局离线的只触发推送。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use application::presence::memory::MemoryPresenceStore;
use application::push::memory::{RecordedPush, RecordingPushSender};
use application::{
    run_relay_listener, BroadcastRouter, ConnectionHandle, ConnectionRegistry, DeliveryTracker,
    LocalRelay, PresenceStore, RelayTransport, SystemClock,
};
use domain::{
    ConnectionId, ContentType, ConversationId, DeviceId, Message, MessageId, MessageStatus,
    MockDeliveryRepository, MockMessageRepository, MockUserRepository, UserId,
};

/// 一台模拟实例：注册表 + 路由器 + 中继监听
struct Instance {
    registry: Arc<ConnectionRegistry>,
    router: Arc<BroadcastRouter>,
}

impl Instance {
    async fn start(
        relay: Arc<LocalRelay>,
        presence: Arc<MemoryPresenceStore>,
        push: Arc<RecordingPushSender>,
        users: MockUserRepository,
    ) -> Instance {
        let registry = Arc::new(ConnectionRegistry::new(Duration::from_secs(1)));
        let router = Arc::new(BroadcastRouter::new(
            registry.clone(),
            relay.clone() as Arc<dyn RelayTransport>,
            push,
            Arc::new(users),
            presence,
        ));

        let rx = relay.subscribe().await.expect("订阅中继失败");
        tokio::spawn(run_relay_listener(rx, registry.clone()));

        Instance { registry, router }
    }

    async fn connect(&self, user_id: UserId) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(64);
        self.registry
            .register(ConnectionHandle {
                id: ConnectionId::generate(),
                user_id,
                device_id: DeviceId::new("test-device"),
                sender: tx,
            })
            .await;
        rx
    }
}

fn make_message(sender_id: UserId, conversation_id: ConversationId) -> Message {
    Message::new(
        MessageId::from(Uuid::new_v4()),
        conversation_id,
        sender_id,
        "跨实例测试消息",
        ContentType::Text,
        None,
        None,
        None,
        None,
        chrono::Utc::now(),
    )
    .unwrap()
}

async fn wait_for_pushes(push: &RecordingPushSender, count: usize) -> Vec<RecordedPush> {
    for _ in 0..200 {
        let recorded = push.recorded().await;
        if recorded.len() >= count {
            return recorded;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    push.recorded().await
}

async fn recv_frame(rx: &mut mpsc::Receiver<String>) -> String {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("等待帧超时")
        .expect("连接已关闭")
}

#[tokio::test]
async fn test_mixed_fanout_local_relay_and_push() {
    let relay = Arc::new(LocalRelay::new());
    let presence = Arc::new(MemoryPresenceStore::new());
    let push = Arc::new(RecordingPushSender::new());

    let sender = UserId::from(Uuid::new_v4());
    let local_user = UserId::from(Uuid::new_v4());
    let remote_user = UserId::from(Uuid::new_v4());
    let offline_a = UserId::from(Uuid::new_v4());
    let offline_b = UserId::from(Uuid::new_v4());

    let mut users1 = MockUserRepository::new();
    users1.expect_push_token().returning(move |user_id| {
        if user_id == offline_a {
            Ok(Some("token-offline-a".to_string()))
        } else if user_id == offline_b {
            Ok(Some("token-offline-b".to_string()))
        } else {
            Ok(None)
        }
    });

    let instance1 = Instance::start(
        relay.clone(),
        presence.clone(),
        push.clone(),
        users1,
    )
    .await;
    let instance2 = Instance::start(
        relay.clone(),
        presence.clone(),
        push.clone(),
        MockUserRepository::new(),
    )
    .await;

    // 发送者和一个接收者在实例1，另一个接收者在实例2，其余全离线
    let _sender_rx = instance1.connect(sender).await;
    let mut local_rx = instance1.connect(local_user).await;
    let mut remote_rx = instance2.connect(remote_user).await;
    presence
        .set_online(local_user, Duration::from_secs(60))
        .await
        .unwrap();
    presence
        .set_online(remote_user, Duration::from_secs(60))
        .await
        .unwrap();

    let message = make_message(sender, ConversationId::from(Uuid::new_v4()));
    instance1
        .router
        .broadcast_message(
            &message,
            &[local_user, remote_user, offline_a, offline_b],
        )
        .await
        .unwrap();

    // 本地接收者：一帧，走实例1自己的注册表
    let local_frame = recv_frame(&mut local_rx).await;
    assert!(local_frame.contains("\"type\":\"message.new\""));
    assert!(local_frame.contains("跨实例测试消息"));

    // 远端接收者：恰好一帧，经中继到实例2
    let remote_frame = recv_frame(&mut remote_rx).await;
    assert!(remote_frame.contains("\"type\":\"message.new\""));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(remote_rx.try_recv().is_err(), "中继帧不应重复投递");

    // 离线的两个：只有推送，带消息预览
    let pushes = wait_for_pushes(&push, 2).await;
    assert_eq!(pushes.len(), 2);
    let mut tokens: Vec<&str> = pushes.iter().map(|p| p.token.as_str()).collect();
    tokens.sort_unstable();
    assert_eq!(tokens, vec!["token-offline-a", "token-offline-b"]);
    assert!(pushes.iter().all(|p| p.title == "New message"));
    assert!(pushes.iter().all(|p| p.body == "跨实例测试消息"));
}

#[tokio::test]
async fn test_read_receipt_crosses_instances_back_to_sender() {
    let relay = Arc::new(LocalRelay::new());
    let presence = Arc::new(MemoryPresenceStore::new());
    let push = Arc::new(RecordingPushSender::new());

    let sender = UserId::from(Uuid::new_v4());
    let reader = UserId::from(Uuid::new_v4());
    let conversation_id = ConversationId::from(Uuid::new_v4());

    let instance1 = Instance::start(
        relay.clone(),
        presence.clone(),
        push.clone(),
        MockUserRepository::new(),
    )
    .await;
    let instance2 = Instance::start(
        relay.clone(),
        presence.clone(),
        push.clone(),
        MockUserRepository::new(),
    )
    .await;

    // 发送者连实例1，已读方连实例2
    let mut sender_rx = instance1.connect(sender).await;
    let _reader_rx = instance2.connect(reader).await;
    presence
        .set_online(sender, Duration::from_secs(60))
        .await
        .unwrap();

    let message = make_message(sender, conversation_id);
    let message_id = message.id;

    // 实例2上的回执处理：状态推进成功后通知原发送者
    let mut deliveries = MockDeliveryRepository::new();
    deliveries.expect_advance().returning(|_, _, _| Ok(true));
    let mut messages = MockMessageRepository::new();
    messages
        .expect_find()
        .returning(move |_| Ok(Some(message.clone())));
    let tracker = DeliveryTracker::new(
        Arc::new(deliveries),
        Arc::new(messages),
        instance2.router.clone(),
        Arc::new(SystemClock),
    );

    tracker
        .update_status(message_id, reader, MessageStatus::Read)
        .await
        .unwrap();

    // 状态帧从实例2经中继回到实例1的发送者
    let frame = recv_frame(&mut sender_rx).await;
    assert!(frame.contains("\"type\":\"message.status\""));
    assert!(frame.contains("\"status\":\"READ\""));
    assert!(frame.contains(&message_id.to_string()));
}
