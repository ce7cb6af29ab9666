//! 服务进程入口
//!
//! 装配顺序：配置 -> 日志 -> 基础设施（Postgres/Redis）->
//! 连接注册表与各业务服务 -> 中继监听与后台清扫 -> Axum 服务。
//! 收到停机信号后先停止接受新连接，再清空注册表并逐个落离线状态。

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use application::{
    run_relay_listener, BroadcastRouter, CallService, Clock, ConnectionRegistry, DeliveryTracker,
    IpRateLimiter, MessageRateLimiter, MessagingService, NoopPushSender, PresenceService,
    RelayTransport, SystemClock,
};
use config::AppConfig;
use infrastructure::{Infrastructure, InfrastructureConfig};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, JwtService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = AppConfig::load()?;
    tracing::info!(config = %config.sanitize(), "配置加载完成");

    let infra = Infrastructure::connect(InfrastructureConfig {
        database_url: config.database.url.clone(),
        max_connections: config.database.max_connections,
        acquire_timeout: Duration::from_secs(config.database.acquire_timeout_seconds),
        redis_url: config.redis.url.clone(),
        relay_channel_prefix: config.relay.channel_prefix.clone(),
    })
    .await?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let registry = Arc::new(ConnectionRegistry::new(Duration::from_millis(
        config.delivery.send_timeout_ms,
    )));
    let relay: Arc<dyn RelayTransport> = infra.relay.clone();

    let broadcast_router = Arc::new(BroadcastRouter::new(
        registry.clone(),
        relay.clone(),
        Arc::new(NoopPushSender),
        infra.storage.user_repository.clone(),
        infra.presence.clone(),
    ));
    let delivery_tracker = Arc::new(DeliveryTracker::new(
        infra.storage.delivery_repository.clone(),
        infra.storage.message_repository.clone(),
        broadcast_router.clone(),
        clock.clone(),
    ));
    let messaging_service = Arc::new(MessagingService::new(
        infra.storage.message_repository.clone(),
        infra.storage.conversation_repository.clone(),
        infra.storage.delivery_repository.clone(),
        broadcast_router.clone(),
        clock.clone(),
    ));
    let presence_service = Arc::new(PresenceService::new(
        infra.presence.clone(),
        infra.storage.conversation_repository.clone(),
        infra.storage.user_repository.clone(),
        broadcast_router.clone(),
        clock.clone(),
        Duration::from_secs(config.presence.ttl_seconds),
    ));
    let call_service = Arc::new(CallService::new(
        infra.presence.clone(),
        broadcast_router.clone(),
        clock.clone(),
    ));

    let message_limiter = Arc::new(MessageRateLimiter::new(
        Duration::from_secs(config.rate_limit.window_seconds),
        config.rate_limit.max_messages,
    ));
    let handshake_limiter = Arc::new(IpRateLimiter::new(
        Duration::from_secs(config.rate_limit.ip_window_seconds),
        config.rate_limit.ip_max_attempts,
    ));

    // 进程生命周期内只订阅一次，收到的中继帧只投给本实例在线的用户
    let relay_rx = relay.subscribe().await?;
    tokio::spawn(run_relay_listener(relay_rx, registry.clone()));

    // 后台清扫：摘除写端已关闭的残留连接、回收过期的限流窗口
    {
        let registry = registry.clone();
        let presence_service = presence_service.clone();
        let message_limiter = message_limiter.clone();
        let handshake_limiter = handshake_limiter.clone();
        let interval = Duration::from_secs(config.presence.sweep_interval_seconds);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                for user_id in registry.sweep_stale().await {
                    if let Err(err) = presence_service.mark_offline(user_id).await {
                        tracing::warn!(error = %err, user_id = %user_id, "清扫后标记离线失败");
                    }
                }
                message_limiter.cleanup_expired();
                handshake_limiter.cleanup_expired();
            }
        });
    }

    let jwt_service = Arc::new(JwtService::new(&config.auth.jwt_secret));
    let state = AppState::new(
        registry.clone(),
        messaging_service,
        delivery_tracker,
        presence_service.clone(),
        call_service,
        jwt_service,
        message_limiter,
        handshake_limiter,
    );

    let app = router(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "实时投递服务已启动");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // 清空注册表会关闭各连接的出站通道，连接任务随之各自退出；
    // 这里统一把受影响的用户落为离线，不依赖逐连接清理的竞速。
    infra.relay.shutdown();
    for user_id in registry.drain().await {
        if let Err(err) = presence_service.mark_offline(user_id).await {
            tracing::warn!(error = %err, user_id = %user_id, "停机时标记离线失败");
        }
    }
    tracing::info!("服务已停止");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("收到 Ctrl+C，开始停机"),
        _ = terminate => tracing::info!("收到 SIGTERM，开始停机"),
    }
}
