//! 共享应用状态

use std::sync::Arc;

use application::{
    CallService, ConnectionRegistry, DeliveryTracker, IpRateLimiter, MessageRateLimiter,
    MessagingService, PresenceService,
};

use crate::auth::TokenValidator;

/// 所有路由共享的状态，内部字段均为 Arc，可廉价克隆。
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub messaging_service: Arc<MessagingService>,
    pub delivery_tracker: Arc<DeliveryTracker>,
    pub presence_service: Arc<PresenceService>,
    pub call_service: Arc<CallService>,
    pub token_validator: Arc<dyn TokenValidator>,
    pub message_limiter: Arc<MessageRateLimiter>,
    pub handshake_limiter: Arc<IpRateLimiter>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        messaging_service: Arc<MessagingService>,
        delivery_tracker: Arc<DeliveryTracker>,
        presence_service: Arc<PresenceService>,
        call_service: Arc<CallService>,
        token_validator: Arc<dyn TokenValidator>,
        message_limiter: Arc<MessageRateLimiter>,
        handshake_limiter: Arc<IpRateLimiter>,
    ) -> Self {
        Self {
            registry,
            messaging_service,
            delivery_tracker,
            presence_service,
            call_service,
            token_validator,
            message_limiter,
            handshake_limiter,
        }
    }
}
