//! JWT 握手认证
//!
//! 令牌由账号体系签发，这里只做验证和声明提取。

use chrono::Utc;
use domain::{DeviceId, UserId};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// 签发令牌的默认有效期
const TOKEN_TTL_HOURS: i64 = 24;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
    #[error("token rejected: {0}")]
    Rejected(String),
}

/// JWT 声明。设备ID用于区分同一用户的多端连接。
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub sub: Uuid,
    pub device_id: String,
    pub exp: i64,
}

/// 握手认证结果
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: UserId,
    pub device_id: DeviceId,
}

/// 令牌验证接口
///
/// 握手阶段通过它把令牌换成 (用户, 设备) 上下文。
/// 令牌由外部账号体系签发，这里只消费；生产实现是 [`JwtService`]。
pub trait TokenValidator: Send + Sync {
    fn validate(&self, token: &str) -> Result<AuthContext, AuthError>;
}

/// JWT Token 服务
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_ref()),
            decoding_key: DecodingKey::from_secret(secret.as_ref()),
        }
    }

    /// 签发携带设备标识的访问令牌
    pub fn issue_token(
        &self,
        user_id: UserId,
        device_id: impl Into<String>,
    ) -> Result<String, AuthError> {
        let exp = Utc::now() + chrono::Duration::hours(TOKEN_TTL_HOURS);
        let claims = Claims {
            sub: Uuid::from(user_id),
            device_id: device_id.into(),
            exp: exp.timestamp(),
        };
        Ok(encode(&Header::default(), &claims, &self.encoding_key)?)
    }

    /// 验证令牌并提取用户与设备标识
    pub fn verify_token(&self, token: &str) -> Result<AuthContext, AuthError> {
        let data = decode::<Claims>(token, &self.decoding_key, &Validation::default())?;
        Ok(AuthContext {
            user_id: UserId::from(data.claims.sub),
            device_id: DeviceId::new(data.claims.device_id),
        })
    }
}

impl TokenValidator for JwtService {
    fn validate(&self, token: &str) -> Result<AuthContext, AuthError> {
        self.verify_token(token)
    }
}
