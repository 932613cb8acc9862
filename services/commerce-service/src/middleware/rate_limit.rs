// Redis-based rate limiting for the commerce service
use axum::{
    extract::{Request, State},
    http::{HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use redis::{AsyncCommands, Client};
use serde::Serialize;
use shared::utils::token_extraction::extract_client_ip;
use std::env;
use thiserror::Error;

use super::auth::AuthUser;

// Rate limit budgets from environment variables
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub reader_requests_per_hour: u32,
    pub seller_requests_per_hour: u32,
    pub sensitive_requests_per_hour: u32,
    pub webhook_requests_per_hour: u32,
    pub window_seconds: u64,
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        Self {
            reader_requests_per_hour: env_u32("RATE_LIMIT_READER_REQUESTS", 300),
            seller_requests_per_hour: env_u32("RATE_LIMIT_SELLER_REQUESTS", 500),
            sensitive_requests_per_hour: env_u32("RATE_LIMIT_SENSITIVE_ENDPOINTS", 30),
            webhook_requests_per_hour: env_u32("RATE_LIMIT_WEBHOOK_REQUESTS", 5000),
            window_seconds: 3600,
        }
    }

    // Budget for one caller on one endpoint
    pub fn max_requests(&self, role: &str, method: &Method, path: &str) -> u32 {
        // Gateways retry aggressively; they get their own bucket
        if path.contains("/webhook") || path.ends_with("/return") {
            return self.webhook_requests_per_hour;
        }

        let is_sensitive = *method == Method::POST
            && (path.starts_with("/api/purchase") || path.starts_with("/api/payouts/request"));
        if is_sensitive {
            return self.sensitive_requests_per_hour;
        }

        match role {
            "admin" | "superadmin" => self.seller_requests_per_hour,
            "user" => self.reader_requests_per_hour,
            _ => 100,
        }
    }
}

// Sliding window over a Redis sorted set
#[derive(Clone)]
pub struct RateLimiter {
    redis_client: Client,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(redis_url: &str) -> Result<Self, RateLimitError> {
        let redis_client = Client::open(redis_url.to_string()).map_err(RateLimitError::RedisConnection)?;

        Ok(Self {
            redis_client,
            config: RateLimitConfig::from_env(),
        })
    }

    pub async fn check_rate_limit(
        &self,
        identifier: &str,
        role: &str,
        method: &Method,
        path: &str,
    ) -> Result<RateLimitResult, RateLimitError> {
        let mut conn = self
            .redis_client
            .get_multiplexed_async_connection()
            .await
            .map_err(RateLimitError::RedisConnection)?;

        let window_key = format!("rate_limit:commerce:{}:{}:{}", identifier, method, path);
        let now_ms = chrono::Utc::now().timestamp_millis();
        let window_ms = (self.config.window_seconds * 1000) as i64;
        let window_start = now_ms - window_ms;

        // Drop entries that left the window
        let _: () = conn
            .zrembyscore(&window_key, "-inf", window_start)
            .await
            .map_err(RateLimitError::RedisOperation)?;

        let current_count: u32 = conn.zcard(&window_key).await.map_err(RateLimitError::RedisOperation)?;

        let max_requests = self.config.max_requests(role, method, path);

        let member = format!("{}:{}", now_ms, uuid::Uuid::new_v4().simple());
        let _: () = conn
            .zadd(&window_key, member, now_ms)
            .await
            .map_err(RateLimitError::RedisOperation)?;

        let _: () = conn
            .expire(&window_key, self.config.window_seconds as i64)
            .await
            .map_err(RateLimitError::RedisOperation)?;

        let allowed = current_count < max_requests;
        Ok(RateLimitResult {
            allowed,
            current_count: current_count + 1,
            max_requests,
            remaining: if allowed {
                max_requests.saturating_sub(current_count + 1)
            } else {
                0
            },
            reset_time: ((now_ms + window_ms) / 1000) as u64,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub current_count: u32,
    pub max_requests: u32,
    pub remaining: u32,
    pub reset_time: u64,
}

#[derive(Error, Debug)]
pub enum RateLimitError {
    #[error("Redis connection error: {0}")]
    RedisConnection(#[from] redis::RedisError),

    #[error("Redis operation error: {0}")]
    RedisOperation(redis::RedisError),
}

// Axum middleware; fails open when Redis is unreachable
pub async fn rate_limit_middleware(
    State(rate_limiter): State<RateLimiter>,
    request: Request,
    next: Next,
) -> Response {
    let identifier = extract_identifier(&request);
    let role = request
        .extensions()
        .get::<AuthUser>()
        .map(|auth| auth.role.clone())
        .unwrap_or_else(|| "guest".to_string());
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    match rate_limiter.check_rate_limit(&identifier, &role, &method, &path).await {
        Ok(result) if result.allowed => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert("X-RateLimit-Limit", HeaderValue::from(result.max_requests));
            headers.insert("X-RateLimit-Remaining", HeaderValue::from(result.remaining));
            headers.insert("X-RateLimit-Reset", HeaderValue::from(result.reset_time));
            response
        }
        Ok(result) => {
            tracing::warn!(
                target: "security",
                "Rate limit exceeded for {} on {} {} ({}/{})",
                identifier,
                method,
                path,
                result.current_count,
                result.max_requests
            );
            let body = axum::Json(serde_json::json!({
                "success": false,
                "error": "rate_limit_exceeded",
                "message": "Too many requests. Please try again later."
            }));
            (StatusCode::TOO_MANY_REQUESTS, body).into_response()
        }
        Err(e) => {
            tracing::error!("Rate limiting error: {}. Failing open.", e);
            next.run(request).await
        }
    }
}

// Authenticated user id, else client IP
fn extract_identifier(request: &Request) -> String {
    if let Some(auth_user) = request.extensions().get::<AuthUser>() {
        return format!("user:{}", auth_user.user_id);
    }

    extract_client_ip(request.headers())
        .map(|ip| format!("ip:{}", ip))
        .unwrap_or_else(|| "ip:unknown".to_string())
}
