// JWT authentication for the commerce service
use axum::{
    extract::{Request, State},
    http::{request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use shared::models::claims::TokenClaims;
use shared::utils::jwt::{self, JwtError};
use shared::utils::token_extraction::extract_auth_header;

use crate::{config::AppState, domain::payment::SellerType, error::AppError};

// Authenticated caller, inserted into request extensions by auth_middleware
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: i32,
    pub email: String,
    pub role: String,
}

impl From<TokenClaims> for AuthUser {
    fn from(claims: TokenClaims) -> Self {
        Self {
            user_id: claims.sub,
            email: claims.email,
            role: claims.role,
        }
    }
}

fn auth_user(parts: &Parts) -> Result<AuthUser, AppError> {
    parts
        .extensions
        .get::<AuthUser>()
        .cloned()
        .ok_or_else(|| AppError::unauthorized("Authentication required"))
}

impl<S> axum::extract::FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        auth_user(parts)
    }
}

// Seller accounts (admin or superadmin) for wallet and payout endpoints
#[derive(Debug, Clone)]
pub struct AuthSeller {
    pub user_id: i32,
    pub role: SellerType,
}

impl<S> axum::extract::FromRequestParts<S> for AuthSeller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = auth_user(parts)?;

        let role = match user.role.as_str() {
            "admin" => SellerType::Admin,
            "superadmin" => SellerType::Superadmin,
            _ => return Err(AppError::forbidden("Seller access required")),
        };

        Ok(AuthSeller {
            user_id: user.user_id,
            role,
        })
    }
}

// Platform operator for payout administration
#[derive(Debug, Clone)]
pub struct AuthSuperadmin {
    pub user_id: i32,
}

impl<S> axum::extract::FromRequestParts<S> for AuthSuperadmin
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = auth_user(parts)?;

        if user.role != "superadmin" {
            tracing::warn!(
                target: "security",
                "User {} with role {} tried an admin endpoint",
                user.user_id,
                user.role
            );
            return Err(AppError::forbidden("Superadmin access required"));
        }

        Ok(AuthSuperadmin { user_id: user.user_id })
    }
}

// Validate the bearer token from the request headers
pub fn authenticate(headers: &HeaderMap, secret: &str) -> Result<AuthUser, AppError> {
    let header = extract_auth_header(headers)
        .ok_or_else(|| AppError::unauthorized("Authorization header with Bearer token required"))?;

    let token = jwt::extract_bearer_token(&header)
        .ok_or_else(|| AppError::unauthorized("Bearer token format required"))?;

    jwt::validate_token(&token, secret)
        .map(AuthUser::from)
        .map_err(|e| match e {
            JwtError::MissingSecret => AppError::internal("JWT secret is not configured"),
            other => AppError::unauthorized(other.to_string()),
        })
}

// Authentication middleware for protected routes
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let user = authenticate(request.headers(), &state.config.jwt_secret)?;

    tracing::debug!(
        "User authenticated - id: {}, role: {}, endpoint: {}",
        user.user_id,
        user.role,
        request.uri().path()
    );

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}
