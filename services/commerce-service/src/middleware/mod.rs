// Middleware exports
pub mod auth;
pub mod rate_limit;

pub use auth::{auth_middleware, AuthSeller, AuthSuperadmin, AuthUser};
pub use rate_limit::rate_limit_middleware;
