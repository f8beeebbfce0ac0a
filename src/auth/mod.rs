//! Authentication Module
//! Mission: Validate service-principal JWTs on the inbound API boundary

pub mod jwt;
pub mod middleware;
pub mod models;

pub use jwt::JwtHandler;
pub use middleware::auth_middleware;
