//! HTTP handlers for reconciliation-service.
//!
//! Thin wrappers over `ReconciliationService`: bind the request, call the
//! orchestrator, map domain errors through `AppError`.

pub mod files;
pub mod records;
pub mod reports;
pub mod tasks;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;

pub const USER_ID_HEADER: &str = "X-User-ID";

/// Operator making the request, taken from `X-User-ID` as set by the
/// upstream gateway after authentication.
#[derive(Debug, Clone)]
pub struct OperatorContext {
    pub user_id: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for OperatorContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                AppError::Unauthorized(anyhow::anyhow!("Missing {} header", USER_ID_HEADER))
            })?;

        Ok(Self {
            user_id: user_id.to_string(),
        })
    }
}
