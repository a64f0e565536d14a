use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{FromRequest, FromRequestParts};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::async_trait;
use serde_json::json;

use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            AppError::Store(e) => {
                tracing::error!(error = %e, "store error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        let body = json!({ "success": false, "message": message });
        (status, axum::Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// JSON extractor that turns every body rejection into a 400.
/// Drop-in replacement for `axum::Json<T>`.
pub struct AnalyticsJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for AnalyticsJson<T>
where
    axum::Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: axum::extract::Request, state: &S) -> Result<Self, Self::Rejection> {
        let path = req.uri().path().to_string();
        match axum::Json::<T>::from_request(req, state).await {
            Ok(axum::Json(value)) => Ok(AnalyticsJson(value)),
            Err(rejection) => {
                tracing::warn!(
                    path = %path,
                    error = %rejection,
                    "rejected analytics payload"
                );
                Err(AppError::Validation(rejection.body_text()))
            }
        }
    }
}

/// Query-string extractor with the same 400 body as [`AnalyticsJson`]
pub struct AnalyticsQuery<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for AnalyticsQuery<T>
where
    axum::extract::Query<T>: FromRequestParts<S, Rejection = QueryRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match axum::extract::Query::<T>::from_request_parts(parts, state).await {
            Ok(axum::extract::Query(value)) => Ok(AnalyticsQuery(value)),
            Err(rejection) => {
                tracing::warn!(
                    path = %parts.uri.path(),
                    error = %rejection,
                    "rejected query string"
                );
                Err(AppError::Validation(rejection.body_text()))
            }
        }
    }
}
