use crate::core::errors::MessagingError;
use crate::core::identity::{Caller, Role};
use async_trait::async_trait;
use axum::extract::{FromRequest, FromRequestParts, Path, Query, Request};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use log::warn;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::str::FromStr;
use uuid::Uuid;

pub mod conversations;
pub mod realtime;

const X_USER_ID: &str = "X-User-ID";
const X_USER_ROLE: &str = "X-User-Role";

/// All messaging routes; conversation resources live under `/conversations`.
pub fn router() -> Router {
    Router::new()
        .nest("/conversations", conversations::router())
        .merge(realtime::router())
        .route(
            "/messages",
            axum::routing::post(conversations::send_message),
        )
        .route("/unread", axum::routing::get(conversations::unread_count))
}

/// The authenticated caller, as asserted by the auth proxy in front of us.
#[derive(Debug)]
pub struct ExtractCaller(pub Caller);

#[async_trait]
impl<S> FromRequestParts<S> for ExtractCaller
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Self, (StatusCode, &'static str)> {
        let Some(user_id) = parts.headers.get(X_USER_ID) else {
            return Err((StatusCode::BAD_REQUEST, "`X-User-ID` header is missing"));
        };
        let user_id = user_id
            .to_str()
            .map_err(|_| (StatusCode::BAD_REQUEST, "invalid user id"))?;
        let user_id =
            Uuid::from_str(user_id).map_err(|_| (StatusCode::BAD_REQUEST, "invalid user id"))?;

        let Some(role) = parts.headers.get(X_USER_ROLE) else {
            return Err((StatusCode::BAD_REQUEST, "`X-User-Role` header is missing"));
        };
        let role = role
            .to_str()
            .ok()
            .and_then(|role| Role::from_str(role).ok())
            .ok_or((StatusCode::BAD_REQUEST, "invalid user role"))?;

        Ok(ExtractCaller(Caller { id: user_id, role }))
    }
}

/// `Query` whose rejection is a `Validation` error body.
#[derive(Debug)]
pub struct ValidQuery<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for ValidQuery<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = MessagingError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, MessagingError> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| MessagingError::Validation(rejection.body_text()))?;
        Ok(ValidQuery(value))
    }
}

/// `Path` whose rejection is a `Validation` error body.
#[derive(Debug)]
pub struct ValidPath<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for ValidPath<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Send,
{
    type Rejection = MessagingError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, MessagingError> {
        let Path(value) = Path::<T>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| MessagingError::Validation(rejection.body_text()))?;
        Ok(ValidPath(value))
    }
}

/// `Json` whose rejection is a `Validation` error body.
#[derive(Debug)]
pub struct ValidJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ValidJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = MessagingError;

    async fn from_request(req: Request, state: &S) -> Result<Self, MessagingError> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| MessagingError::Validation(rejection.body_text()))?;
        Ok(ValidJson(value))
    }
}

#[derive(Serialize, Debug)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub message: String,
}

impl IntoResponse for MessagingError {
    fn into_response(self) -> Response {
        let status = match &self {
            MessagingError::Validation(_) => StatusCode::BAD_REQUEST,
            MessagingError::AccessDenied(_) => StatusCode::FORBIDDEN,
            MessagingError::NotFound(_) => StatusCode::NOT_FOUND,
            MessagingError::Conflict(_) => StatusCode::CONFLICT,
            MessagingError::TransientStore(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        if status.is_server_error() {
            warn!("request failed: {self}");
        }

        (
            status,
            Json(ErrorBody {
                kind: self.kind(),
                message: self.to_string(),
            }),
        )
            .into_response()
    }
}
