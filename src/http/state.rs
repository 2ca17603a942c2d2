//! Shared handler state and request extractors.

use std::sync::Arc;

use axum::{
    extract::{FromRequest, FromRequestParts, Query, Request},
    http::{header, request::Parts, HeaderMap},
    Json,
};
use serde::de::DeserializeOwned;

use super::error::AppError;
use crate::auth::Directory;
use crate::engine::{Engine, SchedulingError};
use crate::messages::Locale;
use crate::model::Identity;
use crate::notify::NotificationDispatcher;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub directory: Arc<dyn Directory>,
    pub notifications: NotificationDispatcher,
    /// Used when the request carries no usable `Accept-Language`.
    pub locale: Locale,
}

impl AppState {
    pub fn new(
        engine: Arc<Engine>,
        directory: Arc<dyn Directory>,
        notifications: NotificationDispatcher,
    ) -> Self {
        let locale = engine.policy().locale;
        Self {
            engine,
            directory,
            notifications,
            locale,
        }
    }

    pub fn locale_of(&self, headers: &HeaderMap) -> Locale {
        let accept = headers
            .get(header::ACCEPT_LANGUAGE)
            .and_then(|v| v.to_str().ok());
        Locale::from_accept_language(accept, self.locale)
    }
}

/// The authenticated user behind a request, resolved from `Authorization: Bearer`.
#[derive(Debug, Clone)]
pub struct Caller {
    pub identity: Identity,
    pub locale: Locale,
}

impl FromRequestParts<AppState> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let locale = state.locale_of(&parts.headers);
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AppError::new(SchedulingError::Authentication, locale))?;
        let identity = state
            .directory
            .authenticate(token)
            .await
            .ok_or(AppError::new(SchedulingError::Authentication, locale))?;
        Ok(Caller { identity, locale })
    }
}

/// `Json<T>` whose rejection renders in the API's error shape.
pub struct JsonBody<T>(pub T);

impl<T: DeserializeOwned + Send> FromRequest<AppState> for JsonBody<T> {
    type Rejection = AppError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let locale = state.locale_of(req.headers());
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(JsonBody(value)),
            Err(rejection) => Err(AppError::new(
                SchedulingError::validation(rejection.body_text()),
                locale,
            )),
        }
    }
}

/// `Query<T>` with the same error shape.
pub struct QueryArgs<T>(pub T);

impl<T: DeserializeOwned + Send> FromRequestParts<AppState> for QueryArgs<T> {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let locale = state.locale_of(&parts.headers);
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(QueryArgs(value)),
            Err(rejection) => Err(AppError::new(
                SchedulingError::validation(rejection.body_text()),
                locale,
            )),
        }
    }
}
