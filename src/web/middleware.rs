//! Admin guard for dashboard endpoints
//!
//! Requests must carry `Authorization: Bearer <password>`. Browsers cannot
//! set headers on an `EventSource`, so a `token` query parameter is accepted
//! as well.

use axum::{
    body::Body,
    http::{header, HeaderMap, Request},
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use std::{
    sync::Arc,
    task::{Context, Poll},
};
use subtle::ConstantTimeEq;
use tower::{Layer, Service};

use crate::error::AppError;

/// Pull the bearer token from the Authorization header
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

/// Pull the percent-decoded `token` parameter from the query string
fn query_token(query: Option<&str>) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == "token")
        .map(|(_, value)| value.into_owned())
}

fn matches(expected: &str, given: Option<&str>) -> bool {
    given.is_some_and(|given| bool::from(expected.as_bytes().ct_eq(given.as_bytes())))
}

/// Layer guarding routes with the admin password
#[derive(Clone)]
pub struct AdminAuthLayer {
    password: Option<Arc<str>>,
}

impl AdminAuthLayer {
    /// `None` disables the guard
    pub fn new(password: Option<String>) -> Self {
        Self {
            password: password.map(Arc::from),
        }
    }
}

impl<S> Layer<S> for AdminAuthLayer {
    type Service = AdminAuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AdminAuthMiddleware {
            inner,
            password: self.password.clone(),
        }
    }
}

/// Middleware service checking the admin password
#[derive(Clone)]
pub struct AdminAuthMiddleware<S> {
    inner: S,
    password: Option<Arc<str>>,
}

impl<S> Service<Request<Body>> for AdminAuthMiddleware<S>
where
    S: Service<Request<Body>, Response = Response> + Send + Clone + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let authorized = match self.password.as_deref() {
            None => true,
            Some(expected) => {
                matches(expected, bearer_token(request.headers()))
                    || matches(expected, query_token(request.uri().query()).as_deref())
            }
        };

        if !authorized {
            tracing::warn!(path = %request.uri().path(), "rejected unauthenticated admin request");
            return Box::pin(async { Ok(AppError::Unauthorized.into_response()) });
        }

        // Swap in a fresh clone so the ready service is the one that gets called
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        Box::pin(async move { inner.call(request).await })
    }
}
