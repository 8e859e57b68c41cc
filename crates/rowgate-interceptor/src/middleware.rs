use axum::{
    extract::{FromRequestParts, Request},
    http::{StatusCode, request::Parts},
    middleware::Next,
    response::Response,
};
use rowgate_core::Principal;
use rowgate_policy::{Directory, PolicyEngine};
use std::ops::Deref;
use std::sync::Arc;

use crate::backend::Backend;
use crate::facade::PermissionHelper;
use crate::interceptor::{InterceptorSettings, PermissionInterceptor};

/// Builds the per-request interceptor and session. Install as a request
/// extension ahead of [`attach_session`].
#[derive(Clone)]
pub struct SessionFactory {
    engine: PolicyEngine,
    backend: Arc<dyn Backend>,
    directory: Option<Arc<dyn Directory>>,
    settings: InterceptorSettings,
}

impl SessionFactory {
    pub fn new(engine: PolicyEngine, backend: Arc<dyn Backend>, settings: InterceptorSettings) -> Self {
        Self {
            engine,
            backend,
            directory: None,
            settings,
        }
    }

    pub fn with_directory(mut self, directory: Arc<dyn Directory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn engine(&self) -> &PolicyEngine {
        &self.engine
    }

    /// A fresh interceptor and session for one request.
    pub fn helper_for(&self, principal: Principal) -> PermissionHelper {
        let mut interceptor =
            PermissionInterceptor::new(self.engine.clone(), principal, self.settings);
        if let Some(directory) = &self.directory {
            interceptor = interceptor.with_directory(directory.clone());
        }
        PermissionHelper::new(Arc::new(interceptor), self.backend.clone())
    }
}

/// The current request's permission helper.
#[derive(Clone)]
pub struct RequestSession(PermissionHelper);

impl RequestSession {
    pub fn into_inner(self) -> PermissionHelper {
        self.0
    }
}

impl Deref for RequestSession {
    type Target = PermissionHelper;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Axum middleware attaching a [`RequestSession`] to every request.
///
/// The principal is read from request extensions, where the authentication
/// layer places it; requests without one get an anonymous principal.
pub async fn attach_session(mut req: Request, next: Next) -> Result<Response, StatusCode> {
    let factory = req
        .extensions()
        .get::<SessionFactory>()
        .cloned()
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;
    let principal = req
        .extensions()
        .get::<Principal>()
        .cloned()
        .unwrap_or_else(Principal::anonymous);

    tracing::debug!(
        path = %req.uri().path(),
        user_id = ?principal.user_id,
        roles = ?principal.role_ids,
        "Attaching permission session"
    );
    req.extensions_mut()
        .insert(RequestSession(factory.helper_for(principal)));

    Ok(next.run(req).await)
}

impl<S: Send + Sync> FromRequestParts<S> for RequestSession {
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestSession>()
            .cloned()
            .ok_or_else(|| {
                tracing::error!("No permission session on request; attach_session is not installed");
                StatusCode::INTERNAL_SERVER_ERROR
            })
    }
}
