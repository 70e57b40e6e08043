// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Session authentication middleware.

use crate::AppState;
use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// Authenticated rider extracted from the bearer token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
}

/// Middleware that requires the logged-in rider's access token.
pub async fn require_session(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let session = state
        .current_session()
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if !bool::from(token.as_bytes().ct_eq(session.access_token.as_bytes())) {
        tracing::warn!("Rejected request with stale or invalid access token");
        return Err(StatusCode::UNAUTHORIZED);
    }

    request.extensions_mut().insert(AuthUser {
        user_id: session.user_id,
    });

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::body::Body;
    use axum::{routing::get, Extension, Router};
    use tower::ServiceExt;

    fn app(state: Arc<AppState>) -> Router {
        Router::new()
            .route(
                "/",
                get(|Extension(user): Extension<AuthUser>| async move { user.user_id }),
            )
            .route_layer(axum::middleware::from_fn_with_state(
                state.clone(),
                require_session,
            ))
            .with_state(state)
    }

    async fn status_for(app: Router, auth: Option<&str>) -> StatusCode {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = auth {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        app.oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_requires_matching_token() {
        let state = Arc::new(AppState::offline(Config::test_default()));
        assert_eq!(
            status_for(app(state.clone()), Some("Bearer tok")).await,
            StatusCode::UNAUTHORIZED
        );

        state.login("rider-1", "tok", None).await.unwrap();
        assert_eq!(
            status_for(app(state.clone()), Some("Bearer tok")).await,
            StatusCode::OK
        );
        assert_eq!(
            status_for(app(state.clone()), Some("Bearer other")).await,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_for(app(state.clone()), None).await,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_for(app(state), Some("tok")).await,
            StatusCode::UNAUTHORIZED
        );
    }
}
