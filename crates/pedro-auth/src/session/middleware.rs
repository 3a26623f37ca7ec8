//! Session middleware for browser flows.
//!
//! Loads the session named by the session cookie, applies the regeneration
//! policy before the handler runs, records activity, and re-issues the cookie
//! whenever the session id changed. Handlers that end or replace the session
//! must act on [`CurrentSession`], not on the request cookie.

use axum::{
    extract::{Request, State},
    http::header::SET_COOKIE,
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use time::OffsetDateTime;

use super::{Session, SessionManager};

/// The request's session, inserted into request extensions by
/// [`session_middleware`] when the cookie names a live session.
#[derive(Debug, Clone)]
pub struct CurrentSession(pub Session);

/// Axum middleware applying the session lifecycle to each request.
///
/// # Example
///
/// ```ignore
/// let app = Router::new()
///     .route("/dashboard", get(dashboard))
///     .layer(axum::middleware::from_fn_with_state(sessions, session_middleware));
/// ```
pub async fn session_middleware(
    State(manager): State<SessionManager>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(session_id) = jar
        .get(&manager.config().cookie_name)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
    else {
        return next.run(request).await;
    };

    // 1. Load; an unknown id is simply no session
    let session = match manager.load(&session_id).await {
        Ok(Some(session)) => session,
        Ok(None) => return next.run(request).await,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load session");
            return e.into_response();
        }
    };

    // 2. Regenerate old sessions before the handler sees them
    let now = OffsetDateTime::now_utc();
    let (mut session, regenerated) = match manager.enforce_rotation(session, now).await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(error = %e, "Failed to regenerate session");
            return e.into_response();
        }
    };

    // 3. Track activity (rolling TTL)
    if let Err(e) = manager.touch(&mut session, now).await {
        tracing::error!(error = %e, "Failed to touch session");
        return e.into_response();
    }

    let new_id = session.id.clone();
    request.extensions_mut().insert(CurrentSession(session));
    let response = next.run(request).await;

    // A handler that set the cookie itself (login, logout) owns the outcome
    if regenerated && !sets_cookie(&response, &manager.config().cookie_name) {
        (jar.add(manager.session_cookie(&new_id)), response).into_response()
    } else {
        response
    }
}

fn sets_cookie(response: &Response, name: &str) -> bool {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.split_once('=').is_some_and(|(n, _)| n.trim() == name))
}
