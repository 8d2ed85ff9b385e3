//! Login endpoint handlers.
//!
//! - `GET /login` redirects the browser to the provider and sets the
//!   state cookie
//! - `GET /login/callback` checks the state against that cookie, completes
//!   the flow and redirects to the success or failure URL
//!
//! # Usage
//!
//! ```ignore
//! use gatehouse_auth::http::login_router;
//!
//! let app = axum::Router::new().merge(login_router(controller));
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use axum_extra::extract::CookieJar;
use cookie::{Cookie, SameSite};

use crate::flow::{AuthFlowController, CallbackOutcome, CallbackParams};

/// Cookie holding the nonce of the login started by this browser.
pub const STATE_COOKIE_NAME: &str = "gatehouse_oauth_state";

/// The cookie is only sent to the login endpoints.
const STATE_COOKIE_PATH: &str = "/login";

/// Builds the router serving the login endpoints.
pub fn login_router(controller: Arc<AuthFlowController>) -> Router {
    Router::new()
        .route("/login", get(login_handler))
        .route("/login/callback", get(callback_handler))
        .with_state(controller)
}

/// `GET /login`
pub async fn login_handler(
    State(controller): State<Arc<AuthFlowController>>,
    jar: CookieJar,
) -> Response {
    match controller.start_login() {
        Ok(redirect) => {
            let cookie = state_cookie(
                redirect.nonce,
                controller.state_lifetime(),
                controller.secure_cookies(),
            );
            (jar.add(cookie), found(redirect.url.as_str())).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to start login");
            e.into_response()
        }
    }
}

/// `GET /login/callback`
pub async fn callback_handler(
    State(controller): State<Arc<AuthFlowController>>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> Response {
    let nonce = jar.get(STATE_COOKIE_NAME).map(|c| c.value().to_string());
    let outcome = controller.handle_callback(params, nonce.as_deref()).await;

    // One callback per started login.
    let jar = jar.remove(Cookie::build(STATE_COOKIE_NAME).path(STATE_COOKIE_PATH));
    (jar, outcome_response(outcome)).into_response()
}

fn outcome_response(outcome: CallbackOutcome) -> Response {
    match outcome {
        CallbackOutcome::Success { location, .. } => found(&location),
        CallbackOutcome::ProviderFailed { location, .. } => found(&location),
        CallbackOutcome::Aborted(error) => error.into_response(),
    }
}

fn state_cookie(nonce: String, lifetime: Duration, secure: bool) -> Cookie<'static> {
    let max_age = time::Duration::try_from(lifetime).unwrap_or(time::Duration::MAX);
    Cookie::build((STATE_COOKIE_NAME, nonce))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path(STATE_COOKIE_PATH)
        .max_age(max_age)
        .build()
}

/// 302 with `Location`. The target may carry a refresh token, so it must
/// not be cached.
fn found(location: &str) -> Response {
    (
        StatusCode::FOUND,
        [
            (header::LOCATION, location.to_string()),
            (header::CACHE_CONTROL, "no-store".to_string()),
        ],
    )
        .into_response()
}
