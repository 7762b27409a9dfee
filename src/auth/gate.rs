//! Session gate: runs before every handler, turns a presented token into an
//! [`Identity`] in the request extensions, or rejects the request.
//!
//! The decision ([`decide`], [`failure_effect`]) is kept free of HTTP so it can
//! be tested on its own; [`session_gate`] only applies it.

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;
use tracing::{debug, warn};

use super::{
    claims::Identity,
    cookies::removal_cookie,
    jwt::TokenRejection,
    services::SessionCheck,
};
use crate::{
    config::{AuthFailureMode, SessionConfig},
    error::ServiceError,
    state::AppState,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateRejection {
    Invalid(TokenRejection),
    Revoked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Anonymous,
    Authenticated(Identity),
    Rejected(GateRejection),
}

/// What to do with a rejected request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureEffect {
    /// Drop the credential and let the handler see an anonymous request.
    ContinueAnonymous,
    RedirectTo(String),
    Unauthorized,
}

#[derive(Debug, Clone)]
pub struct GatePolicy {
    pub cookie_name: String,
    pub failure_mode: AuthFailureMode,
    pub login_path: String,
    /// Paths reachable with a bad credential (the login entry point, register, login).
    pub open_paths: Vec<String>,
}

impl GatePolicy {
    pub fn from_config(
        cfg: &SessionConfig,
        api_open_paths: impl IntoIterator<Item = String>,
    ) -> Self {
        let mut open_paths = vec![cfg.login_path.clone()];
        open_paths.extend(api_open_paths);
        Self {
            cookie_name: cfg.cookie_name.clone(),
            failure_mode: cfg.failure_mode,
            login_path: cfg.login_path.clone(),
            open_paths,
        }
    }
}

/// Presented tokens in the order they are tried: session cookie, then bearer header.
pub fn candidate_tokens(jar: &CookieJar, headers: &HeaderMap, cookie_name: &str) -> Vec<String> {
    let mut tokens = Vec::with_capacity(2);
    if let Some(c) = jar.get(cookie_name) {
        if !c.value().is_empty() {
            tokens.push(c.value().to_string());
        }
    }
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer ").or_else(|| h.strip_prefix("bearer ")))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(t) = bearer {
        if !tokens.iter().any(|c| c == t) {
            tokens.push(t.to_string());
        }
    }
    tokens
}

/// Maps a session check onto the gate outcome. Store failures degrade to anonymous.
pub fn decide(check: Option<Result<SessionCheck, ServiceError>>) -> GateDecision {
    match check {
        None => GateDecision::Anonymous,
        Some(Ok(SessionCheck::Valid(identity))) => GateDecision::Authenticated(identity),
        Some(Ok(SessionCheck::Invalid(reason))) => {
            GateDecision::Rejected(GateRejection::Invalid(reason))
        }
        Some(Ok(SessionCheck::Revoked)) => GateDecision::Rejected(GateRejection::Revoked),
        Some(Err(e)) => {
            warn!(error = %e, "session check failed; treating request as anonymous");
            GateDecision::Anonymous
        }
    }
}

pub fn failure_effect(rejection: &GateRejection, policy: &GatePolicy, path: &str) -> FailureEffect {
    if policy.open_paths.iter().any(|p| p == path) {
        return FailureEffect::ContinueAnonymous;
    }
    match (rejection, policy.failure_mode) {
        (GateRejection::Revoked, _) => FailureEffect::Unauthorized,
        (GateRejection::Invalid(_), AuthFailureMode::Unauthorized) => FailureEffect::Unauthorized,
        (GateRejection::Invalid(_), AuthFailureMode::Redirect) => {
            FailureEffect::RedirectTo(policy.login_path.clone())
        }
    }
}

pub async fn session_gate(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Response {
    if req.extensions().get::<Identity>().is_some() {
        return next.run(req).await;
    }

    let policy = &state.gate;
    // a stale cookie must not shadow a valid bearer token; the last failure is reported
    let mut check = None;
    for token in candidate_tokens(&jar, req.headers(), &policy.cookie_name) {
        let result = state.auth.check_session(&token).await;
        let accepted = matches!(result, Ok(SessionCheck::Valid(_)));
        check = Some(result);
        if accepted {
            break;
        }
    }

    match decide(check) {
        GateDecision::Anonymous => next.run(req).await,
        GateDecision::Authenticated(identity) => {
            debug!(user_id = %identity.user_id, "session accepted");
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        GateDecision::Rejected(rejection) => {
            warn!(?rejection, path = %req.uri().path(), "session rejected");
            let jar = jar.remove(removal_cookie(&policy.cookie_name));
            match failure_effect(&rejection, policy, req.uri().path()) {
                // open paths set their own cookie
                FailureEffect::ContinueAnonymous => next.run(req).await,
                FailureEffect::RedirectTo(to) => (jar, Redirect::to(&to)).into_response(),
                FailureEffect::Unauthorized => {
                    let err = match rejection {
                        GateRejection::Invalid(reason) => ServiceError::TokenInvalid(reason),
                        GateRejection::Revoked => ServiceError::Unauthorized,
                    };
                    (jar, err).into_response()
                }
            }
        }
    }
}
