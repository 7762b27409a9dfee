use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::{instrument, warn};

use crate::{
    auth::{
        cookies::{removal_cookie, session_cookie},
        dto::{AuthResponse, LoginRequest, SessionStatus},
        extractors::{CurrentUser, MaybeUser},
        services::{AuthOutcome, RegisterInput},
    },
    error::{FieldError, ServiceError},
    images::services::{UploadItem, MAX_IMAGE_BYTES},
    state::AppState,
};

pub const REGISTER_PATH: &str = "/auth/register";
pub const LOGIN_PATH: &str = "/auth/login";

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route(
            REGISTER_PATH,
            post(register).layer(DefaultBodyLimit::max(MAX_IMAGE_BYTES + 64 * 1024)),
        )
        .route(LOGIN_PATH, post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/session", get(session))
}

/// POST /auth/register (multipart)
/// Fields: name, email, password, username, optional profileImage file.
#[instrument(skip(state, jar, mp))]
pub async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    mp: Multipart,
) -> Result<(StatusCode, CookieJar, Json<AuthResponse>), ServiceError> {
    let input = read_register_form(mp).await?;
    let outcome = state.auth.register(input).await?;
    let (jar, body) = with_session(&state, jar, outcome);
    Ok((StatusCode::CREATED, jar, body))
}

#[instrument(skip(state, jar, payload))]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<LoginRequest>,
) -> Result<(CookieJar, Json<AuthResponse>), ServiceError> {
    let outcome = state.auth.login(&payload.email, &payload.password).await?;
    Ok(with_session(&state, jar, outcome))
}

#[instrument(skip(state, jar, user))]
pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
    CurrentUser(user): CurrentUser,
) -> Result<(StatusCode, CookieJar), ServiceError> {
    state.auth.logout(user.user_id, user.session_id).await?;
    let jar = jar.remove(removal_cookie(&state.config.session.cookie_name));
    Ok((StatusCode::NO_CONTENT, jar))
}

pub async fn session(MaybeUser(user): MaybeUser) -> Json<SessionStatus> {
    Json(SessionStatus {
        authenticated: user.is_some(),
        user,
    })
}

fn with_session(
    state: &AppState,
    jar: CookieJar,
    outcome: AuthOutcome,
) -> (CookieJar, Json<AuthResponse>) {
    let cfg = &state.config.session;
    let cookie = session_cookie(
        &cfg.cookie_name,
        outcome.token.clone(),
        cfg.cookie_secure,
        state.auth.keys().ttl,
    );
    let body = AuthResponse {
        token: outcome.token,
        user: outcome.user.into(),
    };
    (jar.add(cookie), Json(body))
}

async fn read_register_form(mut mp: Multipart) -> Result<RegisterInput, ServiceError> {
    let malformed = |e: axum::extract::multipart::MultipartError| {
        warn!(error = %e, "malformed registration form");
        ServiceError::Validation(vec![FieldError::new("form", "Malformed form data.")])
    };

    let mut input = RegisterInput::default();
    while let Some(field) = mp.next_field().await.map_err(malformed)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "profileImage" => {
                let content_type = field
                    .content_type()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "application/octet-stream".into());
                let body = field.bytes().await.map_err(malformed)?;
                // browsers send an empty part when no file was chosen
                if !body.is_empty() {
                    input.profile_image = Some(UploadItem { body, content_type });
                }
            }
            "name" => input.name = field.text().await.map_err(malformed)?,
            "email" => input.email = field.text().await.map_err(malformed)?,
            "password" => input.password = field.text().await.map_err(malformed)?,
            "username" => input.username = field.text().await.map_err(malformed)?,
            _ => {}
        }
    }
    Ok(input)
}
