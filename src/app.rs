use std::net::SocketAddr;

use axum::{middleware::from_fn_with_state, routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::{AppState, API_PREFIX};
use crate::{auth, profile};

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .nest(
            API_PREFIX,
            Router::new()
                .merge(auth::router())
                .merge(profile::router())
                .route("/health", get(|| async { "ok" })),
        )
        .with_state(state.clone())
        .layer(from_fn_with_state(state, auth::gate::session_gate))
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!(
                        "http_request",
                        %method,
                        uri = %uri,
                        status = tracing::field::Empty
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     _latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, "response");
                        } else {
                            tracing::info!(%status, "response");
                        }
                    },
                ),
        )
}

pub async fn serve(app: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
        std::env::var("APP_PORT").unwrap_or_else(|_| "8080".into())
    )
    .parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthFailureMode;
    use crate::state::fake;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, Response, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn send(app: &Router, req: Request<Body>) -> Response<Body> {
        app.clone().oneshot(req).await.unwrap()
    }

    async fn body_json(res: Response<Body>) -> Value {
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn login_request(email: &str, password: &str) -> Request<Body> {
        Request::post("/api/v1/auth/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "email": email, "password": password }).to_string()))
            .unwrap()
    }

    fn bearer(method: &str, uri: &str, token: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap()
    }

    fn set_cookie(res: &Response<Body>) -> String {
        res.headers()
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    }

    /// Registers Ann through the service and returns an app over the same state.
    async fn app_with_ann(mode: AuthFailureMode) -> Router {
        let (state, _) = AppState::fake_with(fake::config(mode));
        state
            .auth
            .register(crate::auth::services::tests::ann())
            .await
            .unwrap();
        build_app(state)
    }

    async fn login_token(app: &Router) -> String {
        let res = send(app, login_request("a@x.com", "Abcdef1!")).await;
        assert_eq!(res.status(), StatusCode::OK);
        body_json(res).await["token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn health_is_open() {
        let app = build_app(AppState::fake());
        let res = send(&app, Request::get("/api/v1/health").body(Body::empty()).unwrap()).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn login_sets_http_only_session_cookie() {
        let app = app_with_ann(AuthFailureMode::Unauthorized).await;
        let res = send(&app, login_request("a@x.com", "Abcdef1!")).await;
        assert_eq!(res.status(), StatusCode::OK);
        let cookie = set_cookie(&res);
        assert!(cookie.starts_with("jwt="));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Strict"));
        let body = body_json(res).await;
        assert_eq!(body["user"]["username"], "ann");
        assert!(body["user"].get("password_hash").is_none());
    }

    #[tokio::test]
    async fn wrong_password_is_unauthorized() {
        let app = app_with_ann(AuthFailureMode::Unauthorized).await;
        let res = send(&app, login_request("a@x.com", "Wrong1!pw")).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(res).await["error"]["code"], "INVALID_CREDENTIALS");
    }

    #[tokio::test]
    async fn me_requires_and_accepts_a_session() {
        let app = app_with_ann(AuthFailureMode::Unauthorized).await;
        let res = send(&app, Request::get("/api/v1/me").body(Body::empty()).unwrap()).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let token = login_token(&app).await;
        let res = send(&app, bearer("GET", "/api/v1/me", &token)).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_json(res).await["email"], "a@x.com");

        let res = send(
            &app,
            Request::get("/api/v1/me")
                .header(header::COOKIE, format!("jwt={token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn logout_revokes_only_that_token() {
        let app = app_with_ann(AuthFailureMode::Unauthorized).await;
        let first = login_token(&app).await;
        let second = login_token(&app).await;

        let res = send(
            &app,
            Request::post("/api/v1/auth/logout")
                .header(header::COOKIE, format!("jwt={first}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        assert!(set_cookie(&res).contains("Max-Age=0"));

        let res = send(&app, bearer("GET", "/api/v1/me", &first)).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let res = send(&app, bearer("GET", "/api/v1/me", &second)).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn bad_token_is_unauthorized_and_clears_cookie() {
        let app = app_with_ann(AuthFailureMode::Unauthorized).await;
        let res = send(
            &app,
            Request::get("/api/v1/me")
                .header(header::COOKIE, "jwt=garbage")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert!(set_cookie(&res).contains("Max-Age=0"));
    }

    #[tokio::test]
    async fn bad_token_redirects_in_redirect_mode() {
        let app = app_with_ann(AuthFailureMode::Redirect).await;
        let res = send(&app, bearer("GET", "/api/v1/me", "garbage")).await;
        assert!(res.status().is_redirection());
        assert_eq!(res.headers()[header::LOCATION], "/auth/login");
    }

    #[tokio::test]
    async fn login_stays_reachable_with_a_stale_cookie() {
        let app = app_with_ann(AuthFailureMode::Redirect).await;
        let mut req = login_request("a@x.com", "Abcdef1!");
        req.headers_mut()
            .insert(header::COOKIE, "jwt=garbage".parse().unwrap());
        let res = send(&app, req).await;
        assert_eq!(res.status(), StatusCode::OK);
        let cookie = set_cookie(&res);
        assert!(cookie.starts_with("jwt=") && !cookie.contains("Max-Age=0"));
    }

    #[tokio::test]
    async fn session_status_reports_anonymous_and_authenticated() {
        let app = app_with_ann(AuthFailureMode::Unauthorized).await;
        let req = Request::get("/api/v1/auth/session").body(Body::empty()).unwrap();
        let res = send(&app, req).await;
        assert_eq!(res.status(), StatusCode::OK);
        let body = body_json(res).await;
        assert_eq!(body["authenticated"], false);
        assert!(body["user"].is_null());

        let token = login_token(&app).await;
        let body = body_json(send(&app, bearer("GET", "/api/v1/auth/session", &token)).await).await;
        assert_eq!(body["authenticated"], true);
        assert_eq!(body["user"]["username"], "ann");
    }

    #[tokio::test]
    async fn multipart_registration_creates_account_and_session() {
        let app = build_app(AppState::fake());
        let boundary = "XBOUNDARYX";
        let mut form = String::new();
        for (name, value) in [
            ("name", "Bob"),
            ("email", "Bob@Example.com"),
            ("password", "Sup3r!pass"),
            ("username", "bob"),
        ] {
            form.push_str(&format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            ));
        }
        form.push_str(&format!("--{boundary}--\r\n"));

        let req = Request::post("/api/v1/auth/register")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(form))
            .unwrap();
        let res = send(&app, req).await;
        assert_eq!(res.status(), StatusCode::CREATED);
        assert!(set_cookie(&res).starts_with("jwt="));
        let body = body_json(res).await;
        assert_eq!(body["user"]["email"], "bob@example.com");
        assert_eq!(body["user"]["profile_image"], "/uploads/default.jpg");

        let token = body["token"].as_str().unwrap();
        let res = send(&app, bearer("GET", "/api/v1/me", token)).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn registration_with_weak_password_lists_field_errors() {
        let app = build_app(AppState::fake());
        let boundary = "B";
        let form = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"email\"\r\n\r\nnot-an-email\r\n\
             --{boundary}\r\nContent-Disposition: form-data; name=\"password\"\r\n\r\nshort\r\n\
             --{boundary}--\r\n"
        );
        let req = Request::post("/api/v1/auth/register")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(form))
            .unwrap();
        let res = send(&app, req).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let body = body_json(res).await;
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        let fields: Vec<&str> = body["error"]["fields"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|f| f["field"].as_str())
            .collect();
        assert!(fields.contains(&"email"));
        assert!(fields.contains(&"password"));
        assert!(fields.contains(&"username"));
    }

    #[tokio::test]
    async fn valid_bearer_wins_over_stale_cookie() {
        let app = app_with_ann(AuthFailureMode::Redirect).await;
        let token = login_token(&app).await;
        let mut req = bearer("GET", "/api/v1/me", &token);
        req.headers_mut()
            .insert(header::COOKIE, "jwt=garbage".parse().unwrap());
        let res = send(&app, req).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_json(res).await["username"], "ann");
    }

    #[tokio::test]
    async fn identity_attached_upstream_passes_through_untouched() {
        use crate::auth::{claims::Identity, extractors::CurrentUser};
        use axum::middleware::{from_fn, Next};
        use uuid::Uuid;

        let (state, _) = AppState::fake_with(fake::config(AuthFailureMode::Redirect));
        let attached = Identity {
            user_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            email: "pre@x.com".into(),
            name: "Pre".into(),
            username: "pre".into(),
            profile_image: "/uploads/default.jpg".into(),
        };
        let app = Router::new()
            .route(
                "/api/v1/whoami",
                get(|CurrentUser(user): CurrentUser| async move { user.username }),
            )
            .layer(from_fn_with_state(state, auth::gate::session_gate))
            .layer(from_fn(move |mut req: Request<Body>, next: Next| {
                let identity = attached.clone();
                async move {
                    req.extensions_mut().insert(identity);
                    next.run(req).await
                }
            }));

        let res = send(
            &app,
            Request::get("/api/v1/whoami")
                .header(header::COOKIE, "jwt=garbage")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.headers().get(header::SET_COOKIE).is_none());
        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"pre");
    }

    #[tokio::test]
    async fn broken_profile_image_stream_is_reported_as_malformed() {
        let app = app_with_ann(AuthFailureMode::Unauthorized).await;
        let token = login_token(&app).await;
        let req = Request::put("/api/v1/me/profile-image")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(header::CONTENT_TYPE, "multipart/form-data; boundary=B")
            .body(Body::from("--B\r\nContent-Disposition: form-data; name=\"profileImage\""))
            .unwrap();
        let res = send(&app, req).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let body = body_json(res).await;
        assert_eq!(body["error"]["fields"][0]["field"], "profileImage");
        assert_eq!(body["error"]["fields"][0]["message"], "Malformed upload.");
    }
}
