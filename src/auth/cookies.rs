use axum_extra::extract::cookie::{Cookie, SameSite};
use std::time::Duration;

/// Session cookie carrying the token: http-only, strict same-site, whole-site path.
pub fn session_cookie(name: &str, token: String, secure: bool, ttl: Duration) -> Cookie<'static> {
    Cookie::build((name.to_string(), token))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Strict)
        .path("/")
        .max_age(time::Duration::seconds(ttl.as_secs() as i64))
        .build()
}

/// Cookie that, once removed from a jar, clears the session cookie in the browser.
pub fn removal_cookie(name: &str) -> Cookie<'static> {
    Cookie::build((name.to_string(), "")).path("/").build()
}
