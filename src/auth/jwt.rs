use std::time::Duration;

use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;
use uuid::{NoContext, Timestamp, Uuid};

use super::{claims::Claims, repo_types::User};
use crate::config::JwtConfig;

/// Why a token failed verification. Returned as a value, never raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TokenRejection {
    #[error("malformed token")]
    Malformed,
    #[error("bad signature")]
    BadSignature,
    #[error("token expired")]
    Expired,
    #[error("wrong issuer")]
    WrongIssuer,
    #[error("wrong audience")]
    WrongAudience,
}

#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    pub issuer: String,
    pub audience: String,
    pub ttl: Duration,
}

impl JwtKeys {
    pub fn new(cfg: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            ttl: Duration::from_secs(cfg.ttl_minutes.max(0) as u64 * 60),
        }
    }

    pub fn sign(&self, user: &User) -> anyhow::Result<(String, Claims)> {
        self.sign_at(user, OffsetDateTime::now_utc())
    }

    /// Signs a token for `user` with a fresh session ID, valid from `now` for the TTL.
    /// The session ID is a v7 UUID stamped with `now`, so stores can tell its age.
    pub fn sign_at(&self, user: &User, now: OffsetDateTime) -> anyhow::Result<(String, Claims)> {
        let exp = now + TimeDuration::seconds(self.ttl.as_secs() as i64);
        let claims = Claims {
            sub: user.id,
            jti: Uuid::new_v7(Timestamp::from_unix(
                NoContext,
                now.unix_timestamp().max(0) as u64,
                now.nanosecond(),
            )),
            email: user.email.clone(),
            name: user.name.clone(),
            username: user.username.clone(),
            profile_image: user.profile_image.clone(),
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(user_id = %user.id, jti = %claims.jti, "jwt signed");
        Ok((token, claims))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, TokenRejection> {
        self.verify_at(token, OffsetDateTime::now_utc())
    }

    /// Checks signature, issuer and audience, then requires `now < exp`.
    pub fn verify_at(&self, token: &str, now: OffsetDateTime) -> Result<Claims, TokenRejection> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        // expiry is checked below against the caller's clock, without leeway
        validation.validate_exp = false;
        validation.leeway = 0;

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidSignature => TokenRejection::BadSignature,
                ErrorKind::ExpiredSignature => TokenRejection::Expired,
                ErrorKind::InvalidIssuer => TokenRejection::WrongIssuer,
                ErrorKind::InvalidAudience => TokenRejection::WrongAudience,
                _ => TokenRejection::Malformed,
            }
        })?;

        if (data.claims.exp as i64) <= now.unix_timestamp() {
            return Err(TokenRejection::Expired);
        }
        debug!(user_id = %data.claims.sub, jti = %data.claims.jti, "jwt verified");
        Ok(data.claims)
    }
}

#[cfg(test)]
pub(crate) fn test_keys(secret: &str, ttl_minutes: i64) -> JwtKeys {
    JwtKeys::new(&JwtConfig {
        secret: secret.into(),
        issuer: "test-issuer".into(),
        audience: "test-aud".into(),
        ttl_minutes,
    })
}
