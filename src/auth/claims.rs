use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JWT payload of a session token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: Uuid,             // user ID
    pub jti: Uuid,             // session ID, tracked in the user's active tokens
    pub email: String,
    pub name: String,
    pub username: String,
    pub profile_image: String,
    pub iat: usize,            // issued at (unix timestamp)
    pub exp: usize,            // expires at (unix timestamp)
    pub iss: String,           // issuer
    pub aud: String,           // audience
}

/// Identity attached to a request by the session gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub user_id: Uuid,
    #[serde(skip_serializing)]
    pub session_id: Uuid,
    pub email: String,
    pub name: String,
    pub username: String,
    pub profile_image: String,
}

impl From<Claims> for Identity {
    fn from(c: Claims) -> Self {
        Self {
            user_id: c.sub,
            session_id: c.jti,
            email: c.email,
            name: c.name,
            username: c.username,
            profile_image: c.profile_image,
        }
    }
}
