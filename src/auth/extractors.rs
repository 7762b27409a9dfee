use std::convert::Infallible;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use super::claims::Identity;
use crate::error::ServiceError;

/// Identity attached by the session gate; rejects anonymous requests with 401.
pub struct CurrentUser(pub Identity);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .cloned()
            .map(CurrentUser)
            .ok_or(ServiceError::Unauthorized)
    }
}

/// Identity if the gate attached one; never rejects.
pub struct MaybeUser(pub Option<Identity>);

#[async_trait]
impl<S> FromRequestParts<S> for MaybeUser
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(parts.extensions.get::<Identity>().cloned()))
    }
}
