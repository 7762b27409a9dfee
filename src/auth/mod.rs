use crate::state::AppState;
use axum::Router;

pub mod claims;
pub mod cookies;
pub mod dto;
pub mod extractors;
pub mod gate;
pub mod handlers;
pub mod jwt;
pub mod memory;
pub mod password;
pub mod repo;
pub mod repo_types;
pub mod services;
pub mod validation;

pub fn router() -> Router<AppState> {
    handlers::auth_routes()
}
