use crate::state::AppState;
use axum::Router;

pub mod handlers;
pub mod services;

pub fn router() -> Router<AppState> {
    handlers::me_routes()
}
