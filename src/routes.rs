use axum::http::Method;
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handler::{
    AppState, create_link, delete_link, get_link, healthcheck, list_links, login, update_link,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(healthcheck))
        .route("/login", post(login))
        .route("/links", get(list_links).post(create_link))
        .route("/links/:id", get(get_link).put(update_link).delete(delete_link))
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    routes()
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
