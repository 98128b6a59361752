use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

use tracing::info;

use crate::api::{HealthResponse, LinkBody, LoginBody, LoginResponse, parse_filter, parse_link_id};
use crate::auth::{TokenIssuer, verify_password};
use crate::db::{LinkStore, UserStore};
use crate::error::HandlerError;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn LinkStore>,
    pub users: Arc<dyn UserStore>,
    pub tokens: Arc<TokenIssuer>,
}

impl AppState {
    pub fn new(store: Arc<dyn LinkStore>, users: Arc<dyn UserStore>, tokens: TokenIssuer) -> Self {
        AppState {
            store,
            users,
            tokens: Arc::new(tokens),
        }
    }
}

pub async fn healthcheck() -> impl IntoResponse {
    info!("got healthcheck request");
    Json(HealthResponse { status: "ok" })
}

pub async fn get_link(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, HandlerError> {
    let id = parse_link_id(&id)?;

    match state.store.get(id).await? {
        Some(link) => Ok((StatusCode::OK, Json(link)).into_response()),
        None => Err(HandlerError::NotFound(id)),
    }
}

pub async fn list_links(State(state): State<AppState>, body: String) -> Result<Response, HandlerError> {
    let filter = parse_filter(&body)?;
    let links = state.store.get_all(&filter).await?;

    tracing::debug!(count = links.len(), "listed links");
    Ok((StatusCode::OK, Json(links)).into_response())
}

pub async fn create_link(State(state): State<AppState>, body: String) -> Result<Response, HandlerError> {
    let mut link = LinkBody::parse(&body)?.into_link()?;

    state.store.put(&mut link).await?;

    info!(link = %link, "created link");
    Ok((StatusCode::CREATED, Json(link)).into_response())
}

pub async fn update_link(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: String,
) -> Result<Response, HandlerError> {
    let id = parse_link_id(&id)?;
    let link = LinkBody::parse(&body)?.into_link()?.with_id(id);

    if !state.store.update(&link).await? {
        return Err(HandlerError::NotFound(id));
    }

    info!(link = %link, "updated link");
    Ok((StatusCode::OK, Json(link)).into_response())
}

pub async fn delete_link(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, HandlerError> {
    let id = parse_link_id(&id)?;

    state.store.delete(id).await?;

    info!(%id, "deleted link");
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// Unknown users and wrong passwords get the same 401.
pub async fn login(State(state): State<AppState>, body: String) -> Result<Response, HandlerError> {
    let credentials = LoginBody::parse(&body)?;

    let Some(user) = state.users.find_user(&credentials.username).await? else {
        info!(username = %credentials.username, "login for unknown user");
        return Err(HandlerError::Unauthorized);
    };
    if !verify_password(&credentials.password, &user.password_hash)? {
        info!(username = %user.username, "login with wrong password");
        return Err(HandlerError::Unauthorized);
    }

    let jwt = state.tokens.issue(&user.username)?;

    info!(username = %user.username, "user logged in");
    Ok((
        StatusCode::OK,
        Json(LoginResponse {
            jwt,
            username: user.username,
        }),
    )
        .into_response())
}
