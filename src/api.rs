use crate::db::MAX_FILTER_IDS;
use crate::error::HandlerError;
use crate::model::{Link, LinkFilter, is_single_label};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

/// Request body for creating or overwriting a link.
///
/// Any `id` key is ignored, ids only ever come from the store or the path.
#[derive(Debug, Deserialize)]
pub struct LinkBody {
    pub url: Option<String>,
    pub tags: Option<String>,
    pub unread: Option<bool>,
}

impl LinkBody {
    pub fn parse(body: &str) -> Result<Self, HandlerError> {
        if body.trim().is_empty() {
            return Err(HandlerError::validation("request body is empty"));
        }

        serde_json::from_str(body)
            .map_err(|e| HandlerError::validation(format!("invalid request body: {}", e)))
    }

    /// Applies defaults and checks the url, producing an unsaved link.
    ///
    /// Surrounding whitespace is trimmed from the url before it is checked and stored.
    pub fn into_link(self) -> Result<Link, HandlerError> {
        let url = match self.url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => url.to_string(),
            _ => return Err(HandlerError::validation("url is required")),
        };
        validate_url(&url)?;

        Ok(Link::new(
            url,
            self.tags.unwrap_or_default(),
            self.unread.unwrap_or(false),
        ))
    }
}

pub fn validate_url(raw: &str) -> Result<Url, HandlerError> {
    let url = Url::parse(raw)
        .map_err(|e| HandlerError::validation(format!("invalid url {:?}: {}", raw, e)))?;

    if !url.has_host() {
        return Err(HandlerError::validation(format!(
            "invalid url {:?}: missing host",
            raw
        )));
    }

    Ok(url)
}

pub fn parse_link_id(raw: &str) -> Result<Uuid, HandlerError> {
    Uuid::parse_str(raw)
        .map_err(|_| HandlerError::validation(format!("invalid link id {:?}", raw)))
}

/// An absent or blank body lists everything.
pub fn parse_filter(body: &str) -> Result<LinkFilter, HandlerError> {
    if body.trim().is_empty() {
        return Ok(LinkFilter::default());
    }

    let filter: LinkFilter = serde_json::from_str(body)
        .map_err(|e| HandlerError::validation(format!("invalid filter: {}", e)))?;

    if let Some(ids) = &filter.ids {
        if ids.len() > MAX_FILTER_IDS {
            return Err(HandlerError::validation(format!(
                "invalid filter: at most {} ids allowed, got {}",
                MAX_FILTER_IDS,
                ids.len()
            )));
        }
    }
    if let Some(tag) = &filter.tag {
        if !is_single_label(tag) {
            return Err(HandlerError::validation(format!(
                "invalid filter: tag {:?} must be a single label without spaces or commas",
                tag
            )));
        }
    }

    Ok(filter)
}

/// Credentials posted to `/login`.
#[derive(Debug, Deserialize)]
pub struct LoginBody {
    pub username: String,
    pub password: String,
}

impl LoginBody {
    pub fn parse(body: &str) -> Result<Self, HandlerError> {
        serde_json::from_str(body)
            .map_err(|e| HandlerError::validation(format!("invalid login body: {}", e)))
    }
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub jwt: String,
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}
