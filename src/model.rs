use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DbError;

/// A bookmark.
///
/// A `Link` built with [`Link::new`] has no id. The id is generated by the
/// database when the link is first saved and never changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Link {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Uuid>,
    pub url: String,
    pub tags: String,
    pub unread: bool,
}

impl Link {
    /// Builds an unsaved link. Nothing is validated or written here.
    pub fn new(url: impl Into<String>, tags: impl Into<String>, unread: bool) -> Self {
        Link {
            id: None,
            url: url.into(),
            tags: tags.into(),
            unread,
        }
    }

    pub fn id(&self) -> Option<Uuid> {
        self.id
    }

    pub fn is_saved(&self) -> bool {
        self.id.is_some()
    }

    pub(crate) fn assign_id(&mut self, id: Uuid) {
        self.id = Some(id);
    }

    /// Points this link at an existing row, for overwrites addressed by id.
    pub(crate) fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    /// Structural record `{id, url, tags, unread}` as sent over the wire.
    pub fn to_record(&self) -> serde_json::Value {
        let mut record = serde_json::json!({
            "url": self.url,
            "tags": self.tags,
            "unread": self.unread,
        });
        if let Some(id) = self.id {
            record["id"] = serde_json::Value::String(id.to_string());
        }
        record
    }

    /// Reads a link from the row the cursor is currently on.
    ///
    /// Expects the columns `id, url, tags, unread` in that order.
    pub fn from_row(row: &libsql::Row) -> Result<Self, DbError> {
        let raw_id: String = row.get(0)?;
        let id = Uuid::parse_str(&raw_id)
            .map_err(|e| DbError::MalformedRow(format!("id {raw_id:?}: {e}")))?;
        let unread: i64 = row.get(3)?;

        Ok(Link {
            id: Some(id),
            url: row.get(1)?,
            tags: row.get::<Option<String>>(2)?.unwrap_or_default(),
            unread: unread != 0,
        })
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "link {} -> {} [{}]", id, self.url, self.tags),
            None => write!(f, "unsaved link -> {} [{}]", self.url, self.tags),
        }
    }
}

/// Splits a tags string into its labels. Spaces and commas both delimit.
pub fn split_labels(tags: &str) -> impl Iterator<Item = &str> {
    tags.split([' ', ','])
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// True when `tag` is exactly one label, so it can be matched as a whole.
pub fn is_single_label(tag: &str) -> bool {
    let mut labels = split_labels(tag);
    matches!((labels.next(), labels.next()), (Some(label), None) if label == tag)
}

/// Narrows a listing. Every field is optional and they combine with AND.
///
/// `tag` matches one whole label, ignoring ASCII case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkFilter {
    pub ids: Option<Vec<Uuid>>,
    pub unread: Option<bool>,
    pub tag: Option<String>,
}

impl LinkFilter {
    /// True when the filter can only ever match nothing.
    pub fn matches_nothing(&self) -> bool {
        matches!(&self.ids, Some(ids) if ids.is_empty())
            || self.tag.as_deref().is_some_and(|tag| !is_single_label(tag))
    }
}

/// An account allowed to sign in. The hash never leaves the server.
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
}

impl User {
    /// Expects the columns `id, username, password_hash`.
    pub fn from_row(row: &libsql::Row) -> Result<Self, DbError> {
        Ok(User {
            id: row.get(0)?,
            username: row.get(1)?,
            password_hash: row.get(2)?,
        })
    }
}
