use crate::config::Config;
use crate::error::DbError;
use crate::model::{Link, LinkFilter, User};
use async_trait::async_trait;
use deadpool::managed::{self, Metrics, Object, RecycleError, RecycleResult};
use libsql::{Builder, Connection, Database as LibsqlDatabase};
use std::path::Path;
use uuid::Uuid;

const SYSTEM_MIGRATIONS: &[(&str, &str)] =
    &[("system/000_migrations_table.sql", include_str!("migrations/system/000_migrations_table.sql"))];

const MIGRATIONS: &[(&str, &str)] = &[
    ("001_links.sql", include_str!("migrations/001_links.sql")),
    ("002_users.sql", include_str!("migrations/002_users.sql")),
];

const BUSY_TIMEOUT_MS: u32 = 5000;

/// Upper bound on `LinkFilter::ids`, well below SQLite's bound-parameter limit.
pub const MAX_FILTER_IDS: usize = 1000;

const INSERT_LINK: &str = "INSERT INTO links (url, tags, unread) VALUES (?, ?, ?) RETURNING id";

const UPDATE_LINK: &str = r#"
    UPDATE links
    SET url = ?, tags = ?, unread = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
    WHERE id = ?
"#;

const DELETE_LINK: &str = "DELETE FROM links WHERE id = ?";

const SELECT_LINK: &str = "SELECT id, url, tags, unread FROM links WHERE id = ?";

const INSERT_USER: &str =
    "INSERT INTO users (username, password_hash) VALUES (?, ?) RETURNING id, username, password_hash";

const SELECT_USER: &str = "SELECT id, username, password_hash FROM users WHERE username = ?";

/// Something that can be written to, rewritten in, and removed from the store.
#[async_trait]
pub trait DatabaseObject {
    /// Inserts the object and records the id the database generated for it.
    async fn save(&mut self, conn: &Connection) -> Result<(), DbError>;

    /// Overwrites the stored row. Returns `false` if no row had this id.
    async fn update(&self, conn: &Connection) -> Result<bool, DbError>;

    async fn delete(&self, conn: &Connection) -> Result<(), DbError>;
}

#[async_trait]
impl DatabaseObject for Link {
    async fn save(&mut self, conn: &Connection) -> Result<(), DbError> {
        let mut rows = conn
            .query(
                INSERT_LINK,
                libsql::params![self.url.as_str(), self.tags.as_str(), i64::from(self.unread)],
            )
            .await?;

        let row = rows.next().await?.ok_or(DbError::MissingId)?;
        let raw_id: String = row.get(0)?;
        let id = Uuid::parse_str(&raw_id)
            .map_err(|e| DbError::MalformedRow(format!("generated id {raw_id:?}: {e}")))?;

        self.assign_id(id);
        tracing::debug!(%id, "link saved");
        Ok(())
    }

    async fn update(&self, conn: &Connection) -> Result<bool, DbError> {
        let id = self.id().ok_or(DbError::Unsaved)?;
        let changed = conn
            .execute(
                UPDATE_LINK,
                libsql::params![
                    self.url.as_str(),
                    self.tags.as_str(),
                    i64::from(self.unread),
                    id.to_string()
                ],
            )
            .await?;
        Ok(changed > 0)
    }

    async fn delete(&self, conn: &Connection) -> Result<(), DbError> {
        let id = self.id().ok_or(DbError::Unsaved)?;
        delete_link(conn, id).await
    }
}

/// Removes the row for `id`. Deleting an id that does not exist is not an error.
pub async fn delete_link(conn: &Connection, id: Uuid) -> Result<(), DbError> {
    conn.execute(DELETE_LINK, libsql::params![id.to_string()]).await?;
    Ok(())
}

pub async fn find_link(conn: &Connection, id: Uuid) -> Result<Option<Link>, DbError> {
    let mut rows = conn.query(SELECT_LINK, libsql::params![id.to_string()]).await?;

    if let Some(row) = rows.next().await? {
        Ok(Some(Link::from_row(&row)?))
    } else {
        Ok(None)
    }
}

pub async fn find_links(conn: &Connection, filter: &LinkFilter) -> Result<Vec<Link>, DbError> {
    if filter.matches_nothing() {
        return Ok(vec![]);
    }

    let mut clauses: Vec<String> = Vec::new();
    let mut params: Vec<libsql::Value> = Vec::new();

    if let Some(ids) = &filter.ids {
        let placeholders = vec!["?"; ids.len()].join(", ");
        clauses.push(format!("id IN ({})", placeholders));
        params.extend(ids.iter().map(|id| libsql::Value::from(id.to_string())));
    }
    if let Some(unread) = filter.unread {
        clauses.push("unread = ?".to_string());
        params.push(i64::from(unread).into());
    }
    if let Some(tag) = &filter.tag {
        // pad with spaces so a label only matches whole
        clauses.push("(' ' || replace(tags, ',', ' ') || ' ') LIKE ? ESCAPE '\\'".to_string());
        params.push(format!("% {} %", escape_like(tag)).into());
    }

    let mut query = String::from("SELECT id, url, tags, unread FROM links");
    if !clauses.is_empty() {
        query.push_str(" WHERE ");
        query.push_str(&clauses.join(" AND "));
    }
    query.push_str(" ORDER BY created_at, rowid");

    let mut rows = conn.query(&query, params).await?;
    let mut links = Vec::new();

    while let Some(row) = rows.next().await? {
        links.push(Link::from_row(&row)?);
    }

    Ok(links)
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

/// The persistence operations the HTTP layer needs.
#[async_trait]
pub trait LinkStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Link>, DbError>;

    async fn get_all(&self, filter: &LinkFilter) -> Result<Vec<Link>, DbError>;

    /// Persists a new link and assigns its id.
    async fn put(&self, link: &mut Link) -> Result<(), DbError>;

    /// Returns `false` when no row carries the link's id.
    async fn update(&self, link: &Link) -> Result<bool, DbError>;

    async fn delete(&self, id: Uuid) -> Result<(), DbError>;
}

/// Account lookups for sign-in.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user(&self, username: &str) -> Result<Option<User>, DbError>;

    async fn create_user(&self, username: &str, password_hash: &str) -> Result<User, DbError>;
}

pub struct ConnectionManager {
    db: LibsqlDatabase,
}

impl managed::Manager for ConnectionManager {
    type Type = Connection;
    type Error = libsql::Error;

    async fn create(&self) -> Result<Connection, libsql::Error> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query(&format!("PRAGMA busy_timeout = {}", BUSY_TIMEOUT_MS), ())
            .await?;
        rows.next().await?;
        Ok(conn)
    }

    async fn recycle(&self, conn: &mut Connection, _: &Metrics) -> RecycleResult<libsql::Error> {
        conn.query("SELECT 1", ()).await.map_err(RecycleError::Backend)?;
        Ok(())
    }
}

pub type Pool = managed::Pool<ConnectionManager>;

/// A connection checked out of the pool. It goes back when dropped.
pub type PooledConnection = Object<ConnectionManager>;

pub struct Database {
    pool: Pool,
}

impl Database {
    pub async fn new(cfg: &Config, data_dir: &Path) -> Result<Self, DbError> {
        let path = data_dir.join(cfg.app.get_db());
        Self::open(&path, cfg.app.get_pool_size()).await
    }

    pub async fn open(path: &Path, pool_size: usize) -> Result<Self, DbError> {
        tracing::info!(path = ?path, pool_size, "[db] opening local database");
        let db = Builder::new_local(path).build().await?;

        let pool = Pool::builder(ConnectionManager { db })
            .max_size(pool_size.max(1))
            .build()
            .map_err(|e| DbError::PoolSetup(e.to_string()))?;

        let database = Database { pool };
        {
            let conn = database.connection().await?;
            for (filename, sql) in SYSTEM_MIGRATIONS.iter().chain(MIGRATIONS) {
                Self::run_migration(&conn, filename, sql).await?;
            }
        }

        Ok(database)
    }

    /// Checks a connection out of the pool for the duration of one operation.
    pub async fn connection(&self) -> Result<PooledConnection, DbError> {
        Ok(self.pool.get().await?)
    }

    async fn is_migration_applied(conn: &Connection, name: &str) -> Result<bool, DbError> {
        let query = "SELECT 1 FROM _migrations WHERE name = ?";
        match conn.query(query, libsql::params![name]).await {
            Ok(mut rows) => Ok(rows.next().await?.is_some()),
            Err(e) => {
                if e.to_string().contains("no such table") {
                    Ok(false)
                } else {
                    Err(e.into())
                }
            }
        }
    }

    async fn record_migration(conn: &Connection, name: &str) -> Result<(), DbError> {
        let query = r#"
            INSERT INTO _migrations (name, applied_at)
            VALUES (?, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        "#;
        conn.execute(query, libsql::params![name]).await?;
        Ok(())
    }

    async fn run_migration(conn: &Connection, name: &str, sql: &str) -> Result<(), DbError> {
        if Self::is_migration_applied(conn, name).await? {
            tracing::debug!("migration {} already applied, skipping", name);
            return Ok(());
        }

        tracing::info!("applying migration: {}", name);
        conn.execute_batch(sql).await.map_err(|source| DbError::Migration {
            name: name.to_string(),
            source,
        })?;

        Self::record_migration(conn, name).await
    }
}

#[async_trait]
impl LinkStore for Database {
    async fn get(&self, id: Uuid) -> Result<Option<Link>, DbError> {
        let conn = self.connection().await?;
        find_link(&conn, id).await
    }

    async fn get_all(&self, filter: &LinkFilter) -> Result<Vec<Link>, DbError> {
        let conn = self.connection().await?;
        find_links(&conn, filter).await
    }

    async fn put(&self, link: &mut Link) -> Result<(), DbError> {
        let conn = self.connection().await?;
        link.save(&conn).await
    }

    async fn update(&self, link: &Link) -> Result<bool, DbError> {
        let conn = self.connection().await?;
        DatabaseObject::update(link, &conn).await
    }

    async fn delete(&self, id: Uuid) -> Result<(), DbError> {
        let conn = self.connection().await?;
        delete_link(&conn, id).await
    }
}

#[async_trait]
impl UserStore for Database {
    async fn find_user(&self, username: &str) -> Result<Option<User>, DbError> {
        let conn = self.connection().await?;
        let mut rows = conn.query(SELECT_USER, libsql::params![username]).await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(User::from_row(&row)?))
        } else {
            Ok(None)
        }
    }

    async fn create_user(&self, username: &str, password_hash: &str) -> Result<User, DbError> {
        let conn = self.connection().await?;
        let mut rows = conn
            .query(INSERT_USER, libsql::params![username, password_hash])
            .await?;

        let row = rows.next().await?.ok_or(DbError::MissingId)?;
        let user = User::from_row(&row)?;
        tracing::info!(username = %user.username, "user created");
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn open_temp() -> (TempDir, Database) {
        let dir = TempDir::new().unwrap();
        let db = Database::open(&dir.path().join("links.db"), 4).await.unwrap();
        (dir, db)
    }

    async fn put(db: &Database, url: &str, tags: &str, unread: bool) -> Link {
        let mut link = Link::new(url, tags, unread);
        db.put(&mut link).await.unwrap();
        link
    }

    #[tokio::test]
    async fn put_assigns_generated_id() {
        let (_dir, db) = open_temp().await;
        let mut link = Link::new("http://test.com", "test tags", false);
        assert!(link.id().is_none());

        db.put(&mut link).await.unwrap();

        let id = link.id().expect("id assigned on save");
        assert_eq!(id.get_version_num(), 4);
    }

    #[tokio::test]
    async fn row_round_trip_preserves_fields() {
        let (_dir, db) = open_temp().await;
        let saved = put(&db, "http://test.com", "test tags", true).await;

        let fetched = db.get(saved.id().unwrap()).await.unwrap().unwrap();
        assert_eq!(fetched, saved);
        assert_eq!(fetched.to_record(), saved.to_record());
    }

    #[tokio::test]
    async fn get_missing_is_none() {
        let (_dir, db) = open_temp().await;
        assert!(db.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_overwrites_all_fields() {
        let (_dir, db) = open_temp().await;
        let saved = put(&db, "http://test.com", "old", false).await;

        let changed = Link::new("https://other.org/page", "new tags", true).with_id(saved.id().unwrap());
        assert!(LinkStore::update(&db, &changed).await.unwrap());

        let fetched = db.get(saved.id().unwrap()).await.unwrap().unwrap();
        assert_eq!(fetched, changed);
    }

    #[tokio::test]
    async fn update_unknown_id_reports_no_row() {
        let (_dir, db) = open_temp().await;
        let ghost = Link::new("http://test.com", "", false).with_id(Uuid::new_v4());
        assert!(!LinkStore::update(&db, &ghost).await.unwrap());
    }

    #[tokio::test]
    async fn update_unsaved_link_is_rejected() {
        let (_dir, db) = open_temp().await;
        let unsaved = Link::new("http://test.com", "", false);
        let err = LinkStore::update(&db, &unsaved).await.unwrap_err();
        assert!(matches!(err, DbError::Unsaved));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (_dir, db) = open_temp().await;
        let saved = put(&db, "http://test.com", "", false).await;
        let id = saved.id().unwrap();

        LinkStore::delete(&db, id).await.unwrap();
        assert!(db.get(id).await.unwrap().is_none());
        LinkStore::delete(&db, id).await.unwrap();
        LinkStore::delete(&db, Uuid::new_v4()).await.unwrap();
    }

    #[tokio::test]
    async fn saved_link_can_delete_itself() {
        let (_dir, db) = open_temp().await;
        let saved = put(&db, "http://test.com", "", false).await;
        let conn = db.connection().await.unwrap();

        DatabaseObject::delete(&saved, &conn).await.unwrap();
        assert!(find_link(&conn, saved.id().unwrap()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_url_violates_constraint() {
        let (_dir, db) = open_temp().await;
        let mut link = Link::new("", "", false);
        assert!(db.put(&mut link).await.is_err());
        assert!(link.id().is_none());
    }

    #[tokio::test]
    async fn get_all_without_rows_is_empty() {
        let (_dir, db) = open_temp().await;
        assert!(db.get_all(&LinkFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_all_filters() {
        let (_dir, db) = open_temp().await;
        let a = put(&db, "http://a.com", "rust,web", false).await;
        let b = put(&db, "http://b.com", "rustacean", true).await;
        let c = put(&db, "http://c.com", "web 50%_off", true).await;

        let all = db.get_all(&LinkFilter::default()).await.unwrap();
        assert_eq!(all, vec![a.clone(), b.clone(), c.clone()]);

        let unread = LinkFilter {
            unread: Some(true),
            ..Default::default()
        };
        assert_eq!(db.get_all(&unread).await.unwrap(), vec![b.clone(), c.clone()]);

        let rust = LinkFilter {
            tag: Some("rust".into()),
            ..Default::default()
        };
        assert_eq!(db.get_all(&rust).await.unwrap(), vec![a.clone()]);

        let escaped = LinkFilter {
            tag: Some("50%_off".into()),
            ..Default::default()
        };
        assert_eq!(db.get_all(&escaped).await.unwrap(), vec![c.clone()]);

        let by_ids = LinkFilter {
            ids: Some(vec![a.id().unwrap(), c.id().unwrap(), Uuid::new_v4()]),
            unread: Some(true),
            ..Default::default()
        };
        assert_eq!(db.get_all(&by_ids).await.unwrap(), vec![c]);

        let no_ids = LinkFilter {
            ids: Some(vec![]),
            ..Default::default()
        };
        assert!(db.get_all(&no_ids).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reopening_skips_applied_migrations() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("links.db");
        let saved = {
            let db = Database::open(&path, 2).await.unwrap();
            put(&db, "http://test.com", "kept", false).await
        };

        let db = Database::open(&path, 2).await.unwrap();
        assert_eq!(db.get(saved.id().unwrap()).await.unwrap(), Some(saved));
    }

    #[tokio::test]
    async fn tag_must_be_one_whole_label() {
        let (_dir, db) = open_temp().await;
        put(&db, "http://e.com", "", false).await;
        put(&db, "http://ab.com", "a,b", false).await;
        put(&db, "http://spaced.com", "x,  y", false).await;

        for tag in ["", " ", "a b", "a,b", ", "] {
            let filter = LinkFilter {
                tag: Some(tag.into()),
                ..Default::default()
            };
            assert!(db.get_all(&filter).await.unwrap().is_empty(), "tag {:?}", tag);
        }

        let filter = LinkFilter {
            tag: Some("B".into()),
            ..Default::default()
        };
        let urls: Vec<_> = db.get_all(&filter).await.unwrap().into_iter().map(|l| l.url).collect();
        assert_eq!(urls, vec!["http://ab.com"]);
    }

    #[tokio::test]
    async fn id_filter_at_the_cap() {
        let (_dir, db) = open_temp().await;
        let saved = put(&db, "http://test.com", "", false).await;

        let mut ids: Vec<Uuid> = (1..MAX_FILTER_IDS).map(|_| Uuid::new_v4()).collect();
        ids.push(saved.id().unwrap());
        let filter = LinkFilter {
            ids: Some(ids),
            ..Default::default()
        };
        assert_eq!(db.get_all(&filter).await.unwrap(), vec![saved]);
    }

    #[tokio::test]
    async fn failed_insert_returns_connection_to_pool() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(&dir.path().join("links.db"), 1).await.unwrap();

        let mut bad = Link::new("", "", false);
        assert!(db.put(&mut bad).await.is_err());

        let mut good = Link::new("http://test.com", "", false);
        tokio::time::timeout(Duration::from_secs(5), db.put(&mut good))
            .await
            .expect("connection released after the failed insert")
            .unwrap();
        assert!(good.is_saved());

        let held = db.connection().await.unwrap();
        drop(held);
        tokio::time::timeout(Duration::from_secs(5), db.get(good.id().unwrap()))
            .await
            .expect("connection released after drop")
            .unwrap();
    }

    #[tokio::test]
    async fn users_round_trip() {
        let (_dir, db) = open_temp().await;
        assert!(db.find_user("ada").await.unwrap().is_none());

        let created = db.create_user("ada", "$argon2id$fake").await.unwrap();
        let found = db.find_user("ada").await.unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(found.password_hash, "$argon2id$fake");

        assert!(db.create_user("ada", "other").await.is_err());
    }
}
