//! src/persistent.rs
//!
//! Release records in sqlite, keyed by slug. The resolver never touches
//! this directly, it only hands finished drafts to a `ReleaseStore`.
//!

use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use sqlx::{sqlite::{SqliteConnectOptions, SqlitePoolOptions}, Pool, Row, Sqlite};
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use crate::errors::ResolveError;
use crate::provider::UNKNOWN_ARTIST;
use crate::types::{PlatformLinkMap, ReleaseDraft};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredRelease {
    pub id: String,
    pub slug: String,
    pub title: String,
    pub artist: String,
    pub cover_url: String,
    pub source_url: String,
    pub links: PlatformLinkMap,
    pub redirect_url: Option<String>,
    pub created_at: i64,
    pub updated_at: i64
}

impl StoredRelease {
    /// Where the release page should send visitors instead of rendering,
    /// bare hosts get an https scheme.
    pub fn redirect_target(&self) -> Option<String> {
        let raw = self.redirect_url.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }
        if raw.starts_with("http") {
            Some(raw.to_string())
        } else {
            Some(format!("https://{raw}"))
        }
    }

    pub fn display_artist(&self) -> &str {
        if self.artist.trim().is_empty() { UNKNOWN_ARTIST } else { &self.artist }
    }
}

#[async_trait]
pub trait ReleaseStore: Send + Sync {
    /// Slug collisions come back as `SlugTaken`.
    async fn insert_release(&self, draft: &ReleaseDraft) -> Result<StoredRelease, ResolveError>;

    async fn get_release(&self, slug: &str) -> Result<Option<StoredRelease>, ResolveError>;

    /// `None` (or an empty url) clears the redirect. False if no such slug.
    async fn set_redirect_url(&self, slug: &str, url: Option<&str>) -> Result<bool, ResolveError>;

    /// Replaces the resolved content of an existing release. Slug, id,
    /// redirect and creation time are kept. False if no such slug.
    async fn update_release(&self, slug: &str, draft: &ReleaseDraft) -> Result<bool, ResolveError>;

    async fn delete_release(&self, slug: &str) -> Result<bool, ResolveError>;

    /// Newest first.
    async fn list_releases(&self, limit: u32) -> Result<Vec<StoredRelease>, ResolveError>;
}

pub struct SqliteReleaseStore {
    pool: Pool<Sqlite>
}

impl SqliteReleaseStore {
    pub async fn init(database_url: &str) -> Result<Self, ResolveError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| ResolveError::Config(format!("bad database url {database_url}: {e}")))?
            .create_if_missing(true);

        let filename = options.clone().get_filename();
        let parent = filename.parent()
            .filter(|p| !p.as_os_str().is_empty());
        if let Some(parent) = parent {
            std::fs::create_dir_all(parent).map_err(|e|
                ResolveError::Storage(
                    format!("create dir {}: {e}", parent.display())
            ))?;
        }

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(8)
            .connect_with(options)
            .await?;

        sqlx::query("PRAGMA journal_mode=WAL;").execute(&pool).await?;
        sqlx::query("PRAGMA synchronous=NORMAL;").execute(&pool).await?;

        let this = Self { pool };
        this.ensure_schema().await?;
        Ok( this )
    }

    async fn ensure_schema(&self) -> Result<(), ResolveError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS releases (
              id                TEXT PRIMARY KEY,
              slug              TEXT NOT NULL UNIQUE,
              title             TEXT NOT NULL,
              artist            TEXT NOT NULL,
              cover_url         TEXT NOT NULL,
              source_url        TEXT NOT NULL,
              links_by_platform TEXT NOT NULL,
              redirect_url      TEXT,
              created_at        INTEGER NOT NULL,
              updated_at        INTEGER NOT NULL
            );
            "#
        ).execute(&self.pool).await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_releases_created ON releases(created_at);"
        ).execute(&self.pool).await?;

        Ok(())
    }

    fn now() -> i64 {
        Utc::now().timestamp()
    }

    fn from_row(row: &SqliteRow) -> Result<StoredRelease, ResolveError> {
        let links: String = row.try_get("links_by_platform")?;
        let links: PlatformLinkMap = serde_json::from_str(&links)
            .map_err(|e| ResolveError::Storage(format!("links_by_platform: {e}")))?;

        Ok( StoredRelease {
            id: row.try_get("id")?,
            slug: row.try_get("slug")?,
            title: row.try_get("title")?,
            artist: row.try_get("artist")?,
            cover_url: row.try_get("cover_url")?,
            source_url: row.try_get("source_url")?,
            links,
            redirect_url: row.try_get("redirect_url")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?
        })
    }
}

#[async_trait]
impl ReleaseStore for SqliteReleaseStore {
    async fn insert_release(&self, draft: &ReleaseDraft) -> Result<StoredRelease, ResolveError> {
        let id = Uuid::new_v4().to_string();
        let now = Self::now();
        let links = serde_json::to_string(&draft.links)
            .map_err(|e| ResolveError::Storage(format!("encode links: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO releases (
                id, slug, title, artist, cover_url, source_url,
                links_by_platform, redirect_url, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, ?8, ?8);
            "#
        )
        .bind(&id)
        .bind(&draft.slug)
        .bind(&draft.title)
        .bind(&draft.artist)
        .bind(&draft.cover_url)
        .bind(&draft.source_url)
        .bind(&links)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok( StoredRelease {
            id,
            slug: draft.slug.clone(),
            title: draft.title.clone(),
            artist: draft.artist.clone(),
            cover_url: draft.cover_url.clone(),
            source_url: draft.source_url.clone(),
            links: draft.links.clone(),
            redirect_url: None,
            created_at: now,
            updated_at: now
        })
    }

    async fn get_release(&self, slug: &str) -> Result<Option<StoredRelease>, ResolveError> {
        let row = sqlx::query("SELECT * FROM releases WHERE slug = ?1;")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::from_row).transpose()
    }

    async fn set_redirect_url(&self, slug: &str, url: Option<&str>) -> Result<bool, ResolveError> {
        let url = url.map(str::trim).filter(|u| !u.is_empty());
        let done = sqlx::query(
            "UPDATE releases SET redirect_url = ?1, updated_at = ?2 WHERE slug = ?3;"
        )
        .bind(url)
        .bind(Self::now())
        .bind(slug)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn update_release(&self, slug: &str, draft: &ReleaseDraft) -> Result<bool, ResolveError> {
        let links = serde_json::to_string(&draft.links)
            .map_err(|e| ResolveError::Storage(format!("encode links: {e}")))?;

        let done = sqlx::query(
            r#"
            UPDATE releases
               SET title = ?1, artist = ?2, cover_url = ?3, source_url = ?4,
                   links_by_platform = ?5, updated_at = ?6
             WHERE slug = ?7;
            "#
        )
        .bind(&draft.title)
        .bind(&draft.artist)
        .bind(&draft.cover_url)
        .bind(&draft.source_url)
        .bind(&links)
        .bind(Self::now())
        .bind(slug)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn delete_release(&self, slug: &str) -> Result<bool, ResolveError> {
        let done = sqlx::query("DELETE FROM releases WHERE slug = ?1;")
            .bind(slug)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn list_releases(&self, limit: u32) -> Result<Vec<StoredRelease>, ResolveError> {
        let rows = sqlx::query(
            "SELECT * FROM releases ORDER BY created_at DESC, rowid DESC LIMIT ?1;"
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::from_row).collect()
    }
}
