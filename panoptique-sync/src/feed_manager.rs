use crate::traits::ArticleStore;
use crate::types::{
    Article, ArticleDraft, ArticleRepair, InsertOutcome, NewSource, Result, Source,
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};
use std::str::FromStr;
use tracing::{debug, info, warn};

/// SQLite limits bound parameters per statement; id lists are deleted in chunks of this size.
const DELETE_CHUNK: usize = 500;

/// SQLite-backed store for sources and articles.
pub struct FeedManager {
    db: SqlitePool,
}

impl FeedManager {
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let db = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&db).await?;

        info!("Connected to database {}", database_url);
        Ok(Self { db })
    }

    /// Private in-memory database, used by tests and dry runs.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        // One connection that never expires, otherwise the database vanishes with it.
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&db).await?;
        Ok(Self { db })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    pub async fn count_articles(&self, source_id: Option<i64>) -> Result<i64> {
        let count: i64 = match source_id {
            Some(id) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM articles WHERE source_id = ?")
                    .bind(id)
                    .fetch_one(&self.db)
                    .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM articles")
                    .fetch_one(&self.db)
                    .await?
            }
        };
        Ok(count)
    }

    async fn insert_one(
        conn: &mut sqlx::SqliteConnection,
        draft: &ArticleDraft,
    ) -> std::result::Result<u64, sqlx::Error> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO articles (
                source_id, title, url, content, summary, description, excerpt, image_url,
                author, published_at, is_read, is_favorite, is_archived, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(url) DO NOTHING
            "#,
        )
        .bind(draft.source_id)
        .bind(&draft.title)
        .bind(&draft.url)
        .bind(&draft.content)
        .bind(&draft.summary)
        .bind(&draft.description)
        .bind(&draft.excerpt)
        .bind(&draft.image_url)
        .bind(&draft.author)
        .bind(draft.published_at)
        .bind(draft.is_read)
        .bind(draft.is_favorite)
        .bind(draft.is_archived)
        .bind(now)
        .bind(now)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ArticleStore for FeedManager {
    async fn find_article_by_url(&self, url: &str) -> Result<Option<Article>> {
        let article = sqlx::query_as::<_, Article>("SELECT * FROM articles WHERE url = ? LIMIT 1")
            .bind(url)
            .fetch_optional(&self.db)
            .await?;
        Ok(article)
    }

    async fn bulk_insert_articles(&self, drafts: &[ArticleDraft]) -> Result<Vec<InsertOutcome>> {
        let mut outcomes = Vec::with_capacity(drafts.len());
        let mut tx = self.db.begin().await?;

        for draft in drafts {
            // Each insert gets its own savepoint so a failure only undoes that row.
            let mut savepoint = sqlx::Connection::begin(&mut *tx).await?;
            match Self::insert_one(&mut savepoint, draft).await {
                Ok(0) => {
                    savepoint.commit().await?;
                    outcomes.push(InsertOutcome::Duplicate);
                }
                Ok(_) => {
                    savepoint.commit().await?;
                    outcomes.push(InsertOutcome::Inserted);
                }
                Err(e) => {
                    savepoint.rollback().await?;
                    warn!("Failed to insert article {}: {}", draft.url, e);
                    outcomes.push(InsertOutcome::Failed(format!(
                        "Failed to save article {}: {}",
                        draft.url, e
                    )));
                }
            }
        }

        tx.commit().await?;
        debug!("Bulk insert processed {} drafts", drafts.len());
        Ok(outcomes)
    }

    async fn delete_articles_older_than(&self, days: i64, exclude_favorites: bool) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(days);
        let sql = if exclude_favorites {
            "DELETE FROM articles WHERE created_at < ? AND is_favorite = 0"
        } else {
            "DELETE FROM articles WHERE created_at < ?"
        };
        let result = sqlx::query(sql).bind(cutoff).execute(&self.db).await?;
        Ok(result.rows_affected())
    }

    async fn update_source_last_sync(&self, source_id: i64, error: Option<&str>) -> Result<()> {
        let now = Utc::now();
        sqlx::query("UPDATE sources SET last_sync = ?, last_error = ?, updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(error)
            .bind(now)
            .bind(source_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn find_sources_due_for_sync(&self, active_only: bool) -> Result<Vec<Source>> {
        let now = Utc::now();
        let due = self
            .list_sources(active_only)
            .await?
            .into_iter()
            .filter(|source| source.is_due(now))
            .collect();
        Ok(due)
    }

    async fn find_duplicate_articles_by_url(&self, source_id: Option<i64>) -> Result<Vec<Vec<Article>>> {
        let urls: Vec<String> = match source_id {
            Some(id) => {
                sqlx::query_scalar(
                    "SELECT url FROM articles WHERE source_id = ? GROUP BY url HAVING COUNT(*) > 1",
                )
                .bind(id)
                .fetch_all(&self.db)
                .await?
            }
            None => {
                sqlx::query_scalar("SELECT url FROM articles GROUP BY url HAVING COUNT(*) > 1")
                    .fetch_all(&self.db)
                    .await?
            }
        };

        let mut groups = Vec::with_capacity(urls.len());
        for url in urls {
            let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM articles WHERE url = ");
            query.push_bind(url);
            if let Some(id) = source_id {
                query.push(" AND source_id = ").push_bind(id);
            }
            query.push(" ORDER BY created_at DESC, id DESC");
            let group = query.build_query_as::<Article>().fetch_all(&self.db).await?;
            groups.push(group);
        }
        Ok(groups)
    }

    async fn find_source(&self, id: i64) -> Result<Option<Source>> {
        let source = sqlx::query_as::<_, Source>("SELECT * FROM sources WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(source)
    }

    async fn list_sources(&self, active_only: bool) -> Result<Vec<Source>> {
        let sql = if active_only {
            "SELECT * FROM sources WHERE is_active = 1 ORDER BY id"
        } else {
            "SELECT * FROM sources ORDER BY id"
        };
        let sources = sqlx::query_as::<_, Source>(sql).fetch_all(&self.db).await?;
        Ok(sources)
    }

    async fn insert_source(&self, source: &NewSource) -> Result<Source> {
        source.validate()?;
        let now = Utc::now();
        let created = sqlx::query_as::<_, Source>(
            r#"
            INSERT INTO sources (name, url, feed_url, category_id, is_active, sync_frequency, created_at, updated_at)
            VALUES (?, ?, ?, ?, 1, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(source.name.trim())
        .bind(source.url.trim())
        .bind(source.feed_url.as_deref().map(str::trim))
        .bind(source.category_id)
        .bind(source.sync_frequency)
        .bind(now)
        .bind(now)
        .fetch_one(&self.db)
        .await?;

        info!("Added source {} ({})", created.name, created.id);
        Ok(created)
    }

    async fn delete_articles(&self, ids: &[i64]) -> Result<u64> {
        let mut deleted = 0;
        for chunk in ids.chunks(DELETE_CHUNK) {
            let mut query = QueryBuilder::<Sqlite>::new("DELETE FROM articles WHERE id IN (");
            let mut separated = query.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");
            deleted += query.build().execute(&self.db).await?.rows_affected();
        }
        Ok(deleted)
    }

    async fn list_articles(&self, source_id: Option<i64>, limit: i64) -> Result<Vec<Article>> {
        let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM articles");
        if let Some(id) = source_id {
            query.push(" WHERE source_id = ").push_bind(id);
        }
        query.push(" ORDER BY created_at DESC, id DESC LIMIT ").push_bind(limit);
        let articles = query.build_query_as::<Article>().fetch_all(&self.db).await?;
        Ok(articles)
    }

    async fn apply_article_repair(&self, id: i64, repair: &ArticleRepair) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE articles
            SET excerpt = COALESCE(?, excerpt),
                description = COALESCE(?, description),
                image_url = CASE WHEN ? THEN NULL ELSE image_url END,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&repair.excerpt)
        .bind(&repair.description)
        .bind(repair.clear_image_url)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.db)
        .await?;
        Ok(())
    }
}
