use crate::store::{ensure_update_consistent, ItemStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use propflow_core::{
    AppError, ItemUpdate, MediaItem, MediaStatus, MediaType, RoomLabel, StatusCounts,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

const ITEM_COLUMNS: &str = r#"
    id, source_ref, media_type, status, processed_path, processed_url,
    ai_primary_label, ai_labels, ai_confidence, ai_description,
    attempts, last_error, processed_at, created_at, updated_at
"#;

#[derive(Clone)]
pub struct PostgresItemStore {
    pool: PgPool,
}

impl PostgresItemStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn move_all(&self, from: MediaStatus, to: MediaStatus) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE media_items
            SET status = $2,
                updated_at = GREATEST($3, updated_at + INTERVAL '1 microsecond')
            WHERE media_type = 'photo' AND status = $1
            "#,
        )
        .bind(from.to_string())
        .bind(to.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected())
    }
}

fn db_error(e: sqlx::Error) -> AppError {
    tracing::error!(error = ?e, "Item store query failed");
    AppError::Database(e.to_string())
}

fn parse_column<T>(row: &PgRow, column: &str) -> Result<T, AppError>
where
    T: FromStr<Err = anyhow::Error>,
{
    let raw: String = row.try_get(column).map_err(db_error)?;
    T::from_str(&raw).map_err(|e| AppError::Database(format!("{}: {}", column, e)))
}

fn row_to_item(row: &PgRow) -> Result<MediaItem, AppError> {
    let primary: Option<String> = row.try_get("ai_primary_label").map_err(db_error)?;
    let labels: Vec<String> = row.try_get("ai_labels").map_err(db_error)?;

    Ok(MediaItem {
        id: row.try_get("id").map_err(db_error)?,
        source_ref: row.try_get("source_ref").map_err(db_error)?,
        media_type: parse_column::<MediaType>(row, "media_type")?,
        status: parse_column::<MediaStatus>(row, "status")?,
        processed_path: row.try_get("processed_path").map_err(db_error)?,
        processed_url: row.try_get("processed_url").map_err(db_error)?,
        ai_primary_label: primary.as_deref().map(RoomLabel::from_untrusted),
        ai_labels: labels.iter().map(|l| RoomLabel::from_untrusted(l)).collect(),
        ai_confidence: row.try_get("ai_confidence").map_err(db_error)?,
        ai_description: row.try_get("ai_description").map_err(db_error)?,
        attempts: row.try_get("attempts").map_err(db_error)?,
        last_error: row.try_get("last_error").map_err(db_error)?,
        processed_at: row
            .try_get::<Option<DateTime<Utc>>, _>("processed_at")
            .map_err(db_error)?,
        created_at: row.try_get("created_at").map_err(db_error)?,
        updated_at: row.try_get("updated_at").map_err(db_error)?,
    })
}

#[async_trait]
impl ItemStore for PostgresItemStore {
    #[tracing::instrument(skip(self, item), fields(
        db.system = "postgresql",
        db.table = "media_items",
        db.operation = "insert",
        item_id = %item.id
    ))]
    async fn insert(&self, item: MediaItem) -> Result<MediaItem, AppError> {
        let query = format!(
            r#"
            INSERT INTO media_items (id, source_ref, media_type, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            ITEM_COLUMNS
        );

        let row = sqlx::query(&query)
            .bind(item.id)
            .bind(&item.source_ref)
            .bind(item.media_type.to_string())
            .bind(item.status.to_string())
            .bind(item.created_at)
            .bind(item.updated_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                    AppError::Conflict(format!("Item {} already exists", item.id))
                }
                other => db_error(other),
            })?;

        row_to_item(&row)
    }

    async fn get(&self, id: Uuid) -> Result<Option<MediaItem>, AppError> {
        let query = format!("SELECT {} FROM media_items WHERE id = $1", ITEM_COLUMNS);
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.as_ref().map(row_to_item).transpose()
    }

    #[tracing::instrument(skip(self), fields(
        db.system = "postgresql",
        db.table = "media_items",
        db.operation = "select"
    ))]
    async fn list_pending(&self, limit: usize) -> Result<Vec<MediaItem>, AppError> {
        self.list_by_status(MediaStatus::Pending, limit).await
    }

    async fn list_by_status(
        &self,
        status: MediaStatus,
        limit: usize,
    ) -> Result<Vec<MediaItem>, AppError> {
        let query = format!(
            r#"
            SELECT {}
            FROM media_items
            WHERE media_type = 'photo' AND status = $1
            ORDER BY created_at ASC, id ASC
            LIMIT $2
            "#,
            ITEM_COLUMNS
        );

        let rows = sqlx::query(&query)
            .bind(status.to_string())
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        rows.iter().map(row_to_item).collect()
    }

    #[tracing::instrument(skip(self, update), fields(
        db.system = "postgresql",
        db.table = "media_items",
        db.operation = "update",
        item_id = %id,
        status = %status
    ))]
    async fn update_status(
        &self,
        id: Uuid,
        status: MediaStatus,
        update: ItemUpdate,
    ) -> Result<MediaItem, AppError> {
        ensure_update_consistent(id, status, &update)?;

        let predecessors: Vec<String> = status
            .allowed_predecessors()
            .iter()
            .map(|s| s.to_string())
            .collect();
        let classification = update.classification.as_ref();

        let query = format!(
            r#"
            UPDATE media_items
            SET status = $2,
                processed_path = COALESCE($3, processed_path),
                processed_url = COALESCE($4, processed_url),
                ai_primary_label = COALESCE($5, ai_primary_label),
                ai_labels = COALESCE($6, ai_labels),
                ai_confidence = COALESCE($7, ai_confidence),
                ai_description = CASE WHEN $5::TEXT IS NULL THEN ai_description ELSE $8 END,
                attempts = attempts + CASE WHEN $2 = 'processing' THEN 1 ELSE 0 END,
                last_error = CASE
                    WHEN $2 = 'processed' THEN NULL
                    WHEN $2 = 'error' THEN $9
                    ELSE last_error
                END,
                processed_at = CASE
                    WHEN $2 = 'processed'
                        THEN GREATEST($10, COALESCE(processed_at + INTERVAL '1 microsecond', $10))
                    ELSE processed_at
                END,
                updated_at = GREATEST($10, updated_at + INTERVAL '1 microsecond')
            WHERE id = $1 AND status = ANY($11)
            RETURNING {}
            "#,
            ITEM_COLUMNS
        );

        let row = sqlx::query(&query)
            .bind(id)
            .bind(status.to_string())
            .bind(update.processed_path.as_deref())
            .bind(update.processed_url.as_deref())
            .bind(classification.map(|c| c.primary_label.as_str()))
            .bind(classification.map(|c| {
                c.labels
                    .iter()
                    .map(|l| l.as_str().to_string())
                    .collect::<Vec<_>>()
            }))
            .bind(classification.map(|c| c.confidence))
            .bind(classification.and_then(|c| c.description.as_deref()))
            .bind(update.last_error.as_deref())
            .bind(Utc::now())
            .bind(&predecessors)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        match row {
            Some(row) => row_to_item(&row),
            None => match self.get(id).await? {
                Some(current) => Err(AppError::Conflict(format!(
                    "Item {} cannot move from {} to {}",
                    id, current.status, status
                ))),
                None => Err(AppError::NotFound(format!("Item {} not found", id))),
            },
        }
    }

    async fn count_by_status(&self) -> Result<StatusCounts, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS count
            FROM media_items
            WHERE media_type = 'photo'
            GROUP BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let mut counts = StatusCounts::default();
        for row in &rows {
            let status = parse_column::<MediaStatus>(row, "status")?;
            let count: i64 = row.try_get("count").map_err(db_error)?;
            counts.add(status, count);
        }
        Ok(counts)
    }

    #[tracing::instrument(skip(self), fields(db.system = "postgresql", db.table = "media_items"))]
    async fn requeue_errors(&self) -> Result<u64, AppError> {
        self.move_all(MediaStatus::Error, MediaStatus::Pending).await
    }

    #[tracing::instrument(skip(self), fields(db.system = "postgresql", db.table = "media_items"))]
    async fn reset_processing(&self) -> Result<u64, AppError> {
        self.move_all(MediaStatus::Processing, MediaStatus::Pending)
            .await
    }
}
