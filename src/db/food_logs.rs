use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::models::daily_log::{date_key, DailyLog};
use crate::storage::remote::{owner_of, RemoteError, RemoteResult, RemoteStore};

/// Postgres-backed remote store. One JSONB document per `(user_id, log_date)`;
/// id, owner, date and timestamps live in columns and are authoritative.
/// `created_at` is written once on insert and never touched by updates.
#[derive(Clone)]
pub struct PgRemoteStore {
    db: PgPool,
}

#[derive(Debug, FromRow)]
struct FoodLogRow {
    id: Uuid,
    user_id: String,
    log_date: NaiveDate,
    doc: Json<Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl FoodLogRow {
    fn into_document(self) -> Value {
        let mut doc = self.doc.0;
        if let Some(obj) = doc.as_object_mut() {
            obj.insert("id".into(), Value::String(self.id.to_string()));
            obj.insert("userId".into(), Value::String(self.user_id));
            obj.insert("date".into(), Value::String(date_key(self.log_date)));
            obj.insert(
                "createdAt".into(),
                serde_json::to_value(self.created_at).unwrap_or(Value::Null),
            );
            obj.insert(
                "updatedAt".into(),
                serde_json::to_value(self.updated_at).unwrap_or(Value::Null),
            );
        }
        doc
    }

    fn into_log(self) -> RemoteResult<DailyLog> {
        serde_json::from_value(self.into_document())
            .map_err(|e| RemoteError::Other(format!("stored document unreadable: {e}")))
    }
}

/// Map a driver error onto the remote taxonomy. Schema and index problems are
/// kept apart so the user is told to refresh or contact support.
pub fn classify(err: sqlx::Error) -> RemoteError {
    match &err {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            // undefined_table, undefined_column, undefined_object,
            // invalid_column_reference, undefined_function
            Some("42P01" | "42703" | "42704" | "42P10" | "42883") => {
                RemoteError::IndexConfiguration(db.message().to_string())
            }
            // insufficient_privilege, invalid auth
            Some("42501" | "28000" | "28P01") => RemoteError::Permission(db.message().to_string()),
            _ => RemoteError::Other(err.to_string()),
        },
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => RemoteError::Network(err.to_string()),
        sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Migrate(_) => RemoteError::IndexConfiguration(err.to_string()),
        sqlx::Error::RowNotFound => RemoteError::NotFound(err.to_string()),
        _ => RemoteError::Other(err.to_string()),
    }
}

impl PgRemoteStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn insert_or_replace(
        &self,
        user_id: &str,
        log: &DailyLog,
        doc: &Value,
    ) -> RemoteResult<DailyLog> {
        let row = sqlx::query_as::<_, FoodLogRow>(
            r#"
            INSERT INTO food_logs (id, user_id, log_date, doc, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id, log_date) DO UPDATE SET
                doc = EXCLUDED.doc,
                updated_at = EXCLUDED.updated_at
            WHERE food_logs.updated_at <= EXCLUDED.updated_at
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(log.date)
        .bind(Json(doc))
        .bind(log.created_at)
        .bind(log.updated_at)
        .fetch_optional(&self.db)
        .await
        .map_err(classify)?;

        match row {
            Some(row) => row.into_log(),
            None => Err(RemoteError::Stale(date_key(log.date))),
        }
    }
}

#[async_trait]
impl RemoteStore for PgRemoteStore {
    async fn get_by_date(&self, user_id: &str, date: NaiveDate) -> RemoteResult<Option<Value>> {
        let row = sqlx::query_as::<_, FoodLogRow>(
            "SELECT * FROM food_logs WHERE user_id = $1 AND log_date = $2",
        )
        .bind(user_id)
        .bind(date)
        .fetch_optional(&self.db)
        .await
        .map_err(classify)?;

        Ok(row.map(FoodLogRow::into_document))
    }

    async fn get_range(
        &self,
        user_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> RemoteResult<Vec<Value>> {
        let rows = sqlx::query_as::<_, FoodLogRow>(
            r#"
            SELECT * FROM food_logs
            WHERE user_id = $1 AND log_date BETWEEN $2 AND $3
            ORDER BY log_date ASC
            "#,
        )
        .bind(user_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.db)
        .await
        .map_err(classify)?;

        Ok(rows.into_iter().map(FoodLogRow::into_document).collect())
    }

    async fn get_recent(&self, user_id: &str, limit: usize) -> RemoteResult<Vec<Value>> {
        let rows = sqlx::query_as::<_, FoodLogRow>(
            r#"
            SELECT * FROM food_logs
            WHERE user_id = $1
            ORDER BY log_date DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.db)
        .await
        .map_err(classify)?;

        Ok(rows.into_iter().map(FoodLogRow::into_document).collect())
    }

    async fn get_all(&self, user_id: &str) -> RemoteResult<Vec<Value>> {
        let rows = sqlx::query_as::<_, FoodLogRow>(
            "SELECT * FROM food_logs WHERE user_id = $1 ORDER BY log_date ASC",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await
        .map_err(classify)?;

        Ok(rows.into_iter().map(FoodLogRow::into_document).collect())
    }

    async fn upsert(&self, log: &DailyLog) -> RemoteResult<DailyLog> {
        let user_id = owner_of(log)?;
        let doc = serde_json::to_value(log).map_err(|e| RemoteError::Other(e.to_string()))?;

        let Some(id) = log.id else {
            return self.insert_or_replace(user_id, log, &doc).await;
        };

        let row = sqlx::query_as::<_, FoodLogRow>(
            r#"
            UPDATE food_logs SET doc = $3, updated_at = $4
            WHERE id = $1 AND user_id = $2 AND updated_at <= $4
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(Json(&doc))
        .bind(log.updated_at)
        .fetch_optional(&self.db)
        .await
        .map_err(classify)?;

        if let Some(row) = row {
            return row.into_log();
        }

        let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM food_logs WHERE id = $1")
            .bind(id)
            .fetch_one(&self.db)
            .await
            .map_err(classify)?;
        if exists > 0 {
            return Err(RemoteError::Stale(date_key(log.date)));
        }

        // Deleted remotely since we last saw it: write it back.
        tracing::info!(id = %id, date = %log.date, "Remote document vanished; recreating");
        self.insert_or_replace(user_id, log, &doc).await
    }

    async fn delete(&self, id: Uuid) -> RemoteResult<()> {
        let result = sqlx::query("DELETE FROM food_logs WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .map_err(classify)?;

        if result.rows_affected() == 0 {
            return Err(RemoteError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn ping(&self) -> RemoteResult<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.db)
            .await
            .map(|_| ())
            .map_err(classify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_driver_errors() {
        assert!(matches!(classify(sqlx::Error::PoolTimedOut), RemoteError::Network(_)));
        assert!(classify(sqlx::Error::ColumnNotFound("doc".into())).is_configuration());
        assert!(matches!(classify(sqlx::Error::RowNotFound), RemoteError::NotFound(_)));
    }

    #[test]
    fn test_row_columns_override_document() {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let row = FoodLogRow {
            id,
            user_id: "u1".into(),
            log_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            doc: Json(serde_json::json!({ "date": "1999-01-01", "sleepQuality": 4 })),
            created_at: now,
            updated_at: now,
        };
        let doc = row.into_document();
        assert_eq!(doc["date"], "2024-03-01");
        assert_eq!(doc["id"], id.to_string());
        assert_eq!(doc["userId"], "u1");
        assert_eq!(doc["sleepQuality"], 4);
    }
}
