use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use time::OffsetDateTime;

#[derive(Debug, Clone)]
/// Atomically record an event id as seen.
///
/// Returns `true` only for the caller that created the row.
pub struct InsertDedupRecord {
    pub id: String,
    pub first_seen_at: OffsetDateTime,
}

impl Processor<InsertDedupRecord> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:InsertDedupRecord")]
    async fn process(&self, cmd: InsertDedupRecord) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO dedup_records (id, first_seen_at)
            VALUES ($1, $2)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(cmd.id)
        .bind(cmd.first_seen_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[derive(Debug, Clone)]
pub struct ContainsDedupRecord {
    pub id: String,
}

impl Processor<ContainsDedupRecord> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ContainsDedupRecord")]
    async fn process(&self, query: ContainsDedupRecord) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM dedup_records WHERE id = $1)")
            .bind(query.id)
            .fetch_one(&self.pool)
            .await
    }
}

#[derive(Debug, Clone)]
/// Most recently admitted ids, newest first.
pub struct ListRecentDedupIds {
    pub limit: i64,
}

impl Processor<ListRecentDedupIds> for DatabaseProcessor {
    type Output = Vec<String>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListRecentDedupIds")]
    async fn process(&self, query: ListRecentDedupIds) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT id
            FROM dedup_records
            ORDER BY first_seen_at DESC
            LIMIT $1
            "#,
        )
        .bind(query.limit)
        .fetch_all(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
pub struct CountDedupRecords;

impl Processor<CountDedupRecords> for DatabaseProcessor {
    type Output = i64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:CountDedupRecords")]
    async fn process(&self, _: CountDedupRecords) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM dedup_records")
            .fetch_one(&self.pool)
            .await
    }
}

#[derive(Debug, Clone)]
/// Time bound of the retention sweep.
pub struct DeleteDedupRecordsBefore {
    pub cutoff: OffsetDateTime,
}

impl Processor<DeleteDedupRecordsBefore> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:DeleteDedupRecordsBefore")]
    async fn process(&self, cmd: DeleteDedupRecordsBefore) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM dedup_records WHERE first_seen_at < $1")
            .bind(cmd.cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Clone)]
/// Size bound of the retention sweep: keep only the newest `keep` rows.
pub struct TrimDedupRecords {
    pub keep: i64,
}

impl Processor<TrimDedupRecords> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:TrimDedupRecords")]
    async fn process(&self, cmd: TrimDedupRecords) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM dedup_records
            WHERE id IN (
                SELECT id
                FROM dedup_records
                ORDER BY first_seen_at DESC, id DESC
                OFFSET $1
            )
            "#,
        )
        .bind(cmd.keep)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
