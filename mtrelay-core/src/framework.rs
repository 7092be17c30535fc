use sqlx::PgPool;

/// Executes typed database commands against the shared pool.
///
/// Every command is a plain struct with a
/// `kanau::processor::Processor<Command> for DatabaseProcessor` impl in
/// [`crate::entities`].
#[derive(Clone)]
pub struct DatabaseProcessor {
    pub pool: PgPool,
}

impl DatabaseProcessor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn begin(&self) -> Result<sqlx::Transaction<'static, sqlx::Postgres>, sqlx::Error> {
        self.pool.begin().await
    }
}
