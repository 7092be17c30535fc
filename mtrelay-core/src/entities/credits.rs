use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use rust_decimal::Decimal;

/// Accumulated credit of one `(bot, follower)` pair.
///
/// A leader's own credit has `follower_pubkey = None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditEntry {
    pub bot_pubkey: String,
    pub follower_pubkey: Option<String>,
    pub credits: Decimal,
}

/// One credit issuance, keyed by the trade that earned it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditGrant {
    pub tx_hash: String,
    pub bot_pubkey: String,
    pub follower_pubkey: Option<String>,
    pub amount: Decimal,
}

#[derive(sqlx::FromRow)]
struct CreditRow {
    bot_pubkey: String,
    follower_pubkey: String,
    credits: Decimal,
}

impl From<CreditRow> for CreditEntry {
    fn from(row: CreditRow) -> Self {
        Self {
            bot_pubkey: row.bot_pubkey,
            follower_pubkey: (!row.follower_pubkey.is_empty()).then_some(row.follower_pubkey),
            credits: row.credits,
        }
    }
}

impl From<CreditEntry> for mtrelay_sdk::objects::trades::CreditItem {
    fn from(entry: CreditEntry) -> Self {
        Self {
            bot_pubkey: entry.bot_pubkey,
            follower_pubkey: entry.follower_pubkey,
            credits: entry.credits,
        }
    }
}

#[derive(Debug, Clone, Default)]
/// Credit balances, optionally filtered by bot and/or follower, largest first.
pub struct ListCredits {
    pub bot_pubkey: Option<String>,
    pub follower_pubkey: Option<String>,
}

impl Processor<ListCredits> for DatabaseProcessor {
    type Output = Vec<CreditEntry>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListCredits")]
    async fn process(&self, query: ListCredits) -> Result<Vec<CreditEntry>, sqlx::Error> {
        let rows = sqlx::query_as::<_, CreditRow>(
            r#"
            SELECT bot_pubkey, follower_pubkey, credits
            FROM credits
            WHERE ($1::text IS NULL OR bot_pubkey = $1)
              AND ($2::text IS NULL OR follower_pubkey = $2)
            ORDER BY credits DESC, bot_pubkey ASC, follower_pubkey ASC
            "#,
        )
        .bind(query.bot_pubkey)
        .bind(query.follower_pubkey)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(CreditEntry::from).collect())
    }
}

impl CreditGrant {
    /// Record the grant marker. Returns `false` if this `tx_hash` was
    /// already credited.
    pub async fn insert_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO credit_grants (tx_hash, bot_pubkey, follower_pubkey, amount)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (tx_hash) DO NOTHING
            "#,
        )
        .bind(&self.tx_hash)
        .bind(&self.bot_pubkey)
        .bind(self.follower_pubkey.as_deref().unwrap_or_default())
        .bind(self.amount)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Add the grant amount to the recipient's balance.
    pub async fn apply_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO credits (bot_pubkey, follower_pubkey, credits)
            VALUES ($1, $2, $3)
            ON CONFLICT (bot_pubkey, follower_pubkey) DO UPDATE
            SET credits = credits.credits + EXCLUDED.credits,
                updated_at = now()
            "#,
        )
        .bind(&self.bot_pubkey)
        .bind(self.follower_pubkey.as_deref().unwrap_or_default())
        .bind(self.amount)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}
