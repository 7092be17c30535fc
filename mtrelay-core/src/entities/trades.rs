use crate::entities::{TradeRole, TradeSide, TradeStatus};
use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use rust_decimal::Decimal;
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct TradeRecord {
    pub tx_hash: String,
    pub bot_pubkey: String,
    pub follower_pubkey: Option<String>,
    pub role: TradeRole,
    pub symbol: String,
    pub side: TradeSide,
    pub size: Decimal,
    pub price: Decimal,
    pub status: TradeStatus,
    pub pnl: Option<Decimal>,
    pub pnl_usd: Option<Decimal>,
    pub attempts: i32,
    pub credit_applied: bool,
    pub is_test: bool,
    pub created_at: OffsetDateTime,
}

/// Data for recording a new pending trade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTrade {
    pub tx_hash: String,
    pub bot_pubkey: String,
    pub follower_pubkey: Option<String>,
    pub role: TradeRole,
    pub symbol: String,
    pub side: TradeSide,
    pub size: Decimal,
    pub price: Decimal,
    pub is_test: bool,
}

impl NewTrade {
    /// Whether an already stored trade carries exactly this payload.
    pub fn matches(&self, record: &TradeRecord) -> bool {
        self.tx_hash == record.tx_hash
            && self.bot_pubkey == record.bot_pubkey
            && self.follower_pubkey == record.follower_pubkey
            && self.role == record.role
            && self.symbol == record.symbol
            && self.side == record.side
            && self.size == record.size
            && self.price == record.price
            && self.is_test == record.is_test
    }
}

impl From<TradeRecord> for mtrelay_sdk::objects::trades::TradeInfo {
    fn from(trade: TradeRecord) -> Self {
        Self {
            tx_hash: trade.tx_hash,
            bot_pubkey: trade.bot_pubkey,
            follower_pubkey: trade.follower_pubkey,
            role: trade.role.into(),
            symbol: trade.symbol,
            side: trade.side.into(),
            size: trade.size,
            price: trade.price,
            status: trade.status.into(),
            pnl: trade.pnl,
            pnl_usd: trade.pnl_usd,
            attempts: trade.attempts,
            credit_applied: trade.credit_applied,
            is_test: trade.is_test,
        }
    }
}

const TRADE_COLUMNS: &str = "tx_hash, bot_pubkey, follower_pubkey, role, symbol, side, size, price, \
     status, pnl, pnl_usd, attempts, credit_applied, is_test, created_at";

#[derive(Debug, Clone)]
/// Insert a pending trade unless its `tx_hash` is already recorded.
///
/// Returns `true` if a row was created.
pub struct InsertTrade {
    pub trade: NewTrade,
}

impl Processor<InsertTrade> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:InsertTrade")]
    async fn process(&self, cmd: InsertTrade) -> Result<bool, sqlx::Error> {
        let trade = cmd.trade;
        let result = sqlx::query(
            r#"
            INSERT INTO trades (tx_hash, bot_pubkey, follower_pubkey, role, symbol, side, size, price, is_test)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (tx_hash) DO NOTHING
            "#,
        )
        .bind(trade.tx_hash)
        .bind(trade.bot_pubkey)
        .bind(trade.follower_pubkey)
        .bind(trade.role)
        .bind(trade.symbol)
        .bind(trade.side)
        .bind(trade.size)
        .bind(trade.price)
        .bind(trade.is_test)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[derive(Debug, Clone)]
pub struct GetTrade {
    pub tx_hash: String,
}

impl Processor<GetTrade> for DatabaseProcessor {
    type Output = Option<TradeRecord>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetTrade")]
    async fn process(&self, query: GetTrade) -> Result<Option<TradeRecord>, sqlx::Error> {
        let sql = format!("SELECT {TRADE_COLUMNS} FROM trades WHERE tx_hash = $1");
        sqlx::query_as::<_, TradeRecord>(&sql)
            .bind(query.tx_hash)
            .fetch_optional(&self.pool)
            .await
    }
}

#[derive(Debug, Clone)]
/// Oldest pending trades first.
pub struct ListPendingTrades {
    pub limit: i64,
}

impl Processor<ListPendingTrades> for DatabaseProcessor {
    type Output = Vec<TradeRecord>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListPendingTrades")]
    async fn process(&self, query: ListPendingTrades) -> Result<Vec<TradeRecord>, sqlx::Error> {
        let sql = format!(
            "SELECT {TRADE_COLUMNS} FROM trades WHERE status = 'pending' \
             ORDER BY created_at ASC, tx_hash ASC LIMIT $1"
        );
        sqlx::query_as::<_, TradeRecord>(&sql)
            .bind(query.limit)
            .fetch_all(&self.pool)
            .await
    }
}

/// Result of counting one verification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow)]
pub struct AttemptOutcome {
    pub attempts: i32,
    pub status: TradeStatus,
}

#[derive(Debug, Clone)]
/// Count a verification attempt on a pending trade, moving it to `timeout`
/// once `max_attempts` is reached.
///
/// Returns `None` if the trade is no longer pending.
pub struct RecordTradeAttempt {
    pub tx_hash: String,
    pub max_attempts: i32,
}

impl Processor<RecordTradeAttempt> for DatabaseProcessor {
    type Output = Option<AttemptOutcome>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:RecordTradeAttempt")]
    async fn process(&self, cmd: RecordTradeAttempt) -> Result<Option<AttemptOutcome>, sqlx::Error> {
        sqlx::query_as::<_, AttemptOutcome>(
            r#"
            UPDATE trades
            SET attempts = attempts + 1,
                status = CASE
                    WHEN attempts + 1 >= $2 THEN 'timeout'::trade_status
                    ELSE status
                END,
                updated_at = now()
            WHERE tx_hash = $1 AND status = 'pending'
            RETURNING attempts, status
            "#,
        )
        .bind(cmd.tx_hash)
        .bind(cmd.max_attempts)
        .fetch_optional(&self.pool)
        .await
    }
}

impl TradeRecord {
    /// Move a pending trade to a terminal status within a transaction.
    ///
    /// Returns `false` if the trade was not pending, in which case nothing
    /// was written.
    pub async fn finalize_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        tx_hash: &str,
        status: TradeStatus,
        pnl: Option<Decimal>,
        pnl_usd: Option<Decimal>,
        credit_applied: bool,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE trades
            SET status = $2,
                pnl = COALESCE($3, pnl),
                pnl_usd = COALESCE($4, pnl_usd),
                credit_applied = $5,
                updated_at = now()
            WHERE tx_hash = $1 AND status = 'pending'
            "#,
        )
        .bind(tx_hash)
        .bind(status)
        .bind(pnl)
        .bind(pnl_usd)
        .bind(credit_applied)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
