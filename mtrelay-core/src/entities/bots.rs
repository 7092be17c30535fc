use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Bot {
    pub bot_pubkey: String,
    pub nostr_pubkey: String,
    pub eth_address: String,
    pub name: String,
    pub last_seen_at: Option<OffsetDateTime>,
}

/// Fields supplied on registration. `last_seen_at` is owned by heartbeats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBot {
    pub bot_pubkey: String,
    pub nostr_pubkey: String,
    pub eth_address: String,
    pub name: String,
}

impl From<Bot> for mtrelay_sdk::objects::registry::BotInfo {
    fn from(bot: Bot) -> Self {
        Self {
            bot_pubkey: bot.bot_pubkey,
            nostr_pubkey: bot.nostr_pubkey,
            eth_address: bot.eth_address,
            name: bot.name,
            last_seen_at: bot.last_seen_at.map(OffsetDateTime::unix_timestamp),
        }
    }
}

#[derive(Debug, Clone)]
/// Insert a bot or overwrite its registration fields.
pub struct UpsertBot {
    pub bot: NewBot,
}

impl Processor<UpsertBot> for DatabaseProcessor {
    type Output = Bot;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:UpsertBot")]
    async fn process(&self, cmd: UpsertBot) -> Result<Bot, sqlx::Error> {
        let NewBot {
            bot_pubkey,
            nostr_pubkey,
            eth_address,
            name,
        } = cmd.bot;
        sqlx::query_as::<_, Bot>(
            r#"
            INSERT INTO bots (bot_pubkey, nostr_pubkey, eth_address, name)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (bot_pubkey) DO UPDATE
            SET nostr_pubkey = EXCLUDED.nostr_pubkey,
                eth_address = EXCLUDED.eth_address,
                name = EXCLUDED.name,
                updated_at = now()
            RETURNING bot_pubkey, nostr_pubkey, eth_address, name, last_seen_at
            "#,
        )
        .bind(bot_pubkey)
        .bind(nostr_pubkey)
        .bind(eth_address)
        .bind(name)
        .fetch_one(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
pub struct GetBot {
    pub bot_pubkey: String,
}

impl Processor<GetBot> for DatabaseProcessor {
    type Output = Option<Bot>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetBot")]
    async fn process(&self, query: GetBot) -> Result<Option<Bot>, sqlx::Error> {
        sqlx::query_as::<_, Bot>(
            r#"
            SELECT bot_pubkey, nostr_pubkey, eth_address, name, last_seen_at
            FROM bots
            WHERE bot_pubkey = $1
            "#,
        )
        .bind(query.bot_pubkey)
        .fetch_optional(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Resolve the bot that authored an event.
///
/// Matches on `nostr_pubkey` first, then on `bot_pubkey`.
pub struct FindBotByAuthor {
    pub author_key: String,
}

impl Processor<FindBotByAuthor> for DatabaseProcessor {
    type Output = Option<Bot>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:FindBotByAuthor")]
    async fn process(&self, query: FindBotByAuthor) -> Result<Option<Bot>, sqlx::Error> {
        sqlx::query_as::<_, Bot>(
            r#"
            SELECT bot_pubkey, nostr_pubkey, eth_address, name, last_seen_at
            FROM bots
            WHERE nostr_pubkey = $1 OR bot_pubkey = $1
            ORDER BY (nostr_pubkey = $1) DESC, bot_pubkey ASC
            LIMIT 1
            "#,
        )
        .bind(query.author_key)
        .fetch_optional(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Refresh `last_seen_at` unless it is already newer than `not_before`.
///
/// Returns `true` if the row was updated.
pub struct TouchBot {
    pub bot_pubkey: String,
    pub seen_at: OffsetDateTime,
    pub not_before: OffsetDateTime,
}

impl Processor<TouchBot> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:TouchBot")]
    async fn process(&self, cmd: TouchBot) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE bots
            SET last_seen_at = $2
            WHERE bot_pubkey = $1
              AND (last_seen_at IS NULL OR last_seen_at < $3)
            "#,
        )
        .bind(cmd.bot_pubkey)
        .bind(cmd.seen_at)
        .bind(cmd.not_before)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
