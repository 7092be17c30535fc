use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Subscription {
    pub bot_pubkey: String,
    pub follower_pubkey: String,
    /// Opaque key material, only ever handed to the payload sealer or the
    /// follower signature check.
    pub shared_secret: String,
}

#[derive(Debug, Clone)]
/// Insert or replace a subscription, only if the bot exists.
///
/// Returns the number of rows written: `0` means the bot is unknown.
pub struct UpsertSubscription {
    pub subscription: Subscription,
}

impl Processor<UpsertSubscription> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:UpsertSubscription")]
    async fn process(&self, cmd: UpsertSubscription) -> Result<u64, sqlx::Error> {
        let Subscription {
            bot_pubkey,
            follower_pubkey,
            shared_secret,
        } = cmd.subscription;
        let result = sqlx::query(
            r#"
            INSERT INTO subscriptions (bot_pubkey, follower_pubkey, shared_secret)
            SELECT b.bot_pubkey, $2, $3
            FROM bots b
            WHERE b.bot_pubkey = $1
            ON CONFLICT (bot_pubkey, follower_pubkey) DO UPDATE
            SET shared_secret = EXCLUDED.shared_secret
            "#,
        )
        .bind(bot_pubkey)
        .bind(follower_pubkey)
        .bind(shared_secret)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Clone)]
/// All followers of a bot, ordered by follower key.
pub struct ListSubscriptions {
    pub bot_pubkey: String,
}

impl Processor<ListSubscriptions> for DatabaseProcessor {
    type Output = Vec<Subscription>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListSubscriptions")]
    async fn process(&self, query: ListSubscriptions) -> Result<Vec<Subscription>, sqlx::Error> {
        sqlx::query_as::<_, Subscription>(
            r#"
            SELECT bot_pubkey, follower_pubkey, shared_secret
            FROM subscriptions
            WHERE bot_pubkey = $1
            ORDER BY follower_pubkey ASC
            "#,
        )
        .bind(query.bot_pubkey)
        .fetch_all(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Every secret a follower registered, across all bots.
pub struct ListFollowerSecrets {
    pub follower_pubkey: String,
}

impl Processor<ListFollowerSecrets> for DatabaseProcessor {
    type Output = Vec<String>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListFollowerSecrets")]
    async fn process(&self, query: ListFollowerSecrets) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT shared_secret
            FROM subscriptions
            WHERE follower_pubkey = $1
            ORDER BY bot_pubkey ASC
            "#,
        )
        .bind(query.follower_pubkey)
        .fetch_all(&self.pool)
        .await
    }
}
