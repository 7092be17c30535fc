//! RelayPool processor.
//!
//! The RelayPool is responsible for:
//! - Holding one websocket connection task per managed upstream source
//! - Subscribing with a `REQ` whose `kinds` filter is the allow-list
//! - Dropping frames of other kinds, malformed frames and forged ids
//! - Probing liveness and reconnecting with exponential backoff
//! - Stamping accepted events with a pool-wide sequence number and pushing
//!   them to the router through the ingest channel

use crate::config::RelayPoolConfig;
use crate::events::{IngestSender, IngestedEvent};
use crate::metrics::RelayMetrics;
use crate::utils::backoff::reconnect_delay;
use crate::utils::clock::unix_now;
use futures_util::{SinkExt, StreamExt};
use mtrelay_sdk::objects::relay::{ClientMessage, RelayMessage, SubscriptionFilter};
use mtrelay_sdk::objects::relays::{SourceInfo, SourceStatus};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("invalid relay url: {0}")]
    InvalidUrl(String),

    #[error("relay already managed: {0}")]
    AlreadyManaged(String),

    #[error("relay pool is full ({0} connections)")]
    CapacityReached(usize),

    #[error("relay not managed: {0}")]
    NotManaged(String),
}

/// Why a connection session ended with an error.
#[derive(Debug, Error)]
enum SessionError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("connect timed out")]
    ConnectTimeout,
    #[error("no frame within probe timeout")]
    ProbeTimeout,
    #[error("failed to encode subscription: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("closed by relay: {0}")]
    ClosedByRelay(String),
}

enum SessionEnd {
    Shutdown,
    /// The relay hung up, or the router is gone.
    Disconnected,
}

/// Validate and normalize a source url. Only `ws` and `wss` are accepted.
pub fn parse_source_url(raw: &str) -> Result<Url, PoolError> {
    let url = Url::parse(raw.trim()).map_err(|_| PoolError::InvalidUrl(raw.to_owned()))?;
    match url.scheme() {
        "ws" | "wss" if url.host_str().is_some() => Ok(url),
        _ => Err(PoolError::InvalidUrl(raw.to_owned())),
    }
}

// ---------------------------------------------------------------------------
// Per-source health
// ---------------------------------------------------------------------------

struct SourceHealth {
    url: Arc<str>,
    state: Mutex<HealthState>,
    events_received: AtomicU64,
}

struct HealthState {
    status: SourceStatus,
    consecutive_failures: u32,
    last_frame_at: Option<i64>,
}

impl SourceHealth {
    fn new(url: Arc<str>) -> Self {
        Self {
            url,
            state: Mutex::new(HealthState {
                status: SourceStatus::Connecting,
                consecutive_failures: 0,
                last_frame_at: None,
            }),
            events_received: AtomicU64::new(0),
        }
    }

    /// Subscribed. The failure count survives until the session delivers.
    fn mark_connected(&self) {
        self.state.lock().status = SourceStatus::Connected;
    }

    /// The session answered the subscription or passed a health check.
    fn mark_delivering(&self) {
        self.state.lock().consecutive_failures = 0;
    }

    /// Returns the new failure count.
    fn record_failure(&self, unhealthy_after: u32) -> u32 {
        let mut state = self.state.lock();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.status = if state.consecutive_failures >= unhealthy_after {
            SourceStatus::Unhealthy
        } else {
            SourceStatus::Connecting
        };
        state.consecutive_failures
    }

    fn touch(&self, at: i64) {
        self.state.lock().last_frame_at = Some(at);
    }

    fn is_forwarding(&self) -> bool {
        self.state.lock().status == SourceStatus::Connected
    }

    fn info(&self) -> SourceInfo {
        let state = self.state.lock();
        SourceInfo {
            url: self.url.to_string(),
            status: state.status,
            consecutive_failures: state.consecutive_failures,
            events_received: self.events_received.load(Ordering::Relaxed),
            last_frame_at: state.last_frame_at,
        }
    }
}

/// Keeps the connected gauge honest even when the task is aborted.
struct ConnectedGuard(Arc<RelayMetrics>);

impl ConnectedGuard {
    fn new(metrics: Arc<RelayMetrics>) -> Self {
        RelayMetrics::incr(&metrics.active_connections);
        Self(metrics)
    }
}

impl Drop for ConnectedGuard {
    fn drop(&mut self) {
        RelayMetrics::decr(&self.0.active_connections);
    }
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

/// State shared by every connection task.
struct ConnectionContext {
    config: RelayPoolConfig,
    allowed_kinds: HashSet<u16>,
    seq: AtomicU64,
    ingest_tx: IngestSender,
    metrics: Arc<RelayMetrics>,
    shutdown_rx: watch::Receiver<bool>,
}

struct ManagedSource {
    health: Arc<SourceHealth>,
    handle: JoinHandle<()>,
}

/// Manages the set of upstream connections.
#[derive(Clone)]
pub struct RelayPool {
    ctx: Arc<ConnectionContext>,
    sources: Arc<Mutex<HashMap<String, ManagedSource>>>,
}

impl RelayPool {
    pub fn new(
        config: RelayPoolConfig,
        ingest_tx: IngestSender,
        metrics: Arc<RelayMetrics>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        let allowed_kinds = config.allowed_kinds.iter().copied().collect();
        Self {
            ctx: Arc::new(ConnectionContext {
                config,
                allowed_kinds,
                seq: AtomicU64::new(0),
                ingest_tx,
                metrics,
                shutdown_rx,
            }),
            sources: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Dial every bootstrap source. Individual failures are logged.
    pub fn start(&self) {
        let bootstrap = self.ctx.config.bootstrap.clone();
        for url in bootstrap {
            if let Err(e) = self.add_source(url.as_str()) {
                warn!(url = %url, error = %e, "Skipping bootstrap relay");
            }
        }
        info!(sources = self.sources.lock().len(), "RelayPool started");
    }

    pub fn add_source(&self, raw_url: &str) -> Result<(), PoolError> {
        let url = parse_source_url(raw_url)?;
        let key = url.to_string();

        let mut sources = self.sources.lock();
        if sources.contains_key(&key) {
            return Err(PoolError::AlreadyManaged(key));
        }
        if sources.len() >= self.ctx.config.max_connections {
            return Err(PoolError::CapacityReached(self.ctx.config.max_connections));
        }

        let health = Arc::new(SourceHealth::new(Arc::from(key.as_str())));
        let handle = tokio::spawn(run_source(self.ctx.clone(), health.clone(), url));
        sources.insert(key.clone(), ManagedSource { health, handle });
        info!(url = %key, "Relay source added");
        Ok(())
    }

    pub fn remove_source(&self, raw_url: &str) -> Result<(), PoolError> {
        let key = parse_source_url(raw_url)
            .map_err(|_| PoolError::NotManaged(raw_url.to_owned()))?
            .to_string();
        let removed = self
            .sources
            .lock()
            .remove(&key)
            .ok_or_else(|| PoolError::NotManaged(key.clone()))?;
        removed.handle.abort();
        info!(url = %key, "Relay source removed");
        Ok(())
    }

    /// Status of every managed source, ordered by url.
    pub fn statuses(&self) -> Vec<SourceInfo> {
        let mut infos: Vec<SourceInfo> = self
            .sources
            .lock()
            .values()
            .map(|source| source.health.info())
            .collect();
        infos.sort_by(|a, b| a.url.cmp(&b.url));
        infos
    }

    pub fn healthy_sources(&self) -> Vec<String> {
        self.statuses()
            .into_iter()
            .filter(|info| info.status == SourceStatus::Connected)
            .map(|info| info.url)
            .collect()
    }

    pub fn active_connections(&self) -> usize {
        self.healthy_sources().len()
    }

    /// Abort every connection task.
    pub fn stop(&self) {
        for (_, source) in self.sources.lock().drain() {
            source.handle.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Connection task
// ---------------------------------------------------------------------------

async fn run_source(ctx: Arc<ConnectionContext>, health: Arc<SourceHealth>, url: Url) {
    let mut shutdown_rx = ctx.shutdown_rx.clone();
    loop {
        if *shutdown_rx.borrow() {
            return;
        }

        let failures = match run_session(&ctx, &health, &url).await {
            Ok(SessionEnd::Shutdown) => return,
            Ok(SessionEnd::Disconnected) => {
                let failures = health.record_failure(ctx.config.unhealthy_after);
                info!(url = %url, failures, "Relay disconnected");
                failures
            }
            Err(e) => {
                let failures = health.record_failure(ctx.config.unhealthy_after);
                warn!(url = %url, error = %e, failures, "Relay session failed");
                failures
            }
        };

        let delay = reconnect_delay(failures, ctx.config.max_backoff);
        tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                // A dropped sender also means shutdown.
                if changed.is_err() || *shutdown_rx.borrow() {
                    return;
                }
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn run_session(
    ctx: &ConnectionContext,
    health: &SourceHealth,
    url: &Url,
) -> Result<SessionEnd, SessionError> {
    let mut shutdown_rx = ctx.shutdown_rx.clone();
    let (ws, _) = tokio::time::timeout(
        ctx.config.connect_timeout,
        tokio_tungstenite::connect_async(url.as_str()),
    )
    .await
    .map_err(|_| SessionError::ConnectTimeout)??;
    let (mut sink, mut stream) = ws.split();

    let subscription_id = uuid::Uuid::new_v4().to_string();
    let req = ClientMessage::Req {
        subscription_id: subscription_id.clone(),
        filter: SubscriptionFilter {
            kinds: ctx.config.allowed_kinds.clone(),
            ..Default::default()
        },
    };
    sink.send(Message::Text(req.to_json()?)).await?;

    health.mark_connected();
    health.touch(unix_now());
    let _connected = ConnectedGuard::new(ctx.metrics.clone());
    info!(url = %url, subscription_id = %subscription_id, "Relay subscribed");

    let mut last_frame = Instant::now();
    let mut probe = tokio::time::interval_at(
        Instant::now() + ctx.config.health_check_interval,
        ctx.config.health_check_interval,
    );

    loop {
        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                // A dropped sender also means shutdown.
                if changed.is_err() || *shutdown_rx.borrow() {
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(SessionEnd::Shutdown);
                }
            }

            _ = probe.tick() => {
                if last_frame.elapsed() > ctx.config.probe_timeout {
                    return Err(SessionError::ProbeTimeout);
                }
                health.mark_delivering();
                sink.send(Message::Ping(Vec::new())).await?;
            }

            frame = stream.next() => {
                let Some(frame) = frame else {
                    return Ok(SessionEnd::Disconnected);
                };
                let message = frame?;
                last_frame = Instant::now();
                health.touch(unix_now());
                match message {
                    Message::Text(text) => {
                        if let Some(end) = handle_text(ctx, health, &text).await? {
                            return Ok(end);
                        }
                    }
                    Message::Close(_) => return Ok(SessionEnd::Disconnected),
                    // Pongs only refresh liveness. Pings are answered by tungstenite.
                    _ => {}
                }
            }
        }
    }
}

/// Returns `Some` when the session should end.
async fn handle_text(
    ctx: &ConnectionContext,
    health: &SourceHealth,
    text: &str,
) -> Result<Option<SessionEnd>, SessionError> {
    let message = match RelayMessage::parse(text) {
        Ok(message) => message,
        Err(e) => {
            RelayMetrics::incr(&ctx.metrics.malformed_frames);
            debug!(url = %health.url, error = %e, "Skipping malformed frame");
            return Ok(None);
        }
    };

    if !matches!(message, RelayMessage::Closed { .. }) {
        health.mark_delivering();
    }

    match message {
        RelayMessage::Event { event, .. } => {
            RelayMetrics::incr(&ctx.metrics.events_received);
            health.events_received.fetch_add(1, Ordering::Relaxed);

            if !ctx.allowed_kinds.contains(&event.kind) {
                RelayMetrics::incr(&ctx.metrics.events_filtered);
                return Ok(None);
            }
            if ctx.config.verify_ids && !event.has_valid_id() {
                RelayMetrics::incr(&ctx.metrics.malformed_frames);
                debug!(url = %health.url, id = %event.id, "Dropping event with forged id");
                return Ok(None);
            }
            if !health.is_forwarding() {
                return Ok(None);
            }

            let ingested = IngestedEvent {
                seq: ctx.seq.fetch_add(1, Ordering::Relaxed),
                source: health.url.clone(),
                event: Arc::from(event),
            };
            if ctx.ingest_tx.send(ingested).await.is_err() {
                warn!(url = %health.url, "Ingest channel closed");
                return Ok(Some(SessionEnd::Shutdown));
            }
            Ok(None)
        }
        RelayMessage::Closed { message, .. } => Err(SessionError::ClosedByRelay(message)),
        RelayMessage::Notice { message } => {
            debug!(url = %health.url, notice = %message, "Relay notice");
            Ok(None)
        }
        RelayMessage::EndOfStoredEvents { .. } | RelayMessage::Ok { .. } => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ingest_channel;
    use mtrelay_sdk::objects::event::{Event, EventKind};
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn signed_event(kind: u16, created_at: i64) -> Event {
        let mut event = Event {
            id: String::new(),
            author_key: "ab".repeat(32),
            created_at,
            kind,
            tags: Vec::new(),
            payload: "hello".to_string(),
            signature: "00".repeat(64),
        };
        event.id = event.compute_id();
        event
    }

    fn test_config(max_connections: usize) -> RelayPoolConfig {
        RelayPoolConfig {
            max_connections,
            health_check_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(5),
            max_backoff: Duration::from_secs(1),
            unhealthy_after: 1,
            ..Default::default()
        }
    }

    async fn closed_port_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        format!("ws://127.0.0.1:{port}")
    }

    #[test]
    fn test_url_validation() {
        assert!(parse_source_url("wss://relay.example.com").is_ok());
        assert!(parse_source_url("ws://127.0.0.1:7000/path").is_ok());
        assert!(matches!(
            parse_source_url("https://relay.example.com"),
            Err(PoolError::InvalidUrl(_))
        ));
        assert!(matches!(parse_source_url("not a url"), Err(PoolError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_add_remove_errors() {
        let (tx, _rx) = ingest_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let pool = RelayPool::new(test_config(1), tx, Arc::new(RelayMetrics::default()), shutdown_rx);

        let url = closed_port_url().await;
        pool.add_source(&url).unwrap();
        assert_eq!(
            pool.add_source(&url),
            Err(PoolError::AlreadyManaged(parse_source_url(&url).unwrap().to_string()))
        );
        assert_eq!(
            pool.add_source("ws://127.0.0.1:9/other"),
            Err(PoolError::CapacityReached(1))
        );
        assert!(matches!(
            pool.add_source("http://example.com"),
            Err(PoolError::InvalidUrl(_))
        ));

        pool.remove_source(&url).unwrap();
        assert!(matches!(pool.remove_source(&url), Err(PoolError::NotManaged(_))));
        assert!(pool.statuses().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_source_turns_unhealthy() {
        let (tx, _rx) = ingest_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let pool = RelayPool::new(test_config(4), tx, Arc::new(RelayMetrics::default()), shutdown_rx);
        pool.add_source(&closed_port_url().await).unwrap();

        let mut status = SourceStatus::Connecting;
        for _ in 0..100 {
            status = pool.statuses()[0].status;
            if status == SourceStatus::Unhealthy {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(status, SourceStatus::Unhealthy);
        // Still managed, just not healthy.
        assert_eq!(pool.statuses().len(), 1);
        assert!(pool.healthy_sources().is_empty());
        pool.stop();
    }

    #[tokio::test]
    async fn test_accept_then_hang_up_keeps_counting_failures() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                // Read the REQ, then hang up without answering.
                let _ = ws.next().await;
                let _ = ws.close(None).await;
            }
        });

        let (tx, _rx) = ingest_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let config = RelayPoolConfig {
            unhealthy_after: 3,
            max_backoff: Duration::from_millis(10),
            ..test_config(4)
        };
        let pool = RelayPool::new(config, tx, Arc::new(RelayMetrics::default()), shutdown_rx);
        pool.add_source(&format!("ws://{addr}")).unwrap();

        let mut failures = 0;
        for _ in 0..250 {
            failures = pool.statuses()[0].consecutive_failures;
            if failures >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(failures >= 3, "failures reset on every handshake: {failures}");
        pool.stop();
        server.abort();
    }

    #[tokio::test]
    async fn test_ingests_only_allowed_valid_events() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

            let req = ws.next().await.unwrap().unwrap().into_text().unwrap();
            let value: serde_json::Value = serde_json::from_str(&req).unwrap();
            assert_eq!(value[0], "REQ");
            let sub_id = value[1].as_str().unwrap().to_string();
            assert_eq!(value[2]["kinds"][0], EventKind::TRADE_SIGNAL);

            let allowed = signed_event(EventKind::TRADE_SIGNAL, 1);
            let disallowed = signed_event(1, 2);
            let mut forged = signed_event(EventKind::HEARTBEAT, 3);
            forged.id = "ff".repeat(32);

            for event in [&disallowed, &forged, &allowed] {
                let frame = serde_json::json!(["EVENT", sub_id, event]).to_string();
                ws.send(Message::Text(frame)).await.unwrap();
            }
            ws.send(Message::Text("garbage".to_string())).await.unwrap();
            ws.send(Message::Text(format!(r#"["EOSE","{sub_id}"]"#))).await.unwrap();
            // Hold the connection open until the client goes away.
            while let Some(Ok(_)) = ws.next().await {}
            allowed.id
        });

        let metrics = Arc::new(RelayMetrics::default());
        let (tx, mut rx) = ingest_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pool = RelayPool::new(test_config(4), tx, metrics.clone(), shutdown_rx);
        pool.add_source(&format!("ws://{addr}")).unwrap();

        let ingested = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ingested.seq, 0);
        assert_eq!(ingested.event.kind, EventKind::TRADE_SIGNAL);
        assert_eq!(pool.healthy_sources().len(), 1);

        shutdown_tx.send(true).unwrap();
        let allowed_id = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ingested.event.id, allowed_id);

        let summary = metrics.summary();
        assert_eq!(summary.events_received_total, 3);
        assert_eq!(summary.events_filtered_total, 1);
        assert!(summary.malformed_frames_total >= 1);
    }
}
