use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use mtrelay_core::hub::StreamSubscription;
use mtrelay_sdk::objects::stream::StreamMessage;

use super::extractors::FollowerAuth;
use crate::state::AppState;

/// `GET /ws` — every admitted event.
pub async fn global_feed(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        let subscription = state.hub.subscribe_global();
        tracing::debug!("Global feed client connected");
        pump(socket, subscription)
    })
}

/// `GET /ws/fanout` — sealed payloads addressed to the authenticated follower.
///
/// The signature is checked before the upgrade, so a bad signature gets a
/// plain HTTP error.
pub async fn follower_fanout(
    State(state): State<AppState>,
    FollowerAuth(follower): FollowerAuth,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        let subscription = state.hub.subscribe_follower(&follower);
        tracing::debug!(follower = %follower, "Fanout client connected");
        pump(socket, subscription)
    })
}

/// Forward hub frames until either side goes away. Client frames are ignored.
async fn pump(mut socket: WebSocket, mut subscription: StreamSubscription) {
    loop {
        tokio::select! {
            next = subscription.recv() => {
                let Some(message) = next else {
                    // Hub closed the connection.
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                };
                if send_json(&mut socket, &message).await.is_err() {
                    break;
                }
            }

            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
    tracing::debug!(follower = ?subscription.follower(), "Stream client disconnected");
}

/// Serialize `message` as JSON and send it as a text frame.
///
/// Returns `Err(())` if the send fails (client disconnected).
async fn send_json(socket: &mut WebSocket, message: &StreamMessage) -> Result<(), ()> {
    let json = serde_json::to_string(message).map_err(|e| {
        tracing::error!(error = %e, "Failed to encode stream frame");
    })?;
    socket
        .send(Message::Text(json.into()))
        .await
        .map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use crate::api::testing::{app, register_bot, state};
    use crate::state::AppState;
    use futures_util::StreamExt;
    use mtrelay_core::entities::subscriptions::Subscription;
    use mtrelay_sdk::objects::event::Event;
    use mtrelay_sdk::objects::stream::{FanoutMessage, StreamMessage};
    use mtrelay_sdk::signature::{FOLLOWER_HEADER, SIGNATURE_HEADER, sign_follower};
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::{self, client::IntoClientRequest};

    async fn serve(state: AppState) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = app(state);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    async fn next_frame<S>(stream: &mut S) -> StreamMessage
    where
        S: futures_util::Stream<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
    {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), stream.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            if let tungstenite::Message::Text(text) = frame {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    /// Wait until the upgraded connection registered with the hub.
    async fn wait_for_connections(state: &AppState, n: usize) {
        for _ in 0..100 {
            if state.hub.connection_count() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("stream client never registered");
    }

    fn event() -> Event {
        let mut event = Event {
            id: String::new(),
            author_key: "nostr-bot-1".to_string(),
            created_at: 1_700_000_000,
            kind: 30931,
            tags: vec![],
            payload: "{}".to_string(),
            signature: "sig".to_string(),
        };
        event.id = event.compute_id();
        event
    }

    #[tokio::test]
    async fn test_global_feed_streams_events() {
        let state = state(false);
        let addr = serve(state.clone()).await;
        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
            .await
            .unwrap();
        wait_for_connections(&state, 1).await;

        let event = event();
        assert_eq!(state.hub.publish_event(&event), 1);
        assert_eq!(next_frame(&mut ws).await, StreamMessage::Event { event });
    }

    #[tokio::test]
    async fn test_fanout_stream_is_per_follower() {
        let state = state(false);
        let addr = serve(state.clone()).await;
        register_bot(&app(state.clone()), "bot-1").await;
        state
            .stores
            .registry
            .add_subscription(Subscription {
                bot_pubkey: "bot-1".to_string(),
                follower_pubkey: "f1".to_string(),
                shared_secret: "secret-1".to_string(),
            })
            .await
            .unwrap();

        let mut request = format!("ws://{addr}/ws/fanout").into_client_request().unwrap();
        request
            .headers_mut()
            .insert(FOLLOWER_HEADER, "f1".parse().unwrap());
        request.headers_mut().insert(
            SIGNATURE_HEADER,
            sign_follower("f1", b"secret-1").parse().unwrap(),
        );
        let (mut ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();
        wait_for_connections(&state, 1).await;

        let message_for = |follower: &str| FanoutMessage {
            bot_pubkey: "bot-1".to_string(),
            follower_pubkey: follower.to_string(),
            event_id: "id".to_string(),
            kind: 30931,
            created_at: 1,
            sealed_payload: "AAAA".to_string(),
        };
        assert_eq!(state.hub.publish_fanout(message_for("f2")), 0);
        assert_eq!(state.hub.publish_fanout(message_for("f1")), 1);
        assert_eq!(
            next_frame(&mut ws).await,
            StreamMessage::Fanout {
                message: message_for("f1")
            }
        );
    }
}
