use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use barkline_core::events::EventBus;
use barkline_core::presence::PresenceRegistry;
use barkline_core::{AppConfig, AppState};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

const JWT_SECRET: &str = "gateway-test-secret";

type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    state: AppState,
}

impl TestServer {
    async fn start() -> Result<Self> {
        let db = barkline_db::create_pool("sqlite::memory:", 1).await?;
        barkline_db::run_migrations(&db).await?;

        let state = AppState {
            db,
            event_bus: EventBus::default(),
            presence: Arc::new(PresenceRegistry::new()),
            config: AppConfig {
                jwt_secret: JWT_SECRET.to_string(),
            },
        };

        let app = barkline_ws::gateway_router().with_state(state.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(Self { addr, state })
    }

    /// Two mutual friends with ids 1 and 2.
    async fn seed_friends(&self) -> Result<()> {
        barkline_db::users::create_user(&self.state.db, 1, "rex_owner", Some("Rex's Human"))
            .await?;
        barkline_db::users::create_user(&self.state.db, 2, "luna_owner", None).await?;
        for (a, b) in [(1, 2), (2, 1)] {
            barkline_db::friendships::upsert_friendship(
                &self.state.db,
                a,
                b,
                barkline_db::friendships::STATE_ACCEPTED,
            )
            .await?;
        }
        Ok(())
    }

    async fn connect(&self) -> Result<WsClient> {
        let (client, _) = connect_async(format!("ws://{}/gateway", self.addr)).await?;
        Ok(client)
    }

    /// Full handshake: HELLO -> IDENTIFY -> READY. Returns the READY payload.
    async fn connect_as(&self, user_id: i64) -> Result<WsClient> {
        let mut client = self.connect().await?;
        let hello = recv_json(&mut client).await?;
        assert_eq!(hello["op"], 10);
        let token = barkline_core::auth::create_token(user_id, JWT_SECRET, 3600)?;
        send_json(&mut client, json!({ "op": 2, "d": { "token": token } })).await?;
        let ready = recv_dispatch(&mut client, "READY").await?;
        assert_eq!(ready["user"]["id"], user_id.to_string());
        Ok(client)
    }
}

async fn send_json(client: &mut WsClient, value: Value) -> Result<()> {
    client
        .send(WsMessage::Text(value.to_string().into()))
        .await?;
    Ok(())
}

async fn recv_json(client: &mut WsClient) -> Result<Value> {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .context("timed out waiting for frame")?
            .context("stream ended")??;
        match msg {
            WsMessage::Text(text) => return Ok(serde_json::from_str(text.as_str())?),
            WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
            WsMessage::Close(frame) => bail!("connection closed: {frame:?}"),
            other => bail!("unexpected frame: {other:?}"),
        }
    }
}

async fn recv_dispatch(client: &mut WsClient, expected: &str) -> Result<Value> {
    let frame = recv_json(client).await?;
    assert_eq!(frame["op"], 0, "expected dispatch, got: {frame}");
    assert_eq!(frame["t"], expected, "unexpected event: {frame}");
    Ok(frame["d"].clone())
}

async fn assert_no_frame(client: &mut WsClient, window: Duration) {
    let extra = tokio::time::timeout(window, client.next()).await;
    assert!(extra.is_err(), "unexpected frame: {extra:?}");
}

/// Poll until the condition holds or two seconds pass; disconnect and
/// cross-connection effects land asynchronously.
async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

#[tokio::test]
async fn handshake_with_invalid_token_fails_fast() -> Result<()> {
    let server = TestServer::start().await?;
    let mut client = server.connect().await?;

    let hello = recv_json(&mut client).await?;
    assert_eq!(hello["op"], 10);
    assert!(hello["d"]["heartbeat_interval"].as_u64().unwrap() > 0);

    send_json(&mut client, json!({ "op": 2, "d": { "token": "garbage" } })).await?;

    let failure = recv_json(&mut client).await?;
    assert_eq!(failure["op"], 9);
    assert!(failure["d"]["message"].as_str().unwrap().len() > 0);

    // The server tears the connection down after the structured error.
    let next = tokio::time::timeout(Duration::from_secs(5), client.next()).await?;
    match next {
        Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => {}
        Some(Ok(other)) => bail!("expected close, got: {other:?}"),
    }

    Ok(())
}

#[tokio::test]
async fn handshake_without_token_fails_fast() -> Result<()> {
    let server = TestServer::start().await?;
    let mut client = server.connect().await?;

    recv_json(&mut client).await?; // HELLO
    send_json(&mut client, json!({ "op": 2, "d": {} })).await?;

    let failure = recv_json(&mut client).await?;
    assert_eq!(failure["op"], 9);

    Ok(())
}

#[tokio::test]
async fn basic_exchange_delivers_confirmation_message_and_notification() -> Result<()> {
    let server = TestServer::start().await?;
    server.seed_friends().await?;

    let mut alice = server.connect_as(1).await?;
    let mut bob = server.connect_as(2).await?;

    send_json(
        &mut alice,
        json!({ "op": 5, "d": { "recipient_id": "2", "content": "hi" } }),
    )
    .await?;

    let sent = recv_dispatch(&mut alice, "MESSAGE_SENT").await?;
    assert_eq!(sent["sender_id"], "1");
    assert_eq!(sent["recipient_id"], "2");
    assert_eq!(sent["content"], "hi");
    assert_eq!(sent["read"], false);

    let received = recv_dispatch(&mut bob, "MESSAGE_RECEIVE").await?;
    assert_eq!(received["id"], sent["id"]);
    assert_eq!(received["content"], "hi");

    let notification = recv_dispatch(&mut bob, "NOTIFICATION_CREATE").await?;
    assert_eq!(notification["sender_id"], "1");
    assert_eq!(notification["read"], false);
    assert_eq!(notification["sender"]["username"], "rex_owner");

    // One conversation for the pair, one persisted unread message.
    let conversation = barkline_db::conversations::find_direct_between(&server.state.db, 2, 1)
        .await?
        .expect("conversation exists");
    let message_id: i64 = sent["id"].as_str().unwrap().parse()?;
    let message = barkline_db::messages::get_message(&server.state.db, message_id)
        .await?
        .expect("message persisted");
    assert_eq!(message.conversation_id, conversation.id);
    assert!(!message.read);

    Ok(())
}

#[tokio::test]
async fn join_clears_notification_and_suppresses_further_ones() -> Result<()> {
    let server = TestServer::start().await?;
    server.seed_friends().await?;

    let mut alice = server.connect_as(1).await?;
    let mut bob = server.connect_as(2).await?;

    // First message creates the notification.
    send_json(
        &mut alice,
        json!({ "op": 5, "d": { "recipient_id": "2", "content": "hi" } }),
    )
    .await?;
    recv_dispatch(&mut alice, "MESSAGE_SENT").await?;
    recv_dispatch(&mut bob, "MESSAGE_RECEIVE").await?;
    recv_dispatch(&mut bob, "NOTIFICATION_CREATE").await?;

    let conversation = barkline_db::conversations::find_direct_between(&server.state.db, 1, 2)
        .await?
        .expect("conversation exists");

    // Bob opens the conversation; the pending notification flips to read.
    send_json(
        &mut bob,
        json!({ "op": 3, "d": {
            "conversation_id": conversation.id.to_string(),
            "peer_id": "1",
        }}),
    )
    .await?;

    let db = server.state.db.clone();
    let cleared = {
        let mut cleared = false;
        for _ in 0..100 {
            if barkline_db::notifications::get_unread_for_pair(&db, 1, 2)
                .await?
                .is_none()
            {
                cleared = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        cleared
    };
    assert!(cleared, "join did not clear the pending notification");
    assert!(server.state.presence.is_viewing(2, conversation.id));

    // While Bob is viewing, further messages deliver without notifying.
    send_json(
        &mut alice,
        json!({ "op": 5, "d": { "recipient_id": "2", "content": "there" } }),
    )
    .await?;
    recv_dispatch(&mut alice, "MESSAGE_SENT").await?;
    let received = recv_dispatch(&mut bob, "MESSAGE_RECEIVE").await?;
    assert_eq!(received["content"], "there");
    assert_no_frame(&mut bob, Duration::from_millis(300)).await;
    assert!(barkline_db::notifications::get_unread_for_pair(&server.state.db, 1, 2)
        .await?
        .is_none());

    Ok(())
}

#[tokio::test]
async fn burst_to_offline_recipient_coalesces_notifications() -> Result<()> {
    let server = TestServer::start().await?;
    server.seed_friends().await?;

    let mut alice = server.connect_as(1).await?;

    for content in ["hi", "there"] {
        send_json(
            &mut alice,
            json!({ "op": 5, "d": { "recipient_id": "2", "content": content } }),
        )
        .await?;
        recv_dispatch(&mut alice, "MESSAGE_SENT").await?;
    }

    let unread = barkline_db::notifications::list_for_recipient(&server.state.db, 2, true).await?;
    assert_eq!(unread.len(), 1, "burst must coalesce into one notification");
    assert!(!unread[0].read);

    let conversation = barkline_db::conversations::find_direct_between(&server.state.db, 1, 2)
        .await?
        .expect("conversation exists");
    let messages =
        barkline_db::messages::get_conversation_messages(&server.state.db, conversation.id, None, 50)
            .await?;
    assert_eq!(messages.len(), 2, "both messages persist despite coalescing");

    Ok(())
}

#[tokio::test]
async fn send_to_non_friend_yields_error_and_persists_nothing() -> Result<()> {
    let server = TestServer::start().await?;
    barkline_db::users::create_user(&server.state.db, 1, "rex_owner", None).await?;
    barkline_db::users::create_user(&server.state.db, 2, "luna_owner", None).await?;

    let mut alice = server.connect_as(1).await?;

    send_json(
        &mut alice,
        json!({ "op": 5, "d": { "recipient_id": "2", "content": "hi" } }),
    )
    .await?;

    let error = recv_dispatch(&mut alice, "ERROR").await?;
    assert!(error["message"].as_str().unwrap().contains("friends"));

    assert!(
        barkline_db::conversations::find_direct_between(&server.state.db, 1, 2)
            .await?
            .is_none()
    );

    // The connection survives the policy failure.
    send_json(&mut alice, json!({ "op": 1 })).await?;
    let ack = recv_json(&mut alice).await?;
    assert_eq!(ack["op"], 11);

    Ok(())
}

#[tokio::test]
async fn empty_content_yields_error() -> Result<()> {
    let server = TestServer::start().await?;
    server.seed_friends().await?;

    let mut alice = server.connect_as(1).await?;
    send_json(
        &mut alice,
        json!({ "op": 5, "d": { "recipient_id": "2", "content": "   " } }),
    )
    .await?;
    let error = recv_dispatch(&mut alice, "ERROR").await?;
    assert!(error["message"].as_str().unwrap().contains("empty"));

    Ok(())
}

#[tokio::test]
async fn mark_read_flips_messages_and_notifications() -> Result<()> {
    let server = TestServer::start().await?;
    server.seed_friends().await?;

    let mut alice = server.connect_as(1).await?;
    let mut bob = server.connect_as(2).await?;

    send_json(
        &mut alice,
        json!({ "op": 5, "d": { "recipient_id": "2", "content": "hi" } }),
    )
    .await?;
    let sent = recv_dispatch(&mut alice, "MESSAGE_SENT").await?;
    recv_dispatch(&mut bob, "MESSAGE_RECEIVE").await?;
    recv_dispatch(&mut bob, "NOTIFICATION_CREATE").await?;

    send_json(
        &mut bob,
        json!({ "op": 6, "d": {
            "message_ids": [sent["id"]],
            "sender_id": "1",
        }}),
    )
    .await?;

    let message_id: i64 = sent["id"].as_str().unwrap().parse()?;
    let db = server.state.db.clone();
    let mut read = false;
    for _ in 0..100 {
        let row = barkline_db::messages::get_message(&db, message_id)
            .await?
            .expect("message exists");
        if row.read {
            read = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(read, "mark-read did not flip the message");
    assert!(barkline_db::notifications::get_unread_for_pair(&db, 1, 2)
        .await?
        .is_none());

    Ok(())
}

#[tokio::test]
async fn disconnect_cleans_presence_and_viewing_state() -> Result<()> {
    let server = TestServer::start().await?;
    server.seed_friends().await?;

    let mut bob = server.connect_as(2).await?;
    assert!(server.state.presence.is_connected(2));

    send_json(
        &mut bob,
        json!({ "op": 3, "d": { "conversation_id": "77", "peer_id": "1" } }),
    )
    .await?;
    let presence = server.state.presence.clone();
    assert!(wait_until(|| presence.is_viewing(2, 77)).await);

    drop(bob);

    assert!(
        wait_until(|| !presence.is_connected(2)).await,
        "presence entry survived disconnect"
    );
    assert!(presence.lookup(2).is_none());
    assert!(!presence.is_viewing(2, 77));

    Ok(())
}
