//! `HttpApi` and `PollingTransport` against a mock REST backend.
//!
//! The backend is a small axum app holding conversations and message
//! pages in memory, answering with the `{success, ...}` envelopes of the
//! real server and recording every request it sees.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use convsync::api::http::HttpApi;
use convsync::api::{ApiError, ConversationApi};
use convsync::config::SyncConfig;
use convsync::sync::SyncClient;
use convsync::sync::state::{MessageKey, ThreadPhase};
use convsync::transport::polling::PollingTransport;
use convsync::transport::{ConnectionState, Transport, TransportEvent};
use convsync_proto::api::SendMessageRequest;
use convsync_proto::event::{OutgoingMessage, ServerEvent};
use convsync_proto::message::{
    ConversationId, CorrelationToken, MessageId, MessageStatus, UserId,
};

/// What the mock should do with the next requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Mode {
    #[default]
    Normal,
    /// `200 {"success": false}`.
    Refuse,
    /// `500` with an error envelope.
    Broken,
    /// `404` without an envelope.
    Missing,
}

#[derive(Default)]
struct Backend {
    pages: HashMap<String, Vec<Value>>,
    requests: Vec<String>,
    mode: Mode,
    next_id: u64,
}

type Shared = Arc<Mutex<Backend>>;

fn stored(id: u64, sender: u64, content: &str) -> Value {
    json!({
        "id": id,
        "sender_id": sender,
        "content": content,
        "created_at": format!("2026-05-01T10:{:02}:00", id % 60),
        "status": "sent",
    })
}

/// Answer according to the current mode, or run `ok`.
fn respond(
    backend: &Shared,
    request: String,
    ok: impl FnOnce(&mut Backend) -> Value,
) -> (StatusCode, Json<Value>) {
    let mut backend = backend.lock();
    backend.requests.push(request);
    let mode = backend.mode;
    match mode {
        Mode::Normal => (StatusCode::OK, Json(ok(&mut *backend))),
        Mode::Refuse => (
            StatusCode::OK,
            Json(json!({"success": false, "error": "not a participant"})),
        ),
        Mode::Broken => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"success": false, "error": "database down"})),
        ),
        Mode::Missing => (StatusCode::NOT_FOUND, Json(Value::Null)),
    }
}

async fn list(State(backend): State<Shared>) -> impl IntoResponse {
    respond(&backend, "GET /conversations".into(), |_| {
        json!({
            "success": true,
            "conversations": [
                {
                    "id": "3_7",
                    "other_participant": {
                        "id": 7,
                        "name": "Nadia",
                        "is_online": true,
                        "last_seen_at": null,
                    },
                    "last_message": {"content": "Is the flat free?", "sender_id": 7},
                    "last_message_time": "2026-05-01T09:00:00",
                    "unread_count": 2,
                    "listing": {"id": 11, "title": "Loft near the park"},
                },
                {
                    "id": "3_8",
                    "other_participant": {"id": 8, "name": "Omar"},
                    "last_message_time": "2026-04-30T18:30:00+02:00",
                },
            ],
        })
    })
}

async fn messages(
    State(backend): State<Shared>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let limit = query.get("limit").cloned().unwrap_or_default();
    respond(
        &backend,
        format!("GET /conversations/{id}/messages?limit={limit}"),
        |backend| {
            let page = backend.pages.get(&id).cloned().unwrap_or_default();
            json!({"success": true, "messages": page})
        },
    )
}

async fn read_conversation(State(backend): State<Shared>, Path(id): Path<String>) -> impl IntoResponse {
    respond(&backend, format!("POST /conversations/{id}/read"), |_| {
        json!({"success": true})
    })
}

async fn read_all(State(backend): State<Shared>) -> impl IntoResponse {
    respond(&backend, "POST /conversations/read-all".into(), |_| {
        json!({"success": true})
    })
}

async fn read_message(State(backend): State<Shared>, Path(id): Path<String>) -> impl IntoResponse {
    respond(&backend, format!("POST /messages/{id}/read"), |_| {
        json!({"success": true})
    })
}

async fn send(State(backend): State<Shared>, Json(body): Json<Value>) -> impl IntoResponse {
    let conversation = body["conversation_id"].as_str().unwrap_or_default().to_string();
    let content = body["message_content"].as_str().unwrap_or_default().to_string();
    let token = body["temp_id"].as_str().unwrap_or_default().to_string();
    respond(
        &backend,
        format!("POST /messages/send {conversation} {token} {content}"),
        |backend| {
            backend.next_id += 1;
            let message = stored(100 + backend.next_id, 3, &content);
            backend
                .pages
                .entry(conversation)
                .or_default()
                .push(message.clone());
            json!({"success": true, "message": message})
        },
    )
}

struct MockBackend {
    addr: SocketAddr,
    backend: Shared,
    server: tokio::task::JoinHandle<()>,
}

impl MockBackend {
    async fn start() -> Self {
        let backend: Shared = Arc::default();
        let routes = Router::new()
            .route("/conversations", get(list))
            .route("/conversations/read-all", post(read_all))
            .route("/conversations/{id}/messages", get(messages))
            .route("/conversations/{id}/read", post(read_conversation))
            .route("/messages/send", post(send))
            .route("/messages/{id}/read", post(read_message))
            .with_state(Arc::clone(&backend));
        let app = Router::new().nest("/api", routes);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            addr,
            backend,
            server,
        }
    }

    fn api(&self) -> HttpApi {
        HttpApi::new(&format!("http://{}/api", self.addr), Duration::from_secs(5)).unwrap()
    }

    fn store(&self, conversation: &str, message: Value) {
        self.backend
            .lock()
            .pages
            .entry(conversation.to_string())
            .or_default()
            .push(message);
    }

    fn set_mode(&self, mode: Mode) {
        self.backend.lock().mode = mode;
    }

    fn requests(&self) -> Vec<String> {
        self.backend.lock().requests.clone()
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// Poll `check` until it holds, failing after five seconds.
async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn next_any_event<T: Transport>(transport: &T) -> TransportEvent {
    tokio::time::timeout(Duration::from_secs(5), transport.next_event())
        .await
        .unwrap()
        .unwrap()
}

/// The next event that is not a polled conversation list.
async fn next_event<T: Transport>(transport: &T) -> TransportEvent {
    loop {
        match next_any_event(transport).await {
            TransportEvent::Conversations(_) => {}
            event => return event,
        }
    }
}

#[tokio::test]
async fn list_decodes_the_backend_shapes() {
    let mock = MockBackend::start().await;
    let conversations = mock.api().list_conversations().await.unwrap();

    assert_eq!(conversations.len(), 2);
    let nadia = &conversations[0];
    assert_eq!(nadia.id, ConversationId::new("3_7"));
    assert_eq!(nadia.other_participant.id, UserId::new("7"));
    assert!(nadia.other_participant.online);
    assert_eq!(nadia.unread_count, 2);
    assert_eq!(nadia.last_message_text(), Some("Is the flat free?"));
    assert_eq!(nadia.listing.as_ref().unwrap().title, "Loft near the park");

    let omar = &conversations[1];
    assert_eq!(omar.unread_count, 0);
    assert!(omar.last_message.is_none());
    assert!(omar.last_message_time.is_some());
}

#[tokio::test]
async fn page_fetch_sends_the_page_size() {
    let mock = MockBackend::start().await;
    mock.store("3_7", stored(1, 7, "first"));
    mock.store("3_7", stored(2, 3, "second"));

    let page = mock
        .api()
        .with_page_size(20)
        .fetch_messages(&ConversationId::new("3_7"))
        .await
        .unwrap();

    assert_eq!(page.len(), 2);
    assert_eq!(page[0].id, MessageId::new("1"));
    assert_eq!(page[1].sender_id, UserId::new("3"));
    assert_eq!(page[1].status, MessageStatus::Sent);
    assert_eq!(
        mock.requests(),
        vec!["GET /conversations/3_7/messages?limit=20"]
    );
}

#[tokio::test]
async fn read_receipts_hit_their_endpoints() {
    let mock = MockBackend::start().await;
    let api = mock.api();

    api.mark_conversation_read(&ConversationId::new("3_7"))
        .await
        .unwrap();
    api.mark_all_read().await.unwrap();
    api.mark_message_read(&MessageId::new("42")).await.unwrap();

    assert_eq!(
        mock.requests(),
        vec![
            "POST /conversations/3_7/read",
            "POST /conversations/read-all",
            "POST /messages/42/read",
        ]
    );
}

#[tokio::test]
async fn send_returns_the_stored_message() {
    let mock = MockBackend::start().await;
    let request = SendMessageRequest::text(
        ConversationId::new("3_7"),
        UserId::new("7"),
        "Yes, from June".into(),
        CorrelationToken::from_raw("temp_1"),
    );

    let message = mock.api().send_message(&request).await.unwrap();
    assert_eq!(message.id, MessageId::new("101"));
    assert_eq!(message.content, "Yes, from June");
    assert_eq!(
        mock.requests(),
        vec!["POST /messages/send 3_7 temp_1 Yes, from June"]
    );
}

#[tokio::test]
async fn failures_map_to_api_errors() {
    let mock = MockBackend::start().await;
    let api = mock.api();

    mock.set_mode(Mode::Refuse);
    let err = api.list_conversations().await.unwrap_err();
    assert!(matches!(err, ApiError::Rejected(ref reason) if reason == "not a participant"));
    let err = api.mark_all_read().await.unwrap_err();
    assert!(matches!(err, ApiError::Rejected(_)));

    mock.set_mode(Mode::Broken);
    let err = api
        .fetch_messages(&ConversationId::new("3_7"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ApiError::Status { status: 500, ref message } if message == "database down"
    ));

    mock.set_mode(Mode::Missing);
    let err = api.list_conversations().await.unwrap_err();
    assert!(matches!(
        err,
        ApiError::Status { status: 404, ref message } if message == "Not Found"
    ));
}

#[tokio::test]
async fn unreachable_backend_is_an_http_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let api = HttpApi::new(&format!("http://{addr}/api"), Duration::from_secs(2)).unwrap();
    assert!(matches!(
        api.list_conversations().await,
        Err(ApiError::Http(_))
    ));
}

#[tokio::test]
async fn polling_transport_turns_pages_into_events() {
    let mock = MockBackend::start().await;
    mock.store("3_7", stored(1, 7, "hello"));
    let transport = PollingTransport::new(mock.api(), Duration::from_millis(50));
    let conversation = ConversationId::new("3_7");
    transport.subscribe(&conversation).await.unwrap();

    assert!(matches!(
        next_event(&transport).await,
        TransportEvent::Connection(ConnectionState::Connected)
    ));
    let TransportEvent::Server(ServerEvent::NewMessage(new)) = next_event(&transport).await else {
        panic!("expected the stored message");
    };
    assert_eq!(new.message.id, MessageId::new("1"));
    assert_eq!(new.conversation_id, conversation);
    assert!(new.temp_id.is_none());

    // A send is acknowledged with its token, and the next poll does not
    // repeat it.
    let token = CorrelationToken::new();
    transport
        .send(&OutgoingMessage {
            conversation_id: conversation.clone(),
            receiver_id: UserId::new("7"),
            content: "hi back".into(),
            temp_id: token.clone(),
        })
        .await
        .unwrap();
    let TransportEvent::Server(ServerEvent::NewMessage(ack)) = next_event(&transport).await else {
        panic!("expected the acknowledgement");
    };
    assert_eq!(ack.temp_id, Some(token));
    assert_eq!(ack.message.content, "hi back");

    mock.store("3_7", stored(2, 7, "later"));
    let TransportEvent::Server(ServerEvent::NewMessage(later)) = next_event(&transport).await else {
        panic!("expected the next stored message");
    };
    assert_eq!(later.message.id, MessageId::new("2"));
}

#[tokio::test]
async fn polling_transport_hands_on_the_list_without_a_subscription() {
    let mock = MockBackend::start().await;
    let transport = PollingTransport::new(mock.api(), Duration::from_millis(50));

    assert!(matches!(
        next_any_event(&transport).await,
        TransportEvent::Connection(ConnectionState::Connected)
    ));
    let TransportEvent::Conversations(list) = next_any_event(&transport).await else {
        panic!("expected the conversation list");
    };
    assert_eq!(list.len(), 2);
    assert_eq!(list[0].unread_count, 2);

    // The backend's list never changes, so later rounds stay quiet.
    let quiet = tokio::time::timeout(Duration::from_millis(300), transport.next_event()).await;
    assert!(quiet.is_err());
    let requests = mock.requests();
    assert!(requests.len() > 2);
    assert!(requests.iter().all(|r| r == "GET /conversations"));
}

#[tokio::test]
async fn polling_transport_reports_outages() {
    let mock = MockBackend::start().await;
    let transport = PollingTransport::new(mock.api(), Duration::from_millis(50));
    transport
        .subscribe(&ConversationId::new("3_7"))
        .await
        .unwrap();
    assert!(matches!(
        next_event(&transport).await,
        TransportEvent::Connection(ConnectionState::Connected)
    ));

    mock.set_mode(Mode::Broken);
    assert!(matches!(
        next_event(&transport).await,
        TransportEvent::Connection(ConnectionState::Disconnected)
    ));
    mock.set_mode(Mode::Normal);
    assert!(matches!(
        next_event(&transport).await,
        TransportEvent::Connection(ConnectionState::Connected)
    ));
}

#[tokio::test]
async fn client_over_rest_only_sends_and_receives() {
    let mock = MockBackend::start().await;
    mock.store("3_7", stored(1, 7, "Is the flat free?"));
    let api = mock.api();
    let transport = PollingTransport::new(api.clone(), Duration::from_millis(50));
    let (client, _events) = SyncClient::new(transport, api, UserId::new("3"), SyncConfig::default());
    let client = Arc::new(client);
    let run = {
        let client = Arc::clone(&client);
        tokio::spawn(async move {
            let _ = client.run().await;
        })
    };

    client.load_conversations().await.unwrap();
    assert_eq!(client.total_unread(), 2);
    client
        .select_conversation(&ConversationId::new("3_7"))
        .await
        .unwrap();
    assert_eq!(client.thread().phase, ThreadPhase::Active);
    assert!(mock.requests().contains(&"POST /conversations/3_7/read".to_string()));

    let token = client.send_message("Yes, from June").await.unwrap().unwrap();
    eventually("the send to be confirmed", || {
        client
            .thread()
            .entries
            .iter()
            .any(|e| e.key == MessageKey::Confirmed(MessageId::new("101")))
    })
    .await;
    let thread = client.thread();
    assert!(thread.entries.iter().all(|e| e.token() != Some(&token)));

    mock.store("3_7", stored(2, 7, "Great, see you then"));
    eventually("the polled reply", || client.thread().entries.len() == 3).await;

    // Later polls change nothing.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let ids: Vec<_> = client
        .thread()
        .entries
        .iter()
        .filter_map(|e| e.message_id().map(|id| id.as_str().to_string()))
        .collect();
    assert_eq!(ids, vec!["1", "101", "2"]);

    run.abort();
}
