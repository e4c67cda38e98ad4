//! Losing the push channel: fallback polling, then resync on reconnect.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Harness, ME, NADIA, OMAR, conv, conversation, me, message, settle};
use convsync::api::memory::{ApiCall, InMemoryApi};
use convsync::config::SyncConfig;
use convsync::sync::state::ThreadPhase;
use convsync::sync::{SyncClient, SyncEvent};
use convsync::transport::ConnectionState;
use convsync::transport::polling::PollingTransport;
use convsync_proto::message::{MessageId, MessageStatus, UserId};

async fn connected_harness() -> Harness {
    let mut h = Harness::new().await;
    h.server
        .set_connection(ConnectionState::Connected)
        .await
        .unwrap();
    settle().await;
    h.drain_events();
    h
}

#[tokio::test(start_paused = true)]
async fn disconnect_starts_polling_and_reports_the_state() {
    let mut h = connected_harness().await;
    assert!(!h.client.is_polling());

    h.server
        .set_connection(ConnectionState::Disconnected)
        .await
        .unwrap();
    settle().await;

    assert!(h.client.is_polling());
    assert_eq!(h.client.connection_state(), ConnectionState::Disconnected);
    assert!(
        h.drain_events()
            .contains(&SyncEvent::ConnectionChanged(ConnectionState::Disconnected))
    );
}

#[tokio::test(start_paused = true)]
async fn polling_picks_up_messages_while_disconnected() {
    let mut h = connected_harness().await;
    h.open(NADIA).await;
    h.server
        .set_connection(ConnectionState::Reconnecting)
        .await
        .unwrap();
    settle().await;

    h.api.store_message(&conv(NADIA), message("1", "7", "are you there?"));
    h.api.store_message(&conv(OMAR), message("2", "8", "quick question"));

    // Nothing before the first period elapses.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(h.thread_ids().is_empty());

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(h.thread_ids(), vec!["1"]);
    let omar = h
        .client
        .conversations()
        .conversations
        .into_iter()
        .find(|c| c.id == conv(OMAR))
        .unwrap();
    assert_eq!(omar.unread_count, 1);

    // A second round does not duplicate anything.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.thread_ids(), vec!["1"]);
}

#[tokio::test(start_paused = true)]
async fn reconnect_stops_polling_and_resyncs_once() {
    let mut h = connected_harness().await;
    h.api.store_message(&conv(NADIA), message("1", "7", "before"));
    h.open(NADIA).await;

    h.server
        .set_connection(ConnectionState::Disconnected)
        .await
        .unwrap();
    settle().await;
    h.api.store_message(&conv(NADIA), message("2", "7", "missed"));
    h.api.store_message(&conv(NADIA), message("3", "7", "also missed"));

    let fetches = h.api.count(&ApiCall::FetchMessages(conv(NADIA)));
    h.server
        .set_connection(ConnectionState::Connected)
        .await
        .unwrap();
    settle().await;

    assert!(!h.client.is_polling());
    assert_eq!(h.thread_ids(), vec!["1", "2", "3"]);
    assert_eq!(
        h.api.count(&ApiCall::FetchMessages(conv(NADIA))),
        fetches + 1
    );
    assert!(
        h.drain_events()
            .contains(&SyncEvent::ConnectionChanged(ConnectionState::Connected))
    );

    // The same messages pushed late are still one entry each.
    h.push(common::new_message(NADIA, message("2", "7", "missed")))
        .await;
    h.push(common::new_message(NADIA, message("3", "7", "also missed")))
        .await;
    assert_eq!(h.thread_ids(), vec!["1", "2", "3"]);

    // The poller is gone for good.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(
        h.api.count(&ApiCall::FetchMessages(conv(NADIA))),
        fetches + 1
    );
}

#[tokio::test(start_paused = true)]
async fn unconfirmed_entry_survives_the_resync() {
    let mut h = connected_harness().await;
    h.open(NADIA).await;
    let token = h.client.send_message("sent just before the drop").await.unwrap().unwrap();

    h.server
        .set_connection(ConnectionState::Disconnected)
        .await
        .unwrap();
    settle().await;
    h.api.store_message(&conv(NADIA), message("5", "7", "reply while away"));
    h.server
        .set_connection(ConnectionState::Connected)
        .await
        .unwrap();
    settle().await;

    let thread = h.client.thread();
    assert_eq!(thread.entries.len(), 2);
    let pending = thread
        .entries
        .iter()
        .find(|e| e.token() == Some(&token))
        .unwrap();
    assert_eq!(pending.status, MessageStatus::Sending);
    assert_eq!(pending.sender_id.as_str(), ME);
}

#[tokio::test(start_paused = true)]
async fn repeated_reconnecting_reports_keep_one_poller() {
    let mut h = connected_harness().await;
    h.open(NADIA).await;

    for _ in 0..3 {
        h.server
            .set_connection(ConnectionState::Reconnecting)
            .await
            .unwrap();
        settle().await;
    }
    assert!(h.client.is_polling());

    let lists = h.api.count(&ApiCall::ListConversations);
    tokio::time::sleep(Duration::from_millis(10_500)).await;
    assert_eq!(h.api.count(&ApiCall::ListConversations), lists + 1);
}

#[tokio::test(start_paused = true)]
async fn connection_changes_can_be_fed_directly() {
    let mut h = connected_harness().await;
    h.open(NADIA).await;

    h.client
        .handle_connection_change(ConnectionState::Reconnecting)
        .await;
    assert!(h.client.is_polling());
    assert_eq!(h.client.connection_state(), ConnectionState::Reconnecting);

    h.api.store_message(&conv(NADIA), message("4", "7", "while away"));
    let lists = h.api.count(&ApiCall::ListConversations);
    h.client
        .handle_connection_change(ConnectionState::Connected)
        .await;
    assert!(!h.client.is_polling());
    assert_eq!(h.thread_ids(), vec!["4"]);
    assert_eq!(h.api.count(&ApiCall::ListConversations), lists + 1);

    // Connected again while connected is not a new resync.
    h.client
        .handle_connection_change(ConnectionState::Connected)
        .await;
    assert_eq!(h.api.count(&ApiCall::ListConversations), lists + 1);
}

#[tokio::test(start_paused = true)]
async fn resync_overtaking_a_selection_still_marks_it_read() {
    let mut h = connected_harness().await;
    h.api.store_message(&conv(NADIA), message("1", "7", "unread"));
    h.api.set_fetch_latency(&conv(NADIA), Duration::from_secs(1));

    let select = {
        let client = Arc::clone(&h.client);
        tokio::spawn(async move { client.select_conversation(&conv(NADIA)).await })
    };
    settle().await;
    assert_eq!(h.client.thread().phase, ThreadPhase::Loading);

    // The resync's reload supersedes the selection's own load.
    h.server
        .set_connection(ConnectionState::Disconnected)
        .await
        .unwrap();
    settle().await;
    h.server
        .set_connection(ConnectionState::Connected)
        .await
        .unwrap();
    settle().await;

    select.await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(h.client.thread().phase, ThreadPhase::Active);
    assert_eq!(h.thread_ids(), vec!["1"]);
    assert_eq!(
        h.api.count(&ApiCall::MarkConversationRead(conv(NADIA))),
        1
    );
    assert_eq!(h.api.unread_count(&conv(NADIA)), Some(0));
}

// --- REST only ---

type RestClient = SyncClient<PollingTransport<InMemoryApi>, InMemoryApi>;

const POLL: Duration = Duration::from_secs(10);

async fn rest_only_client(
    api: &InMemoryApi,
) -> (Arc<RestClient>, tokio::sync::mpsc::Receiver<SyncEvent>) {
    let transport = PollingTransport::new(api.clone(), POLL);
    let (client, events) = SyncClient::new(transport, api.clone(), me(), SyncConfig::default());
    let client = Arc::new(client);
    {
        let client = Arc::clone(&client);
        tokio::spawn(async move {
            let _ = client.run().await;
        });
    }
    client.load_conversations().await.unwrap();
    (client, events)
}

#[tokio::test(start_paused = true)]
async fn rest_only_client_reports_the_link_without_a_selection() {
    let api = InMemoryApi::new(me());
    api.upsert_conversation(conversation(NADIA, "7", "Nadia", 1));
    let (client, _events) = rest_only_client(&api).await;
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);

    tokio::time::sleep(POLL + Duration::from_secs(1)).await;
    assert!(client.active_conversation().is_none());
    assert_eq!(client.connection_state(), ConnectionState::Connected);

    api.fail_list(true);
    tokio::time::sleep(POLL).await;
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn rest_only_client_counts_messages_in_other_conversations() {
    let api = InMemoryApi::new(me());
    api.upsert_conversation(conversation(NADIA, "7", "Nadia", 1));
    api.upsert_conversation(conversation(OMAR, "8", "Omar", 5));
    let (client, mut events) = rest_only_client(&api).await;

    tokio::time::sleep(Duration::from_secs(60)).await;
    client.select_conversation(&conv(NADIA)).await.unwrap();
    while events.try_recv().is_ok() {}

    api.store_message(&conv(OMAR), message("2", "8", "quick question"));
    tokio::time::sleep(POLL + Duration::from_secs(1)).await;

    let list = client.conversations().conversations;
    assert_eq!(list[0].id, conv(OMAR));
    assert_eq!(list[0].unread_count, 1);
    assert_eq!(list[0].last_message_text(), Some("quick question"));
    assert!(!client.is_polling());

    let mut announced = Vec::new();
    while let Ok(event) = events.try_recv() {
        announced.push(event);
    }
    assert!(announced.contains(&SyncEvent::IncomingMessage {
        conversation_id: conv(OMAR),
        sender_id: UserId::new("8"),
        content: "quick question".into(),
    }));

    // The open conversation gets the message itself and no unread badge.
    api.store_message(&conv(NADIA), message("3", "7", "still free"));
    tokio::time::sleep(POLL + Duration::from_secs(1)).await;
    let thread: Vec<_> = client
        .thread()
        .entries
        .iter()
        .filter_map(|e| e.message_id().cloned())
        .collect();
    assert_eq!(thread, vec![MessageId::new("3")]);
    let nadia = client
        .conversations()
        .conversations
        .into_iter()
        .find(|c| c.id == conv(NADIA))
        .unwrap();
    assert_eq!(nadia.unread_count, 0);
    assert_eq!(client.total_unread(), 1);
}
