//! Unread counts, list ordering and read receipts.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Harness, ME, NADIA, OMAR, conv, message, new_message, settle};
use convsync::api::memory::ApiCall;
use convsync::sync::SyncEvent;
use convsync::sync::state::ConversationFilter;

#[tokio::test(start_paused = true)]
async fn message_elsewhere_counts_and_moves_to_top() {
    let mut h = Harness::new().await;
    h.open(NADIA).await;
    assert_eq!(h.client.conversations().conversations[0].id, conv(NADIA));
    h.drain_events();

    h.push(new_message(OMAR, message("7", "8", "Is parking included?"))).await;

    let list = h.client.conversations();
    assert_eq!(list.conversations[0].id, conv(OMAR));
    assert_eq!(list.conversations[0].unread_count, 1);
    assert_eq!(
        list.conversations[0].last_message_text(),
        Some("Is parking included?")
    );
    assert_eq!(list.total_unread(), 1);
    assert!(h.drain_events().contains(&SyncEvent::IncomingMessage {
        conversation_id: conv(OMAR),
        sender_id: convsync_proto::message::UserId::new("8"),
        content: "Is parking included?".into(),
    }));
    // The open thread is untouched.
    assert!(h.client.thread().entries.is_empty());
}

#[tokio::test(start_paused = true)]
async fn duplicate_message_elsewhere_counts_once() {
    let h = Harness::new().await;

    h.push(new_message(OMAR, message("7", "8", "hello"))).await;
    h.push(new_message(OMAR, message("7", "8", "hello"))).await;

    assert_eq!(h.client.total_unread(), 1);
}

#[tokio::test(start_paused = true)]
async fn own_message_from_another_session_is_not_unread() {
    let h = Harness::new().await;

    h.push(new_message(OMAR, message("7", ME, "sent from my phone"))).await;

    let list = h.client.conversations();
    assert_eq!(list.conversations[0].id, conv(OMAR));
    assert_eq!(list.conversations[0].unread_count, 0);
}

#[tokio::test(start_paused = true)]
async fn mark_all_read_clears_before_the_server_answers() {
    let h = Harness::new().await;
    h.push(new_message(NADIA, message("1", "7", "a"))).await;
    h.push(new_message(OMAR, message("2", "8", "b"))).await;
    assert_eq!(h.client.total_unread(), 2);

    h.api.set_read_latency(Duration::from_secs(5));
    let pending = {
        let client = Arc::clone(&h.client);
        tokio::spawn(async move { client.mark_all_read().await })
    };
    settle().await;
    assert_eq!(h.client.total_unread(), 0);
    assert!(h.client.conversations().conversations.iter().all(|c| c.unread_count == 0));

    pending.await.unwrap();
    assert_eq!(h.api.count(&ApiCall::MarkAllRead), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_mark_read_is_not_rolled_back() {
    let h = Harness::new().await;
    h.push(new_message(OMAR, message("2", "8", "b"))).await;
    h.api.fail_reads(true);

    h.client.mark_conversation_read(&conv(OMAR)).await;
    assert_eq!(h.client.total_unread(), 0);
}

#[tokio::test(start_paused = true)]
async fn filter_by_name_preview_and_unread() {
    let h = Harness::new().await;
    h.push(new_message(OMAR, message("2", "8", "Check-in is at 3pm"))).await;

    let hits = h.client.filter_conversations("nadia", ConversationFilter::All);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, conv(NADIA));

    let hits = h.client.filter_conversations("CHECK-IN", ConversationFilter::All);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, conv(OMAR));

    let hits = h.client.filter_conversations("", ConversationFilter::Unread);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, conv(OMAR));
}
