//! Selecting, loading and closing conversations.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Harness, NADIA, OMAR, conv, message, settle};
use convsync::api::memory::ApiCall;
use convsync::sync::SyncError;
use convsync::sync::state::ThreadPhase;
use convsync_proto::event::ClientFrame;

#[tokio::test(start_paused = true)]
async fn slow_page_of_an_abandoned_selection_is_discarded() {
    let mut h = Harness::new().await;
    h.api.store_message(&conv(NADIA), message("1", "7", "from Nadia"));
    h.api.store_message(&conv(OMAR), message("2", "8", "from Omar"));
    h.api.set_fetch_latency(&conv(NADIA), Duration::from_secs(2));
    h.api.set_fetch_latency(&conv(OMAR), Duration::from_millis(100));

    let slow = {
        let client = Arc::clone(&h.client);
        tokio::spawn(async move { client.select_conversation(&conv(NADIA)).await })
    };
    settle().await;
    h.open(OMAR).await;
    assert_eq!(h.thread_ids(), vec!["2"]);

    // Nadia's page lands afterwards and must not replace Omar's thread.
    slow.await.unwrap().unwrap();
    let thread = h.client.thread();
    assert_eq!(thread.conversation_id, Some(conv(OMAR)));
    assert_eq!(h.thread_ids(), vec!["2"]);
    assert_eq!(thread.phase, ThreadPhase::Active);

    // The abandoned selection is not marked read either.
    assert_eq!(h.api.count(&ApiCall::MarkConversationRead(conv(NADIA))), 0);
}

#[tokio::test(start_paused = true)]
async fn unknown_conversation_is_rejected_without_changing_the_view() {
    let mut h = Harness::new().await;
    h.open(NADIA).await;

    let result = h.client.select_conversation(&conv("9_9")).await;
    assert!(matches!(result, Err(SyncError::NotFound(id)) if id == conv("9_9")));
    assert_eq!(h.client.active_conversation(), Some(conv(NADIA)));
    assert_eq!(h.client.thread().phase, ThreadPhase::Active);
}

#[tokio::test(start_paused = true)]
async fn reselecting_the_open_conversation_does_nothing() {
    let mut h = Harness::new().await;
    h.open(NADIA).await;
    h.open(NADIA).await;

    assert_eq!(h.api.count(&ApiCall::FetchMessages(conv(NADIA))), 1);
}

#[tokio::test(start_paused = true)]
async fn switching_moves_the_subscription() {
    let mut h = Harness::new().await;
    h.open(NADIA).await;
    h.open(OMAR).await;

    let frames: Vec<_> = h
        .frames()
        .into_iter()
        .filter(|f| {
            matches!(
                f,
                ClientFrame::JoinConversation { .. } | ClientFrame::LeaveConversation { .. }
            )
        })
        .collect();
    assert_eq!(
        frames,
        vec![
            ClientFrame::JoinConversation {
                conversation_id: conv(NADIA)
            },
            ClientFrame::LeaveConversation {
                conversation_id: conv(NADIA)
            },
            ClientFrame::JoinConversation {
                conversation_id: conv(OMAR)
            },
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn failed_load_is_retryable() {
    let mut h = Harness::new().await;
    h.api.store_message(&conv(NADIA), message("1", "7", "hi"));
    h.api.fail_fetch(&conv(NADIA), true);

    let result = h.client.select_conversation(&conv(NADIA)).await;
    assert!(matches!(result, Err(SyncError::LoadFailed(_))));
    assert!(matches!(h.client.thread().phase, ThreadPhase::Error(_)));
    assert_eq!(h.client.active_conversation(), Some(conv(NADIA)));

    h.api.fail_fetch(&conv(NADIA), false);
    h.client.retry_load().await.unwrap();
    assert_eq!(h.client.thread().phase, ThreadPhase::Active);
    assert_eq!(h.thread_ids(), vec!["1"]);

    // Reselecting after another failure retries as well.
    h.api.fail_fetch(&conv(NADIA), true);
    h.open(OMAR).await;
    assert!(h.client.select_conversation(&conv(NADIA)).await.is_err());
    h.api.fail_fetch(&conv(NADIA), false);
    h.open(NADIA).await;
    assert_eq!(h.client.thread().phase, ThreadPhase::Active);
}

#[tokio::test(start_paused = true)]
async fn failed_list_load_keeps_previous_entries() {
    let h = Harness::new().await;
    h.api.fail_list(true);

    assert!(h.client.load_conversations().await.is_err());
    let list = h.client.conversations();
    assert_eq!(list.conversations.len(), 2);
    assert!(matches!(
        list.phase,
        convsync::sync::state::ListPhase::Error(_)
    ));
}

#[tokio::test(start_paused = true)]
async fn close_goes_idle_and_unsubscribes() {
    let mut h = Harness::new().await;
    h.open(NADIA).await;
    h.frames();

    h.client.close_conversation().await;
    let thread = h.client.thread();
    assert_eq!(thread.phase, ThreadPhase::Idle);
    assert_eq!(thread.conversation_id, None);
    assert!(thread.entries.is_empty());
    assert_eq!(
        h.frames(),
        vec![ClientFrame::LeaveConversation {
            conversation_id: conv(NADIA)
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn selecting_marks_the_conversation_read() {
    let mut h = Harness::new().await;
    h.api.store_message(&conv(OMAR), message("4", "8", "unread one"));
    h.api.store_message(&conv(OMAR), message("5", "8", "unread two"));
    h.client.load_conversations().await.unwrap();
    assert_eq!(h.client.total_unread(), 2);

    h.open(OMAR).await;
    assert_eq!(h.client.total_unread(), 0);
    assert_eq!(h.api.unread_count(&conv(OMAR)), Some(0));
}
