//! Typing indicators in both directions, and presence.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::time::Duration;

use chrono::Utc;

use common::{Harness, NADIA, OMAR, conv};
use convsync::sync::SyncEvent;
use convsync_proto::event::{ClientFrame, ServerEvent};
use convsync_proto::message::UserId;
use convsync_proto::presence::PresenceUpdate;
use convsync_proto::typing::{TypingNotice, TypingSignal};

fn typing_frames(frames: &[ClientFrame]) -> (usize, usize) {
    let starts = frames
        .iter()
        .filter(|f| matches!(f, ClientFrame::TypingStart(_)))
        .count();
    let stops = frames
        .iter()
        .filter(|f| matches!(f, ClientFrame::TypingStop(_)))
        .count();
    (starts, stops)
}

fn notice(user: &str, conversation: Option<&str>) -> TypingNotice {
    TypingNotice {
        user_id: UserId::new(user),
        conversation_id: conversation.map(conv),
    }
}

#[tokio::test(start_paused = true)]
async fn keystroke_burst_sends_one_start_and_one_stop() {
    let mut h = Harness::new().await;
    h.open(NADIA).await;
    h.frames();

    for _ in 0..5 {
        h.client.key_pressed().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(typing_frames(&h.frames()), (1, 0));
    assert!(h.client.is_typing());

    tokio::time::sleep(Duration::from_millis(2100)).await;
    let frames = h.frames();
    assert_eq!(typing_frames(&frames), (0, 1));
    assert_eq!(
        frames,
        vec![ClientFrame::TypingStop(TypingSignal {
            conversation_id: conv(NADIA),
            receiver_id: UserId::new("7"),
        })]
    );
    assert!(!h.client.is_typing());
}

#[tokio::test(start_paused = true)]
async fn sending_ends_the_burst() {
    let mut h = Harness::new().await;
    h.open(NADIA).await;
    h.frames();

    h.client.key_pressed().await;
    h.client.send_message("done typing").await.unwrap();

    let frames = h.frames();
    assert!(matches!(frames[0], ClientFrame::TypingStart(_)));
    assert!(matches!(frames[1], ClientFrame::TypingStop(_)));
    assert!(matches!(frames[2], ClientFrame::SendMessage(_)));

    // No second stop once the idle timer would have fired.
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(typing_frames(&h.frames()), (0, 0));
}

#[tokio::test(start_paused = true)]
async fn switching_conversations_ends_the_burst() {
    let mut h = Harness::new().await;
    h.open(NADIA).await;
    h.client.set_typing(true).await;
    h.open(OMAR).await;

    let stops: Vec<_> = h
        .frames()
        .into_iter()
        .filter_map(|f| match f {
            ClientFrame::TypingStop(signal) => Some(signal.conversation_id),
            _ => None,
        })
        .collect();
    assert_eq!(stops, vec![conv(NADIA)]);
}

#[tokio::test(start_paused = true)]
async fn keystrokes_without_a_conversation_send_nothing() {
    let mut h = Harness::new().await;
    h.client.key_pressed().await;
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(h.frames().is_empty());
}

#[tokio::test(start_paused = true)]
async fn remote_typing_shows_then_times_out() {
    let mut h = Harness::new().await;
    h.open(NADIA).await;
    h.drain_events();

    h.push(ServerEvent::UserTyping(notice("7", Some(NADIA)))).await;
    assert!(h.client.thread().other_typing);

    // A refresh within the window extends it.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    h.push(ServerEvent::UserTyping(notice("7", Some(NADIA)))).await;
    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert!(h.client.thread().other_typing);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(!h.client.thread().other_typing);

    let typing: Vec<_> = h
        .drain_events()
        .into_iter()
        .filter_map(|e| match e {
            SyncEvent::TypingChanged { typing, .. } => Some(typing),
            _ => None,
        })
        .collect();
    assert_eq!(typing, vec![true, false]);
}

#[tokio::test(start_paused = true)]
async fn stop_notice_clears_the_indicator() {
    let mut h = Harness::new().await;
    h.open(NADIA).await;

    h.push(ServerEvent::UserTyping(notice("7", Some(NADIA)))).await;
    h.push(ServerEvent::UserStoppedTyping(notice("7", None))).await;
    assert!(!h.client.thread().other_typing);
}

#[tokio::test(start_paused = true)]
async fn typing_elsewhere_is_ignored() {
    let mut h = Harness::new().await;
    h.open(NADIA).await;

    h.push(ServerEvent::UserTyping(notice("8", Some(OMAR)))).await;
    h.push(ServerEvent::UserTyping(notice("8", None))).await;
    assert!(!h.client.thread().other_typing);
}

#[tokio::test(start_paused = true)]
async fn presence_updates_the_participant() {
    let mut h = Harness::new().await;
    h.open(NADIA).await;
    let seen = Utc::now();

    h.push(ServerEvent::PresenceChanged(PresenceUpdate {
        user_id: UserId::new("7"),
        online: true,
        last_seen_at: Some(seen),
    }))
    .await;

    let list = h.client.conversations();
    let nadia = list.conversations.iter().find(|c| c.id == conv(NADIA)).unwrap();
    assert!(nadia.other_participant.online);
    assert_eq!(nadia.other_participant.last_seen_at, Some(seen));
    assert!(h.client.thread().participant.unwrap().online);

    h.push(ServerEvent::PresenceChanged(PresenceUpdate {
        user_id: UserId::new("7"),
        online: false,
        last_seen_at: None,
    }))
    .await;
    let list = h.client.conversations();
    let nadia = list.conversations.iter().find(|c| c.id == conv(NADIA)).unwrap();
    assert!(!nadia.other_participant.online);
    assert_eq!(nadia.other_participant.last_seen_at, Some(seen));
}
