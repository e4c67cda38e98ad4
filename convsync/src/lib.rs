//! `convsync`: real-time conversation synchronization client.
//!
//! Keeps a conversation list and one active message thread consistent with
//! a messaging backend under unreliable delivery: optimistic sends,
//! duplicate and out-of-order push events, dropped sockets.

pub mod api;
pub mod config;
pub mod render;
pub mod sync;
pub mod transport;
