//! Shared wire and REST definitions for the convsync messaging client.

pub mod api;
pub mod codec;
pub mod conversation;
pub mod event;
pub mod message;
pub mod presence;
pub mod typing;
