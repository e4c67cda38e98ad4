//! Typing indicators.
//!
//! Outbound: the first keystroke of a burst sends `typing_start`; the
//! burst ends, with one `typing_stop`, after `typing_idle` without a
//! keystroke, on send, or when the conversation changes.
//!
//! Inbound: a `user_typing` notice for the active conversation shows the
//! indicator until `user_stopped_typing` or `remote_typing_timeout`,
//! whichever comes first.

use std::sync::Arc;

use tokio::task::JoinHandle;

use convsync_proto::typing::{TypingNotice, TypingSignal};

use super::{SyncClient, SyncEvent};
use crate::api::ConversationApi;
use crate::transport::{Transport, TypingPhase};

/// Outbound typing burst.
#[derive(Debug, Default)]
pub(crate) struct OutboundTyping {
    /// Where `typing_start` went; `Some` while a burst is open.
    target: Option<TypingSignal>,
    /// Bumped on every keystroke so a superseded timer knows to stand down.
    generation: u64,
    idle_timer: Option<JoinHandle<()>>,
}

impl OutboundTyping {
    pub(crate) fn abort_timer(&mut self) {
        if let Some(timer) = self.idle_timer.take() {
            timer.abort();
        }
    }
}

impl<T, A> SyncClient<T, A>
where
    T: Transport + 'static,
    A: ConversationApi + 'static,
{
    /// Report the compose box's typing state: `true` for a keystroke,
    /// `false` when the input was cleared.
    pub async fn set_typing(self: &Arc<Self>, typing: bool) {
        if typing {
            self.key_pressed().await;
        } else {
            self.stop_typing().await;
        }
    }

    /// Record a keystroke in the compose box.
    ///
    /// Ignored when no conversation is selected.
    pub async fn key_pressed(self: &Arc<Self>) {
        let signal = {
            let state = self.state.lock();
            match (state.active.clone(), state.receiver()) {
                (Some(conversation_id), Some(receiver_id)) => TypingSignal {
                    conversation_id,
                    receiver_id,
                },
                _ => return,
            }
        };

        let rising = {
            let mut typing = self.typing.lock();
            typing.abort_timer();
            typing.generation += 1;
            let generation = typing.generation;
            let rising = typing.target.is_none();
            if rising {
                typing.target = Some(signal.clone());
            }

            let weak = Arc::downgrade(self);
            let idle = self.config.typing_idle;
            typing.idle_timer = Some(tokio::spawn(async move {
                tokio::time::sleep(idle).await;
                if let Some(client) = weak.upgrade() {
                    client.finish_typing_burst(Some(generation)).await;
                }
            }));
            rising
        };

        if rising {
            tracing::debug!(conversation_id = %signal.conversation_id, "typing started");
            if let Err(e) = self.transport.signal_typing(&signal, TypingPhase::Start).await {
                tracing::debug!(err = %e, "typing_start not delivered");
            }
        }
    }

    /// End the current typing burst, if any.
    pub async fn stop_typing(&self) {
        self.finish_typing_burst(None).await;
    }

    /// Close the burst and send `typing_stop`.
    ///
    /// `Some(generation)` comes from the idle timer, which stands down if a
    /// later keystroke superseded it.
    async fn finish_typing_burst(&self, generation: Option<u64>) {
        let target = {
            let mut typing = self.typing.lock();
            match generation {
                Some(generation) => {
                    if generation != typing.generation {
                        return;
                    }
                    // Called from the timer itself; detach rather than abort.
                    typing.idle_timer = None;
                }
                None => typing.abort_timer(),
            }
            typing.target.take()
        };

        if let Some(signal) = target {
            tracing::debug!(conversation_id = %signal.conversation_id, "typing stopped");
            if let Err(e) = self.transport.signal_typing(&signal, TypingPhase::Stop).await {
                tracing::debug!(err = %e, "typing_stop not delivered");
            }
        }
    }

    /// Whether a typing burst is open.
    #[must_use]
    pub fn is_typing(&self) -> bool {
        self.typing.lock().target.is_some()
    }

    pub(crate) fn remote_typing_started(self: &Arc<Self>, notice: &TypingNotice) {
        let (conversation_id, generation, started) = {
            let mut state = self.state.lock();
            let Some(active) = state.active.clone() else {
                return;
            };
            if notice
                .conversation_id
                .as_ref()
                .is_some_and(|id| id != &active)
            {
                return;
            }
            if state.receiver().as_ref() != Some(&notice.user_id) {
                return;
            }
            let started = !state.other_typing;
            state.other_typing = true;
            state.remote_typing_generation += 1;
            (active, state.remote_typing_generation, started)
        };

        if started {
            self.emit(SyncEvent::TypingChanged {
                conversation_id,
                typing: true,
            });
        }

        let weak = Arc::downgrade(self);
        let timeout = self.config.remote_typing_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(client) = weak.upgrade() {
                client.expire_remote_typing(generation);
            }
        });
    }

    pub(crate) fn remote_typing_stopped(&self, notice: &TypingNotice) {
        let conversation_id = {
            let mut state = self.state.lock();
            if !state.other_typing || state.receiver().as_ref() != Some(&notice.user_id) {
                return;
            }
            let Some(active) = state.active.clone() else {
                return;
            };
            state.other_typing = false;
            state.remote_typing_generation += 1;
            active
        };
        self.emit(SyncEvent::TypingChanged {
            conversation_id,
            typing: false,
        });
    }

    fn expire_remote_typing(&self, generation: u64) {
        let conversation_id = {
            let mut state = self.state.lock();
            if state.remote_typing_generation != generation || !state.other_typing {
                return;
            }
            let Some(active) = state.active.clone() else {
                return;
            };
            state.other_typing = false;
            active
        };
        tracing::debug!(conversation_id = %conversation_id, "remote typing indicator expired");
        self.emit(SyncEvent::TypingChanged {
            conversation_id,
            typing: false,
        });
    }
}
