use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{RecorderError, Result};

const BROADCAST_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
enum StreamEvent {
    Token(String),
    Complete,
}

struct RecordedStream {
    tx: broadcast::Sender<StreamEvent>,
    buffer: Mutex<Vec<String>>,
    completed: AtomicBool,
    cancel: CancellationToken,
}

impl RecordedStream {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            tx,
            buffer: Mutex::new(Vec::new()),
            completed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    /// Appends to the buffer and broadcasts in one critical section, so a
    /// concurrent `snapshot_and_subscribe` can never see a token twice or
    /// miss it (see [`RecordedStream::snapshot_and_subscribe`]).
    fn push(&self, token: String) {
        let mut buf = self.buffer.lock().expect("recorder buffer poisoned");
        buf.push(token.clone());
        let _ = self.tx.send(StreamEvent::Token(token));
    }

    fn complete(&self) {
        self.completed.store(true, Ordering::SeqCst);
        let _ = self.tx.send(StreamEvent::Complete);
    }

    /// Subscribing while holding the buffer lock means every `push` either
    /// landed in the snapshot (lock acquired first) or will only reach the
    /// subscriber after this call returns (lock acquired after) — never
    /// both, never neither.
    fn snapshot_and_subscribe(&self) -> (Vec<String>, broadcast::Receiver<StreamEvent>) {
        let buf = self.buffer.lock().expect("recorder buffer poisoned");
        let rx = self.tx.subscribe();
        (buf.clone(), rx)
    }
}

/// A sink the LLM worker writes tokens into for one in-flight conversation.
pub struct RecorderHandle {
    conversation_id: String,
    stream: Arc<RecordedStream>,
}

impl RecorderHandle {
    pub fn push(&self, token: impl Into<String>) {
        self.stream.push(token.into());
    }

    pub fn complete(&self) {
        self.stream.complete();
    }

    /// Observed by the worker loop; cooperative cancellation only flips this,
    /// it does not forcibly unwind anything.
    pub fn cancel_token(&self) -> CancellationToken {
        self.stream.cancel.clone()
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }
}

/// Registry of in-flight and recently-completed response streams, one entry
/// per conversation, created on first token and addressable until the owner
/// forgets it. Restart loses every entry — there is no persistent backend.
#[derive(Default)]
pub struct ResponseRecorder {
    streams: DashMap<String, Arc<RecordedStream>>,
}

impl ResponseRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handle for `conversation_id`, creating a fresh stream if
    /// none is registered yet. Safe to call again for the same conversation
    /// while a stream is still live (e.g. a retried write) — it reuses the
    /// same broadcaster rather than starting a second one.
    pub fn recorder(&self, conversation_id: &str) -> RecorderHandle {
        let stream = self
            .streams
            .entry(conversation_id.to_string())
            .or_insert_with(|| Arc::new(RecordedStream::new()))
            .clone();
        RecorderHandle {
            conversation_id: conversation_id.to_string(),
            stream,
        }
    }

    /// Replays buffered tokens from `resume_position` (0 = from the start),
    /// then continues yielding live tokens until the stream completes.
    /// `resume_position` past the end of what's buffered yields nothing
    /// before going live, rather than erroring.
    pub fn replay(
        &self,
        conversation_id: &str,
        resume_position: usize,
    ) -> Result<impl futures_util::Stream<Item = String>> {
        let stream = self
            .streams
            .get(conversation_id)
            .map(|e| e.clone())
            .ok_or_else(|| RecorderError::ReplayFailed(conversation_id.to_string()))?;

        let (buffered, mut rx) = stream.snapshot_and_subscribe();
        let already_done = stream.completed.load(Ordering::SeqCst);
        let tail: Vec<String> = buffered.into_iter().skip(resume_position).collect();

        Ok(async_stream::stream! {
            for token in tail {
                yield token;
            }
            if already_done {
                return;
            }
            loop {
                match rx.recv().await {
                    Ok(StreamEvent::Token(t)) => yield t,
                    Ok(StreamEvent::Complete) => break,
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(conversation_id, skipped, "replay reader fell behind the broadcast buffer");
                        continue;
                    }
                }
            }
        })
    }

    /// Subset of `conversation_ids` with a live (not yet completed) stream.
    pub fn check(&self, conversation_ids: &[String]) -> Vec<String> {
        conversation_ids
            .iter()
            .filter(|id| {
                self.streams
                    .get(id.as_str())
                    .map(|e| !e.completed.load(Ordering::SeqCst))
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// Delivers a cancel signal to the worker writing `conversation_id`.
    /// Returns `false` if there is no such stream (already completed, or
    /// never started).
    pub fn request_cancel(&self, conversation_id: &str) -> bool {
        match self.streams.get(conversation_id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Drops a conversation's stream entirely. Callers use this once they're
    /// certain no further replay will be requested (e.g. some time after
    /// `complete()`); the registry never does this on its own.
    pub fn forget(&self, conversation_id: &str) {
        self.streams.remove(conversation_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn replay_from_zero_sees_every_token_in_order() {
        let registry = ResponseRecorder::new();
        let handle = registry.recorder("c1");
        handle.push("hello");
        handle.push(" world");
        handle.complete();

        let tokens: Vec<String> = registry.replay("c1", 0).unwrap().collect().await;
        assert_eq!(tokens, vec!["hello".to_string(), " world".to_string()]);
    }

    #[tokio::test]
    async fn replay_from_offset_skips_the_prefix() {
        let registry = ResponseRecorder::new();
        let handle = registry.recorder("c1");
        handle.push("a");
        handle.push("b");
        handle.push("c");
        handle.complete();

        let tokens: Vec<String> = registry.replay("c1", 2).unwrap().collect().await;
        assert_eq!(tokens, vec!["c".to_string()]);
    }

    #[tokio::test]
    async fn replay_continues_live_after_buffered_tokens() {
        let registry = Arc::new(ResponseRecorder::new());
        let handle = registry.recorder("c1");
        handle.push("first");

        let registry2 = registry.clone();
        let live = tokio::spawn(async move {
            let stream = registry2.replay("c1", 0).unwrap();
            tokio::pin!(stream);
            let mut collected = Vec::new();
            while let Some(t) = stream.next().await {
                collected.push(t);
            }
            collected
        });

        tokio::task::yield_now().await;
        handle.push("second");
        handle.complete();

        let tokens = live.await.unwrap();
        assert_eq!(tokens, vec!["first".to_string(), "second".to_string()]);
    }

    #[test]
    fn unknown_conversation_is_replay_failed() {
        let registry = ResponseRecorder::new();
        let err = registry.replay("missing", 0).unwrap_err();
        assert!(matches!(err, RecorderError::ReplayFailed(_)));
    }

    #[test]
    fn check_reports_only_incomplete_streams() {
        let registry = ResponseRecorder::new();
        let a = registry.recorder("a");
        let _b = registry.recorder("b");
        a.push("x");
        a.complete();

        let in_progress = registry.check(&["a".to_string(), "b".to_string(), "c".to_string()]);
        assert_eq!(in_progress, vec!["b".to_string()]);
    }

    #[test]
    fn request_cancel_is_observed_through_the_handle() {
        let registry = ResponseRecorder::new();
        let handle = registry.recorder("c1");
        let token = handle.cancel_token();
        assert!(!token.is_cancelled());
        assert!(registry.request_cancel("c1"));
        assert!(token.is_cancelled());
        assert!(!registry.request_cancel("no-such-conversation"));
    }
}
