//! Ordered, non-blocking progress delivery per session.

use chrono::Utc;
use darkroom_core::SessionId;
use darkroom_core::events::{ProgressDetail, ProgressEvent};
use darkroom_core::ports::ProgressSink;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

struct Inner {
    session_id: SessionId,
    sink: Arc<dyn ProgressSink>,
    tx: mpsc::Sender<ProgressEvent>,
    closed: AtomicBool,
    state: Mutex<StageProgressState>,
}

#[derive(Default)]
struct StageProgressState {
    sequence: u64,
    last_percent: HashMap<String, u8>,
}

/// Handle for reporting progress of one session. Cloning shares the channel.
///
/// Events are delivered by a single consumer task in the order they were
/// reported. When every handle is dropped the consumer drains and exits.
#[derive(Clone)]
pub struct SessionProgress {
    inner: Option<Arc<Inner>>,
}

impl SessionProgress {
    /// A handle that reports nothing.
    pub fn detached() -> Self {
        Self { inner: None }
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.inner.as_ref().map(|i| &i.session_id)
    }

    /// Report intermediate progress for `stage`.
    pub async fn report(&self, stage: &str, percent: u8, message: impl Into<String>) {
        self.emit(stage, percent, message, ProgressDetail::StageProgress)
            .await;
    }

    /// Report an event. `percent` is clamped to `0..=100` and never moves
    /// backwards for a stage.
    pub async fn emit(
        &self,
        stage: &str,
        percent: u8,
        message: impl Into<String>,
        detail: ProgressDetail,
    ) {
        let Some(inner) = &self.inner else {
            return;
        };
        if inner.closed.load(Ordering::Acquire) || !inner.sink.is_connected() {
            return;
        }

        // Held across the send so sequence order matches channel order.
        let mut state = inner.state.lock().await;
        let event = {
            let last = state.last_percent.get(stage).copied().unwrap_or(0);
            let percent = percent.min(100).max(last);
            state.last_percent.insert(stage.to_string(), percent);
            let sequence = state.sequence;
            state.sequence += 1;

            ProgressEvent {
                session_id: inner.session_id,
                sequence,
                stage: stage.to_string(),
                percent,
                message: message.into(),
                detail,
                emitted_at: Utc::now(),
            }
        };

        // A closed channel means nobody is listening.
        if inner.tx.send(event).await.is_err() {
            debug!(session = %inner.session_id, "Progress channel closed");
        }
        drop(state);
    }

    fn close(&self) {
        if let Some(inner) = &self.inner {
            inner.closed.store(true, Ordering::Release);
        }
    }
}

/// Registry of per-session progress channels.
pub struct ProgressReporter {
    buffer: usize,
    sessions: DashMap<SessionId, SessionProgress>,
}

impl ProgressReporter {
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer: buffer.max(1),
            sessions: DashMap::new(),
        }
    }

    /// Open a channel for `session_id` and spawn its delivery task.
    pub fn register(&self, session_id: SessionId, sink: Arc<dyn ProgressSink>) -> SessionProgress {
        let (tx, mut rx) = mpsc::channel::<ProgressEvent>(self.buffer);

        let consumer_sink = Arc::clone(&sink);
        let consumer_session = session_id;
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if !consumer_sink.is_connected() {
                    continue;
                }
                if let Err(e) = consumer_sink.deliver(event).await {
                    debug!(session = %consumer_session, error = %e, "Progress delivery failed");
                }
            }
            debug!(session = %consumer_session, "Progress consumer finished");
        });

        let handle = SessionProgress {
            inner: Some(Arc::new(Inner {
                session_id,
                sink,
                tx,
                closed: AtomicBool::new(false),
                state: Mutex::new(StageProgressState::default()),
            })),
        };
        self.sessions.insert(session_id, handle.clone());
        handle
    }

    /// Report through a registered session. Unknown sessions are ignored.
    pub async fn report(&self, session_id: &SessionId, stage: &str, percent: u8, message: &str) {
        let handle = self.sessions.get(session_id).map(|h| h.clone());
        if let Some(handle) = handle {
            handle.report(stage, percent, message).await;
        }
    }

    /// Stop accepting events for `session_id`. Queued events are still delivered.
    pub fn unregister(&self, session_id: &SessionId) {
        if let Some((_, handle)) = self.sessions.remove(session_id) {
            handle.close();
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }
}
