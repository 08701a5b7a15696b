use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use uuid::Uuid;

use dagcore::{Event, EventPayload, SessionId};

/// Lifecycle of a session's event queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Completing,
    Closed,
}

struct SessionHandle {
    sender: broadcast::Sender<Event>,
    /// Replay buffer so late subscribers see the stream from the start.
    backlog: VecDeque<Event>,
    /// Events evicted from the backlog before anyone subscribed.
    dropped: u64,
    state: SessionState,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
}

/// Process-wide event bus, partitioned by session id. Publishing is
/// non-blocking; each subscriber gets an independent, ordered view of the
/// session's stream (the bus tees).
pub struct SessionBus {
    capacity: usize,
    grace: Duration,
    sessions: Mutex<HashMap<SessionId, SessionHandle>>,
}

impl SessionBus {
    pub fn new(capacity: usize, grace: Duration) -> Self {
        Self {
            capacity,
            grace,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn create(self: &Arc<Self>) -> SessionId {
        let id = Uuid::new_v4();
        let (sender, _) = broadcast::channel(self.capacity);
        let handle = SessionHandle {
            sender,
            backlog: VecDeque::new(),
            dropped: 0,
            state: SessionState::Open,
            created_at: Utc::now(),
        };
        self.sessions
            .lock()
            .expect("session bus poisoned")
            .insert(id, handle);
        tracing::debug!("session {} created", id);
        id
    }

    pub fn state(&self, id: SessionId) -> Option<SessionState> {
        self.sessions
            .lock()
            .expect("session bus poisoned")
            .get(&id)
            .map(|h| h.state)
    }

    /// Publish an event to its session. Never blocks. If the backlog is
    /// full the oldest non-terminal entry is evicted and accounted for via
    /// a `status{dropped}` event at subscription time. Terminal events are
    /// never evicted; publishing one moves the session to `Completing` and
    /// schedules removal after the grace period.
    pub fn publish(self: &Arc<Self>, event: Event) {
        let terminal = event.payload.is_terminal();
        let session_id = event.session_id;
        {
            let mut sessions = self.sessions.lock().expect("session bus poisoned");
            let Some(handle) = sessions.get_mut(&session_id) else {
                tracing::warn!("dropping event for unknown session {}", session_id);
                return;
            };
            if handle.state != SessionState::Open {
                return;
            }

            if handle.backlog.len() >= self.capacity {
                let evictable = handle
                    .backlog
                    .iter()
                    .position(|e| !e.payload.is_terminal());
                if let Some(idx) = evictable {
                    handle.backlog.remove(idx);
                    handle.dropped += 1;
                }
            }
            handle.backlog.push_back(event.clone());
            // Live subscribers get the same event; a lagging receiver
            // surfaces its own drop count via RecvError::Lagged.
            let _ = handle.sender.send(event);

            if terminal {
                handle.state = SessionState::Completing;
            }
        }

        if terminal {
            let bus = Arc::clone(self);
            let grace = self.grace;
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                bus.remove(session_id);
            });
        }
    }

    fn remove(&self, id: SessionId) {
        let mut sessions = self.sessions.lock().expect("session bus poisoned");
        if let Some(handle) = sessions.get_mut(&id) {
            handle.state = SessionState::Closed;
        }
        sessions.remove(&id);
        tracing::debug!("session {} removed", id);
    }

    /// Subscribe to a session. The stream replays the backlog, then yields
    /// live events in publish order, and closes after the terminal event.
    pub fn subscribe(&self, id: SessionId) -> Option<EventStream> {
        let sessions = self.sessions.lock().expect("session bus poisoned");
        let handle = sessions.get(&id)?;
        // Snapshot and receiver creation happen under the same lock as
        // publish, so the stream neither misses nor duplicates events.
        let mut backlog: VecDeque<Event> = handle.backlog.clone();
        if handle.dropped > 0 {
            backlog.push_front(Event {
                session_id: id,
                timestamp: Utc::now(),
                payload: EventPayload::Status {
                    message: "events dropped due to back-pressure".to_string(),
                    dropped: Some(handle.dropped),
                },
            });
        }
        Some(EventStream {
            session_id: id,
            backlog,
            receiver: handle.sender.subscribe(),
            done: false,
        })
    }
}

/// Ordered event iterator for one subscriber.
pub struct EventStream {
    session_id: SessionId,
    backlog: VecDeque<Event>,
    receiver: broadcast::Receiver<Event>,
    done: bool,
}

impl EventStream {
    /// Next event, or `None` once the terminal event has been yielded.
    pub async fn next(&mut self) -> Option<Event> {
        if self.done {
            return None;
        }
        if let Some(event) = self.backlog.pop_front() {
            if event.payload.is_terminal() {
                self.done = true;
            }
            return Some(event);
        }
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if event.payload.is_terminal() {
                        self.done = true;
                    }
                    return Some(event);
                }
                Err(broadcast::error::RecvError::Lagged(dropped)) => {
                    return Some(Event {
                        session_id: self.session_id,
                        timestamp: Utc::now(),
                        payload: EventPayload::Status {
                            message: "events dropped due to back-pressure".to_string(),
                            dropped: Some(dropped),
                        },
                    });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.done = true;
                    return None;
                }
            }
        }
    }

    /// Drain the stream into a vector, ending at the terminal event.
    pub async fn collect(mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dagcore::RunSummary;

    fn status(session_id: SessionId, message: &str) -> Event {
        Event {
            session_id,
            timestamp: Utc::now(),
            payload: EventPayload::Status {
                message: message.to_string(),
                dropped: None,
            },
        }
    }

    fn complete(session_id: SessionId) -> Event {
        Event {
            session_id,
            timestamp: Utc::now(),
            payload: EventPayload::Complete {
                summary: RunSummary::default(),
            },
        }
    }

    #[tokio::test]
    async fn subscriber_sees_backlog_then_live_events_in_order() {
        let bus = Arc::new(SessionBus::new(64, Duration::from_secs(5)));
        let id = bus.create();

        bus.publish(status(id, "one"));
        bus.publish(status(id, "two"));

        let mut stream = bus.subscribe(id).unwrap();
        bus.publish(complete(id));

        let mut kinds = Vec::new();
        while let Some(event) = stream.next().await {
            kinds.push(event.payload.kind());
        }
        assert_eq!(kinds, vec!["status", "status", "complete"]);
    }

    #[tokio::test]
    async fn two_subscribers_get_independent_views() {
        let bus = Arc::new(SessionBus::new(64, Duration::from_secs(5)));
        let id = bus.create();

        bus.publish(status(id, "one"));
        let first = bus.subscribe(id).unwrap();
        let second = bus.subscribe(id).unwrap();
        bus.publish(complete(id));

        let a = first.collect().await;
        let b = second.collect().await;
        assert_eq!(a.len(), 2);
        assert_eq!(b.len(), 2);
        assert_eq!(a.last().unwrap().payload.kind(), "complete");
        assert_eq!(b.last().unwrap().payload.kind(), "complete");
    }

    #[tokio::test]
    async fn overflow_reports_dropped_count_and_keeps_terminal() {
        let bus = Arc::new(SessionBus::new(4, Duration::from_secs(5)));
        let id = bus.create();

        for i in 0..10 {
            bus.publish(status(id, &format!("event {i}")));
        }
        bus.publish(complete(id));

        let events = bus.subscribe(id).unwrap().collect().await;
        let first = &events[0];
        match &first.payload {
            EventPayload::Status { dropped, .. } => assert_eq!(*dropped, Some(7)),
            other => panic!("expected drop report, got {}", other.kind()),
        }
        assert_eq!(events.last().unwrap().payload.kind(), "complete");
    }

    #[tokio::test]
    async fn session_is_removed_after_grace_period() {
        let bus = Arc::new(SessionBus::new(16, Duration::from_millis(20)));
        let id = bus.create();
        bus.publish(complete(id));
        assert_eq!(bus.state(id), Some(SessionState::Completing));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(bus.state(id), None);
        assert!(bus.subscribe(id).is_none());
    }

    #[tokio::test]
    async fn publishing_after_terminal_is_ignored() {
        let bus = Arc::new(SessionBus::new(16, Duration::from_secs(5)));
        let id = bus.create();
        bus.publish(complete(id));
        bus.publish(status(id, "late"));

        let events = bus.subscribe(id).unwrap().collect().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload.kind(), "complete");
    }
}
