use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use cfduel_core::events::ServerEvent;

/// Bounded per-session outbound queue. Publishers push without ever
/// blocking; a writer task drains with [`Outbox::next`].
///
/// Overflow policy: the oldest droppable event is evicted to admit the
/// newcomer, so a slow subscriber keeps seeing the newest snapshots.
/// Events carrying unique facts (`problem-solved`, `game-started`) are
/// never evicted and may transiently push the queue past its bound.
#[derive(Clone)]
pub struct Outbox {
    shared: Arc<Shared>,
}

struct Shared {
    queue: Mutex<Queue>,
    notify: Notify,
}

struct Queue {
    events: VecDeque<ServerEvent>,
    capacity: usize,
    closed: bool,
}

impl Outbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(Queue {
                    events: VecDeque::new(),
                    capacity,
                    closed: false,
                }),
                notify: Notify::new(),
            }),
        }
    }

    /// Enqueue an event, applying the overflow policy. Never blocks.
    pub fn push(&self, event: ServerEvent) {
        {
            let mut queue = self.shared.queue.lock().expect("outbox lock poisoned");
            if queue.closed {
                return;
            }
            if queue.events.len() >= queue.capacity {
                if let Some(pos) = queue.events.iter().position(ServerEvent::droppable) {
                    let dropped = queue.events.remove(pos).expect("position just found");
                    tracing::debug!(event = dropped.name(), "Outbox full, dropped oldest event");
                } else if event.droppable() {
                    tracing::debug!(event = event.name(), "Outbox full, dropped incoming event");
                    return;
                }
            }
            queue.events.push_back(event);
        }
        self.shared.notify.notify_one();
    }

    /// Await the next event. Returns `None` once the outbox is closed
    /// and drained.
    pub async fn next(&self) -> Option<ServerEvent> {
        loop {
            let notified = self.shared.notify.notified();
            {
                let mut queue = self.shared.queue.lock().expect("outbox lock poisoned");
                if let Some(event) = queue.events.pop_front() {
                    return Some(event);
                }
                if queue.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Stop accepting events; `next` returns `None` after the queue
    /// drains.
    pub fn close(&self) {
        self.shared
            .queue
            .lock()
            .expect("outbox lock poisoned")
            .closed = true;
        self.shared.notify.notify_one();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.shared.queue.lock().unwrap().events.len()
    }
}
