//! Duplicate suppression for discrete input events
//!
//! Some client stacks deliver the same logical pointer release twice (once
//! from the DOM handler, once from the capture fallback). The deduplicator
//! is a short-window memo keyed on the full action identity; an identical
//! commit action seen again inside the window is suppressed.

use crate::protocol::{InputAction, MouseButton};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Memo key: the full identity of one discrete commit action
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DedupeKey {
    session_id: String,
    kind: &'static str,
    x: i32,
    y: i32,
    button: MouseButton,
}

/// Short-window memo of recently forwarded commit events
pub struct EventDeduplicator {
    window: Duration,
    seen: Mutex<HashMap<DedupeKey, Instant>>,
}

impl EventDeduplicator {
    /// Create a deduplicator with the given suppression window
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Decide whether this event is a duplicate that must not be forwarded
    ///
    /// Only pointer-button-release events are deduplicated; continuous
    /// actions (pointer moves, wheel) and key events always pass. A
    /// non-duplicate commit event is recorded with the current timestamp.
    /// Expired entries are swept lazily on every insert, bounding the map
    /// under steady event rates.
    pub async fn should_suppress(&self, session_id: &str, event: &InputAction) -> bool {
        let key = match event {
            InputAction::MouseUp { x, y, button } => DedupeKey {
                session_id: session_id.to_string(),
                kind: "mouse-up",
                x: *x,
                y: *y,
                button: *button,
            },
            _ => return false,
        };

        let now = Instant::now();
        let mut seen = self.seen.lock().await;

        // Lazy eviction keeps the map bounded without a sweeper task
        seen.retain(|_, last| now.duration_since(*last) < self.window);

        if let Some(last) = seen.get(&key) {
            if now.duration_since(*last) < self.window {
                debug!(
                    session = session_id,
                    x = key.x,
                    y = key.y,
                    "Suppressing duplicate commit event"
                );
                return true;
            }
        }

        seen.insert(key, now);
        false
    }

    /// Number of live memo entries (expired ones may still be counted)
    pub async fn entry_count(&self) -> usize {
        self.seen.lock().await.len()
    }
}
