use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

/// How long a seen id keeps suppressing re-delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// Never forget; the id set lives as long as the engine session.
    Session,
    /// Forget after the window elapses, so a host that legitimately
    /// re-announces the same id (a re-rendered element, say) can notify again.
    Window(Duration),
}

/// Bounded set of recently seen message ids. Check-then-insert is a single
/// call and the engine only invokes it from its one processing context, so
/// two notifications for one id cannot race.
pub struct DedupStore {
    retention: Retention,
    seen: HashMap<String, Instant>,
}

impl DedupStore {
    pub fn session() -> Self {
        Self::new(Retention::Session)
    }

    pub fn windowed(window: Duration) -> Self {
        Self::new(Retention::Window(window))
    }

    pub fn new(retention: Retention) -> Self {
        Self {
            retention,
            seen: HashMap::new(),
        }
    }

    /// Returns whether `id` has not been seen within the retention window,
    /// marking it seen either way. Insertion is unconditional on first
    /// observation, independent of whether delivery later succeeds.
    pub fn should_deliver(&mut self, id: &str) -> bool {
        let now = Instant::now();
        self.prune(now);

        match self.seen.get(id) {
            Some(_) => false,
            None => {
                self.seen.insert(id.to_string(), now);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    fn prune(&mut self, now: Instant) {
        if let Retention::Window(window) = self.retention {
            self.seen
                .retain(|_, seen_at| now.duration_since(*seen_at) < window);
        }
    }
}
