use std::sync::Arc;

use crate::config::EngineConfig;
use crate::dedup::DedupStore;
use crate::dispatch::Dispatcher;
use crate::extract;
use crate::model::RenderedMessage;

/// The host's rendered message list. The scanned marker lives on the element
/// itself, so a pass over an unchanged view is a no-op.
pub trait RenderedView: Send + Sync {
    fn snapshot(&self) -> Vec<RenderedMessage>;
    fn mark_scanned(&self, element_id: &str);
}

/// One scan pass: visit unscanned elements, mark them, and feed survivors of
/// the own-message and dedup filters into the dispatcher. Exists because
/// transport interception cannot see every path a message takes to the
/// screen. Returns the number of dispatches.
pub(crate) fn scan_view(
    view: &dyn RenderedView,
    config: &EngineConfig,
    dedup: &mut DedupStore,
    dispatcher: &Arc<Dispatcher>,
) -> usize {
    let mut dispatched = 0usize;
    for rendered in view.snapshot() {
        if rendered.scanned {
            continue;
        }
        view.mark_scanned(&rendered.element_id);

        let Some(message) = extract::normalize_rendered(&rendered, config) else {
            continue;
        };
        if !dedup.should_deliver(&message.id) {
            continue;
        }
        dispatcher.dispatch(&message);
        dispatched = dispatched.saturating_add(1);
    }
    if dispatched > 0 {
        log::debug!("view scan dispatched {dispatched} message(s)");
    }
    dispatched
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// In-memory stand-in for the host's rendered message list.
    #[derive(Default)]
    pub(crate) struct FakeView {
        pub(crate) elements: Mutex<Vec<RenderedMessage>>,
    }

    impl FakeView {
        pub(crate) fn with_messages(messages: Vec<RenderedMessage>) -> Self {
            Self {
                elements: Mutex::new(messages),
            }
        }

        pub(crate) fn push(&self, message: RenderedMessage) {
            if let Ok(mut elements) = self.elements.lock() {
                elements.push(message);
            }
        }
    }

    impl RenderedView for FakeView {
        fn snapshot(&self) -> Vec<RenderedMessage> {
            self.elements
                .lock()
                .map(|elements| elements.clone())
                .unwrap_or_default()
        }

        fn mark_scanned(&self, element_id: &str) {
            if let Ok(mut elements) = self.elements.lock() {
                for element in elements.iter_mut() {
                    if element.element_id == element_id {
                        element.scanned = true;
                    }
                }
            }
        }
    }

    pub(crate) fn rendered(element_id: &str, author: &str, body: &str) -> RenderedMessage {
        RenderedMessage {
            element_id: element_id.to_string(),
            author: author.to_string(),
            body: body.to_string(),
            thread: "General".to_string(),
            scanned: false,
        }
    }
}
