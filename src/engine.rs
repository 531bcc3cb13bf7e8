use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use crate::config::EngineConfig;
use crate::consts::TEXT_SCAN_SETTLE_MS;
use crate::dedup::DedupStore;
use crate::dispatch::{Dispatcher, NotificationChannels};
use crate::extract;
use crate::intercept::TransportObserver;
use crate::model::{
    EngineStatus, NormalizedMessage, PayloadBody, RawPayload, RuntimeDiagnostics, RuntimeState,
};
use crate::scanner::{self, RenderedView};
use crate::unix_now_secs;

/// Handle to a running notification engine. Cloning shares the same engine;
/// all state is torn down when the engine is disabled, never implicitly.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<EngineShared>,
}

struct EngineShared {
    config: Arc<EngineConfig>,
    runtime: Mutex<RuntimeState>,
    /// Session-lifetime store gating the transport pipeline.
    seen: Mutex<DedupStore>,
    /// Time-boxed store gating the view scanner; a host re-render may
    /// legitimately re-announce an element id after the window passes.
    dom_seen: Mutex<DedupStore>,
    dispatcher: Arc<Dispatcher>,
    view: Arc<dyn RenderedView>,
    tap_tx: mpsc::UnboundedSender<RawPayload>,
}

impl Engine {
    /// Builds the pipeline and starts the processing task plus the periodic
    /// view scan. Must be called from within a tokio runtime.
    pub fn start(
        config: EngineConfig,
        channels: NotificationChannels,
        view: Arc<dyn RenderedView>,
    ) -> Engine {
        let config = Arc::new(config.normalized());
        let (tap_tx, tap_rx) = mpsc::unbounded_channel();
        let dispatcher = Arc::new(Dispatcher::new(
            channels,
            Duration::from_secs(config.toast_duration_secs),
            config.audio_volume,
        ));

        let shared = Arc::new(EngineShared {
            config: config.clone(),
            runtime: Mutex::new(RuntimeState::default()),
            seen: Mutex::new(DedupStore::session()),
            dom_seen: Mutex::new(DedupStore::windowed(Duration::from_secs(
                config.dedup_window_secs,
            ))),
            dispatcher,
            view,
            tap_tx,
        });

        let pipeline = shared.clone();
        tokio::spawn(async move {
            process_loop(pipeline, tap_rx).await;
        });
        start_scan_timer(&shared);

        log::debug!("engine started");
        Engine { shared }
    }

    /// Observation handle for wrapping the host's transports.
    pub fn observer(&self) -> TransportObserver {
        TransportObserver::new(self.shared.config.clone(), self.shared.tap_tx.clone())
    }

    pub fn enable(&self) {
        {
            let Ok(mut runtime) = self.shared.runtime.lock() else {
                return;
            };
            if runtime.active && runtime.scan_stop_tx.is_some() {
                return;
            }
            runtime.active = true;
        }
        start_scan_timer(&self.shared);
        log::debug!("engine enabled");
    }

    /// Stops scheduling new work. In-flight completions still run and no-op
    /// against the inactive flag.
    pub fn disable(&self) {
        if let Ok(mut runtime) = self.shared.runtime.lock() {
            runtime.active = false;
            if let Some(stop_tx) = runtime.scan_stop_tx.take() {
                let _ = stop_tx.send(true);
            }
        }
        log::debug!("engine disabled");
    }

    /// One manual view scan, independent of the periodic timer.
    pub fn scan(&self) -> usize {
        self.shared.run_dom_scan()
    }

    /// Pushes a synthetic message through the dispatcher; returns the total
    /// notification count so far.
    pub fn test(&self) -> u64 {
        let message = NormalizedMessage {
            id: format!("test-{}", chrono::Utc::now().timestamp_millis()),
            author: "Test User".to_string(),
            body: "This is a test notification".to_string(),
            thread: "General Channel".to_string(),
            author_ref: None,
        };
        self.shared.dispatcher.dispatch(&message);
        self.shared.dispatcher.total_notifications()
    }

    pub fn status(&self) -> EngineStatus {
        let (active, processed_message_count) = self
            .shared
            .runtime
            .lock()
            .map(|runtime| (runtime.active, runtime.processed_message_count))
            .unwrap_or((false, 0));

        EngineStatus {
            active,
            total_notifications: self.shared.dispatcher.total_notifications(),
            processed_message_count,
            permission_state: self.shared.dispatcher.permission_state().as_str(),
        }
    }

    pub fn diagnostics(&self) -> RuntimeDiagnostics {
        let (active, last_observed_at) = self
            .shared
            .runtime
            .lock()
            .map(|runtime| (runtime.active, runtime.last_observed_at))
            .unwrap_or((false, None));
        let last_dispatch = self.shared.dispatcher.last_dispatch();
        let now = unix_now_secs();

        RuntimeDiagnostics {
            active,
            last_observed_at,
            last_dispatch_at: last_dispatch.as_ref().map(|(at, _)| *at),
            last_dispatch_id: last_dispatch.map(|(_, id)| id),
            stale_for_seconds: last_observed_at.map(|last| now.saturating_sub(last)),
            pause_until: self.shared.dispatcher.pause_until(),
        }
    }

    pub fn pause_for_minutes(&self, minutes: u64) {
        self.shared.dispatcher.pause_for_minutes(minutes);
    }

    pub fn pause_forever(&self) {
        self.shared.dispatcher.pause_forever();
    }

    pub fn resume(&self) {
        self.shared.dispatcher.resume();
    }
}

impl EngineShared {
    fn is_active(&self) -> bool {
        self.runtime
            .lock()
            .map(|runtime| runtime.active)
            .unwrap_or(false)
    }

    /// Extraction, dedup gating, and dispatch initiation for one captured
    /// payload run to completion before the next payload is taken; the
    /// single consumer task is what makes check-then-insert race-free.
    fn handle_payload(self: &Arc<Self>, payload: RawPayload) {
        if !self.is_active() {
            return;
        }
        if let Ok(mut runtime) = self.runtime.lock() {
            runtime.last_observed_at = Some(unix_now_secs());
        }

        match payload.body {
            PayloadBody::Structured(value) => {
                for message in extract::extract_all(&value, &self.config) {
                    self.gate_and_dispatch(&message);
                }
            }
            PayloadBody::Text(text) => {
                if !self.config.text_mentions_messages(&text) {
                    return;
                }
                log::debug!("message markers in raw text from {}", payload.source);
                // Raw text cannot yield structured fields; give the host a
                // moment to render, then scan the view instead.
                let shared = self.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(TEXT_SCAN_SETTLE_MS)).await;
                    shared.run_dom_scan();
                });
            }
        }
    }

    fn gate_and_dispatch(self: &Arc<Self>, message: &NormalizedMessage) {
        let deliverable = if extract::is_generated_id(&message.id) && !self.config.dedup_generated_ids
        {
            // A synthesized id is unique per capture; tracking it would only
            // grow the store without ever suppressing anything.
            true
        } else {
            self.seen
                .lock()
                .map(|mut seen| seen.should_deliver(&message.id))
                .unwrap_or(false)
        };

        if !deliverable {
            return;
        }
        if let Ok(mut runtime) = self.runtime.lock() {
            runtime.processed_message_count = runtime.processed_message_count.saturating_add(1);
        }
        self.dispatcher.dispatch(message);
    }

    fn run_dom_scan(self: &Arc<Self>) -> usize {
        if !self.is_active() {
            return 0;
        }
        let Ok(mut dom_seen) = self.dom_seen.lock() else {
            return 0;
        };
        let dispatched = scanner::scan_view(
            self.view.as_ref(),
            &self.config,
            &mut dom_seen,
            &self.dispatcher,
        );
        if dispatched > 0 {
            if let Ok(mut runtime) = self.runtime.lock() {
                runtime.processed_message_count =
                    runtime.processed_message_count.saturating_add(dispatched as u64);
                runtime.last_observed_at = Some(unix_now_secs());
            }
        }
        dispatched
    }
}

async fn process_loop(shared: Arc<EngineShared>, mut tap_rx: mpsc::UnboundedReceiver<RawPayload>) {
    while let Some(payload) = tap_rx.recv().await {
        shared.handle_payload(payload);
    }
    log::debug!("pipeline closed, processing task ending");
}

fn start_scan_timer(shared: &Arc<EngineShared>) {
    let task_epoch;
    let mut stop_rx;
    {
        let Ok(mut runtime) = shared.runtime.lock() else {
            return;
        };
        if runtime.scan_stop_tx.is_some() {
            return;
        }
        let (stop_tx, rx) = watch::channel(false);
        runtime.scan_stop_tx = Some(stop_tx);
        runtime.scan_epoch = runtime.scan_epoch.wrapping_add(1);
        task_epoch = runtime.scan_epoch;
        stop_rx = rx;
    }

    let shared = shared.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(
            shared.config.dom_scan_interval_secs,
        ));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    shared.run_dom_scan();
                }
            }
        }

        if let Ok(mut runtime) = shared.runtime.lock() {
            if runtime.scan_epoch == task_epoch {
                runtime.scan_stop_tx = None;
            }
        }
        log::debug!("scan timer stopped");
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::testing::{
        RecordingAudio, RecordingInApp, RecordingRouter, RecordingToast, StubDesktop,
    };
    use crate::model::{PermissionState, TransportKind};
    use crate::scanner::testing::{rendered, FakeView};

    struct EngineHarness {
        engine: Engine,
        toast: Arc<RecordingToast>,
        in_app: Arc<RecordingInApp>,
        view: Arc<FakeView>,
    }

    fn start_engine(config: EngineConfig, desktop: StubDesktop) -> EngineHarness {
        let toast = Arc::new(RecordingToast::default());
        let in_app = Arc::new(RecordingInApp::default());
        let view = Arc::new(FakeView::default());
        let engine = Engine::start(
            config,
            NotificationChannels {
                toast: toast.clone(),
                audio: Arc::new(RecordingAudio::available()),
                desktop: Arc::new(desktop),
                in_app: in_app.clone(),
                router: Arc::new(RecordingRouter::default()),
            },
            view.clone(),
        );
        EngineHarness {
            engine,
            toast,
            in_app,
            view,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn same_id_from_two_transports_dispatches_once() {
        let h = start_engine(
            EngineConfig::default(),
            StubDesktop::with_permission(PermissionState::Granted),
        );
        let observer = h.engine.observer();

        observer.observe(
            TransportKind::StreamPush,
            "wss://host/websocket",
            r#"{"id": 99, "author_name": "Ada", "body": "hi"}"#,
        );
        observer.observe(
            TransportKind::RequestResponse,
            "/mail/fetch",
            r#"{"result": [{"id": 99, "author_name": "Ada", "body": "hi"}]}"#,
        );
        settle().await;

        assert_eq!(h.toast.shown.lock().unwrap().len(), 1);
        let status = h.engine.status();
        assert_eq!(status.total_notifications, 1);
        assert_eq!(status.processed_message_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn generated_ids_skip_dedup_by_default() {
        let h = start_engine(
            EngineConfig::default(),
            StubDesktop::with_permission(PermissionState::Granted),
        );
        let observer = h.engine.observer();

        let payload = r#"{"author_name": "Ada", "body": "no id here"}"#;
        observer.observe(TransportKind::StreamPush, "wss://host/websocket", payload);
        observer.observe(TransportKind::StreamPush, "wss://host/websocket", payload);
        settle().await;

        assert_eq!(h.toast.shown.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn text_payload_with_markers_triggers_a_view_scan() {
        let h = start_engine(
            EngineConfig::default(),
            StubDesktop::with_permission(PermissionState::Granted),
        );
        h.view.push(rendered("m1", "Ada", "rendered hello"));

        let observer = h.engine.observer();
        observer.observe(
            TransportKind::RequestResponse,
            "/mail/render",
            "<div class=\"o_Message\">hello</div>",
        );
        // Before the settle delay elapses nothing has fired.
        assert!(h.toast.shown.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(TEXT_SCAN_SETTLE_MS + 100)).await;
        assert_eq!(h.toast.shown.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_timer_scans_the_view() {
        let h = start_engine(
            EngineConfig::default(),
            StubDesktop::with_permission(PermissionState::Granted),
        );
        h.view.push(rendered("m1", "Ada", "from the timer"));

        tokio::time::sleep(Duration::from_secs(
            crate::consts::DOM_SCAN_INTERVAL_SECS + 1,
        ))
        .await;
        assert_eq!(h.toast.shown.lock().unwrap().len(), 1);

        // Further ticks over the unchanged view stay quiet.
        tokio::time::sleep(Duration::from_secs(
            crate::consts::DOM_SCAN_INTERVAL_SECS * 3,
        ))
        .await;
        assert_eq!(h.toast.shown.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disable_stops_processing_and_enable_restores_it() {
        let h = start_engine(
            EngineConfig::default(),
            StubDesktop::with_permission(PermissionState::Granted),
        );
        let observer = h.engine.observer();

        h.engine.disable();
        assert!(!h.engine.status().active);
        observer.observe(
            TransportKind::StreamPush,
            "wss://host/websocket",
            r#"{"id": 1, "author_name": "Ada", "body": "while disabled"}"#,
        );
        settle().await;
        assert!(h.toast.shown.lock().unwrap().is_empty());

        h.engine.enable();
        assert!(h.engine.status().active);
        observer.observe(
            TransportKind::StreamPush,
            "wss://host/websocket",
            r#"{"id": 2, "author_name": "Ada", "body": "after enable"}"#,
        );
        settle().await;
        assert_eq!(h.toast.shown.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn own_messages_never_reach_any_channel() {
        let config = EngineConfig {
            current_user: Some("CurrentUser".to_string()),
            ..EngineConfig::default()
        };
        let h = start_engine(config, StubDesktop::with_permission(PermissionState::Granted));
        let observer = h.engine.observer();

        observer.observe(
            TransportKind::StreamPush,
            "wss://host/websocket",
            r#"{"id": 3, "author_name": "CurrentUser", "body": "talking to myself"}"#,
        );
        settle().await;

        assert!(h.toast.shown.lock().unwrap().is_empty());
        assert!(h.in_app.notes.lock().unwrap().is_empty());
        assert_eq!(h.engine.status().total_notifications, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_surface_dispatches_and_counts() {
        let h = start_engine(
            EngineConfig::default(),
            StubDesktop::with_permission(PermissionState::Granted),
        );
        assert_eq!(h.engine.test(), 1);
        settle().await;
        assert_eq!(h.toast.shown.lock().unwrap().len(), 1);
        assert_eq!(h.engine.status().total_notifications, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn diagnostics_track_observation_and_dispatch() {
        let h = start_engine(
            EngineConfig::default(),
            StubDesktop::with_permission(PermissionState::Granted),
        );
        assert!(h.engine.diagnostics().last_observed_at.is_none());

        let observer = h.engine.observer();
        observer.observe(
            TransportKind::StreamPush,
            "wss://host/websocket",
            r#"{"id": 7, "author_name": "Ada", "body": "hi"}"#,
        );
        settle().await;

        let diag = h.engine.diagnostics();
        assert!(diag.last_observed_at.is_some());
        assert_eq!(diag.last_dispatch_id.as_deref(), Some("7"));
    }
}
