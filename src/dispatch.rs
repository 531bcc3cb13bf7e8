use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;

use crate::consts::{
    DESKTOP_NOTE_CLOSE_SECS, PAUSE_FOREVER_SENTINEL, TONE_DECAY_MS, TONE_FREQUENCY_HZ, TONE_GAIN,
};
use crate::model::{AudioState, NormalizedMessage, PermissionState};
use crate::unix_now_secs;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("channel unavailable: {0}")]
    Unavailable(String),
    #[error("playback blocked: {0}")]
    Blocked(String),
    #[error("delivery failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Toast {
    pub thread: String,
    pub author: String,
    pub body: String,
}

pub type ToastId = u64;

#[derive(Debug, Clone, PartialEq)]
pub struct ToneSpec {
    pub frequency_hz: f32,
    pub gain: f32,
    pub decay: Duration,
}

impl Default for ToneSpec {
    fn default() -> Self {
        Self {
            frequency_hz: TONE_FREQUENCY_HZ,
            gain: TONE_GAIN,
            decay: Duration::from_millis(TONE_DECAY_MS),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DesktopNote {
    pub title: String,
    pub body: String,
    pub icon: Option<String>,
    /// Platform coalescing key; repeats with the same tag replace each other.
    pub tag: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesktopEvent {
    Clicked,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InAppKind {
    Info,
    Warning,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InAppNote {
    pub text: String,
    pub title: String,
    pub kind: InAppKind,
    pub sticky: bool,
}

/// Transient in-page notification surface. Always available; never gated by
/// any permission.
pub trait ToastSink: Send + Sync {
    fn show(&self, toast: Toast) -> ToastId;
    fn dismiss(&self, toast: ToastId);
}

/// Short audio cue playback, with a synthesized-tone escape hatch for hosts
/// where asset playback is blocked.
pub trait AudioCue: Send + Sync {
    fn state(&self) -> AudioState;
    fn play_asset(&self, volume: f32) -> Result<(), DeliveryError>;
    fn play_tone(&self, tone: &ToneSpec) -> Result<(), DeliveryError>;
}

/// OS-level notification capability. `request_permission` kicks off the
/// asynchronous prompt and resolves through the returned receiver; `show`
/// resolves its receiver on click or close.
pub trait DesktopNotifier: Send + Sync {
    fn permission(&self) -> PermissionState;
    fn request_permission(&self) -> oneshot::Receiver<PermissionState>;
    fn show(&self, note: DesktopNote) -> Result<oneshot::Receiver<DesktopEvent>, DeliveryError>;
    fn close(&self, tag: &str);
}

/// Host-rendered banner, used only when the desktop channel cannot fire.
pub trait InAppNotifier: Send + Sync {
    fn add(&self, note: InAppNote);
}

/// Host navigation collaborator, invoked only from a desktop-note click.
pub trait ThreadRouter: Send + Sync {
    fn open_thread(&self, thread: &str);
}

pub struct NotificationChannels {
    pub toast: Arc<dyn ToastSink>,
    pub audio: Arc<dyn AudioCue>,
    pub desktop: Arc<dyn DesktopNotifier>,
    pub in_app: Arc<dyn InAppNotifier>,
    pub router: Arc<dyn ThreadRouter>,
}

/// Drives every delivery surface for one normalized message. Best effort
/// throughout: no channel failure reaches the caller, and the toast fires
/// regardless of what the other channels do.
pub(crate) struct Dispatcher {
    channels: NotificationChannels,
    permission: Mutex<PermissionState>,
    permission_request_pending: Mutex<bool>,
    audio_state: AudioState,
    pause_until: Mutex<Option<u64>>,
    total_notifications: AtomicU64,
    last_dispatch: Mutex<Option<(u64, String)>>,
    toast_duration: Duration,
    audio_volume: f32,
}

impl Dispatcher {
    pub(crate) fn new(
        channels: NotificationChannels,
        toast_duration: Duration,
        audio_volume: f32,
    ) -> Self {
        // Probe the host capabilities once; further permission transitions
        // only happen through an explicit prompt answer.
        let permission = channels.desktop.permission();
        let audio_state = channels.audio.state();
        Self {
            channels,
            permission: Mutex::new(permission),
            permission_request_pending: Mutex::new(false),
            audio_state,
            pause_until: Mutex::new(None),
            total_notifications: AtomicU64::new(0),
            last_dispatch: Mutex::new(None),
            toast_duration,
            audio_volume,
        }
    }

    pub(crate) fn dispatch(self: &Arc<Self>, message: &NormalizedMessage) {
        if self.is_paused() {
            log::debug!("notifications paused, dropping id={}", message.id);
            return;
        }

        self.total_notifications.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_dispatch.lock() {
            *last = Some((unix_now_secs(), message.id.clone()));
        }
        log::debug!(
            "dispatching id={} author={} thread={}",
            message.id,
            message.author,
            message.thread
        );

        self.show_toast(message);
        self.play_cue();
        self.deliver_desktop(message);
    }

    fn show_toast(self: &Arc<Self>, message: &NormalizedMessage) {
        let toast_id = self.channels.toast.show(Toast {
            thread: message.thread.clone(),
            author: message.author.clone(),
            body: message.body.clone(),
        });

        let dispatcher = Arc::clone(self);
        let duration = self.toast_duration;
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            dispatcher.channels.toast.dismiss(toast_id);
        });
    }

    fn play_cue(&self) {
        if self.audio_state == AudioState::Unavailable {
            return;
        }
        if let Err(asset_error) = self.channels.audio.play_asset(self.audio_volume) {
            log::debug!("audio asset failed, synthesizing tone: {asset_error}");
            if let Err(tone_error) = self.channels.audio.play_tone(&ToneSpec::default()) {
                log::debug!("tone synthesis failed: {tone_error}");
            }
        }
    }

    fn deliver_desktop(self: &Arc<Self>, message: &NormalizedMessage) {
        let state = self
            .permission
            .lock()
            .map(|guard| *guard)
            .unwrap_or(PermissionState::Denied);

        match state {
            PermissionState::Granted => self.show_desktop_note(message),
            PermissionState::Default => self.request_permission_then_retry(message),
            PermissionState::Denied | PermissionState::Unsupported => {
                self.in_app_fallback(message, InAppKind::Info);
            }
        }
    }

    /// Issues the asynchronous permission prompt and re-enters channel
    /// selection for the triggering message once it resolves. The dispatch
    /// call itself never waits on the user. While a prompt is already in
    /// flight, further messages take the in-app fallback instead of queueing.
    fn request_permission_then_retry(self: &Arc<Self>, message: &NormalizedMessage) {
        {
            let Ok(mut pending) = self.permission_request_pending.lock() else {
                self.in_app_fallback(message, InAppKind::Info);
                return;
            };
            if *pending {
                self.in_app_fallback(message, InAppKind::Info);
                return;
            }
            *pending = true;
        }

        let receiver = self.channels.desktop.request_permission();
        let dispatcher = Arc::clone(self);
        let message = message.clone();
        tokio::spawn(async move {
            let answer = receiver.await.unwrap_or(PermissionState::Denied);
            log::debug!("permission prompt resolved: {}", answer.as_str());
            if let Ok(mut permission) = dispatcher.permission.lock() {
                *permission = answer;
            }
            if let Ok(mut pending) = dispatcher.permission_request_pending.lock() {
                *pending = false;
            }
            match answer {
                PermissionState::Granted => dispatcher.show_desktop_note(&message),
                _ => dispatcher.in_app_fallback(&message, InAppKind::Info),
            }
        });
    }

    fn show_desktop_note(self: &Arc<Self>, message: &NormalizedMessage) {
        let tag = format!("chime-{}", message.thread);
        let note = DesktopNote {
            title: format!("{} - {}", message.author, message.thread),
            body: message.body.clone(),
            icon: None,
            tag: tag.clone(),
        };

        match self.channels.desktop.show(note) {
            Ok(events) => {
                let dispatcher = Arc::clone(self);
                let thread = message.thread.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        event = events => {
                            if matches!(event, Ok(DesktopEvent::Clicked)) {
                                dispatcher.channels.router.open_thread(&thread);
                            }
                        }
                        _ = tokio::time::sleep(Duration::from_secs(DESKTOP_NOTE_CLOSE_SECS)) => {
                            dispatcher.channels.desktop.close(&tag);
                        }
                    }
                });
            }
            Err(error) => {
                log::debug!("desktop note failed, falling back in-app: {error}");
                self.in_app_fallback(message, InAppKind::Warning);
            }
        }
    }

    /// `Info` for the expected permission fallbacks, `Warning` when a channel
    /// that should have worked did not.
    fn in_app_fallback(&self, message: &NormalizedMessage, kind: InAppKind) {
        self.channels.in_app.add(InAppNote {
            text: format!("{}: {}", message.author, message.body),
            title: message.thread.clone(),
            kind,
            sticky: false,
        });
    }

    pub(crate) fn permission_state(&self) -> PermissionState {
        self.permission
            .lock()
            .map(|guard| *guard)
            .unwrap_or(PermissionState::Denied)
    }

    pub(crate) fn total_notifications(&self) -> u64 {
        self.total_notifications.load(Ordering::Relaxed)
    }

    pub(crate) fn last_dispatch(&self) -> Option<(u64, String)> {
        self.last_dispatch.lock().ok().and_then(|guard| guard.clone())
    }

    pub(crate) fn pause_until(&self) -> Option<u64> {
        self.pause_until.lock().ok().and_then(|guard| *guard)
    }

    pub(crate) fn pause_for_minutes(&self, minutes: u64) {
        let until = unix_now_secs().saturating_add(minutes.saturating_mul(60));
        self.set_pause_until(Some(until.max(1)));
    }

    pub(crate) fn pause_forever(&self) {
        self.set_pause_until(Some(PAUSE_FOREVER_SENTINEL));
    }

    pub(crate) fn resume(&self) {
        self.set_pause_until(None);
    }

    fn set_pause_until(&self, until: Option<u64>) {
        if let Ok(mut pause) = self.pause_until.lock() {
            *pause = until;
        }
    }

    fn is_paused(&self) -> bool {
        match self.pause_until() {
            Some(PAUSE_FOREVER_SENTINEL) => true,
            Some(until) => unix_now_secs() < until,
            None => false,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    async fn settle() {
        // Paused-clock runtimes auto-advance across this sleep, letting every
        // spawned follow-up task run.
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn granted_permission_reaches_desktop_with_thread_tag() {
        let h = harness(
            StubDesktop::with_permission(PermissionState::Granted),
            RecordingAudio::available(),
        );
        h.dispatcher.dispatch(&message("1"));
        settle().await;

        let shown = h.desktop.shown.lock().unwrap();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].tag, "chime-General");
        assert_eq!(shown[0].title, "Ada - General");
        assert!(h.in_app.notes.lock().unwrap().is_empty());
        assert_eq!(h.toast.shown.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn default_permission_prompts_and_denial_falls_back_in_app() {
        let h = harness(
            StubDesktop::prompting_to(PermissionState::Denied),
            RecordingAudio::available(),
        );
        h.dispatcher.dispatch(&message("1"));
        settle().await;

        assert_eq!(h.desktop.requests.load(Ordering::Relaxed), 1);
        assert!(h.desktop.shown.lock().unwrap().is_empty());
        let notes = h.in_app.notes.lock().unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].text, "Ada: Hello");
        assert_eq!(notes[0].kind, InAppKind::Info);
        // The toast fired regardless of the desktop outcome.
        assert_eq!(h.toast.shown.lock().unwrap().len(), 1);
        assert_eq!(h.dispatcher.permission_state(), PermissionState::Denied);
    }

    #[tokio::test(start_paused = true)]
    async fn granted_prompt_retries_the_triggering_message_on_desktop() {
        let h = harness(
            StubDesktop::prompting_to(PermissionState::Granted),
            RecordingAudio::available(),
        );
        h.dispatcher.dispatch(&message("1"));
        settle().await;

        assert_eq!(h.desktop.shown.lock().unwrap().len(), 1);
        assert!(h.in_app.notes.lock().unwrap().is_empty());
        assert_eq!(h.dispatcher.permission_state(), PermissionState::Granted);
    }

    #[tokio::test(start_paused = true)]
    async fn unsupported_desktop_goes_straight_in_app() {
        let h = harness(
            StubDesktop::with_permission(PermissionState::Unsupported),
            RecordingAudio::available(),
        );
        h.dispatcher.dispatch(&message("1"));
        settle().await;

        assert_eq!(h.desktop.requests.load(Ordering::Relaxed), 0);
        assert_eq!(h.in_app.notes.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_desktop_construction_falls_back_in_app() {
        let mut desktop = StubDesktop::with_permission(PermissionState::Granted);
        desktop.fail_show = true;
        let h = harness(desktop, RecordingAudio::available());
        h.dispatcher.dispatch(&message("1"));
        settle().await;

        let notes = h.in_app.notes.lock().unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].kind, InAppKind::Warning);
        assert_eq!(h.toast.shown.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_audio_asset_synthesizes_a_tone() {
        let h = harness(
            StubDesktop::with_permission(PermissionState::Granted),
            RecordingAudio::blocked(),
        );
        h.dispatcher.dispatch(&message("1"));
        settle().await;

        assert!(h.audio.asset_plays.lock().unwrap().is_empty());
        let tones = h.audio.tone_plays.lock().unwrap();
        assert_eq!(tones.len(), 1);
        assert_eq!(tones[0], ToneSpec::default());
    }

    #[tokio::test(start_paused = true)]
    async fn toast_auto_dismisses_after_its_duration() {
        let h = harness(
            StubDesktop::with_permission(PermissionState::Granted),
            RecordingAudio::available(),
        );
        h.dispatcher.dispatch(&message("1"));
        tokio::time::sleep(Duration::from_secs(
            crate::consts::TOAST_DURATION_SECS + 1,
        ))
        .await;

        assert_eq!(h.toast.dismissed.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn desktop_click_routes_to_the_thread() {
        let desktop = StubDesktop::with_permission(PermissionState::Granted);
        *desktop.click_next.lock().unwrap() = true;
        let h = harness(desktop, RecordingAudio::available());
        h.dispatcher.dispatch(&message("1"));
        settle().await;

        assert_eq!(h.router.opened.lock().unwrap().as_slice(), ["General"]);
    }

    #[tokio::test(start_paused = true)]
    async fn unclicked_desktop_note_is_closed_programmatically() {
        let h = harness(
            StubDesktop::with_permission(PermissionState::Granted),
            RecordingAudio::available(),
        );
        h.dispatcher.dispatch(&message("1"));
        tokio::time::sleep(Duration::from_secs(DESKTOP_NOTE_CLOSE_SECS + 1)).await;

        assert_eq!(
            h.desktop.closed.lock().unwrap().as_slice(),
            ["chime-General"]
        );
        assert!(h.router.opened.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn pause_suppresses_every_channel_until_resume() {
        let h = harness(
            StubDesktop::with_permission(PermissionState::Granted),
            RecordingAudio::available(),
        );
        h.dispatcher.pause_forever();
        h.dispatcher.dispatch(&message("1"));
        settle().await;
        assert!(h.toast.shown.lock().unwrap().is_empty());
        assert_eq!(h.dispatcher.total_notifications(), 0);

        h.dispatcher.resume();
        h.dispatcher.dispatch(&message("2"));
        settle().await;
        assert_eq!(h.toast.shown.lock().unwrap().len(), 1);
        assert_eq!(h.dispatcher.total_notifications(), 1);
    }
}
