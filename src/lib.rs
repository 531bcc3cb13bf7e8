//! Best-effort real-time chat notification engine.
//!
//! `chime` sits beside a host chat application without any typed event
//! contract from its backend: it taps the host's request/response and
//! streaming transports, heuristically recognizes new-message payloads,
//! suppresses duplicates arriving over more than one transport, and delivers
//! notifications across an in-page toast, an audio cue, an OS desktop note,
//! and a host in-app banner - each channel failing independently and
//! silently. A periodic scan of the host's rendered message list catches
//! whatever the transport taps missed.
//!
//! The engine never originates traffic and never alters, delays, or fails a
//! host call: every hook is an injected capability (`RequestTransport`,
//! `TappedStream`, `RenderedView`, the notification channel traits), not a
//! patched global. Delivery is lossy by design; the only guarantee is that a
//! dispatched message fires the visual toast.

use std::time::{SystemTime, UNIX_EPOCH};

mod consts;
mod extract;

pub mod config;
pub mod dedup;
pub mod dispatch;
pub mod engine;
pub mod intercept;
pub mod model;
pub mod scanner;
pub mod transports;

pub use config::EngineConfig;
pub use dedup::{DedupStore, Retention};
pub use dispatch::{
    AudioCue, DeliveryError, DesktopEvent, DesktopNote, DesktopNotifier, InAppKind, InAppNote,
    InAppNotifier, NotificationChannels, ThreadRouter, Toast, ToastId, ToastSink, ToneSpec,
};
pub use engine::Engine;
pub use intercept::{
    ObservedRequestTransport, RequestTransport, TappedStream, TransportError, TransportObserver,
};
pub use model::{
    AudioState, EngineStatus, HttpRequest, HttpResponse, NormalizedMessage, PayloadBody,
    PermissionState, RawPayload, RenderedMessage, RuntimeDiagnostics, StreamFrame, TransportKind,
};
pub use scanner::RenderedView;
pub use transports::{connect_stream, ReqwestTransport, WsFrameStream};

pub(crate) fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
