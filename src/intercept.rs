use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use futures_util::{FutureExt, Stream};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::EngineConfig;
use crate::model::{HttpRequest, HttpResponse, PayloadBody, RawPayload, StreamFrame, TransportKind};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("stream failed: {0}")]
    Stream(String),
}

/// A host-provided request/response primitive the engine can wrap.
pub trait RequestTransport: Send + Sync {
    fn execute(&self, request: HttpRequest)
        -> BoxFuture<'_, Result<HttpResponse, TransportError>>;
}

/// Observation handle over the engine's pipeline. Cheap to clone; wraps
/// host transports by composition instead of patching anything ambient.
/// Observation is strictly additive: a dropped engine or a full pipeline is
/// silently ignored and the host call proceeds untouched.
#[derive(Clone)]
pub struct TransportObserver {
    config: Arc<EngineConfig>,
    tap: mpsc::UnboundedSender<RawPayload>,
}

impl TransportObserver {
    pub(crate) fn new(config: Arc<EngineConfig>, tap: mpsc::UnboundedSender<RawPayload>) -> Self {
        Self { config, tap }
    }

    /// Wraps a request/response transport. Responses to calls matching the
    /// message-path allowlist are copied into the pipeline after the call
    /// completes; the caller's response is returned byte-identical either way.
    pub fn wrap_request_transport<T: RequestTransport>(
        &self,
        inner: T,
    ) -> ObservedRequestTransport<T> {
        ObservedRequestTransport {
            inner,
            observer: self.clone(),
        }
    }

    /// Attaches a passive tap to an inbound frame stream. Frames pass through
    /// unmodified and in order. A source outside the streaming allowlist gets
    /// an identity passthrough - that tap is simply skipped.
    pub fn tap_stream<S>(&self, source: &str, inner: S) -> TappedStream<S>
    where
        S: Stream<Item = StreamFrame> + Unpin,
    {
        let observer = if self.config.stream_url_matches(source) {
            Some(self.clone())
        } else {
            log::warn!("stream source outside allowlist, tap skipped: {source}");
            None
        };
        TappedStream {
            inner,
            source: source.to_string(),
            observer,
        }
    }

    pub(crate) fn observe(&self, kind: TransportKind, source: &str, text: &str) {
        let body = match serde_json::from_str::<serde_json::Value>(text) {
            Ok(value) => PayloadBody::Structured(value),
            // Parse failure is not an error here; the raw text falls through
            // to the keyword scan.
            Err(_) => PayloadBody::Text(text.to_string()),
        };
        let payload = RawPayload {
            kind,
            source: source.to_string(),
            body,
        };
        if self.tap.send(payload).is_err() {
            log::debug!("observation dropped, engine pipeline closed");
        }
    }
}

pub struct ObservedRequestTransport<T> {
    inner: T,
    observer: TransportObserver,
}

impl<T: RequestTransport> RequestTransport for ObservedRequestTransport<T> {
    fn execute(
        &self,
        request: HttpRequest,
    ) -> BoxFuture<'_, Result<HttpResponse, TransportError>> {
        let url = request.url.clone();
        async move {
            let response = self.inner.execute(request).await?;
            if (200..300).contains(&response.status)
                && self.observer.config.request_url_matches(&url)
            {
                self.observer
                    .observe(TransportKind::RequestResponse, &url, &response.body);
            }
            Ok(response)
        }
        .boxed()
    }
}

/// Wraps an inbound frame stream; each text frame is observed and then
/// yielded unchanged, so an existing application consumer still sees every
/// frame in the original order.
pub struct TappedStream<S> {
    inner: S,
    source: String,
    observer: Option<TransportObserver>,
}

impl<S> Stream for TappedStream<S>
where
    S: Stream<Item = StreamFrame> + Unpin,
{
    type Item = StreamFrame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.as_mut().get_mut();
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(frame)) => {
                if let (Some(observer), StreamFrame::Text(text)) = (&this.observer, &frame) {
                    observer.observe(TransportKind::StreamPush, &this.source, text);
                }
                Poll::Ready(Some(frame))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}
