use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{FutureExt, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::consts::{HTTP_CONNECT_TIMEOUT_SECS, STREAM_CONNECT_TIMEOUT_SECS};
use crate::intercept::{RequestTransport, TransportError};
use crate::model::{HttpRequest, HttpResponse, StreamFrame};

/// Default request/response transport over a shared HTTP client, for hosts
/// that do not bring their own.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|error| TransportError::Connect(format!("failed to build client: {error}")))?;
        Ok(Self { client })
    }
}

impl RequestTransport for ReqwestTransport {
    fn execute(
        &self,
        request: HttpRequest,
    ) -> BoxFuture<'_, Result<HttpResponse, TransportError>> {
        async move {
            let mut builder = match request.method.as_str() {
                "POST" => self.client.post(&request.url),
                _ => self.client.get(&request.url),
            };
            if let Some(body) = request.body {
                builder = builder
                    .header(reqwest::header::CONTENT_TYPE, "application/json")
                    .body(body);
            }

            let response = builder
                .send()
                .await
                .map_err(|error| TransportError::Request(format!("request failed: {error}")))?;
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .map_err(|error| TransportError::Request(format!("body read failed: {error}")))?;
            Ok(HttpResponse { status, body })
        }
        .boxed()
    }
}

/// Inbound frames from a websocket session, suitable for
/// `TransportObserver::tap_stream`.
pub struct WsFrameStream {
    rx: mpsc::UnboundedReceiver<StreamFrame>,
}

impl Stream for WsFrameStream {
    type Item = StreamFrame;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

/// Connects a websocket and pumps its inbound frames. Pings are answered at
/// the protocol layer; the stream ends on close, read error, or when the
/// consumer is dropped.
pub async fn connect_stream(ws_url: &str) -> Result<WsFrameStream, TransportError> {
    let (ws_stream, _) = tokio::time::timeout(
        Duration::from_secs(STREAM_CONNECT_TIMEOUT_SECS),
        connect_async(ws_url),
    )
    .await
    .map_err(|_| {
        TransportError::Connect(format!(
            "stream connection timed out after {STREAM_CONNECT_TIMEOUT_SECS} seconds"
        ))
    })?
    .map_err(|error| TransportError::Connect(format!("stream connection failed: {error}")))?;

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let (mut sink, mut source) = ws_stream.split();
        while let Some(incoming) = source.next().await {
            match incoming {
                Ok(Message::Text(text)) => {
                    let text: &str = text.as_ref();
                    if tx.send(StreamFrame::Text(text.to_string())).is_err() {
                        break;
                    }
                }
                Ok(Message::Binary(bytes)) => {
                    if tx.send(StreamFrame::Binary(bytes.to_vec())).is_err() {
                        break;
                    }
                }
                Ok(Message::Ping(payload)) => {
                    if sink.send(Message::Pong(payload)).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(error) => {
                    log::debug!("stream read error: {error}");
                    break;
                }
            }
        }
    });

    Ok(WsFrameStream { rx })
}
