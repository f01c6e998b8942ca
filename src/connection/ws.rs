use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use reqwest::Url;
use std::borrow::Cow;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use super::transport::{
    Connector, HandshakeVariant, InboundFrame, OutboundFrame, Transport, TransportSink,
    TransportStream,
};
use crate::config::RealtimeConfig;
use crate::error::TransportError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket connector for the realtime service
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    model: String,
    api_key: String,
}

impl WsConnector {
    pub fn new(config: &RealtimeConfig) -> Self {
        Self {
            url: config.url.clone(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        }
    }

    /// Endpoint URL for `variant`; `model` is always present.
    pub fn endpoint(&self, variant: HandshakeVariant) -> Result<Url, TransportError> {
        let mut url =
            Url::parse(&self.url).map_err(|e| TransportError::Handshake(e.to_string()))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("model", &self.model);
            if variant == HandshakeVariant::QueryFormat {
                query.append_pair("format", "json");
            }
        }
        Ok(url)
    }

    fn header(value: &str) -> Result<HeaderValue, TransportError> {
        HeaderValue::from_str(value).map_err(|e| TransportError::Handshake(e.to_string()))
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, variant: HandshakeVariant) -> Result<Transport, TransportError> {
        let url = self.endpoint(variant)?;
        let mut request = url.as_str().into_client_request()?;

        let headers = request.headers_mut();
        headers.insert(
            header::AUTHORIZATION,
            Self::header(&format!("Bearer {}", self.api_key))?,
        );
        if variant == HandshakeVariant::Standard {
            headers.insert("X-Model", Self::header(&self.model)?);
            headers.insert(header::CONTENT_TYPE, Self::header("application/json")?);
        }

        debug!("Opening realtime socket ({})", variant.name());
        let (ws, response) = connect_async(request).await?;
        debug!("Handshake accepted: HTTP {}", response.status());

        let (sink, stream) = ws.split();
        Ok(Transport {
            sink: Box::new(WsSink { inner: sink }),
            stream: Box::new(WsReader { inner: stream }),
        })
    }
}

struct WsSink {
    inner: SplitSink<WsStream, Message>,
}

#[async_trait]
impl TransportSink for WsSink {
    async fn send(&mut self, frame: OutboundFrame) -> Result<(), TransportError> {
        match frame {
            OutboundFrame::Text(text) => self.inner.send(Message::Text(text)).await?,
            OutboundFrame::Ping(payload) => self.inner.send(Message::Ping(payload)).await?,
            OutboundFrame::Close { code, reason } => {
                self.inner
                    .send(Message::Close(Some(CloseFrame {
                        code: CloseCode::from(code),
                        reason: Cow::Owned(reason),
                    })))
                    .await?;
                self.inner.close().await?;
            }
        }
        Ok(())
    }
}

struct WsReader {
    inner: SplitStream<WsStream>,
}

#[async_trait]
impl TransportStream for WsReader {
    async fn next(&mut self) -> Option<Result<InboundFrame, TransportError>> {
        loop {
            let message = match self.inner.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(e.into())),
            };
            let frame = match message {
                Message::Text(text) => InboundFrame::Text(text),
                Message::Binary(bytes) => InboundFrame::Binary(bytes),
                Message::Ping(_) => InboundFrame::Ping,
                Message::Pong(_) => InboundFrame::Pong,
                Message::Close(close) => InboundFrame::Close(close.map(|c| u16::from(c.code))),
                Message::Frame(_) => continue,
            };
            return Some(Ok(frame));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connector() -> WsConnector {
        WsConnector::new(&RealtimeConfig::default())
    }

    #[test]
    fn model_is_always_in_query() {
        for variant in HandshakeVariant::ALL {
            let url = connector().endpoint(variant).unwrap();
            assert!(url
                .query_pairs()
                .any(|(k, v)| k == "model" && v == "step-audio-2-mini"));
        }
    }

    #[test]
    fn query_format_adds_json_format() {
        let url = connector().endpoint(HandshakeVariant::QueryFormat).unwrap();
        assert_eq!(
            url.as_str(),
            "wss://api.stepfun.com/v1/realtime?model=step-audio-2-mini&format=json"
        );
        let url = connector().endpoint(HandshakeVariant::Minimal).unwrap();
        assert!(!url.as_str().contains("format="));
    }
}
