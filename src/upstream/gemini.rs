//! WebSocket-Transport zur Gemini Live API (BidiGenerateContent)

use super::wire::clean_close_reason;
use super::{LinkFrame, LiveConnector, LiveLink, UpstreamError};
use crate::protocol::LiveConfig;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use url::Url;

/// Öffnet Gemini Live Sessions über WebSocket
#[derive(Clone)]
pub struct GeminiConnector {
    endpoint: String,
    api_key: Option<String>,
}

impl GeminiConnector {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key,
        }
    }

    fn session_url(&self) -> Result<Url, UpstreamError> {
        let key = self.api_key.as_deref().ok_or(UpstreamError::MissingApiKey)?;
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| UpstreamError::ConnectionFailed(format!("Invalid endpoint: {}", e)))?;
        url.query_pairs_mut().append_pair("key", key);
        Ok(url)
    }
}

impl std::fmt::Debug for GeminiConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiConnector")
            .field("endpoint", &self.endpoint)
            .field("api_key_set", &self.api_key.is_some())
            .finish()
    }
}

#[async_trait]
impl LiveConnector for GeminiConnector {
    async fn open(&self, config: &LiveConfig) -> Result<Box<dyn LiveLink>, UpstreamError> {
        let url = self.session_url()?;
        tracing::info!(model = %config.model, "Connecting to Gemini Live: {}", self.endpoint);

        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| UpstreamError::ConnectionFailed(e.to_string()))?;

        Ok(Box::new(GeminiLink { stream }))
    }
}

/// Eine offene Gemini Live WebSocket-Verbindung
struct GeminiLink {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl LiveLink for GeminiLink {
    async fn send(&mut self, message: Value) -> Result<(), UpstreamError> {
        let text = serde_json::to_string(&message)
            .map_err(|e| UpstreamError::SendFailed(e.to_string()))?;
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| UpstreamError::SendFailed(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<LinkFrame, UpstreamError>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(UpstreamError::ConnectionFailed(e.to_string()))),
            };

            // Gemini schickt JSON auch als Binary-Frames
            let parsed = match message {
                Message::Text(text) => serde_json::from_str::<Value>(&text),
                Message::Binary(data) => serde_json::from_slice::<Value>(&data),
                Message::Close(frame) => {
                    let reason = frame.and_then(|f| clean_close_reason(&f.reason));
                    return Some(Ok(LinkFrame::Closed { reason }));
                }
                _ => continue,
            };

            return Some(
                parsed
                    .map(LinkFrame::Message)
                    .map_err(|e| UpstreamError::Protocol(e.to_string())),
            );
        }
    }

    async fn close(&mut self) -> Result<(), UpstreamError> {
        self.stream
            .close(None)
            .await
            .map_err(|e| UpstreamError::ConnectionFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_url_carries_api_key() {
        let connector = GeminiConnector::new("wss://example.com/ws/live", Some("abc".to_string()));
        assert_eq!(
            connector.session_url().unwrap().as_str(),
            "wss://example.com/ws/live?key=abc"
        );
    }

    #[tokio::test]
    async fn missing_api_key_fails_before_connecting() {
        let connector = GeminiConnector::new("wss://example.com/ws/live", None);
        let err = connector
            .open(&LiveConfig::new("gemini"))
            .await
            .err()
            .unwrap();
        assert_eq!(err, UpstreamError::MissingApiKey);
        assert_eq!(err.to_string(), "Server configuration error: API key missing.");
    }
}
