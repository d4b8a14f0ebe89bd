//! Outbound connection to the realtime model.

use async_trait::async_trait;
use futures::stream::{BoxStream, SplitSink};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::info;
use url::Url;

use super::config::build_model_url;
use crate::core::connection::{Leg, PeerHandle, PeerTransport, TransportError};
use crate::core::relay::session::Credential;
use crate::errors::relay_error::{RelayError, RelayResult};

type ModelSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// An open model leg: the write handle plus the inbound text frames.
///
/// The inbound stream ends when the model closes the socket; a transport error
/// is yielded once before the stream ends.
pub struct ModelConnection {
    pub peer: PeerHandle,
    pub inbound: BoxStream<'static, RelayResult<String>>,
}

/// Opens model legs.
///
/// The relay depends only on this trait so tests can substitute an in-process
/// model.
#[async_trait]
pub trait ModelConnector: Send + Sync {
    async fn connect(&self, credential: &Credential) -> RelayResult<ModelConnection>;
}

/// Connector for the realtime model WebSocket endpoint.
#[derive(Debug, Clone)]
pub struct OpenAIRealtimeConnector {
    url: Url,
}

impl OpenAIRealtimeConnector {
    pub fn new(base_url: &str, model: &str) -> RelayResult<Self> {
        Ok(Self {
            url: build_model_url(base_url, model)?,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    fn build_request(&self, credential: &Credential) -> RelayResult<http::Request<()>> {
        let host = match (self.url.host_str(), self.url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(RelayError::InvalidConfiguration(
                    "model URL has no host".to_string(),
                ));
            }
        };

        http::Request::builder()
            .uri(self.url.as_str())
            .header("Authorization", format!("Bearer {}", credential.expose()))
            .header("OpenAI-Beta", "realtime=v1")
            .header(
                "Sec-WebSocket-Key",
                tungstenite::handshake::client::generate_key(),
            )
            .header("Sec-WebSocket-Version", "13")
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Host", host)
            .body(())
            .map_err(|e| RelayError::ConnectionFailed(e.to_string()))
    }
}

#[async_trait]
impl ModelConnector for OpenAIRealtimeConnector {
    async fn connect(&self, credential: &Credential) -> RelayResult<ModelConnection> {
        let request = self.build_request(credential)?;

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| RelayError::ConnectionFailed(e.to_string()))?;

        let (sink, stream) = ws_stream.split();
        let peer = PeerHandle::spawn(Leg::Model, ModelTransport { sink });

        info!(peer_id = %peer.id(), "Connected to realtime model");

        let inbound = stream
            .filter_map(|message| async move {
                match message {
                    Ok(Message::Text(text)) => Some(Ok(text.to_string())),
                    Ok(_) => None,
                    Err(e) => Some(Err(RelayError::WebSocket(e.to_string()))),
                }
            })
            .boxed();

        Ok(ModelConnection { peer, inbound })
    }
}

struct ModelTransport {
    sink: SplitSink<ModelSocket, Message>,
}

#[async_trait]
impl PeerTransport for ModelTransport {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.sink
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.sink
            .close()
            .await
            .map_err(|e| TransportError::Close(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_headers() {
        let connector =
            OpenAIRealtimeConnector::new("wss://api.openai.com/v1/realtime", "gpt-4o").unwrap();
        let request = connector
            .build_request(&Credential::new("sk-test"))
            .unwrap();

        assert_eq!(
            request.uri().to_string(),
            "wss://api.openai.com/v1/realtime?model=gpt-4o"
        );
        assert_eq!(request.headers()["Authorization"], "Bearer sk-test");
        assert_eq!(request.headers()["OpenAI-Beta"], "realtime=v1");
        assert_eq!(request.headers()["Host"], "api.openai.com");
    }

    #[test]
    fn test_host_header_includes_port() {
        let connector = OpenAIRealtimeConnector::new("ws://127.0.0.1:9000/v1/realtime", "m").unwrap();
        let request = connector.build_request(&Credential::new("k")).unwrap();
        assert_eq!(request.headers()["Host"], "127.0.0.1:9000");
    }
}
