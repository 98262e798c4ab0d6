//! Cloud WebSocket session
//!
//! One duplex connection to the backend. Opening the session sends the
//! `connection_init` frame before anything else; a reader task turns inbound
//! frames into [`SessionEvent`]s. Audio is withheld by the caller until the
//! backend acknowledges the session.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use visor_core::errors::CloudError;
use visor_core::protocol::cloud::{AudioFrame, CloudInbound, CloudOutbound};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Buffer between the reader task and the transport loop
const SESSION_EVENT_BUFFER: usize = 32;

// ----------------------------------------------------------------------------
// Session Events
// ----------------------------------------------------------------------------

/// What the reader side of the session observed
#[derive(Debug)]
pub enum SessionEvent {
    /// A typed message from the backend
    Message(CloudInbound),
    /// The backend closed the connection
    Closed { reason: Option<String> },
    /// The connection failed mid-stream
    Failed { reason: String },
}

// ----------------------------------------------------------------------------
// Session
// ----------------------------------------------------------------------------

pub struct CloudSession {
    sink: SplitSink<WsStream, Message>,
    reader: JoinHandle<()>,
    acked: bool,
}

impl CloudSession {
    /// Connect, introduce the session, and start reading
    pub async fn open(
        endpoint: &str,
        core_token: &str,
    ) -> Result<(Self, mpsc::Receiver<SessionEvent>), CloudError> {
        url::Url::parse(endpoint).map_err(|_| CloudError::InvalidEndpoint {
            url: endpoint.to_string(),
        })?;

        let (stream, _response) =
            connect_async(endpoint)
                .await
                .map_err(|e| CloudError::ConnectFailed {
                    reason: e.to_string(),
                })?;
        let (mut sink, read) = stream.split();

        let init = CloudOutbound::ConnectionInit {
            core_token: core_token.to_string(),
        };
        let line = serde_json::to_string(&init).map_err(|e| CloudError::SendFailed {
            reason: e.to_string(),
        })?;
        sink.send(Message::Text(line))
            .await
            .map_err(|e| CloudError::SendFailed {
                reason: e.to_string(),
            })?;

        let (events, receiver) = mpsc::channel(SESSION_EVENT_BUFFER);
        let reader = tokio::spawn(read_loop(read, events));
        info!("Cloud session opened to {}", endpoint);

        Ok((
            Self {
                sink,
                reader,
                acked: false,
            },
            receiver,
        ))
    }

    /// Send one typed message as a text frame
    pub async fn send(&mut self, message: &CloudOutbound) -> Result<(), CloudError> {
        let line = serde_json::to_string(message).map_err(|e| CloudError::SendFailed {
            reason: e.to_string(),
        })?;
        self.sink
            .send(Message::Text(line))
            .await
            .map_err(|e| CloudError::SendFailed {
                reason: e.to_string(),
            })
    }

    /// Send one audio payload as a raw binary frame
    pub async fn send_audio(&mut self, frame: AudioFrame) -> Result<(), CloudError> {
        self.sink
            .send(Message::Binary(frame.into_inner()))
            .await
            .map_err(|e| CloudError::SendFailed {
                reason: e.to_string(),
            })
    }

    /// The backend has acknowledged the session
    pub fn is_acked(&self) -> bool {
        self.acked
    }

    pub fn mark_acked(&mut self) {
        self.acked = true;
    }

    /// Close the connection and stop the reader
    pub async fn close(mut self) {
        let _ = self.sink.send(Message::Close(None)).await;
        self.reader.abort();
        info!("Cloud session closed");
    }
}

impl Drop for CloudSession {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

// ----------------------------------------------------------------------------
// Reader
// ----------------------------------------------------------------------------

async fn read_loop(mut read: SplitStream<WsStream>, events: mpsc::Sender<SessionEvent>) {
    while let Some(result) = read.next().await {
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<CloudInbound>(&text) {
                Ok(message) => {
                    if events.send(SessionEvent::Message(message)).await.is_err() {
                        return;
                    }
                }
                Err(e) => warn!("Malformed cloud frame: {}", e),
            },
            Ok(Message::Binary(bytes)) => {
                debug!("Ignoring {} byte binary frame from the backend", bytes.len());
            }
            Ok(Message::Close(frame)) => {
                let reason = frame
                    .map(|f| f.reason.to_string())
                    .filter(|r| !r.is_empty());
                let _ = events.send(SessionEvent::Closed { reason }).await;
                return;
            }
            Ok(_) => {}
            Err(e) => {
                let _ = events
                    .send(SessionEvent::Failed {
                        reason: e.to_string(),
                    })
                    .await;
                return;
            }
        }
    }
    let _ = events.send(SessionEvent::Closed { reason: None }).await;
}
