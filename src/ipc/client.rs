//! Client side of the event protocol.

use crate::error::{Result, WakeservError};
use crate::ipc::protocol::{self, AudioChunk, ClientEvent, ServerEvent};
use crate::ipc::server::{ConnectionReader, ConnectionWriter, ServerUri};
use crate::session::info::Info;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, UnixStream};
use tracing::debug;

/// A connection to a wake word server.
pub struct EventClient {
    reader: ConnectionReader,
    writer: ConnectionWriter,
}

impl EventClient {
    /// Connect to a `tcp://` or `unix://` server.
    ///
    /// # Errors
    /// Returns `WakeservError::InvalidUri` for `stdio://`, and
    /// `WakeservError::Connection` if the server cannot be reached.
    pub async fn connect(uri: &ServerUri) -> Result<Self> {
        let connection_error = |e: std::io::Error| WakeservError::Connection {
            message: format!("Failed to connect to {}: {}", uri, e),
        };

        match uri {
            ServerUri::Tcp(addr) => {
                let (reader, writer) = TcpStream::connect(addr)
                    .await
                    .map_err(connection_error)?
                    .into_split();
                Ok(Self::from_parts(Box::new(BufReader::new(reader)), Box::new(writer)))
            }
            ServerUri::Unix(path) => {
                let (reader, writer) = UnixStream::connect(path)
                    .await
                    .map_err(connection_error)?
                    .into_split();
                Ok(Self::from_parts(Box::new(BufReader::new(reader)), Box::new(writer)))
            }
            ServerUri::Stdio => Err(WakeservError::InvalidUri {
                uri: uri.to_string(),
            }),
        }
    }

    pub fn from_parts(reader: ConnectionReader, writer: ConnectionWriter) -> Self {
        Self { reader, writer }
    }

    pub async fn send(&mut self, event: &ClientEvent) -> Result<()> {
        protocol::write_event(&mut self.writer, &event.to_event()?).await
    }

    /// Next server event; `None` once the server closed the connection.
    /// Event types this client does not know are skipped.
    pub async fn next_event(&mut self) -> Result<Option<ServerEvent>> {
        while let Some(event) = protocol::read_event(&mut self.reader).await? {
            match ServerEvent::from_event(event) {
                Ok(event) => return Ok(Some(event)),
                Err(e) => debug!("Skipping server event: {}", e),
            }
        }
        Ok(None)
    }

    /// Ask for the capability descriptor.
    pub async fn describe(&mut self) -> Result<Info> {
        self.send(&ClientEvent::Describe).await?;
        loop {
            match self.next_event().await? {
                Some(ServerEvent::Info(info)) => return Ok(info),
                Some(other) => debug!("Waiting for info, got {:?}", other),
                None => {
                    return Err(WakeservError::Connection {
                        message: "Server closed the connection before replying".to_string(),
                    });
                }
            }
        }
    }

    /// Stream `chunks` as one audio stream and collect every reply.
    ///
    /// An empty `names` keeps the server's default model. The write side is
    /// closed after `audio-stop`, so this returns once the server has
    /// processed everything and hung up.
    pub async fn detect(mut self, names: &[String], chunks: Vec<AudioChunk>) -> Result<Vec<ServerEvent>> {
        if !names.is_empty() {
            self.send(&ClientEvent::Detect {
                names: names.to_vec(),
            })
            .await?;
        }

        self.send(&ClientEvent::AudioStart).await?;
        for chunk in chunks {
            self.send(&ClientEvent::AudioChunk(chunk)).await?;
        }
        self.send(&ClientEvent::AudioStop).await?;
        self.writer.shutdown().await?;

        let mut replies = Vec::new();
        while let Some(event) = self.next_event().await? {
            replies.push(event);
        }
        Ok(replies)
    }

    /// Close the write side; the server ends the session.
    pub async fn close(mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::server::{ConnectionHandler, EventServer};
    use crate::ipc::protocol::Event;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Answers describe with an empty info and audio-stop with not-detected.
    struct MockHandler;

    #[async_trait::async_trait]
    impl ConnectionHandler for MockHandler {
        async fn handle_connection(&self, mut reader: ConnectionReader, mut writer: ConnectionWriter) -> Result<()> {
            while let Some(event) = protocol::read_event(&mut reader).await? {
                let reply = match event.event_type.as_str() {
                    protocol::DESCRIBE => ServerEvent::Info(Info::default()).to_event()?,
                    protocol::AUDIO_STOP => ServerEvent::NotDetected.to_event()?,
                    _ => Event::new("ack"),
                };
                protocol::write_event(&mut writer, &reply).await?;
            }
            Ok(())
        }
    }

    async fn start_server(temp_dir: &TempDir) -> (Arc<EventServer>, ServerUri) {
        let uri = ServerUri::Unix(temp_dir.path().join("test.sock"));
        let server = Arc::new(EventServer::new(uri.clone()));
        let running = Arc::clone(&server);
        tokio::spawn(async move { running.run(MockHandler).await });
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        (server, uri)
    }

    #[tokio::test]
    async fn test_describe() {
        let temp_dir = TempDir::new().unwrap();
        let (server, uri) = start_server(&temp_dir).await;

        let mut client = EventClient::connect(&uri).await.unwrap();
        let info = client.describe().await.unwrap();
        assert!(info.wake.is_empty());
        client.close().await.unwrap();

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_detect_skips_unknown_replies() {
        let temp_dir = TempDir::new().unwrap();
        let (server, uri) = start_server(&temp_dir).await;

        let client = EventClient::connect(&uri).await.unwrap();
        let chunk = AudioChunk {
            rate: 16000,
            width: 2,
            channels: 1,
            timestamp: Some(0),
            audio: vec![0; 64],
        };
        let replies = client
            .detect(&["alexa".to_string()], vec![chunk])
            .await
            .unwrap();
        assert_eq!(replies, vec![ServerEvent::NotDetected]);

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_failed() {
        let temp_dir = TempDir::new().unwrap();
        let uri = ServerUri::Unix(temp_dir.path().join("nonexistent.sock"));

        match EventClient::connect(&uri).await {
            Err(WakeservError::Connection { message }) => {
                assert!(message.contains("Failed to connect"));
            }
            Err(other) => panic!("Expected Connection error, got: {:?}", other),
            Ok(_) => panic!("Expected Connection error"),
        }
    }

    #[tokio::test]
    async fn test_connect_stdio_rejected() {
        assert!(matches!(
            EventClient::connect(&ServerUri::Stdio).await,
            Err(WakeservError::InvalidUri { .. })
        ));
    }
}
