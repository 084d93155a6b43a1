//! Event server over TCP, Unix sockets or stdio.

use crate::error::{Result, WakeservError};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Read half of a connection, buffered.
pub type ConnectionReader = Box<dyn AsyncBufRead + Send + Unpin>;

/// Write half of a connection.
pub type ConnectionWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Serves one connection until the client goes away.
#[async_trait::async_trait]
pub trait ConnectionHandler: Send + Sync {
    async fn handle_connection(&self, reader: ConnectionReader, writer: ConnectionWriter) -> Result<()>;
}

/// Where the server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerUri {
    /// `tcp://host:port`
    Tcp(String),
    /// `unix://path`
    Unix(PathBuf),
    /// `stdio://`: a single client on stdin/stdout.
    Stdio,
}

impl FromStr for ServerUri {
    type Err = WakeservError;

    fn from_str(uri: &str) -> Result<Self> {
        let invalid = || WakeservError::InvalidUri {
            uri: uri.to_string(),
        };

        if let Some(addr) = uri.strip_prefix("tcp://") {
            let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
            if host.is_empty() || port.parse::<u16>().is_err() {
                return Err(invalid());
            }
            Ok(ServerUri::Tcp(addr.to_string()))
        } else if let Some(path) = uri.strip_prefix("unix://") {
            if path.is_empty() {
                Ok(ServerUri::Unix(EventServer::default_socket_path()))
            } else {
                Ok(ServerUri::Unix(PathBuf::from(path)))
            }
        } else if uri == "stdio://" {
            Ok(ServerUri::Stdio)
        } else {
            Err(invalid())
        }
    }
}

impl fmt::Display for ServerUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerUri::Tcp(addr) => write!(f, "tcp://{}", addr),
            ServerUri::Unix(path) => write!(f, "unix://{}", path.display()),
            ServerUri::Stdio => write!(f, "stdio://"),
        }
    }
}

/// State for managing server shutdown.
#[derive(Debug, Clone)]
struct ServerState {
    shutdown: Arc<Mutex<bool>>,
}

impl ServerState {
    fn new() -> Self {
        Self {
            shutdown: Arc::new(Mutex::new(false)),
        }
    }

    async fn is_shutdown(&self) -> bool {
        *self.shutdown.lock().await
    }

    async fn set_shutdown(&self) {
        *self.shutdown.lock().await = true;
    }
}

/// Accepts connections and hands each one to a [`ConnectionHandler`] task.
pub struct EventServer {
    uri: ServerUri,
    state: ServerState,
}

impl EventServer {
    pub fn new(uri: ServerUri) -> Self {
        Self {
            uri,
            state: ServerState::new(),
        }
    }

    pub fn uri(&self) -> &ServerUri {
        &self.uri
    }

    /// Socket path for `unix://` without a path: `$XDG_RUNTIME_DIR/wakeserv.sock`,
    /// or `/tmp/wakeserv-<uid>.sock`.
    pub fn default_socket_path() -> PathBuf {
        if let Ok(xdg_runtime) = std::env::var("XDG_RUNTIME_DIR") {
            PathBuf::from(xdg_runtime).join("wakeserv.sock")
        } else {
            let uid = unsafe { libc::getuid() };
            PathBuf::from(format!("/tmp/wakeserv-{}.sock", uid))
        }
    }

    /// Serve until [`EventServer::stop`] is called, or until the single
    /// stdio client disconnects.
    pub async fn run<H>(&self, handler: H) -> Result<()>
    where
        H: ConnectionHandler + 'static,
    {
        let handler = Arc::new(handler);

        match &self.uri {
            ServerUri::Stdio => {
                info!("Serving a single client on stdio");
                handler
                    .handle_connection(
                        Box::new(BufReader::new(tokio::io::stdin())),
                        Box::new(tokio::io::stdout()),
                    )
                    .await
            }
            ServerUri::Tcp(addr) => {
                let listener = TcpListener::bind(addr).await.map_err(|e| WakeservError::Socket {
                    message: format!("Failed to bind to {}: {}", addr, e),
                })?;
                info!("Listening on {}", self.uri);

                while !self.state.is_shutdown().await {
                    // Accept with timeout to check for shutdown
                    let accepted =
                        tokio::time::timeout(tokio::time::Duration::from_millis(100), listener.accept()).await;

                    match accepted {
                        Ok(Ok((stream, peer))) => {
                            debug!("Accepted connection from {}", peer);
                            let (reader, writer) = stream.into_split();
                            spawn_connection(&handler, Box::new(BufReader::new(reader)), Box::new(writer));
                        }
                        Ok(Err(e)) => back_off_after_accept_error(&e).await,
                        Err(_) => continue,
                    }
                }
                Ok(())
            }
            ServerUri::Unix(path) => {
                remove_socket_file(path)?;
                let listener = UnixListener::bind(path).map_err(|e| WakeservError::Socket {
                    message: format!("Failed to bind to socket: {}", e),
                })?;
                info!("Listening on {}", self.uri);

                while !self.state.is_shutdown().await {
                    let accepted =
                        tokio::time::timeout(tokio::time::Duration::from_millis(100), listener.accept()).await;

                    match accepted {
                        Ok(Ok((stream, _))) => {
                            debug!("Accepted unix connection");
                            let (reader, writer) = stream.into_split();
                            spawn_connection(&handler, Box::new(BufReader::new(reader)), Box::new(writer));
                        }
                        Ok(Err(e)) => back_off_after_accept_error(&e).await,
                        Err(_) => continue,
                    }
                }

                remove_socket_file(path)
            }
        }
    }

    /// Stop accepting connections and clean up the socket file.
    ///
    /// Connections already being served run until their clients disconnect.
    pub async fn stop(&self) -> Result<()> {
        self.state.set_shutdown().await;

        if let ServerUri::Unix(path) = &self.uri {
            remove_socket_file(path)?;
        }
        Ok(())
    }
}

fn spawn_connection<H>(handler: &Arc<H>, reader: ConnectionReader, writer: ConnectionWriter)
where
    H: ConnectionHandler + 'static,
{
    let handler = Arc::clone(handler);
    tokio::spawn(async move {
        if let Err(e) = handler.handle_connection(reader, writer).await {
            warn!("Error handling client: {}", e);
        }
    });
}

/// Pause before the next `accept` after `error`: 100 ms when out of file
/// descriptors, none otherwise.
fn accept_retry_delay(error: &std::io::Error) -> Duration {
    match error.raw_os_error() {
        Some(code) if code == libc::EMFILE || code == libc::ENFILE => Duration::from_millis(100),
        _ => Duration::ZERO,
    }
}

async fn back_off_after_accept_error(error: &std::io::Error) {
    warn!("Failed to accept connection: {}", error);
    let delay = accept_retry_delay(error);
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

fn remove_socket_file(path: &Path) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path).map_err(|e| WakeservError::Socket {
            message: format!("Failed to remove socket file {}: {}", path.display(), e),
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::protocol::{self, Event};
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;
    use tokio::net::{TcpStream, UnixStream};

    /// Replies to every event with an event of the same type.
    struct EchoHandler;

    #[async_trait::async_trait]
    impl ConnectionHandler for EchoHandler {
        async fn handle_connection(&self, mut reader: ConnectionReader, mut writer: ConnectionWriter) -> Result<()> {
            while let Some(event) = protocol::read_event(&mut reader).await? {
                protocol::write_event(&mut writer, &Event::new(&event.event_type)).await?;
            }
            Ok(())
        }
    }

    #[test]
    fn test_parse_uris() {
        assert_eq!(
            "tcp://127.0.0.1:10400".parse::<ServerUri>().unwrap(),
            ServerUri::Tcp("127.0.0.1:10400".to_string())
        );
        assert_eq!(
            "unix:///run/wake.sock".parse::<ServerUri>().unwrap(),
            ServerUri::Unix(PathBuf::from("/run/wake.sock"))
        );
        assert_eq!("stdio://".parse::<ServerUri>().unwrap(), ServerUri::Stdio);
    }

    #[test]
    fn test_parse_empty_unix_path_uses_default() {
        assert_eq!(
            "unix://".parse::<ServerUri>().unwrap(),
            ServerUri::Unix(EventServer::default_socket_path())
        );
    }

    #[test]
    fn test_parse_invalid_uris() {
        for uri in ["", "http://x:1", "tcp://nohost", "tcp://:10400", "tcp://host:port", "stdio"] {
            assert!(
                matches!(uri.parse::<ServerUri>(), Err(WakeservError::InvalidUri { .. })),
                "{uri:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_display_roundtrips() {
        for uri in ["tcp://localhost:10400", "unix:///tmp/x.sock", "stdio://"] {
            assert_eq!(uri.parse::<ServerUri>().unwrap().to_string(), uri);
        }
    }

    #[test]
    fn test_default_socket_path_returns_valid_path() {
        let path = EventServer::default_socket_path();
        let path_str = path.to_string_lossy();
        if std::env::var("XDG_RUNTIME_DIR").is_ok() {
            assert!(path_str.ends_with("wakeserv.sock"), "got: {:?}", path);
        } else {
            let uid = unsafe { libc::getuid() };
            assert_eq!(path_str, format!("/tmp/wakeserv-{}.sock", uid));
        }
    }

    #[tokio::test]
    async fn test_unix_server_serves_and_cleans_up() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        let server = Arc::new(EventServer::new(ServerUri::Unix(socket_path.clone())));

        let running = Arc::clone(&server);
        let server_handle = tokio::spawn(async move { running.run(EchoHandler).await });
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        assert!(socket_path.exists());

        let stream = UnixStream::connect(&socket_path).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut reader = tokio::io::BufReader::new(reader);
        protocol::write_event(&mut writer, &Event::new("describe")).await.unwrap();
        let reply = protocol::read_event(&mut reader).await.unwrap().unwrap();
        assert_eq!(reply.event_type, "describe");
        writer.shutdown().await.unwrap();

        server.stop().await.unwrap();
        server_handle.await.unwrap().unwrap();
        assert!(!socket_path.exists());
    }

    #[tokio::test]
    async fn test_unix_server_replaces_stale_socket_file() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("stale.sock");
        std::fs::write(&socket_path, b"").unwrap();

        let server = Arc::new(EventServer::new(ServerUri::Unix(socket_path.clone())));
        let running = Arc::clone(&server);
        let server_handle = tokio::spawn(async move { running.run(EchoHandler).await });
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        assert!(UnixStream::connect(&socket_path).await.is_ok());

        server.stop().await.unwrap();
        server_handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_tcp_server_concurrent_clients() {
        let port = {
            let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            probe.local_addr().unwrap().port()
        };
        let addr = format!("127.0.0.1:{}", port);
        let server = Arc::new(EventServer::new(ServerUri::Tcp(addr.clone())));

        let running = Arc::clone(&server);
        let server_handle = tokio::spawn(async move { running.run(EchoHandler).await });
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        let mut clients = Vec::new();
        for i in 0..5 {
            let addr = addr.clone();
            clients.push(tokio::spawn(async move {
                let stream = TcpStream::connect(&addr).await.unwrap();
                let (reader, mut writer) = stream.into_split();
                let mut reader = tokio::io::BufReader::new(reader);
                let event_type = format!("ping-{}", i);
                protocol::write_event(&mut writer, &Event::new(&event_type)).await.unwrap();
                let reply = protocol::read_event(&mut reader).await.unwrap().unwrap();
                assert_eq!(reply.event_type, event_type);
            }));
        }
        for client in clients {
            client.await.unwrap();
        }

        server.stop().await.unwrap();
        server_handle.await.unwrap().unwrap();
    }

    #[test]
    fn test_accept_retry_delay() {
        let emfile = std::io::Error::from_raw_os_error(libc::EMFILE);
        let enfile = std::io::Error::from_raw_os_error(libc::ENFILE);
        let aborted = std::io::Error::from_raw_os_error(libc::ECONNABORTED);

        assert_eq!(accept_retry_delay(&emfile), Duration::from_millis(100));
        assert_eq!(accept_retry_delay(&enfile), Duration::from_millis(100));
        assert_eq!(accept_retry_delay(&aborted), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_accept_error_backs_off_without_failing() {
        let start = tokio::time::Instant::now();
        back_off_after_accept_error(&std::io::Error::from_raw_os_error(libc::EMFILE)).await;
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_bind_failure_is_socket_error() {
        let server = EventServer::new(ServerUri::Unix(PathBuf::from("/nonexistent/dir/x.sock")));
        let result = server.run(EchoHandler).await;
        assert!(matches!(result, Err(WakeservError::Socket { .. })));
    }
}
