//! One worker thread per connection.
//!
//! The connection task decodes events and forwards them to the worker over a
//! crossbeam channel; the worker owns the [`Session`] and pushes replies to a
//! tokio channel drained by the connection's writer task. Inference runs on
//! the worker thread, so a slow model only stalls its own connection.

use crate::error::{Result, WakeservError};
use crate::ipc::protocol::{self, ClientEvent, ServerEvent};
use crate::ipc::server::{ConnectionHandler, ConnectionReader, ConnectionWriter};
use crate::session::{Session, SessionContext, next_client_id};
use crossbeam_channel::{Receiver, Sender};
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{debug, error, info, warn};

/// Handle to a running session thread.
pub struct SessionWorker {
    client_id: String,
    inbox: Option<Sender<ClientEvent>>,
    thread: Option<JoinHandle<()>>,
}

impl SessionWorker {
    /// Start a thread that owns `session` and sends its replies to `outbox`.
    pub fn spawn(session: Session, outbox: UnboundedSender<ServerEvent>) -> Result<Self> {
        let client_id = session.client_id().to_string();
        let (inbox, events) = crossbeam_channel::unbounded();

        let thread = thread::Builder::new()
            .name(format!("session-{}", client_id))
            .spawn(move || run_session(session, events, outbox))
            .map_err(|e| WakeservError::Other(format!("Failed to spawn session thread: {}", e)))?;

        Ok(Self {
            client_id,
            inbox: Some(inbox),
            thread: Some(thread),
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Queue an event. Returns false once the worker has stopped.
    pub fn send(&self, event: ClientEvent) -> bool {
        self.inbox
            .as_ref()
            .is_some_and(|inbox| inbox.send(event).is_ok())
    }

    /// Close the inbox and wait for the session to be torn down.
    pub fn join(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        drop(self.inbox.take());
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            error!("Session thread for {} panicked", self.client_id);
        }
    }
}

impl Drop for SessionWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_session(mut session: Session, events: Receiver<ClientEvent>, outbox: UnboundedSender<ServerEvent>) {
    'events: for event in events.iter() {
        for reply in session.handle(event) {
            if outbox.send(reply).is_err() {
                debug!("Writer for {} is gone", session.client_id());
                break 'events;
            }
        }
    }
    session.disconnect();
}

/// Serves each connection with its own [`Session`].
#[derive(Debug, Clone)]
pub struct SessionHandler {
    context: SessionContext,
}

impl SessionHandler {
    pub fn new(context: SessionContext) -> Self {
        Self { context }
    }
}

#[async_trait::async_trait]
impl ConnectionHandler for SessionHandler {
    async fn handle_connection(&self, mut reader: ConnectionReader, writer: ConnectionWriter) -> Result<()> {
        let session = Session::new(next_client_id(), self.context.clone());
        let client_id = session.client_id().to_string();
        info!("Client connected: {}", client_id);

        let (outbox, replies) = unbounded_channel();
        let worker = SessionWorker::spawn(session, outbox)?;
        let writer_task = tokio::spawn(write_replies(writer, replies));

        loop {
            match protocol::read_event(&mut reader).await {
                Ok(Some(event)) => match ClientEvent::from_event(event) {
                    Ok(event) => {
                        if !worker.send(event) {
                            break;
                        }
                    }
                    Err(e) => warn!("Ignoring event from {}: {}", client_id, e),
                },
                Ok(None) => break,
                Err(WakeservError::Protocol { message }) => {
                    warn!("Ignoring malformed event from {}: {}", client_id, message);
                }
                Err(e) => {
                    debug!("Connection to {} ended: {}", client_id, e);
                    break;
                }
            }
        }

        // Joining blocks until the session released its detectors.
        tokio::task::spawn_blocking(move || worker.join())
            .await
            .map_err(|e| WakeservError::Other(format!("Session worker join failed: {}", e)))?;

        match writer_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Writer for {} stopped: {}", client_id, e),
            Err(e) => warn!("Writer task for {} failed: {}", client_id, e),
        }

        info!("Client disconnected: {}", client_id);
        Ok(())
    }
}

async fn write_replies(mut writer: ConnectionWriter, mut replies: UnboundedReceiver<ServerEvent>) -> Result<()> {
    while let Some(reply) = replies.recv().await {
        protocol::write_event(&mut writer, &reply.to_event()?).await?;
    }
    Ok(())
}
