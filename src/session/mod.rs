//! Per-connection detection session.
//!
//! A [`Session`] consumes client events strictly in arrival order and returns
//! the events to send back. It owns the model selection, the detector pool
//! and the stream's dispatcher; nothing in it is shared with other sessions
//! except the read-only catalog and the backend.
//!
//! ```text
//! Idle ──detect──▶ Selecting ──audio-start──▶ Streaming ──audio-stop──▶ Idle
//!   └──────────────audio-start───────────────────▲
//! ```

pub mod clock;
pub mod dispatcher;
pub mod info;
pub mod pool;
pub mod worker;

use crate::audio::convert::AudioChunkConverter;
use crate::defaults::{DEFAULT_MODEL, REFRACTORY_SECONDS};
use crate::engine::InferenceBackend;
use crate::ipc::protocol::{AudioChunk, ClientEvent, ServerEvent};
use crate::models::catalog::ModelCatalog;
use clock::{Clock, MonotonicClock};
use dispatcher::{StreamOutcome, StreamingDispatcher};
use info::SessionInfoBuilder;
use pool::DetectorPool;
use std::fmt;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Stream lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No stream and no pending selection.
    Idle,
    /// No stream, but a selection waits for the next `audio-start`.
    Selecting,
    Streaming,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Selecting => write!(f, "selecting"),
            SessionState::Streaming => write!(f, "streaming"),
        }
    }
}

/// Process-wide pieces every session is created from.
#[derive(Clone)]
pub struct SessionContext {
    pub catalog: Arc<ModelCatalog>,
    pub backend: Arc<dyn InferenceBackend>,
    pub default_model: String,
    pub refractory: Duration,
    pub clock: Arc<dyn Clock>,
}

impl SessionContext {
    pub fn new(catalog: Arc<ModelCatalog>, backend: Arc<dyn InferenceBackend>) -> Self {
        Self {
            catalog,
            backend,
            default_model: DEFAULT_MODEL.to_string(),
            refractory: Duration::from_secs_f64(REFRACTORY_SECONDS),
            clock: Arc::new(MonotonicClock),
        }
    }

    pub fn with_default_model(mut self, name: impl Into<String>) -> Self {
        self.default_model = name.into();
        self
    }

    pub fn with_refractory(mut self, refractory: Duration) -> Self {
        self.refractory = refractory;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("models", &self.catalog.len())
            .field("default_model", &self.default_model)
            .field("refractory", &self.refractory)
            .finish()
    }
}

/// Unique, increasing identifier from a monotonic nanosecond counter.
pub fn next_client_id() -> String {
    static START: OnceLock<Instant> = OnceLock::new();
    static LAST: AtomicU64 = AtomicU64::new(0);

    let elapsed = START.get_or_init(Instant::now).elapsed().as_nanos() as u64;
    let mut last = LAST.load(Ordering::Relaxed);
    loop {
        let next = elapsed.max(last + 1);
        match LAST.compare_exchange_weak(last, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return next.to_string(),
            Err(current) => last = current,
        }
    }
}

/// Detection session for one client connection.
pub struct Session {
    client_id: String,
    context: SessionContext,
    info: SessionInfoBuilder,
    converter: AudioChunkConverter,
    selection: Vec<String>,
    pool: DetectorPool,
    stream: Option<StreamingDispatcher>,
}

impl Session {
    pub fn new(client_id: impl Into<String>, context: SessionContext) -> Self {
        let client_id = client_id.into();
        debug!("Client connected: {}", client_id);
        Self {
            client_id,
            info: SessionInfoBuilder::new(Arc::clone(&context.catalog)),
            context,
            converter: AudioChunkConverter::default(),
            selection: Vec::new(),
            pool: DetectorPool::empty(),
            stream: None,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn state(&self) -> SessionState {
        if self.stream.is_some() {
            SessionState::Streaming
        } else if self.selection.is_empty() {
            SessionState::Idle
        } else {
            SessionState::Selecting
        }
    }

    /// Names the next stream will be built from. Empty means the default.
    pub fn selection(&self) -> &[String] {
        &self.selection
    }

    /// Detectors of the active stream.
    pub fn pool(&self) -> &DetectorPool {
        &self.pool
    }

    /// Apply one client event and return the events to send back, in order.
    pub fn handle(&mut self, event: ClientEvent) -> Vec<ServerEvent> {
        match event {
            ClientEvent::Describe => vec![ServerEvent::Info(self.info.build())],
            ClientEvent::Detect { names } => {
                self.select(names);
                Vec::new()
            }
            ClientEvent::AudioStart => {
                self.start_stream();
                Vec::new()
            }
            ClientEvent::AudioChunk(chunk) => self.process_chunk(&chunk),
            ClientEvent::AudioStop => self.stop_stream(),
            ClientEvent::Unknown(event_type) => {
                debug!("Unexpected event from {}: {}", self.client_id, event_type);
                Vec::new()
            }
        }
    }

    /// Release everything held for the connection. Emits nothing.
    pub fn disconnect(&mut self) {
        if let Some(mut dispatcher) = self.stream.take() {
            debug!(
                "Client {} disconnected mid-stream after {} chunks",
                self.client_id,
                dispatcher.chunks()
            );
            // Outcome is discarded: there is no one left to tell.
            let _outcome = dispatcher.finish(&mut self.pool);
        }
        self.pool.teardown();
        self.selection.clear();
        debug!("Client disconnected: {}", self.client_id);
    }

    fn select(&mut self, names: Vec<String>) {
        if self.stream.is_some() {
            debug!(
                "Selection {:?} applies from the next stream of {}",
                names, self.client_id
            );
        } else {
            debug!("Selection for {}: {:?}", self.client_id, names);
        }
        self.selection = names;
    }

    fn start_stream(&mut self) {
        if let Some(mut previous) = self.stream.take() {
            debug!("Restarting stream for {}", self.client_id);
            let _outcome = previous.finish(&mut self.pool);
        }

        self.pool = DetectorPool::build(
            &self.selection,
            &self.context.catalog,
            &self.context.default_model,
            self.context.backend.as_ref(),
        );
        if self.pool.is_empty() {
            warn!("No detectors could be loaded for {}", self.client_id);
        }

        self.stream = Some(StreamingDispatcher::new(
            self.context.backend.feature_extractor(),
            self.context.refractory,
        ));
    }

    fn process_chunk(&mut self, chunk: &AudioChunk) -> Vec<ServerEvent> {
        let Some(dispatcher) = self.stream.as_mut() else {
            debug!("Ignoring audio chunk outside a stream from {}", self.client_id);
            return Vec::new();
        };

        let samples = match self.converter.convert(chunk) {
            Ok(samples) => samples,
            Err(e) => {
                warn!("Dropping audio chunk from {}: {}", self.client_id, e);
                return Vec::new();
            }
        };

        let now = self.context.clock.now();
        dispatcher
            .process_chunk(&mut self.pool, &samples, chunk.timestamp, now)
            .into_iter()
            .map(|detection| ServerEvent::Detection {
                name: detection.name,
                timestamp: detection.timestamp,
            })
            .collect()
    }

    fn stop_stream(&mut self) -> Vec<ServerEvent> {
        let Some(mut dispatcher) = self.stream.take() else {
            debug!("Ignoring audio-stop without a stream from {}", self.client_id);
            return Vec::new();
        };

        match dispatcher.finish(&mut self.pool) {
            StreamOutcome::Detected => Vec::new(),
            StreamOutcome::NotDetected => vec![ServerEvent::NotDetected],
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.stream.is_some() {
            self.disconnect();
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("client_id", &self.client_id)
            .field("state", &self.state())
            .field("selection", &self.selection)
            .field("pool", &self.pool.names())
            .finish()
    }
}
