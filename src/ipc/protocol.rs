//! Event protocol between clients and the wake word server.
//!
//! Every event is a single JSON header line, optionally followed by
//! `data_length` bytes of JSON data and `payload_length` bytes of binary
//! payload:
//!
//! ```text
//! {"type":"audio-chunk","data_length":45,"payload_length":2048}\n
//! {"rate":16000,"width":2,"channels":1,"timestamp":0}<2048 bytes of PCM>
//! ```
//!
//! Data sent as separate bytes is merged over any `data` object inlined in
//! the header.

use crate::error::{Result, WakeservError};
use crate::session::info::Info;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const DESCRIBE: &str = "describe";
pub const INFO: &str = "info";
pub const DETECT: &str = "detect";
pub const DETECTION: &str = "detection";
pub const NOT_DETECTED: &str = "not-detected";
pub const AUDIO_START: &str = "audio-start";
pub const AUDIO_CHUNK: &str = "audio-chunk";
pub const AUDIO_STOP: &str = "audio-stop";

/// Upper bound for a header line, newline included.
const MAX_HEADER_LENGTH: usize = 1 << 20;

/// Upper bound for `data_length`; data is small JSON.
const MAX_DATA_LENGTH: usize = 1 << 20;

/// Upper bound for `payload_length`; a few seconds of audio at most.
const MAX_PAYLOAD_LENGTH: usize = 16 << 20;

/// A framed event as read from or written to the wire.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Event {
    pub event_type: String,
    pub data: Map<String, Value>,
    pub payload: Option<Vec<u8>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EventHeader {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload_length: Option<usize>,
}

impl Event {
    pub fn new(event_type: &str) -> Self {
        Self {
            event_type: event_type.to_string(),
            ..Self::default()
        }
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self
    }
}

fn protocol_error(message: impl Into<String>) -> WakeservError {
    WakeservError::Protocol {
        message: message.into(),
    }
}

/// Read the next event.
///
/// Returns `Ok(None)` on a clean end of stream. A malformed header or data
/// block is a [`WakeservError::Protocol`] error after which the reader is
/// positioned at the next header line, so callers may keep reading. Lengths
/// over the limits cannot be skipped safely and end the connection with
/// [`WakeservError::Connection`].
pub async fn read_event<R>(reader: &mut R) -> Result<Option<Event>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    loop {
        line.clear();
        let read = (&mut *reader)
            .take(MAX_HEADER_LENGTH as u64)
            .read_until(b'\n', &mut line)
            .await?;
        if read == 0 {
            return Ok(None);
        }
        if read == MAX_HEADER_LENGTH && line.last() != Some(&b'\n') {
            return Err(WakeservError::Connection {
                message: format!("Event header exceeds limit of {} bytes", MAX_HEADER_LENGTH),
            });
        }
        if !line.trim_ascii().is_empty() {
            break;
        }
    }

    let line = std::str::from_utf8(&line)
        .map_err(|e| protocol_error(format!("Event header is not UTF-8: {}", e)))?;
    let header: EventHeader = serde_json::from_str(line.trim())
        .map_err(|e| protocol_error(format!("Invalid event header: {}", e)))?;

    let data_length = header.data_length.unwrap_or(0);
    let payload_length = header.payload_length.unwrap_or(0);
    if data_length > MAX_DATA_LENGTH {
        return Err(WakeservError::Connection {
            message: format!(
                "data_length {} exceeds limit of {} bytes",
                data_length, MAX_DATA_LENGTH
            ),
        });
    }
    if payload_length > MAX_PAYLOAD_LENGTH {
        return Err(WakeservError::Connection {
            message: format!(
                "payload_length {} exceeds limit of {} bytes",
                payload_length, MAX_PAYLOAD_LENGTH
            ),
        });
    }

    let mut data = header.data.unwrap_or_default();
    let mut extra_data = None;
    if data_length > 0 {
        let mut buf = vec![0u8; data_length];
        reader.read_exact(&mut buf).await?;
        extra_data = Some(buf);
    }

    let payload = if payload_length > 0 {
        let mut buf = vec![0u8; payload_length];
        reader.read_exact(&mut buf).await?;
        Some(buf)
    } else {
        None
    };

    // Parse only after every framed byte is consumed so the stream stays aligned.
    if let Some(buf) = extra_data {
        let extra: Map<String, Value> = serde_json::from_slice(&buf)
            .map_err(|e| protocol_error(format!("Invalid event data: {}", e)))?;
        data.extend(extra);
    }

    Ok(Some(Event {
        event_type: header.event_type,
        data,
        payload,
    }))
}

/// Write one event and flush.
pub async fn write_event<W>(writer: &mut W, event: &Event) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let data_bytes = if event.data.is_empty() {
        None
    } else {
        Some(serde_json::to_vec(&event.data)?)
    };

    let header = EventHeader {
        event_type: event.event_type.clone(),
        data: None,
        data_length: data_bytes.as_ref().map(|d| d.len()),
        payload_length: event.payload.as_ref().map(|p| p.len()).filter(|&n| n > 0),
    };

    let mut header_line = serde_json::to_vec(&header)?;
    header_line.push(b'\n');
    writer.write_all(&header_line).await?;

    if let Some(data) = &data_bytes {
        writer.write_all(data).await?;
    }
    if let Some(payload) = event.payload.as_ref().filter(|p| !p.is_empty()) {
        writer.write_all(payload).await?;
    }

    writer.flush().await?;
    Ok(())
}

/// Raw audio chunk as sent by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    pub rate: u32,
    pub width: u16,
    pub channels: u16,
    pub timestamp: Option<u64>,
    pub audio: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AudioChunkData {
    rate: u32,
    width: u16,
    channels: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DetectData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    names: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DetectionData {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<u64>,
}

/// Events a client sends to a session.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Describe,
    /// Replace the pending model selection. An empty list means the default.
    Detect { names: Vec<String> },
    AudioStart,
    AudioChunk(AudioChunk),
    AudioStop,
    /// Any event type the session does not act on.
    Unknown(String),
}

impl ClientEvent {
    pub fn from_event(event: Event) -> Result<Self> {
        match event.event_type.as_str() {
            DESCRIBE => Ok(ClientEvent::Describe),
            DETECT => {
                let data: DetectData = parse_data(&event)?;
                Ok(ClientEvent::Detect {
                    names: data.names.unwrap_or_default(),
                })
            }
            AUDIO_START => Ok(ClientEvent::AudioStart),
            AUDIO_CHUNK => {
                let data: AudioChunkData = parse_data(&event)?;
                Ok(ClientEvent::AudioChunk(AudioChunk {
                    rate: data.rate,
                    width: data.width,
                    channels: data.channels,
                    timestamp: data.timestamp,
                    audio: event.payload.unwrap_or_default(),
                }))
            }
            AUDIO_STOP => Ok(ClientEvent::AudioStop),
            other => Ok(ClientEvent::Unknown(other.to_string())),
        }
    }

    pub fn to_event(&self) -> Result<Event> {
        let event = match self {
            ClientEvent::Describe => Event::new(DESCRIBE),
            ClientEvent::Detect { names } => Event::new(DETECT).with_data(to_data(&DetectData {
                names: Some(names.clone()),
            })?),
            ClientEvent::AudioStart => Event::new(AUDIO_START),
            ClientEvent::AudioChunk(chunk) => Event::new(AUDIO_CHUNK)
                .with_data(to_data(&AudioChunkData {
                    rate: chunk.rate,
                    width: chunk.width,
                    channels: chunk.channels,
                    timestamp: chunk.timestamp,
                })?)
                .with_payload(chunk.audio.clone()),
            ClientEvent::AudioStop => Event::new(AUDIO_STOP),
            ClientEvent::Unknown(event_type) => Event::new(event_type),
        };
        Ok(event)
    }
}

/// Events a session sends back to its client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Info(Info),
    Detection { name: String, timestamp: Option<u64> },
    NotDetected,
}

impl ServerEvent {
    pub fn to_event(&self) -> Result<Event> {
        let event = match self {
            ServerEvent::Info(info) => Event::new(INFO).with_data(to_data(info)?),
            ServerEvent::Detection { name, timestamp } => {
                Event::new(DETECTION).with_data(to_data(&DetectionData {
                    name: name.clone(),
                    timestamp: *timestamp,
                })?)
            }
            ServerEvent::NotDetected => Event::new(NOT_DETECTED),
        };
        Ok(event)
    }

    pub fn from_event(event: Event) -> Result<Self> {
        match event.event_type.as_str() {
            INFO => Ok(ServerEvent::Info(parse_data(&event)?)),
            DETECTION => {
                let data: DetectionData = parse_data(&event)?;
                Ok(ServerEvent::Detection {
                    name: data.name,
                    timestamp: data.timestamp,
                })
            }
            NOT_DETECTED => Ok(ServerEvent::NotDetected),
            other => Err(protocol_error(format!("Unexpected event type: {}", other))),
        }
    }
}

fn parse_data<T: serde::de::DeserializeOwned>(event: &Event) -> Result<T> {
    serde_json::from_value(Value::Object(event.data.clone())).map_err(|e| {
        protocol_error(format!("Invalid data for {}: {}", event.event_type, e))
    })
}

fn to_data<T: Serialize>(value: &T) -> Result<Map<String, Value>> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(protocol_error(format!(
            "Event data must be a JSON object, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::BufReader;

    async fn decode(bytes: &[u8]) -> Result<Option<Event>> {
        let mut reader = BufReader::new(bytes);
        read_event(&mut reader).await
    }

    async fn encode(event: &Event) -> Vec<u8> {
        let mut out = Vec::new();
        write_event(&mut out, event).await.unwrap();
        out
    }

    #[tokio::test]
    async fn test_read_header_only_event() {
        let event = decode(b"{\"type\":\"audio-stop\"}\n").await.unwrap().unwrap();
        assert_eq!(event.event_type, AUDIO_STOP);
        assert!(event.data.is_empty());
        assert!(event.payload.is_none());
    }

    #[tokio::test]
    async fn test_read_inline_data() {
        let event = decode(b"{\"type\":\"detect\",\"data\":{\"names\":[\"alexa\"]}}\n")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            ClientEvent::from_event(event).unwrap(),
            ClientEvent::Detect {
                names: vec!["alexa".to_string()]
            }
        );
    }

    #[tokio::test]
    async fn test_separate_data_overrides_inline() {
        let data = br#"{"names":["okay_nabu"]}"#;
        let mut bytes = format!(
            "{{\"type\":\"detect\",\"data\":{{\"names\":[\"alexa\"],\"extra\":1}},\"data_length\":{}}}\n",
            data.len()
        )
        .into_bytes();
        bytes.extend_from_slice(data);

        let event = decode(&bytes).await.unwrap().unwrap();
        assert_eq!(event.data["names"], json!(["okay_nabu"]));
        assert_eq!(event.data["extra"], json!(1));
    }

    #[tokio::test]
    async fn test_read_audio_chunk_with_payload() {
        let data = br#"{"rate":16000,"width":2,"channels":1,"timestamp":250}"#;
        let mut bytes = format!(
            "{{\"type\":\"audio-chunk\",\"data_length\":{},\"payload_length\":4}}\n",
            data.len()
        )
        .into_bytes();
        bytes.extend_from_slice(data);
        bytes.extend_from_slice(&[1, 0, 2, 0]);

        let event = decode(&bytes).await.unwrap().unwrap();
        match ClientEvent::from_event(event).unwrap() {
            ClientEvent::AudioChunk(chunk) => {
                assert_eq!(chunk.rate, 16000);
                assert_eq!(chunk.width, 2);
                assert_eq!(chunk.channels, 1);
                assert_eq!(chunk.timestamp, Some(250));
                assert_eq!(chunk.audio, vec![1, 0, 2, 0]);
            }
            other => panic!("Expected AudioChunk, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_eof_is_none() {
        assert!(decode(b"").await.unwrap().is_none());
        assert!(decode(b"\n\n").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_malformed_header_keeps_stream_aligned() {
        let mut reader = BufReader::new(&b"not json\n{\"type\":\"describe\"}\n"[..]);

        let err = read_event(&mut reader).await.unwrap_err();
        assert!(matches!(err, WakeservError::Protocol { .. }));

        let next = read_event(&mut reader).await.unwrap().unwrap();
        assert_eq!(next.event_type, DESCRIBE);
    }

    #[tokio::test]
    async fn test_malformed_data_consumes_payload() {
        let data = b"{oops";
        let mut bytes = format!(
            "{{\"type\":\"audio-chunk\",\"data_length\":{},\"payload_length\":2}}\n",
            data.len()
        )
        .into_bytes();
        bytes.extend_from_slice(data);
        bytes.extend_from_slice(&[0, 0]);
        bytes.extend_from_slice(b"{\"type\":\"audio-stop\"}\n");
        let mut reader = BufReader::new(&bytes[..]);

        assert!(matches!(
            read_event(&mut reader).await,
            Err(WakeservError::Protocol { .. })
        ));
        let next = read_event(&mut reader).await.unwrap().unwrap();
        assert_eq!(next.event_type, AUDIO_STOP);
    }

    #[tokio::test]
    async fn test_header_without_newline_ends_connection() {
        let mut bytes = b"{\"type\":\"describe\",".to_vec();
        bytes.resize(MAX_HEADER_LENGTH + 16, b' ');

        let result = decode(&bytes).await;
        assert!(matches!(result, Err(WakeservError::Connection { .. })));
    }

    #[tokio::test]
    async fn test_long_header_within_limit_is_read() {
        let padding = " ".repeat(MAX_HEADER_LENGTH - 32);
        let bytes = format!("{{\"type\":\"audio-stop\"{}}}\n", padding);
        assert!(bytes.len() <= MAX_HEADER_LENGTH);

        let event = decode(bytes.as_bytes()).await.unwrap().unwrap();
        assert_eq!(event.event_type, AUDIO_STOP);
    }

    #[tokio::test]
    async fn test_non_utf8_header_is_skipped() {
        let mut bytes = vec![0xff, 0xfe, b'{', b'\n'];
        bytes.extend_from_slice(b"{\"type\":\"describe\"}\n");
        let mut reader = BufReader::new(&bytes[..]);

        assert!(matches!(
            read_event(&mut reader).await,
            Err(WakeservError::Protocol { .. })
        ));
        let next = read_event(&mut reader).await.unwrap().unwrap();
        assert_eq!(next.event_type, DESCRIBE);
    }

    #[tokio::test]
    async fn test_truncated_payload_is_io_error() {
        let result = decode(b"{\"type\":\"audio-chunk\",\"payload_length\":10}\n\x00\x00").await;
        assert!(matches!(result, Err(WakeservError::Io(_))));
    }

    #[tokio::test]
    async fn test_oversized_payload_ends_connection() {
        let header = format!(
            "{{\"type\":\"audio-chunk\",\"payload_length\":{}}}\n",
            MAX_PAYLOAD_LENGTH + 1
        );
        let result = decode(header.as_bytes()).await;
        assert!(matches!(result, Err(WakeservError::Connection { .. })));
    }

    #[tokio::test]
    async fn test_write_uses_data_length() {
        let event = ServerEvent::Detection {
            name: "okay_nabu".to_string(),
            timestamp: Some(42),
        }
        .to_event()
        .unwrap();

        let bytes = encode(&event).await;
        let text = String::from_utf8(bytes).unwrap();
        let (header, rest) = text.split_once('\n').unwrap();
        let header: Value = serde_json::from_str(header).unwrap();

        assert_eq!(header["type"], "detection");
        assert_eq!(header["data_length"].as_u64().unwrap() as usize, rest.len());
        assert!(header.get("payload_length").is_none());
        let data: Value = serde_json::from_str(rest).unwrap();
        assert_eq!(data, json!({"name": "okay_nabu", "timestamp": 42}));
    }

    #[tokio::test]
    async fn test_not_detected_is_header_only() {
        let bytes = encode(&ServerEvent::NotDetected.to_event().unwrap()).await;
        assert_eq!(bytes, b"{\"type\":\"not-detected\"}\n");
    }

    #[tokio::test]
    async fn test_written_chunk_reads_back() {
        let chunk = ClientEvent::AudioChunk(AudioChunk {
            rate: 22050,
            width: 2,
            channels: 2,
            timestamp: None,
            audio: vec![0; 8],
        });

        let bytes = encode(&chunk.to_event().unwrap()).await;
        let event = decode(&bytes).await.unwrap().unwrap();
        assert_eq!(ClientEvent::from_event(event).unwrap(), chunk);
    }

    #[test]
    fn test_detect_without_names_is_empty_selection() {
        let event = Event::new(DETECT);
        assert_eq!(
            ClientEvent::from_event(event).unwrap(),
            ClientEvent::Detect { names: vec![] }
        );
    }

    #[test]
    fn test_audio_chunk_missing_fields_is_protocol_error() {
        let mut data = Map::new();
        data.insert("rate".to_string(), json!(16000));
        let event = Event::new(AUDIO_CHUNK).with_data(data);

        assert!(matches!(
            ClientEvent::from_event(event),
            Err(WakeservError::Protocol { .. })
        ));
    }

    #[test]
    fn test_unknown_event_type_is_kept() {
        let event = Event::new("transcribe");
        assert_eq!(
            ClientEvent::from_event(event).unwrap(),
            ClientEvent::Unknown("transcribe".to_string())
        );
    }

    #[test]
    fn test_server_event_rejects_client_types() {
        assert!(ServerEvent::from_event(Event::new(AUDIO_STOP)).is_err());
    }
}
