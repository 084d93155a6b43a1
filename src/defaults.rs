//! Default configuration constants for wakeserv.
//!
//! Shared by the config layer, the session manager and the transport so that
//! the audio format and the model defaults are defined in exactly one place.

/// Sample rate every chunk is converted to before detection, in Hz.
pub const SAMPLE_RATE: u32 = 16000;

/// Sample width in bytes after conversion (16-bit signed PCM).
pub const SAMPLE_WIDTH: u16 = 2;

/// Model used when a client never narrows the selection, or narrows it to
/// nothing that resolves.
pub const DEFAULT_MODEL: &str = "okay_nabu";

/// Seconds before the same model can report another detection.
pub const REFRACTORY_SECONDS: f64 = 2.0;

/// Value of the `type` field that marks a JSON file as a custom model config.
pub const CUSTOM_MODEL_TYPE: &str = "micro";

/// Listen URI when none is configured.
pub const SERVER_URI: &str = "stdio://";

/// Fallback for metadata fields a custom model config leaves out.
pub const UNKNOWN: &str = "unknown";

/// Program name reported in the capability descriptor.
pub const PROGRAM_NAME: &str = "microWakeWord";

/// Program description reported in the capability descriptor.
pub const PROGRAM_DESCRIPTION: &str = "Streaming wake word detection";

/// Attribution for the program and its builtin models.
pub const ATTRIBUTION_NAME: &str = "kahrendt";

/// Attribution URL for the program and its builtin models.
pub const ATTRIBUTION_URL: &str = "https://github.com/kahrendt/microWakeWord/";

/// Samples per chunk when streaming a WAV file from the CLI client.
pub const SAMPLES_PER_CHUNK: usize = 1024;
