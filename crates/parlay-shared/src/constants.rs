/// Smallest byte count a playable media file can have (a bare WAV header)
pub const MIN_MEDIA_BYTES: usize = 44;

/// Maximum attachment size in bytes (50 MiB)
pub const MAX_MEDIA_SIZE: usize = 50 * 1024 * 1024;

/// Conversation poll interval in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_500;

/// Number of verification fetches after an upload
pub const DEFAULT_VERIFY_ATTEMPTS: u32 = 3;

/// Delay between verification fetches in milliseconds
pub const DEFAULT_VERIFY_DELAY_MS: u64 = 1_000;

/// Timeout for a single verification fetch in milliseconds
pub const DEFAULT_VERIFY_TIMEOUT_MS: u64 = 5_000;

/// Timeout for REST calls (insert, fetch, download) in milliseconds
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 15_000;

/// Timeout for an object storage upload in milliseconds
pub const DEFAULT_UPLOAD_TIMEOUT_MS: u64 = 60_000;

/// How far a confirmed timestamp may drift from the client timestamp of a
/// pending message and still be considered the same message
pub const DEFAULT_MATCH_TOLERANCE_SECS: i64 = 30;

/// Successful polls a sent-but-unconfirmed message survives before it is
/// declared lost
pub const DEFAULT_PENDING_MAX_POLLS: u32 = 5;

/// Object storage buckets
pub const DEFAULT_AUDIO_BUCKET: &str = "chat-audio";
pub const DEFAULT_IMAGE_BUCKET: &str = "chat-images";

/// Voice message capture format
pub const RECORDING_SAMPLE_RATE: u32 = 48_000;
pub const RECORDING_CHANNELS: u16 = 1;
