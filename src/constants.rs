//! Centralized protocol and configuration constants.
//!
//! Consolidates the magic numbers used throughout the client so protocol
//! constraints live in one place.

// =============================================================================
// Protocol Constants (Kafka Wire Protocol)
// =============================================================================

/// Fixed overhead of a wire message set entry before the message itself:
/// offset (8 bytes) + message size (4 bytes).
pub const MESSAGE_SET_ENTRY_OVERHEAD: usize = 12;

/// Fixed overhead of a magic v0 message: crc (4) + magic (1) + attributes (1).
pub const MESSAGE_V0_HEADER_SIZE: usize = 6;

/// Low two bits of the message attribute byte select the compression codec.
pub const COMPRESSION_CODEC_MASK: i8 = 0x03;

/// Maximum allowed array size in Kafka protocol parsing.
///
/// Prevents memory exhaustion from malformed responses that claim to have
/// billions of elements. 100,000 is generous but bounded.
pub const MAX_PROTOCOL_ARRAY_SIZE: i32 = 100_000;

/// Replica id a client sends in Fetch and ListOffsets requests.
///
/// Only brokers use non-negative replica ids; ordinary consumers always
/// send -1.
pub const CONSUMER_REPLICA_ID: i32 = -1;

// =============================================================================
// Network Constants
// =============================================================================

/// Default maximum response frame size (100 MB).
///
/// A response frame claiming to be larger than this is treated as a
/// protocol violation and faults the connection rather than allocating.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// Correlation id used when none was supplied explicitly.
pub const DEFAULT_CORRELATION_ID: i32 = 1;

/// Client id stamped on requests when the caller does not configure one.
pub const DEFAULT_CLIENT_ID: &str = "samovar";
