//! Crate & protocol level errors.
//!
//! # Error Hierarchy
//!
//! Two layers:
//!
//! - [`Error`]: everything that can go wrong on the client side — framing,
//!   decoding, sockets, timeouts, routing.
//! - [`KafkaCode`]: error codes a broker embeds in response bodies, carried
//!   through unchanged.
//!
//! `Error` is `Clone` because a single connection fault is fanned out to
//! every request waiting on that connection.

use std::{io, result};

use bytes::Bytes;
use num_derive::FromPrimitive;
use thiserror::Error as ThisError;

pub type Result<T> = result::Result<T, Error>;

/// Client-side errors.
#[derive(Clone, Debug, ThisError)]
pub enum Error {
    /// An error in the network.
    #[error("IO error: {0:?}")]
    IoError(io::ErrorKind),

    /// A decode needed more bytes than the buffer holds.
    ///
    /// Distinct from [`Error::ParsingError`]: the bytes so far were
    /// well-formed, the frame just ended early. Never retried by the codec.
    #[error("buffer under run: {0}")]
    BufferUnderRun(&'static str),

    /// Could not parse the data.
    #[error("parsing error: invalid data ({} bytes)", .0.len())]
    ParsingError(Bytes),

    /// A message's stored CRC does not match the CRC computed over its body.
    #[error("crc mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    CrcMismatch { stored: u32, computed: u32 },

    /// The message attribute byte designates a compression codec this
    /// client does not support.
    #[error("unsupported compression codec bits: {0}")]
    UnsupportedCodec(i8),

    /// Socket-level failure after reconnect attempts were exhausted, or
    /// loss of a connected socket. Every request in flight on the
    /// connection is completed with this error.
    #[error("connection error: {0}")]
    ConnectionError(String),

    /// The request deadline elapsed before a response arrived.
    #[error("request timed out")]
    Timeout,

    /// Operation on a disposed transport, connection, or router.
    #[error("object disposed")]
    Disposed,

    /// Routing was requested for a topic or partition the metadata cache
    /// cannot resolve — unknown, or currently electing a leader.
    /// Retryable by forcing a metadata refresh.
    #[error("no cached metadata: {0}")]
    UncachedMetadata(String),

    /// A decoded response carried a non-zero error code.
    #[error("broker returned {0:?}")]
    Kafka(KafkaCode),

    /// A metadata response was internally inconsistent (missing host,
    /// non-positive port).
    #[error("invalid metadata: {0}")]
    MetadataValidation(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether a router-level retry (with a metadata refresh where
    /// indicated) may recover from this error.
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::ConnectionError(_)
            | Error::IoError(_)
            | Error::Timeout
            | Error::UncachedMetadata(_) => true,
            Error::Kafka(code) => code.is_retriable(),
            _ => false,
        }
    }

    /// Whether the next retry attempt should refresh cluster metadata
    /// before resolving a route.
    pub fn requires_refresh(&self) -> bool {
        match self {
            Error::ConnectionError(_)
            | Error::IoError(_)
            | Error::Timeout
            | Error::UncachedMetadata(_) => true,
            // The requested offset range lives on the (possibly moved)
            // leader; refreshing re-resolves it.
            Error::Kafka(KafkaCode::OffsetOutOfRange) => true,
            Error::Kafka(code) => code.is_from_stale_metadata(),
            _ => false,
        }
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Error::IoError(a), Error::IoError(b)) => a == b,
            (Error::BufferUnderRun(a), Error::BufferUnderRun(b)) => a == b,
            (Error::ParsingError(a), Error::ParsingError(b)) => a == b,
            (
                Error::CrcMismatch {
                    stored: a,
                    computed: b,
                },
                Error::CrcMismatch {
                    stored: c,
                    computed: d,
                },
            ) => a == c && b == d,
            (Error::UnsupportedCodec(a), Error::UnsupportedCodec(b)) => a == b,
            (Error::ConnectionError(a), Error::ConnectionError(b)) => a == b,
            (Error::Timeout, Error::Timeout) => true,
            (Error::Disposed, Error::Disposed) => true,
            (Error::UncachedMetadata(a), Error::UncachedMetadata(b)) => a == b,
            (Error::Kafka(a), Error::Kafka(b)) => a == b,
            (Error::MetadataValidation(a), Error::MetadataValidation(b)) => a == b,
            (Error::Config(a), Error::Config(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::IoError(e.kind())
    }
}

/// Various errors reported by a remote Kafka server.
/// See also [Kafka Errors](http://kafka.apache.org/protocol.html)
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, Default)]
pub enum KafkaCode {
    /// An unexpected server error
    Unknown = -1,
    #[default]
    None = 0,
    /// The requested offset is outside the range of offsets
    /// maintained by the server for the given topic/partition
    OffsetOutOfRange = 1,
    /// This indicates that a message contents does not match its CRC
    CorruptMessage = 2,
    /// This request is for a topic or partition that does not exist
    /// on this broker.
    UnknownTopicOrPartition = 3,
    /// The message has a negative size
    InvalidMessageSize = 4,
    /// This error is thrown if we are in the middle of a leadership
    /// election and there is currently no leader for this partition
    /// and hence it is unavailable for writes.
    LeaderNotAvailable = 5,
    /// This error is thrown if the client attempts to send messages
    /// to a replica that is not the leader for some partition. It
    /// indicates that the clients metadata is out of date.
    NotLeaderForPartition = 6,
    /// This error is thrown if the request exceeds the user-specified
    /// time limit in the request.
    RequestTimedOut = 7,
    /// This is not a client facing error and is used mostly by tools
    /// when a broker is not alive.
    BrokerNotAvailable = 8,
    /// If replica is expected on a broker, but is not (this can be
    /// safely ignored).
    ReplicaNotAvailable = 9,
    /// The server has a configurable maximum message size to avoid
    /// unbounded memory allocation. This error is thrown if the
    /// client attempt to produce a message larger than this maximum.
    MessageSizeTooLarge = 10,
    /// Internal error code for broker-to-broker communication.
    StaleControllerEpoch = 11,
    /// If you specify a string larger than configured maximum for
    /// offset metadata
    OffsetMetadataTooLarge = 12,
    /// The server disconnected before a response was received.
    NetworkException = 13,
    /// The broker returns this error code for an offset fetch request
    /// if it is still loading offsets (after a leader change for that
    /// offsets topic partition), or in response to group membership
    /// requests (such as heartbeats) when group metadata is being
    /// loaded by the coordinator.
    OffsetsLoadInProgress = 14,
    /// The broker returns this error code for group coordinator
    /// requests, offset commits, and most group management requests
    /// if the offsets topic has not yet been created, or if the group
    /// coordinator is not active.
    ConsumerCoordinatorNotAvailable = 15,
    /// The broker returns this error code if it receives an offset
    /// fetch or commit request for a group that it is not a
    /// coordinator for.
    NotCoordinatorForGroup = 16,
    /// For a request which attempts to access an invalid topic
    /// (e.g. one which has an illegal name), or if an attempt is made
    /// to write to an internal topic (such as the consumer offsets
    /// topic).
    InvalidTopic = 17,
    /// If a message batch in a produce request exceeds the maximum
    /// configured segment size.
    RecordListTooLarge = 18,
    /// Returned from a produce request when the number of in-sync
    /// replicas is lower than the configured minimum and requiredAcks is
    /// -1.
    NotEnoughReplicas = 19,
    /// Returned from a produce request when the message was written
    /// to the log, but with fewer in-sync replicas than required.
    NotEnoughReplicasAfterAppend = 20,
    /// Returned from a produce request if the requested requiredAcks is
    /// invalid (anything other than -1, 1, or 0).
    InvalidRequiredAcks = 21,
    /// Returned from group membership requests (such as heartbeats) when
    /// the generation id provided in the request is not the current
    /// generation.
    IllegalGeneration = 22,
    /// Returned in join group when the member provides a protocol type or
    /// set of protocols which is not compatible with the current group.
    InconsistentGroupProtocol = 23,
    /// Returned in join group when the groupId is empty or null.
    InvalidGroupId = 24,
    /// Returned from group requests (offset commits/fetches, heartbeats,
    /// etc) when the memberId is not in the current generation.
    UnknownMemberId = 25,
    /// Return in join group when the requested session timeout is outside
    /// of the allowed range on the broker
    InvalidSessionTimeout = 26,
    /// Returned in heartbeat requests when the coordinator has begun
    /// rebalancing the group. This indicates to the client that it
    /// should rejoin the group.
    RebalanceInProgress = 27,
    /// This error indicates that an offset commit was rejected because of
    /// oversize metadata.
    InvalidCommitOffsetSize = 28,
    /// Returned by the broker when the client is not authorized to access
    /// the requested topic.
    TopicAuthorizationFailed = 29,
    /// Returned by the broker when the client is not authorized to access
    /// a particular groupId.
    GroupAuthorizationFailed = 30,
    /// Returned by the broker when the client is not authorized to use an
    /// inter-broker or administrative API.
    ClusterAuthorizationFailed = 31,
    /// The timestamp of the message is out of acceptable range.
    InvalidTimestamp = 32,
    /// The broker does not support the requested SASL mechanism.
    UnsupportedSaslMechanism = 33,
    /// Request is not valid given the current SASL state.
    IllegalSaslState = 34,
    /// The version of API is not supported.
    UnsupportedVersion = 35,
}

impl KafkaCode {
    /// Whether the protocol table marks this code as retriable: a later
    /// identical request may succeed without any client-side change.
    pub fn is_retriable(self) -> bool {
        matches!(
            self,
            KafkaCode::OffsetOutOfRange
                | KafkaCode::CorruptMessage
                | KafkaCode::UnknownTopicOrPartition
                | KafkaCode::LeaderNotAvailable
                | KafkaCode::NotLeaderForPartition
                | KafkaCode::RequestTimedOut
                | KafkaCode::NetworkException
                | KafkaCode::OffsetsLoadInProgress
                | KafkaCode::ConsumerCoordinatorNotAvailable
                | KafkaCode::NotCoordinatorForGroup
                | KafkaCode::NotEnoughReplicas
                | KafkaCode::NotEnoughReplicasAfterAppend
        )
    }

    /// Whether this code indicates the client acted on stale topology —
    /// the next attempt should refresh metadata before routing.
    pub fn is_from_stale_metadata(self) -> bool {
        matches!(
            self,
            KafkaCode::UnknownTopicOrPartition
                | KafkaCode::LeaderNotAvailable
                | KafkaCode::NotLeaderForPartition
                | KafkaCode::NotCoordinatorForGroup
                | KafkaCode::ConsumerCoordinatorNotAvailable
        )
    }
}
