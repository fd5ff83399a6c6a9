//! # Samovar
//! Rust-native Kafka wire protocol client core.
//!
//! This crate speaks the Kafka binary protocol against a cluster of
//! brokers: it lets applications produce messages to topics, fetch
//! messages from partitions, and query cluster metadata, while hiding
//! broker topology, leader elections, transient failures, and connection
//! lifecycle behind a routing layer. This is pure Rust all the way down;
//! meaning memory safety, safe concurrency, low resource usage, and speed.
//!
//! # Goals
//! - Easy to understand code
//! - Leverage best in class libraries such as [Tokio](https://tokio.rs/), [Nom](https://docs.rs/nom/latest/nom/)
//! - Provide a pure Rust implementation of the Kafka client protocol
//! - Be a building block for producers, consumers, and admin tools
//!
//! # Layers
//!
//! - [`protocol`] — the codec: version-aware encoders and parsers for
//!   every supported request/response pair, including CRC-validated
//!   message sets and GZIP-compressed inner sets.
//! - [`connection`] — a full-duplex connection to one broker that
//!   multiplexes concurrent requests by correlation id over a single
//!   socket, with reconnection and bounded request deadlines.
//! - [`router`] — the topology cache: resolves `(topic, partition)` to
//!   the leader's connection, detects stale metadata in responses, and
//!   refreshes atomically under concurrent readers.
//!
//! ## Example
//! ```rust,no_run
//! use samovar::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> samovar::error::Result<()> {
//!     let router = Router::new(
//!         vec!["localhost:9092".to_string()],
//!         RouterConfig::default(),
//!         ConnectionConfig::default(),
//!     );
//!
//!     let offset = router
//!         .produce(
//!             "purchases",
//!             None,
//!             Some(bytes::Bytes::from_static(b"socks")),
//!             &ProducerConfig::default(),
//!         )
//!         .await?;
//!     println!("stored at {:?}", offset);
//!     Ok(())
//! }
//! ```
//!
//! ## Resources
//! - [Kafka Protocol Spec](https://kafka.apache.org/protocol.html)
//! - [Confluence Docs](https://cwiki.apache.org/confluence/display/KAFKA/A+Guide+To+The+Kafka+Protocol)

#![forbid(unsafe_code)]

pub mod config;
pub mod connection;
pub mod constants;
pub mod encode;
pub mod error;
pub mod network;
pub mod parser;
pub mod protocol;
pub mod retry;
pub mod router;

pub mod prelude {
    //! Main export of client structures.
    pub use crate::config::{Acks, ConnectionConfig, ProducerConfig, RetrySchedule, RouterConfig};
    pub use crate::connection::{BrokerConnection, TelemetrySnapshot};
    pub use crate::error::{Error, KafkaCode, Result};
    pub use crate::network::{NetworkEvent, NetworkObserver};
    pub use crate::protocol::messages::{Compression, Message, MessageSet};
    pub use crate::protocol::produce::ProduceMessage;
    pub use crate::protocol::{ApiKey, KafkaRequest, KafkaResponse, RequestContext};
    pub use crate::router::{DefaultPartitioner, Partitioner, Router};

    pub use bytes;

    pub mod protocol {
        //! Request and response types for every supported API.
        pub use crate::protocol::*;
    }
}
