//! Broker routing and cluster topology.
//!
//! The [`Router`] hides broker identity from callers: it maintains a
//! lazily populated cache of cluster topology (brokers, topics,
//! partition leaders) built from Metadata responses, owns one
//! [`BrokerConnection`] per live broker, and resolves `(topic,
//! partition)` to the leader's connection.
//!
//! The cache is an immutable snapshot swapped atomically: readers load it
//! without locking, while refreshes serialize on a single async lock and
//! publish a whole new [`Cluster`] value. The topic map and the
//! broker→connection map live in the same snapshot, so a reader can never
//! observe a partition leader without a connection for it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use backon::Retryable;
use bytes::Bytes;
use futures::future::try_join_all;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;

use crate::config::{Acks, ConnectionConfig, ProducerConfig, RetrySchedule, RouterConfig};
use crate::connection::BrokerConnection;
use crate::error::{Error, KafkaCode, Result};
use crate::protocol::metadata::{MetadataRequest, MetadataResponse};
use crate::protocol::offsets::{
    ListOffsetsPartition, ListOffsetsRequest, ListOffsetsTopic,
};
use crate::protocol::produce::{ProduceMessage, ProducePartition, ProduceRequest};
use crate::protocol::{KafkaRequest, KafkaResponse};
use crate::retry;

/// Selects a partition for a keyed or unkeyed message.
pub trait Partitioner: Send + Sync {
    /// Pick one of `partitions` (never empty, all with known leaders).
    fn partition(&self, key: Option<&[u8]>, partitions: &[i32]) -> i32;
}

/// Keyed messages hash onto a stable partition; unkeyed messages
/// round-robin across the partitions whose leader is known.
#[derive(Default)]
pub struct DefaultPartitioner {
    round_robin: AtomicUsize,
}

impl Partitioner for DefaultPartitioner {
    fn partition(&self, key: Option<&[u8]>, partitions: &[i32]) -> i32 {
        match key {
            Some(key) => {
                let hash = crc32fast::hash(key) as usize;
                partitions[hash % partitions.len()]
            }
            None => {
                let next = self.round_robin.fetch_add(1, Ordering::Relaxed);
                partitions[next % partitions.len()]
            }
        }
    }
}

/// One broker in a published snapshot.
#[derive(Clone)]
pub struct ClusterBroker {
    pub id: i32,
    pub host: String,
    pub port: i32,
    pub(crate) connection: BrokerConnection,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterPartition {
    pub partition: i32,
    /// Leader broker id; -1 while an election runs.
    pub leader: i32,
    pub replicas: Vec<i32>,
    pub isr: Vec<i32>,
    pub error_code: KafkaCode,
}

#[derive(Clone)]
pub struct ClusterTopic {
    pub topic: String,
    pub error_code: KafkaCode,
    pub partitions: Vec<ClusterPartition>,
    fetched_at: Instant,
}

impl ClusterTopic {
    pub fn partition(&self, partition: i32) -> Option<&ClusterPartition> {
        self.partitions.iter().find(|p| p.partition == partition)
    }

    /// Partition ids that currently have a known leader.
    pub fn routable_partitions(&self) -> Vec<i32> {
        self.partitions
            .iter()
            .filter(|p| p.leader >= 0)
            .map(|p| p.partition)
            .collect()
    }
}

/// Immutable topology snapshot. Refresh never mutates a published
/// snapshot; it swaps in a new one.
#[derive(Default, Clone)]
pub struct Cluster {
    brokers: HashMap<i32, ClusterBroker>,
    topics: HashMap<String, ClusterTopic>,
}

impl Cluster {
    pub fn broker(&self, id: i32) -> Option<&ClusterBroker> {
        self.brokers.get(&id)
    }

    pub fn topic(&self, topic: &str) -> Option<&ClusterTopic> {
        self.topics.get(topic)
    }

    pub fn topics(&self) -> impl Iterator<Item = &ClusterTopic> {
        self.topics.values()
    }

    pub fn broker_ids(&self) -> Vec<i32> {
        self.brokers.keys().copied().collect()
    }
}

struct RouterInner {
    seeds: Vec<String>,
    config: RouterConfig,
    connection_config: ConnectionConfig,
    partitioner: Box<dyn Partitioner>,
    cluster: watch::Sender<Arc<Cluster>>,
    /// Serializes metadata refreshes; snapshot readers never take it.
    refresh_lock: AsyncMutex<()>,
    shutdown: CancellationToken,
}

/// Routes requests to partition leaders, refreshing topology when the
/// cluster signals the cache has gone stale.
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
    _guard: Arc<tokio_util::sync::DropGuard>,
}

impl Router {
    /// Build a router over a seed list of `host:port` strings.
    pub fn new(
        seeds: Vec<String>,
        config: RouterConfig,
        connection_config: ConnectionConfig,
    ) -> Self {
        Self::with_partitioner(
            seeds,
            config,
            connection_config,
            Box::new(DefaultPartitioner::default()),
        )
    }

    pub fn with_partitioner(
        seeds: Vec<String>,
        config: RouterConfig,
        connection_config: ConnectionConfig,
        partitioner: Box<dyn Partitioner>,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let (cluster, _) = watch::channel(Arc::new(Cluster::default()));
        Self {
            inner: Arc::new(RouterInner {
                seeds,
                config,
                connection_config,
                partitioner,
                cluster,
                refresh_lock: AsyncMutex::new(()),
                shutdown: shutdown.clone(),
            }),
            _guard: Arc::new(shutdown.drop_guard()),
        }
    }

    /// The current topology snapshot.
    pub fn snapshot(&self) -> Arc<Cluster> {
        self.inner.cluster.borrow().clone()
    }

    /// Resolve the leader connection for one partition out of the cache.
    ///
    /// Never refreshes: a miss (unknown topic, unknown partition, or a
    /// partition mid-election) fails with [`Error::UncachedMetadata`] and
    /// the caller decides whether to refresh and retry.
    pub fn route(&self, topic: &str, partition: i32) -> Result<BrokerConnection> {
        let snapshot = self.snapshot();
        let entry = snapshot
            .topic(topic)
            .ok_or_else(|| Error::UncachedMetadata(format!("topic {} not in cache", topic)))?;
        let partition_entry = entry.partition(partition).ok_or_else(|| {
            Error::UncachedMetadata(format!("partition {}/{} not in cache", topic, partition))
        })?;
        if partition_entry.leader < 0 {
            return Err(Error::UncachedMetadata(format!(
                "partition {}/{} has no leader (election in progress)",
                topic, partition
            )));
        }
        snapshot
            .broker(partition_entry.leader)
            .map(|b| b.connection.clone())
            .ok_or_else(|| {
                Error::UncachedMetadata(format!(
                    "leader {} for {}/{} has no connection",
                    partition_entry.leader, topic, partition
                ))
            })
    }

    /// Select a partition with the configured partitioner, then route.
    pub fn route_by_key(&self, topic: &str, key: Option<&[u8]>) -> Result<(i32, BrokerConnection)> {
        let snapshot = self.snapshot();
        let entry = snapshot
            .topic(topic)
            .ok_or_else(|| Error::UncachedMetadata(format!("topic {} not in cache", topic)))?;
        let routable = entry.routable_partitions();
        if routable.is_empty() {
            return Err(Error::UncachedMetadata(format!(
                "topic {} has no partitions with a known leader",
                topic
            )));
        }
        let partition = self.inner.partitioner.partition(key, &routable);
        let connection = self.route(topic, partition)?;
        Ok((partition, connection))
    }

    /// Topic metadata, cache-first: a fresh cache entry is returned
    /// as-is, otherwise the topology is refreshed first.
    pub async fn metadata(&self, topic: &str) -> Result<ClusterTopic> {
        if !self.topic_is_fresh(topic) {
            self.refresh(Some(&[topic]), false).await?;
        }
        self.snapshot()
            .topic(topic)
            .cloned()
            .ok_or_else(|| Error::UncachedMetadata(format!("topic {} unknown to cluster", topic)))
    }

    /// Metadata for every topic in the cluster; always refreshes.
    pub async fn metadata_all(&self) -> Result<Vec<ClusterTopic>> {
        self.refresh(None, true).await?;
        Ok(self.snapshot().topics().cloned().collect())
    }

    fn topic_is_fresh(&self, topic: &str) -> bool {
        let snapshot = self.snapshot();
        match snapshot.topic(topic) {
            Some(entry) => match self.inner.config.cache_expiration {
                Some(expiry) => entry.fetched_at.elapsed() < expiry,
                None => true,
            },
            None => false,
        }
    }

    /// Force a metadata request and swap in a new topology snapshot.
    ///
    /// `topics: None` asks for the whole cluster. With
    /// `ignore_cache_expiry` unset, a refresh whose topics are all still
    /// fresh is a no-op — this collapses the thundering herd of
    /// concurrent dispatchers that all noticed the same stale entry.
    pub async fn refresh(&self, topics: Option<&[&str]>, ignore_cache_expiry: bool) -> Result<()> {
        let _lock = self.inner.refresh_lock.lock().await;
        if self.inner.shutdown.is_cancelled() {
            return Err(Error::Disposed);
        }
        if !ignore_cache_expiry {
            if let Some(topics) = topics {
                if topics.iter().all(|t| self.topic_is_fresh(t)) {
                    return Ok(());
                }
            }
        }

        // A malformed metadata response gets one retry before surfacing.
        let validation_retries = AtomicUsize::new(0);
        let response = (|| self.fetch_and_validate(topics))
            .retry(retry::policy(&self.inner.config.refresh_retry))
            .when(|err: &Error| {
                err.is_retriable()
                    || (matches!(err, Error::MetadataValidation(_))
                        && validation_retries.fetch_add(1, Ordering::Relaxed) == 0)
            })
            .notify(|err: &Error, delay| {
                tracing::debug!(error = %err, ?delay, "metadata refresh failed, backing off");
            })
            .await?;

        self.apply_metadata(response, topics)
    }

    /// Fetch metadata from any live broker, falling back to the seed
    /// list, and validate the response.
    async fn fetch_and_validate(&self, topics: Option<&[&str]>) -> Result<MetadataResponse> {
        let request = match topics {
            Some(topics) => {
                MetadataRequest::new(Some(topics.iter().map(|t| t.to_string()).collect()))
            }
            None => MetadataRequest::all_topics(),
        };

        let snapshot = self.snapshot();
        let mut last_err: Option<Error> = None;

        for broker in snapshot.brokers.values() {
            match broker.connection.send(&request).await {
                Ok(response) => return self.validate_metadata(response),
                Err(err) => {
                    tracing::debug!(broker = broker.id, error = %err, "metadata fetch failed");
                    last_err = Some(err);
                }
            }
        }

        for seed in &self.inner.seeds {
            let connection = BrokerConnection::connect(
                seed,
                self.inner.connection_config.clone(),
                Some(self.inner.config.client_id.clone()),
                Vec::new(),
            );
            let result = connection.send(&request).await;
            connection.dispose();
            match result {
                Ok(response) => return self.validate_metadata(response),
                Err(err) => {
                    tracing::debug!(seed = %seed, error = %err, "metadata fetch from seed failed");
                    last_err = Some(err);
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| Error::ConnectionError("no broker reachable".to_string())))
    }

    fn validate_metadata(&self, response: MetadataResponse) -> Result<MetadataResponse> {
        for broker in &response.brokers {
            if broker.node_id == -1 {
                return Err(Error::UncachedMetadata(
                    "metadata names a broker with id -1 (cluster still electing)".to_string(),
                ));
            }
            if broker.host.is_empty() || broker.port <= 0 {
                return Err(Error::MetadataValidation(format!(
                    "broker {} has invalid endpoint {:?}:{}",
                    broker.node_id, broker.host, broker.port
                )));
            }
        }
        for topic in &response.topics {
            match topic.error_code {
                KafkaCode::None => {}
                code @ (KafkaCode::LeaderNotAvailable
                | KafkaCode::OffsetsLoadInProgress
                | KafkaCode::ConsumerCoordinatorNotAvailable) => {
                    return Err(Error::Kafka(code));
                }
                // Other topic errors are cached as-is; routing to such a
                // topic reports the miss.
                _ => {}
            }
        }
        Ok(response)
    }

    /// Build and publish a new snapshot from a validated response.
    ///
    /// Connections are reused when a broker's endpoint is unchanged;
    /// replaced or removed connections are disposed only after the new
    /// snapshot is published.
    fn apply_metadata(
        &self,
        response: MetadataResponse,
        requested: Option<&[&str]>,
    ) -> Result<()> {
        let old = self.snapshot();
        let now = Instant::now();

        let mut brokers = HashMap::new();
        for broker in &response.brokers {
            let reusable = old.brokers.get(&broker.node_id).filter(|existing| {
                existing.host == broker.host && existing.port == broker.port
            });
            let connection = match reusable {
                Some(existing) => existing.connection.clone(),
                None => BrokerConnection::connect(
                    &format!("{}:{}", broker.host, broker.port),
                    self.inner.connection_config.clone(),
                    Some(self.inner.config.client_id.clone()),
                    Vec::new(),
                ),
            };
            brokers.insert(
                broker.node_id,
                ClusterBroker {
                    id: broker.node_id,
                    host: broker.host.clone(),
                    port: broker.port,
                    connection,
                },
            );
        }

        let mut topics = old.topics.clone();
        let mut electing: Vec<String> = Vec::new();
        for topic in response.topics {
            let partitions: Vec<ClusterPartition> = topic
                .partitions
                .iter()
                .map(|p| ClusterPartition {
                    partition: p.partition,
                    leader: p.leader,
                    replicas: p.replicas.clone(),
                    isr: p.isr.clone(),
                    error_code: p.error_code,
                })
                .collect();
            for p in partitions.iter().filter(|p| p.leader < 0) {
                electing.push(format!("{}/{}", topic.topic, p.partition));
            }
            topics.insert(
                topic.topic.clone(),
                ClusterTopic {
                    topic: topic.topic,
                    error_code: topic.error_code,
                    partitions,
                    fetched_at: now,
                },
            );
        }

        // Keep the snapshot's invariant: every known leader id resolves
        // to a connection in the same snapshot.
        topics.retain(|_, t| {
            t.partitions
                .iter()
                .all(|p| p.leader < 0 || brokers.contains_key(&p.leader))
        });

        let replaced: Vec<BrokerConnection> = old
            .brokers
            .values()
            .filter(|b| {
                brokers
                    .get(&b.id)
                    .map(|n| n.host != b.host || n.port != b.port)
                    .unwrap_or(true)
            })
            .map(|b| b.connection.clone())
            .collect();

        let broker_count = brokers.len();
        let topic_count = topics.len();
        self.inner
            .cluster
            .send_replace(Arc::new(Cluster { brokers, topics }));
        tracing::debug!(brokers = broker_count, topics = topic_count, "topology updated");

        for connection in replaced {
            tracing::debug!(addr = connection.addr(), "disposing replaced broker connection");
            connection.dispose();
        }

        // Partitions still electing a leader fail the refresh for the
        // topics the caller actually asked about; everything learned is
        // already cached, so the next attempt only re-fetches.
        if let Some(requested) = requested {
            let blocked: Vec<String> = electing
                .into_iter()
                .filter(|e| requested.iter().any(|t| e.starts_with(&format!("{}/", t))))
                .collect();
            if !blocked.is_empty() {
                return Err(Error::UncachedMetadata(format!(
                    "partitions electing a leader: {}",
                    blocked.join(", ")
                )));
            }
        }
        Ok(())
    }

    /// The canonical dispatch: resolve the leader, send, inspect the
    /// response's embedded error codes, and retry with a refresh when
    /// the failure points at stale topology.
    pub async fn send<R: KafkaRequest>(
        &self,
        request: &R,
        topic: &str,
        partition: i32,
        api_version: i16,
        retry_schedule: Option<RetrySchedule>,
    ) -> Result<R::Response> {
        let schedule = retry_schedule.unwrap_or(self.inner.config.dispatch_retry);
        let needs_refresh = AtomicBool::new(false);

        let attempt = || async {
            if self.inner.shutdown.is_cancelled() {
                return Err(Error::Disposed);
            }
            if needs_refresh.swap(false, Ordering::Relaxed) {
                // Refresh failures fold into the route attempt below.
                if let Err(err) = self.refresh(Some(&[topic]), true).await {
                    tracing::debug!(topic, error = %err, "refresh before retry failed");
                }
            }
            if !self.topic_is_fresh(topic) {
                self.refresh(Some(&[topic]), false).await?;
            }

            let connection = self.route(topic, partition)?;
            let context = connection.next_context(api_version);
            let response = connection.send_with_context(request, context).await?;

            let codes: Vec<KafkaCode> = response
                .error_codes()
                .into_iter()
                .filter(|code| *code != KafkaCode::None)
                .collect();
            if codes.is_empty() {
                return Ok(response);
            }
            // Prefer surfacing a fatal code over retrying a transient one.
            let code = codes
                .iter()
                .copied()
                .find(|code| !code.is_retriable())
                .unwrap_or(codes[0]);
            tracing::debug!(topic, partition, ?codes, "response carried error codes");
            Err(Error::Kafka(code))
        };

        attempt
            .retry(retry::policy(&schedule))
            .when(|err: &Error| {
                if err.requires_refresh() {
                    needs_refresh.store(true, Ordering::Relaxed);
                }
                err.is_retriable()
            })
            .notify(|err: &Error, delay| {
                tracing::debug!(topic, partition, error = %err, ?delay, "dispatch failed, backing off");
            })
            .await
    }

    /// Produce one message, honoring the producer config's acks, ack
    /// timeout, codec, and the router's partitioner for unkeyed sends.
    ///
    /// With [`Acks::None`] the broker sends no response and the returned
    /// partition response is `None`.
    pub async fn produce(
        &self,
        topic: &str,
        key: Option<Bytes>,
        value: Option<Bytes>,
        config: &ProducerConfig,
    ) -> Result<Option<ProducePartition>> {
        config.validate()?;
        if !self.topic_is_fresh(topic) {
            self.refresh(Some(&[topic]), false).await?;
        }
        let (partition, _) = self.route_by_key(topic, key.as_deref())?;
        let mut responses = self
            .produce_batch(
                vec![ProduceMessage {
                    topic: topic.to_string(),
                    partition,
                    key,
                    value,
                }],
                config,
            )
            .await?;
        Ok(responses.pop())
    }

    /// Produce a batch of messages with explicit partitions, grouped by
    /// `(topic, partition)` and dispatched to each group's leader in
    /// parallel. The first failure wins.
    ///
    /// With [`Acks::None`] nothing comes back and the result is empty.
    pub async fn produce_batch(
        &self,
        messages: Vec<ProduceMessage>,
        config: &ProducerConfig,
    ) -> Result<Vec<ProducePartition>> {
        config.validate()?;
        if messages.is_empty() {
            return Ok(Vec::new());
        }

        let mut topics: Vec<String> = messages.iter().map(|m| m.topic.clone()).collect();
        topics.sort_unstable();
        topics.dedup();
        for topic in &topics {
            if !self.topic_is_fresh(topic) {
                self.refresh(Some(&[topic.as_str()]), false).await?;
            }
        }

        let mut groups: Vec<((String, i32), Vec<ProduceMessage>)> = Vec::new();
        for message in messages {
            let entry = (message.topic.clone(), message.partition);
            match groups.iter_mut().find(|(key, _)| *key == entry) {
                Some((_, group)) => group.push(message),
                None => groups.push((entry, vec![message])),
            }
        }

        let acks = config.acks;
        let requests = groups.into_iter().map(|((topic, partition), group)| {
            let request = ProduceRequest::new(
                config.acks.as_i16(),
                config.ack_timeout.as_millis() as i32,
                config.codec,
                group,
            );
            async move {
                if acks == Acks::None {
                    let connection = self.route(&topic, partition)?;
                    let context = connection.next_context(0);
                    connection.send_no_response(&request, context).await?;
                    return Ok::<Option<ProducePartition>, Error>(None);
                }
                let response = self.send(&request, &topic, partition, 0, None).await?;
                let partition_response = response
                    .topics
                    .iter()
                    .find(|t| t.topic == topic)
                    .and_then(|t| t.partitions.iter().find(|p| p.partition == partition))
                    .cloned()
                    // The broker answered but not for the partition we
                    // produced to; treat it as a server-side anomaly.
                    .ok_or(Error::Kafka(KafkaCode::Unknown))?;
                Ok(Some(partition_response))
            }
        });

        let responses = try_join_all(requests).await?;
        Ok(responses.into_iter().flatten().collect())
    }

    /// Log offsets for every partition of a topic at `timestamp`
    /// ([`crate::protocol::offsets::LATEST_OFFSET`] /
    /// [`crate::protocol::offsets::EARLIEST_OFFSET`]), dispatched to each
    /// leader in parallel. The first failure wins; per-partition error
    /// codes surface as [`Error::Kafka`].
    pub async fn fetch_offsets(
        &self,
        topic: &str,
        timestamp: i64,
    ) -> Result<HashMap<i32, Vec<i64>>> {
        let entry = self.metadata(topic).await?;
        let snapshot = self.snapshot();

        let mut by_leader: HashMap<i32, Vec<i32>> = HashMap::new();
        for partition in &entry.partitions {
            if partition.leader < 0 {
                return Err(Error::UncachedMetadata(format!(
                    "partition {}/{} has no leader (election in progress)",
                    topic, partition.partition
                )));
            }
            by_leader
                .entry(partition.leader)
                .or_default()
                .push(partition.partition);
        }

        let requests = by_leader.into_iter().map(|(leader, partitions)| {
            let connection = snapshot
                .broker(leader)
                .map(|b| b.connection.clone())
                .ok_or_else(|| {
                    Error::UncachedMetadata(format!("leader {} has no connection", leader))
                });
            let request = ListOffsetsRequest::new(vec![ListOffsetsTopic {
                topic: topic.to_string(),
                partitions: partitions
                    .into_iter()
                    .map(|partition| ListOffsetsPartition {
                        partition,
                        timestamp,
                        max_offsets: 1,
                    })
                    .collect(),
            }]);
            async move {
                let connection = connection?;
                let response = connection.send(&request).await?;
                if let Some(code) = response
                    .error_codes()
                    .into_iter()
                    .find(|code| *code != KafkaCode::None)
                {
                    return Err(Error::Kafka(code));
                }
                Ok(response)
            }
        });

        let responses = try_join_all(requests).await?;

        let mut offsets = HashMap::new();
        for response in responses {
            for topic_response in response.topics {
                for partition in topic_response.partitions {
                    offsets.insert(partition.partition, partition.offsets);
                }
            }
        }
        Ok(offsets)
    }

    /// Cancel every outstanding operation and dispose every connection.
    pub fn dispose(&self) {
        self.inner.shutdown.cancel();
        let snapshot = self.snapshot();
        for broker in snapshot.brokers.values() {
            broker.connection.dispose();
        }
    }
}
