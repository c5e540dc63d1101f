//! Kafka adapter built on `rdkafka`
//!
//! Implements the collaborator traits against a real cluster. librdkafka
//! calls that block (metadata, watermarks, committed offsets) run on the
//! blocking pool.

use crate::broker::error::{BrokerError, BrokerResult};
use crate::broker::traits::{AdminClient, BatchControl, BatchHandler, ConsumerClient, ProducerClient};
use crate::broker::types::{
    Batch, Compression, ConsumedMessage, OutgoingRecord, PartitionOffset, RecordMetadata,
    TopicPartitionOffsets, NO_COMMITTED_OFFSET,
};
use crate::broker::ClusterSettings;
use crate::core::loop_state::{run_token, RunHandle, RunToken};
use crate::core::sync::lock_recover;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{Message, OwnedMessage};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, UNIX_EPOCH};
use tokio::task::JoinHandle;

fn base_config(settings: &ClusterSettings) -> ClientConfig {
    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", &settings.brokers)
        .set("client.id", &settings.client_id);
    config
}

fn connection_error(e: KafkaError) -> BrokerError {
    BrokerError::Connection {
        message: e.to_string(),
    }
}

/// Run a blocking librdkafka call; only a failed task is mapped here
async fn on_blocking_pool<T, F>(operation: &str, f: F) -> BrokerResult<Result<T, KafkaError>>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, KafkaError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| BrokerError::Internal {
            message: format!("{operation} task failed: {e}"),
        })
}

/// Flush on the blocking pool; undelivered records are a connection failure
async fn flush_on_pool<F>(flush: F) -> BrokerResult<()>
where
    F: FnOnce() -> Result<(), KafkaError> + Send + 'static,
{
    on_blocking_pool("flush", flush).await?.map_err(connection_error)
}

/// Administrative call on the blocking pool
async fn blocking<T, F>(operation: &str, f: F) -> BrokerResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, KafkaError> + Send + 'static,
{
    on_blocking_pool(operation, f)
        .await?
        .map_err(|e| BrokerError::Admin {
            operation: operation.to_string(),
            message: e.to_string(),
        })
}

/// Partition ids of `topic` according to cluster metadata
fn partition_ids<C: Consumer>(client: &C, topic: &str, timeout: Duration) -> Result<Vec<i32>, KafkaError> {
    let metadata = client.fetch_metadata(Some(topic), Timeout::After(timeout))?;
    Ok(metadata
        .topics()
        .iter()
        .filter(|t| t.name() == topic)
        .flat_map(|t| t.partitions().iter().map(|p| p.id()))
        .collect())
}

/// Producer backed by a `FutureProducer`
///
/// The codec is fixed when the client connects, so the per-send compression
/// argument must match the configured one.
pub struct KafkaProducer {
    settings: ClusterSettings,
    compression: Compression,
    producer: Mutex<Option<FutureProducer>>,
}

impl KafkaProducer {
    pub fn new(settings: ClusterSettings, compression: Compression) -> Self {
        Self {
            settings,
            compression,
            producer: Mutex::new(None),
        }
    }

    fn producer(&self) -> BrokerResult<FutureProducer> {
        lock_recover(self.producer.lock())
            .clone()
            .ok_or_else(|| BrokerError::NotConnected {
                client: "producer".to_string(),
            })
    }
}

#[async_trait]
impl ProducerClient for KafkaProducer {
    async fn connect(&self) -> BrokerResult<()> {
        let producer: FutureProducer = base_config(&self.settings)
            .set("compression.type", self.compression.to_string())
            .set("message.timeout.ms", self.settings.request_timeout_ms.to_string())
            .create()
            .map_err(connection_error)?;
        *lock_recover(self.producer.lock()) = Some(producer);
        Ok(())
    }

    async fn disconnect(&self) -> BrokerResult<()> {
        let producer = lock_recover(self.producer.lock()).take();
        if let Some(producer) = producer {
            let timeout = self.settings.request_timeout();
            flush_on_pool(move || {
                use rdkafka::producer::Producer;
                producer.flush(Timeout::After(timeout))
            })
            .await?;
        }
        Ok(())
    }

    async fn send(
        &self,
        topic: &str,
        records: Vec<OutgoingRecord>,
        compression: Compression,
    ) -> BrokerResult<Vec<RecordMetadata>> {
        if compression != self.compression {
            log::debug!(
                "Requested {} compression; producer is configured for {}",
                compression,
                self.compression
            );
        }
        let producer = self.producer()?;
        let timeout = self.settings.request_timeout();
        let deliveries = records.iter().map(|record| {
            let producer = &producer;
            async move {
                producer
                    .send(
                        FutureRecord::to(topic).key(&record.key).payload(&record.value),
                        Timeout::After(timeout),
                    )
                    .await
                    .map(|(partition, offset)| RecordMetadata { partition, offset })
                    .map_err(|(e, _)| BrokerError::Send {
                        topic: topic.to_string(),
                        message: e.to_string(),
                    })
            }
        });
        futures::future::join_all(deliveries).await.into_iter().collect()
    }
}

/// Group member backed by a `StreamConsumer`
pub struct KafkaConsumer {
    settings: ClusterSettings,
    group_id: String,
    consumer: Mutex<Option<Arc<StreamConsumer>>>,
    delivery: Mutex<Option<(RunHandle, JoinHandle<()>)>>,
    connected: AtomicBool,
}

impl KafkaConsumer {
    pub fn new(settings: ClusterSettings, group_id: &str) -> Self {
        Self {
            settings,
            group_id: group_id.to_string(),
            consumer: Mutex::new(None),
            delivery: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    fn consumer(&self) -> BrokerResult<Arc<StreamConsumer>> {
        lock_recover(self.consumer.lock())
            .clone()
            .ok_or_else(|| BrokerError::Fetch {
                message: "consumer has no subscription".to_string(),
            })
    }
}

#[async_trait]
impl ConsumerClient for KafkaConsumer {
    async fn connect(&self) -> BrokerResult<()> {
        let probe: BaseConsumer = base_config(&self.settings)
            .create()
            .map_err(connection_error)?;
        let timeout = self.settings.request_timeout();
        blocking("fetch_metadata", move || {
            probe.fetch_metadata(None, Timeout::After(timeout)).map(|_| ())
        })
        .await
        .map_err(|e| BrokerError::Connection {
            message: e.to_string(),
        })?;
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    async fn disconnect(&self) -> BrokerResult<()> {
        self.stop().await?;
        if let Some(consumer) = lock_recover(self.consumer.lock()).take() {
            consumer.unsubscribe();
        }
        self.connected.store(false, Ordering::Release);
        Ok(())
    }

    async fn subscribe(&self, topic: &str, from_beginning: bool) -> BrokerResult<()> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(BrokerError::NotConnected {
                client: "consumer".to_string(),
            });
        }
        let reset = if from_beginning { "earliest" } else { "latest" };
        let consumer: StreamConsumer = base_config(&self.settings)
            .set("group.id", &self.group_id)
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", reset)
            .create()
            .map_err(connection_error)?;
        consumer.subscribe(&[topic]).map_err(|e| BrokerError::Fetch {
            message: e.to_string(),
        })?;
        *lock_recover(self.consumer.lock()) = Some(Arc::new(consumer));
        Ok(())
    }

    async fn run(&self, concurrency: usize, handler: Arc<dyn BatchHandler>) -> BrokerResult<()> {
        let consumer = self.consumer()?;
        let mut delivery = lock_recover(self.delivery.lock());
        if delivery.as_ref().is_some_and(|(_, task)| !task.is_finished()) {
            return Err(BrokerError::AlreadyRunning);
        }
        let (handle, token) = run_token();
        let loop_settings = DeliverySettings {
            concurrency: concurrency.max(1),
            max_batch_size: self.settings.max_batch_size,
            linger: Duration::from_millis(self.settings.fetch_linger_ms),
        };
        let task = tokio::spawn(deliver(consumer, handler, loop_settings, token));
        *delivery = Some((handle, task));
        Ok(())
    }

    async fn stop(&self) -> BrokerResult<()> {
        let delivery = lock_recover(self.delivery.lock()).take();
        if let Some((handle, task)) = delivery {
            handle.cancel();
            task.await.map_err(|e| BrokerError::Internal {
                message: format!("delivery task failed: {e}"),
            })?;
        }
        Ok(())
    }

    fn admin(&self) -> Arc<dyn AdminClient> {
        Arc::new(KafkaAdmin::new(self.settings.clone()))
    }
}

struct DeliverySettings {
    concurrency: usize,
    max_batch_size: usize,
    linger: Duration,
}

fn to_consumed(message: &OwnedMessage) -> ConsumedMessage {
    let millis = message.timestamp().to_millis().unwrap_or(0).max(0) as u64;
    ConsumedMessage {
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(<[u8]>::to_vec),
        value: message.payload().map(<[u8]>::to_vec),
        timestamp: UNIX_EPOCH + Duration::from_millis(millis),
    }
}

/// Errors librdkafka does not recover from by itself
fn is_fatal(e: &KafkaError) -> bool {
    matches!(
        e.rdkafka_error_code(),
        Some(RDKafkaErrorCode::AllBrokersDown | RDKafkaErrorCode::Fatal)
    )
}

/// Poll messages until the batch is full or the linger expires
async fn poll_round(
    consumer: &StreamConsumer,
    settings: &DeliverySettings,
    token: &mut RunToken,
) -> BrokerResult<Vec<OwnedMessage>> {
    let mut polled = Vec::new();
    let deadline = tokio::time::sleep(settings.linger);
    tokio::pin!(deadline);
    while polled.len() < settings.max_batch_size {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = &mut deadline => break,
            received = consumer.recv() => match received {
                Ok(message) => polled.push(message.detach()),
                Err(e) if is_fatal(&e) => {
                    log::error!("Kafka consumer lost the cluster: {}", e);
                    return Err(BrokerError::Closed);
                }
                Err(e) => {
                    log::warn!("Kafka receive failed: {}", e);
                    break;
                }
            },
        }
    }
    Ok(polled)
}

async fn deliver(
    consumer: Arc<StreamConsumer>,
    handler: Arc<dyn BatchHandler>,
    settings: DeliverySettings,
    mut token: RunToken,
) {
    while !token.is_cancelled() {
        let polled = match poll_round(&consumer, &settings, &mut token).await {
            Ok(polled) => polled,
            Err(e) => {
                handler.on_connection_lost(e).await;
                break;
            }
        };
        if polled.is_empty() {
            continue;
        }

        let mut by_partition: BTreeMap<(String, i32), Vec<ConsumedMessage>> = BTreeMap::new();
        for message in &polled {
            by_partition
                .entry((message.topic().to_string(), message.partition()))
                .or_default()
                .push(to_consumed(message));
        }

        let batches = by_partition.into_iter().map(|((topic, partition), messages)| Batch {
            topic,
            partition,
            high_watermark: -1,
            messages,
        });
        let resolved: Vec<(String, i32, Option<i64>)> = stream::iter(batches)
            .map(|batch| {
                let handler = Arc::clone(&handler);
                let control = Arc::new(KafkaBatchControl {
                    token: token.clone(),
                    resolved: Mutex::new(None),
                });
                async move {
                    let (topic, partition) = (batch.topic.clone(), batch.partition);
                    handler
                        .on_batch(batch, Arc::clone(&control) as Arc<dyn BatchControl>)
                        .await;
                    let offset = *lock_recover(control.resolved.lock());
                    (topic, partition, offset)
                }
            })
            .buffer_unordered(settings.concurrency)
            .collect()
            .await;

        for (topic, partition, offset) in resolved {
            let Some(offset) = offset else { continue };
            // The stored offset is the next one the group should read
            if let Err(e) = consumer.store_offset(&topic, partition, offset + 1) {
                log::warn!("Storing offset for {}/{} failed: {}", topic, partition, e);
            }
        }
    }
}

struct KafkaBatchControl {
    token: RunToken,
    resolved: Mutex<Option<i64>>,
}

#[async_trait]
impl BatchControl for KafkaBatchControl {
    fn is_running(&self) -> bool {
        !self.token.is_cancelled()
    }

    fn resolve_offset(&self, offset: i64) {
        let mut resolved = lock_recover(self.resolved.lock());
        *resolved = Some(resolved.map_or(offset, |current| current.max(offset)));
    }

    async fn heartbeat(&self) -> BrokerResult<()> {
        // librdkafka heartbeats from its own thread
        Ok(())
    }
}

/// Offset queries over short-lived `BaseConsumer` handles
pub struct KafkaAdmin {
    settings: ClusterSettings,
    client: Mutex<Option<Arc<BaseConsumer>>>,
}

impl KafkaAdmin {
    pub fn new(settings: ClusterSettings) -> Self {
        Self {
            settings,
            client: Mutex::new(None),
        }
    }

    fn client(&self) -> BrokerResult<Arc<BaseConsumer>> {
        lock_recover(self.client.lock())
            .clone()
            .ok_or_else(|| BrokerError::NotConnected {
                client: "admin".to_string(),
            })
    }
}

#[async_trait]
impl AdminClient for KafkaAdmin {
    async fn connect(&self) -> BrokerResult<()> {
        let client: BaseConsumer = base_config(&self.settings)
            .create()
            .map_err(connection_error)?;
        *lock_recover(self.client.lock()) = Some(Arc::new(client));
        Ok(())
    }

    async fn disconnect(&self) -> BrokerResult<()> {
        lock_recover(self.client.lock()).take();
        Ok(())
    }

    async fn fetch_latest_offsets(&self, topic: &str) -> BrokerResult<Vec<PartitionOffset>> {
        let client = self.client()?;
        let timeout = self.settings.request_timeout();
        let topic = topic.to_string();
        blocking("fetch_latest_offsets", move || {
            partition_ids(client.as_ref(), &topic, timeout)?
                .into_iter()
                .map(|partition| {
                    let (_, high) =
                        client.fetch_watermarks(&topic, partition, Timeout::After(timeout))?;
                    Ok(PartitionOffset {
                        partition,
                        offset: high,
                    })
                })
                .collect()
        })
        .await
    }

    async fn fetch_committed_offsets(
        &self,
        group_id: &str,
        topics: &[String],
    ) -> BrokerResult<Vec<TopicPartitionOffsets>> {
        let group_client: BaseConsumer = base_config(&self.settings)
            .set("group.id", group_id)
            .create()
            .map_err(connection_error)?;
        let timeout = self.settings.request_timeout();
        let topics = topics.to_vec();
        blocking("fetch_committed_offsets", move || {
            let mut assignment = TopicPartitionList::new();
            for topic in &topics {
                for partition in partition_ids(&group_client, topic, timeout)? {
                    assignment.add_partition(topic, partition);
                }
            }
            let committed = group_client.committed_offsets(assignment, Timeout::After(timeout))?;
            Ok(topics
                .iter()
                .map(|topic| TopicPartitionOffsets {
                    topic: topic.clone(),
                    partitions: committed
                        .elements_for_topic(topic)
                        .iter()
                        .map(|element| PartitionOffset {
                            partition: element.partition(),
                            offset: match element.offset() {
                                Offset::Offset(offset) => offset,
                                _ => NO_COMMITTED_OFFSET,
                            },
                        })
                        .collect(),
                })
                .collect())
        })
        .await
    }
}

impl ClusterSettings {
    fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
