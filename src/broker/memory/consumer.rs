use crate::broker::error::{BrokerError, BrokerResult};
use crate::broker::memory::{MemoryAdmin, MemoryBroker};
use crate::broker::traits::{AdminClient, BatchControl, BatchHandler, ConsumerClient};
use crate::broker::types::Batch;
use crate::core::loop_state::{run_token, RunHandle, RunToken};
use crate::core::sync::lock_recover;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
struct Subscription {
    topic: String,
    from_beginning: bool,
}

struct Delivery {
    handle: RunHandle,
    task: JoinHandle<()>,
}

/// Consumer group member of the in-memory broker
///
/// Each delivery round fetches at most one batch per partition, hands the
/// batches to the handler with bounded concurrency, then commits the highest
/// resolved offset of every partition for the group.
pub struct MemoryConsumer {
    broker: Arc<MemoryBroker>,
    group_id: String,
    connected: AtomicBool,
    subscription: Mutex<Option<Subscription>>,
    delivery: Mutex<Option<Delivery>>,
    heartbeats: Arc<AtomicU64>,
}

impl MemoryConsumer {
    pub(crate) fn new(broker: Arc<MemoryBroker>, group_id: &str) -> Self {
        Self {
            broker,
            group_id: group_id.to_string(),
            connected: AtomicBool::new(false),
            subscription: Mutex::new(None),
            delivery: Mutex::new(None),
            heartbeats: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Heartbeats sent by batch handlers since creation
    pub fn heartbeats(&self) -> u64 {
        self.heartbeats.load(Ordering::Acquire)
    }

    pub fn is_delivering(&self) -> bool {
        lock_recover(self.delivery.lock())
            .as_ref()
            .is_some_and(|delivery| !delivery.task.is_finished())
    }

    fn ensure_connected(&self) -> BrokerResult<()> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(BrokerError::NotConnected {
                client: "consumer".to_string(),
            })
        }
    }

    /// Starting offset of every partition: the committed offset, otherwise
    /// the log start or log end depending on the subscription
    fn initial_positions(&self, subscription: &Subscription) -> BrokerResult<HashMap<i32, i64>> {
        let topic = self.broker.topic_or_create(&subscription.topic)?;
        let mut positions = HashMap::new();
        for log in topic.partitions() {
            let committed =
                self.broker
                    .committed(&self.group_id, &subscription.topic, log.partition())?;
            let position = match committed {
                Some(offset) => offset,
                None if subscription.from_beginning => log.log_start_offset()?,
                None => log.latest_offset()?,
            };
            positions.insert(log.partition(), position);
        }
        Ok(positions)
    }
}

#[async_trait]
impl ConsumerClient for MemoryConsumer {
    async fn connect(&self) -> BrokerResult<()> {
        self.broker.check_connect()?;
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    async fn disconnect(&self) -> BrokerResult<()> {
        self.stop().await?;
        self.connected.store(false, Ordering::Release);
        Ok(())
    }

    async fn subscribe(&self, topic: &str, from_beginning: bool) -> BrokerResult<()> {
        self.ensure_connected()?;
        self.broker.topic_or_create(topic)?;
        *lock_recover(self.subscription.lock()) = Some(Subscription {
            topic: topic.to_string(),
            from_beginning,
        });
        Ok(())
    }

    async fn run(&self, concurrency: usize, handler: Arc<dyn BatchHandler>) -> BrokerResult<()> {
        self.ensure_connected()?;
        let subscription = lock_recover(self.subscription.lock())
            .clone()
            .ok_or_else(|| BrokerError::Fetch {
                message: "consumer has no subscription".to_string(),
            })?;

        let mut delivery = lock_recover(self.delivery.lock());
        if delivery
            .as_ref()
            .is_some_and(|current| !current.task.is_finished())
        {
            return Err(BrokerError::AlreadyRunning);
        }

        let positions = self.initial_positions(&subscription)?;
        let (handle, token) = run_token();
        let context = DeliveryContext {
            broker: Arc::clone(&self.broker),
            group_id: self.group_id.clone(),
            topic: subscription.topic,
            concurrency: concurrency.max(1),
            handler,
            heartbeats: Arc::clone(&self.heartbeats),
        };
        let task = tokio::spawn(context.deliver(positions, token));
        *delivery = Some(Delivery { handle, task });
        Ok(())
    }

    async fn stop(&self) -> BrokerResult<()> {
        let delivery = lock_recover(self.delivery.lock()).take();
        if let Some(Delivery { handle, task }) = delivery {
            handle.cancel();
            task.await.map_err(|e| BrokerError::Internal {
                message: format!("delivery task failed: {e}"),
            })?;
        }
        Ok(())
    }

    fn admin(&self) -> Arc<dyn AdminClient> {
        Arc::new(MemoryAdmin::new(Arc::clone(&self.broker)))
    }
}

struct DeliveryContext {
    broker: Arc<MemoryBroker>,
    group_id: String,
    topic: String,
    concurrency: usize,
    handler: Arc<dyn BatchHandler>,
    heartbeats: Arc<AtomicU64>,
}

impl DeliveryContext {
    async fn deliver(self, mut positions: HashMap<i32, i64>, mut token: RunToken) {
        let poll_interval = self.broker.config().poll_interval;
        loop {
            if token.is_cancelled() {
                break;
            }
            let batches = match self.fetch(&positions) {
                Ok(batches) => batches,
                Err(e) if e.is_transport_loss() => {
                    log::warn!("Delivery on '{}' lost the broker: {}", self.topic, e);
                    self.handler.on_connection_lost(e).await;
                    break;
                }
                Err(e) => {
                    log::warn!("Fetch from topic '{}' failed: {}", self.topic, e);
                    Vec::new()
                }
            };
            if batches.is_empty() {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(poll_interval) => continue,
                }
            }

            let resolved: Vec<(i32, Option<i64>)> = stream::iter(batches)
                .map(|batch| self.dispatch(batch, token.clone()))
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

            for (partition, offset) in resolved {
                let Some(offset) = offset else { continue };
                positions.insert(partition, offset + 1);
                if let Err(e) = self
                    .broker
                    .commit(&self.group_id, &self.topic, partition, offset + 1)
                {
                    log::warn!("Offset commit for partition {} failed: {}", partition, e);
                }
            }
        }
        log::debug!("Delivery for group '{}' on '{}' stopped", self.group_id, self.topic);
    }

    fn fetch(&self, positions: &HashMap<i32, i64>) -> BrokerResult<Vec<Batch>> {
        if self.broker.is_closed() {
            return Err(BrokerError::Closed);
        }
        let topic = self.broker.topic(&self.topic)?;
        let max = self.broker.config().max_batch_size;
        let mut batches = Vec::new();
        for log in topic.partitions() {
            let position = positions.get(&log.partition()).copied().unwrap_or(0);
            let messages = log.read_from(position, max)?;
            if !messages.is_empty() {
                batches.push(Batch {
                    topic: self.topic.clone(),
                    partition: log.partition(),
                    high_watermark: log.latest_offset()?,
                    messages,
                });
            }
        }
        Ok(batches)
    }

    async fn dispatch(&self, batch: Batch, token: RunToken) -> (i32, Option<i64>) {
        let partition = batch.partition;
        let control = Arc::new(MemoryBatchControl {
            broker: Arc::clone(&self.broker),
            token,
            resolved: Mutex::new(None),
            heartbeats: Arc::clone(&self.heartbeats),
        });
        self.handler
            .on_batch(batch, Arc::clone(&control) as Arc<dyn BatchControl>)
            .await;
        (partition, control.resolved())
    }
}

struct MemoryBatchControl {
    broker: Arc<MemoryBroker>,
    token: RunToken,
    resolved: Mutex<Option<i64>>,
    heartbeats: Arc<AtomicU64>,
}

impl MemoryBatchControl {
    fn resolved(&self) -> Option<i64> {
        *lock_recover(self.resolved.lock())
    }
}

#[async_trait]
impl BatchControl for MemoryBatchControl {
    fn is_running(&self) -> bool {
        !self.token.is_cancelled()
    }

    fn resolve_offset(&self, offset: i64) {
        let mut resolved = lock_recover(self.resolved.lock());
        *resolved = Some(resolved.map_or(offset, |current| current.max(offset)));
    }

    async fn heartbeat(&self) -> BrokerResult<()> {
        if self.broker.is_closed() {
            return Err(BrokerError::Closed);
        }
        self.heartbeats.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}
