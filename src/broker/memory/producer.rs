use crate::broker::error::{BrokerError, BrokerResult};
use crate::broker::memory::MemoryBroker;
use crate::broker::traits::ProducerClient;
use crate::broker::types::{Compression, OutgoingRecord, RecordMetadata};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Producer client of the in-memory broker
///
/// Compression is accepted and ignored; records are stored as sent.
#[derive(Debug)]
pub struct MemoryProducer {
    broker: Arc<MemoryBroker>,
    connected: AtomicBool,
}

impl MemoryProducer {
    pub(crate) fn new(broker: Arc<MemoryBroker>) -> Self {
        Self {
            broker,
            connected: AtomicBool::new(false),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

#[async_trait]
impl ProducerClient for MemoryProducer {
    async fn connect(&self) -> BrokerResult<()> {
        self.broker.check_connect()?;
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    async fn disconnect(&self) -> BrokerResult<()> {
        self.connected.store(false, Ordering::Release);
        Ok(())
    }

    async fn send(
        &self,
        topic: &str,
        records: Vec<OutgoingRecord>,
        _compression: Compression,
    ) -> BrokerResult<Vec<RecordMetadata>> {
        if !self.is_connected() {
            return Err(BrokerError::NotConnected {
                client: "producer".to_string(),
            });
        }
        let latency = self.broker.config().send_latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.broker.check_send(topic)?;

        let log = self.broker.topic_or_create(topic)?;

        // Group by partition, keeping the send order within each partition
        let mut by_partition: BTreeMap<i32, Vec<(usize, OutgoingRecord)>> = BTreeMap::new();
        for (index, record) in records.into_iter().enumerate() {
            by_partition
                .entry(log.partition_for_key(&record.key))
                .or_default()
                .push((index, record));
        }

        let total = by_partition.values().map(Vec::len).sum();
        let mut metadata = vec![
            RecordMetadata {
                partition: 0,
                offset: 0,
            };
            total
        ];
        for (partition, entries) in by_partition {
            let partition_log = log.partition(partition).ok_or_else(|| BrokerError::Internal {
                message: format!("partition {partition} missing from topic '{topic}'"),
            })?;
            let (indices, batch): (Vec<usize>, Vec<OutgoingRecord>) = entries.into_iter().unzip();
            let base_offset = partition_log.append(&batch)?;
            for (position, index) in indices.into_iter().enumerate() {
                metadata[index] = RecordMetadata {
                    partition,
                    offset: base_offset + position as i64,
                };
            }
        }
        Ok(metadata)
    }
}
