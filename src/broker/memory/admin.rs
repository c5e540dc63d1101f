use crate::broker::error::{BrokerError, BrokerResult};
use crate::broker::memory::MemoryBroker;
use crate::broker::traits::AdminClient;
use crate::broker::types::{PartitionOffset, TopicPartitionOffsets};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Administrative client of the in-memory broker
#[derive(Debug)]
pub struct MemoryAdmin {
    broker: Arc<MemoryBroker>,
    connected: AtomicBool,
}

impl MemoryAdmin {
    pub(crate) fn new(broker: Arc<MemoryBroker>) -> Self {
        Self {
            broker,
            connected: AtomicBool::new(false),
        }
    }

    fn ensure_connected(&self) -> BrokerResult<()> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(BrokerError::NotConnected {
                client: "admin".to_string(),
            })
        }
    }
}

#[async_trait]
impl AdminClient for MemoryAdmin {
    async fn connect(&self) -> BrokerResult<()> {
        self.broker.check_connect()?;
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    async fn disconnect(&self) -> BrokerResult<()> {
        self.connected.store(false, Ordering::Release);
        Ok(())
    }

    async fn fetch_latest_offsets(&self, topic: &str) -> BrokerResult<Vec<PartitionOffset>> {
        self.ensure_connected()?;
        self.broker.check_admin("fetch_latest_offsets")?;
        self.broker.latest_offsets(topic)
    }

    async fn fetch_committed_offsets(
        &self,
        group_id: &str,
        topics: &[String],
    ) -> BrokerResult<Vec<TopicPartitionOffsets>> {
        self.ensure_connected()?;
        self.broker.check_admin("fetch_committed_offsets")?;
        topics
            .iter()
            .map(|topic| {
                Ok(TopicPartitionOffsets {
                    topic: topic.clone(),
                    partitions: self.broker.committed_offsets(group_id, topic)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::memory::MemoryBrokerConfig;

    #[tokio::test]
    async fn test_queries_require_connection() {
        let broker = MemoryBroker::new(MemoryBrokerConfig::default());
        broker.create_topic("t", 2).unwrap();
        let admin = broker.admin();
        assert!(matches!(
            admin.fetch_latest_offsets("t").await,
            Err(BrokerError::NotConnected { .. })
        ));
    }

    #[tokio::test]
    async fn test_fetch_latest_and_committed() {
        let broker = MemoryBroker::new(MemoryBrokerConfig::default());
        broker.create_topic("t", 2).unwrap();
        broker.commit("g", "t", 0, 5).unwrap();

        let admin = broker.admin();
        admin.connect().await.unwrap();

        let latest = admin.fetch_latest_offsets("t").await.unwrap();
        assert_eq!(latest.len(), 2);
        assert!(latest.iter().all(|p| p.offset == 0));

        let committed = admin
            .fetch_committed_offsets("g", &["t".to_string()])
            .await
            .unwrap();
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].topic, "t");
        assert_eq!(committed[0].partitions[0].offset, 5);
        assert_eq!(committed[0].partitions[1].offset, -1);

        admin.disconnect().await.unwrap();
        assert!(admin.fetch_latest_offsets("t").await.is_err());
    }
}
