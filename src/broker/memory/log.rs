//! Append-only partition log with offset-based reads
//!
//! - Monotonic offsets starting at 0
//! - Bounded retention: the oldest records are dropped and the log start
//!   offset advances
//! - Reads below the log start resume at the log start

use crate::broker::error::{BrokerError, BrokerResult};
use crate::broker::types::{ConsumedMessage, OutgoingRecord};
use crate::core::sync::{handle_rwlock_read, handle_rwlock_write};
use std::collections::VecDeque;
use std::sync::RwLock;
use std::time::SystemTime;

#[derive(Debug)]
struct LogInner {
    entries: VecDeque<ConsumedMessage>,
    /// Offset assigned to the next appended record
    next_offset: i64,
}

impl LogInner {
    fn log_start_offset(&self) -> i64 {
        self.entries
            .front()
            .map(|entry| entry.offset)
            .unwrap_or(self.next_offset)
    }
}

/// One partition of a topic
#[derive(Debug)]
pub struct PartitionLog {
    partition: i32,
    inner: RwLock<LogInner>,
    retention: usize,
}

fn poisoned(message: String) -> BrokerError {
    BrokerError::Internal { message }
}

impl PartitionLog {
    pub fn new(partition: i32, retention: usize) -> Self {
        Self {
            partition,
            inner: RwLock::new(LogInner {
                entries: VecDeque::new(),
                next_offset: 0,
            }),
            retention: retention.max(1),
        }
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    /// Append records and return the offset assigned to the first one
    pub fn append(&self, records: &[OutgoingRecord]) -> BrokerResult<i64> {
        let timestamp = SystemTime::now();
        let mut inner = handle_rwlock_write(self.inner.write(), poisoned)?;
        let base_offset = inner.next_offset;
        for record in records {
            let offset = inner.next_offset;
            inner.entries.push_back(ConsumedMessage {
                partition: self.partition,
                offset,
                key: Some(record.key.as_bytes().to_vec()),
                value: Some(record.value.clone()),
                timestamp,
            });
            inner.next_offset += 1;
        }
        while inner.entries.len() > self.retention {
            inner.entries.pop_front();
        }
        Ok(base_offset)
    }

    /// Up to `max` records starting at `offset`
    pub fn read_from(&self, offset: i64, max: usize) -> BrokerResult<Vec<ConsumedMessage>> {
        let inner = handle_rwlock_read(self.inner.read(), poisoned)?;
        let start = offset.max(inner.log_start_offset());
        let skip = usize::try_from(start - inner.log_start_offset()).unwrap_or(0);
        Ok(inner.entries.iter().skip(skip).take(max).cloned().collect())
    }

    /// Offset the next appended record will get
    pub fn latest_offset(&self) -> BrokerResult<i64> {
        Ok(handle_rwlock_read(self.inner.read(), poisoned)?.next_offset)
    }

    /// Oldest offset still retained
    pub fn log_start_offset(&self) -> BrokerResult<i64> {
        Ok(handle_rwlock_read(self.inner.read(), poisoned)?.log_start_offset())
    }

    pub fn len(&self) -> BrokerResult<usize> {
        Ok(handle_rwlock_read(self.inner.read(), poisoned)?.entries.len())
    }
}
