//! Rate-controlled producer loop
//!
//! Each iteration sends `batch_count` batches of `batch_size` generated
//! messages concurrently and waits for all of them. The throughput since
//! start then picks the delay before the next iteration.

use crate::broker::{BrokerError, BrokerResult, Compression, ProducerClient};
use crate::core::controller::{ControlError, ControlResult, ControlStatus, Direction, LoadController};
use crate::core::loop_state::{run_token, LoopState, LoopStats, RunHandle, RunToken};
use crate::core::sync::lock_recover;
use crate::core::time::{Clock, TokioClock};
use crate::producer::generator::{encode_batch, generate_batch};
use crate::producer::pacing::{PacingSettings, RateController};
use crate::stats::{Operation, StatsSink};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Runtime settings of the producer loop
#[derive(Debug, Clone, PartialEq)]
pub struct ProducerSettings {
    pub topic: String,
    pub batch_size: usize,
    pub batch_count: usize,
    pub compression: Compression,
    pub pacing: PacingSettings,
    /// Wait after a failed iteration; longer than any pacing delay
    pub error_backoff: Duration,
    pub report_interval: Duration,
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            topic: "high-throughput-topic".to_string(),
            batch_size: 2_000,
            batch_count: 5,
            compression: Compression::Gzip,
            pacing: PacingSettings::default(),
            error_backoff: Duration::from_millis(2_000),
            report_interval: Duration::from_secs(1),
        }
    }
}

/// Producer snapshot: the loop counters plus the delay currently in use
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProducerStats {
    #[serde(flatten)]
    pub loop_stats: LoopStats,
    pub pacing_delay_ms: u64,
}

struct ProducerLoop {
    settings: ProducerSettings,
    client: Arc<dyn ProducerClient>,
    stats: StatsSink,
    state: LoopState,
    pacing: RateController,
    pacing_delay_ms: AtomicU64,
}

#[derive(Default)]
struct RunSlot {
    handle: Option<RunHandle>,
    task: Option<JoinHandle<()>>,
}

/// Producer side of the harness
pub struct ProducerService {
    inner: Arc<ProducerLoop>,
    lifecycle: tokio::sync::Mutex<()>,
    run: Mutex<RunSlot>,
}

impl ProducerService {
    pub fn new(settings: ProducerSettings, client: Arc<dyn ProducerClient>, stats: StatsSink) -> Self {
        Self::with_clock(settings, client, stats, Arc::new(TokioClock))
    }

    pub fn with_clock(
        settings: ProducerSettings,
        client: Arc<dyn ProducerClient>,
        stats: StatsSink,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let pacing = RateController::new(settings.pacing.clone());
        Self {
            inner: Arc::new(ProducerLoop {
                settings,
                client,
                stats,
                state: LoopState::new(clock),
                pacing,
                pacing_delay_ms: AtomicU64::new(0),
            }),
            lifecycle: tokio::sync::Mutex::new(()),
            run: Mutex::new(RunSlot::default()),
        }
    }

    pub fn settings(&self) -> &ProducerSettings {
        &self.inner.settings
    }

    pub fn producer_stats(&self) -> ProducerStats {
        let loop_stats = self.inner.state.stats();
        let pacing_delay_ms = if loop_stats.running {
            self.inner.pacing_delay_ms.load(Ordering::Acquire)
        } else {
            0
        };
        ProducerStats {
            loop_stats,
            pacing_delay_ms,
        }
    }

    /// Wait for a loop left over from the previous run to finish its iteration
    async fn drain_previous_run(&self) {
        let task = lock_recover(self.run.lock()).task.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                log::warn!("Previous producer loop ended abnormally: {}", e);
            }
        }
    }
}

#[async_trait]
impl LoadController for ProducerService {
    fn direction(&self) -> Direction {
        Direction::Producer
    }

    async fn start(&self) -> ControlResult<ControlStatus> {
        let _guard = self.lifecycle.lock().await;
        if self.inner.state.is_running() {
            log::info!("Producer is already running");
            return Ok(ControlStatus::AlreadyRunning);
        }
        self.drain_previous_run().await;

        self.inner
            .client
            .connect()
            .await
            .map_err(|source| ControlError::StartFailed {
                direction: Direction::Producer,
                source,
            })?;

        let topic = &self.inner.settings.topic;
        self.inner.state.begin();
        self.inner.stats.set_producer_throughput(topic, 0.0);
        self.inner.pacing_delay_ms.store(
            self.inner.settings.pacing.delay_in_band.as_millis() as u64,
            Ordering::Release,
        );

        let (handle, token) = run_token();
        let task = tokio::spawn(Arc::clone(&self.inner).run(token));
        {
            let mut slot = lock_recover(self.run.lock());
            slot.handle = Some(handle);
            slot.task = Some(task);
        }

        log::info!(
            "Started producing to '{}': {} batches of {} messages per iteration",
            topic,
            self.inner.settings.batch_count,
            self.inner.settings.batch_size
        );
        Ok(ControlStatus::Started)
    }

    async fn stop(&self) -> ControlResult<ControlStatus> {
        let _guard = self.lifecycle.lock().await;
        let handle = lock_recover(self.run.lock()).handle.take();
        if let Some(handle) = &handle {
            handle.cancel();
        }
        if !self.inner.state.is_running() {
            log::info!("Producer is not running");
            return Ok(ControlStatus::NotRunning);
        }

        let summary = self.inner.state.finish();
        self.inner
            .stats
            .set_producer_throughput(&self.inner.settings.topic, 0.0);
        log::info!(
            "Stopped producing: {} messages in {:.2}s ({:.2} msg/s)",
            summary.message_count,
            summary.elapsed_seconds,
            summary.average_throughput
        );
        Ok(ControlStatus::Stopped)
    }

    fn stats(&self) -> LoopStats {
        self.inner.state.stats()
    }

    async fn shutdown(&self) -> ControlResult<()> {
        self.stop().await?;
        let _guard = self.lifecycle.lock().await;
        self.drain_previous_run().await;
        self.inner
            .client
            .disconnect()
            .await
            .map_err(|source| ControlError::ShutdownFailed {
                direction: Direction::Producer,
                source,
            })
    }
}

impl ProducerLoop {
    async fn run(self: Arc<Self>, mut token: RunToken) {
        let topic = self.settings.topic.as_str();
        loop {
            if token.is_cancelled() {
                break;
            }

            let started = Instant::now();
            let delay = match self.produce_iteration().await {
                Ok(()) => {
                    self.stats.observe_processing(
                        Operation::Produce,
                        topic,
                        started.elapsed().as_secs_f64(),
                    );
                    self.after_success(&token)
                }
                Err(e) if e.is_transport_loss() => {
                    log::error!("Producer lost its broker connection: {}", e);
                    self.stats.record_send_error(topic);
                    if !token.is_cancelled() {
                        let summary = self.state.finish();
                        self.stats.set_producer_throughput(topic, 0.0);
                        log::info!(
                            "Producer stopped after {} messages",
                            summary.message_count
                        );
                    }
                    break;
                }
                Err(e) => {
                    log::error!("Failed to produce messages to '{}': {}", topic, e);
                    self.stats.record_send_error(topic);
                    self.settings.error_backoff
                }
            };
            self.pacing_delay_ms
                .store(delay.as_millis() as u64, Ordering::Release);

            // Checked again here so a stop during the iteration schedules nothing
            if token.is_cancelled() {
                break;
            }
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        log::debug!("Producer loop for '{}' exited", topic);
    }

    /// Publish throughput and choose the next delay
    fn after_success(&self, token: &RunToken) -> Duration {
        let topic = self.settings.topic.as_str();
        let throughput = self.state.throughput();
        if let Some(throughput) = throughput {
            if !token.is_cancelled() {
                self.stats.set_producer_throughput(topic, throughput);
            }
            if self.state.report_due(self.settings.report_interval) {
                log::info!(
                    "Produced {} messages to '{}' ({:.2} msg/s)",
                    self.state.message_count(),
                    topic,
                    throughput
                );
            }
        }
        let (decision, delay) = self.pacing.next_delay(throughput);
        log::debug!("Pacing decision {} -> next iteration in {:?}", decision, delay);
        delay
    }

    /// Send every batch of one iteration concurrently
    ///
    /// Acknowledged batches are counted even when a sibling batch fails;
    /// the iteration then reports the first failure.
    async fn produce_iteration(&self) -> BrokerResult<()> {
        let settings = &self.settings;
        let sends = (0..settings.batch_count).map(|_| self.send_batch());
        let outcomes = futures::future::join_all(sends).await;

        let mut first_error = None;
        for outcome in outcomes {
            match outcome {
                Ok((messages, bytes)) => {
                    self.state.add_messages(messages);
                    self.stats.record_produced(&settings.topic, messages, bytes);
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn send_batch(&self) -> BrokerResult<(u64, u64)> {
        let settings = &self.settings;
        let records =
            encode_batch(&generate_batch(settings.batch_size)).map_err(|e| BrokerError::Send {
                topic: settings.topic.clone(),
                message: format!("payload encoding failed: {e}"),
            })?;
        let messages = records.len() as u64;
        let bytes = records.iter().map(|r| r.size_bytes() as u64).sum();
        self.client
            .send(&settings.topic, records, settings.compression)
            .await?;
        Ok((messages, bytes))
    }
}
