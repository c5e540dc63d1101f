//! Batch consumer with lag monitor behind the control surface

use crate::broker::ConsumerClient;
use crate::consumer::handler::ConsumerBatchHandler;
use crate::consumer::lag::LagMonitor;
use crate::consumer::processor::{JsonProcessor, MessageProcessor};
use crate::core::controller::{ControlError, ControlResult, ControlStatus, Direction, LoadController};
use crate::core::loop_state::{run_token, LoopState, LoopStats, RunHandle};
use crate::core::sync::lock_recover;
use crate::core::time::{Clock, TokioClock};
use crate::stats::StatsSink;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq)]
pub struct LagSettings {
    pub enabled: bool,
    pub interval: Duration,
}

impl Default for LagSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(10),
        }
    }
}

/// Runtime settings of the consumer
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerSettings {
    pub topic: String,
    pub group_id: String,
    /// Partitions handled at the same time
    pub concurrency: usize,
    /// Start at the log start instead of the log end when the group has no commits
    pub from_beginning: bool,
    pub report_interval: Duration,
    pub lag: LagSettings,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            topic: "high-throughput-topic".to_string(),
            group_id: "high-throughput-group".to_string(),
            concurrency: 8,
            from_beginning: false,
            report_interval: Duration::from_secs(1),
            lag: LagSettings::default(),
        }
    }
}

#[derive(Default)]
struct RunSlot {
    lag_handle: Option<RunHandle>,
    lag_task: Option<JoinHandle<()>>,
}

/// Consumer side of the harness
pub struct ConsumerService {
    settings: ConsumerSettings,
    client: Arc<dyn ConsumerClient>,
    stats: StatsSink,
    state: Arc<LoopState>,
    processor: Arc<dyn MessageProcessor>,
    lifecycle: tokio::sync::Mutex<()>,
    run: Mutex<RunSlot>,
}

impl ConsumerService {
    pub fn new(settings: ConsumerSettings, client: Arc<dyn ConsumerClient>, stats: StatsSink) -> Self {
        Self::with_parts(
            settings,
            client,
            stats,
            Arc::new(JsonProcessor),
            Arc::new(TokioClock),
        )
    }

    pub fn with_parts(
        settings: ConsumerSettings,
        client: Arc<dyn ConsumerClient>,
        stats: StatsSink,
        processor: Arc<dyn MessageProcessor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            settings,
            client,
            stats,
            state: Arc::new(LoopState::new(clock)),
            processor,
            lifecycle: tokio::sync::Mutex::new(()),
            run: Mutex::new(RunSlot::default()),
        }
    }

    pub fn settings(&self) -> &ConsumerSettings {
        &self.settings
    }

    fn start_failed(source: crate::broker::BrokerError) -> ControlError {
        ControlError::StartFailed {
            direction: Direction::Consumer,
            source,
        }
    }

    /// Cancel the lag monitor and wait until it can no longer publish
    async fn halt_lag_monitor(&self) {
        let slot = std::mem::take(&mut *lock_recover(self.run.lock()));
        if let Some(handle) = slot.lag_handle {
            handle.cancel();
        }
        if let Some(task) = slot.lag_task {
            task.abort();
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    log::warn!("Lag monitor ended abnormally: {}", e);
                }
            }
        }
    }
}

#[async_trait]
impl LoadController for ConsumerService {
    fn direction(&self) -> Direction {
        Direction::Consumer
    }

    async fn start(&self) -> ControlResult<ControlStatus> {
        let _guard = self.lifecycle.lock().await;
        if self.state.is_running() {
            log::info!("Consumer is already running");
            return Ok(ControlStatus::AlreadyRunning);
        }
        let settings = &self.settings;
        // A run that ended on connection loss may have left its monitor behind
        self.halt_lag_monitor().await;

        self.client.connect().await.map_err(Self::start_failed)?;
        self.client
            .subscribe(&settings.topic, settings.from_beginning)
            .await
            .map_err(Self::start_failed)?;

        self.state.begin();
        self.stats
            .set_consumer_throughput(&settings.topic, &settings.group_id, 0.0);

        let handler = Arc::new(ConsumerBatchHandler::new(
            &settings.topic,
            &settings.group_id,
            settings.report_interval,
            Arc::clone(&self.state),
            self.stats.clone(),
            Arc::clone(&self.processor),
        ));
        if let Err(e) = self.client.run(settings.concurrency, handler).await {
            self.state.finish();
            return Err(Self::start_failed(e));
        }

        if settings.lag.enabled {
            let (handle, token) = run_token();
            let monitor = LagMonitor::new(
                self.client.admin(),
                self.stats.clone(),
                &settings.topic,
                &settings.group_id,
                settings.lag.interval,
            )
            .bound_to(Arc::clone(&self.state));
            let task = monitor.spawn(token);
            *lock_recover(self.run.lock()) = RunSlot {
                lag_handle: Some(handle),
                lag_task: Some(task),
            };
        }

        log::info!(
            "Started consuming '{}' as group '{}' ({} partitions at a time)",
            settings.topic,
            settings.group_id,
            settings.concurrency
        );
        Ok(ControlStatus::Started)
    }

    async fn stop(&self) -> ControlResult<ControlStatus> {
        let _guard = self.lifecycle.lock().await;
        if !self.state.is_running() {
            self.halt_lag_monitor().await;
            log::info!("Consumer is not running");
            return Ok(ControlStatus::NotRunning);
        }

        let summary = self.state.finish();
        let stopped = self.client.stop().await;
        self.halt_lag_monitor().await;
        self.stats
            .set_consumer_throughput(&self.settings.topic, &self.settings.group_id, 0.0);
        self.stats.reset_lag();

        log::info!(
            "Stopped consuming: {} messages in {:.2}s ({:.2} msg/s)",
            summary.message_count,
            summary.elapsed_seconds,
            summary.average_throughput
        );
        stopped.map_err(|source| ControlError::StopFailed {
            direction: Direction::Consumer,
            source,
        })?;
        Ok(ControlStatus::Stopped)
    }

    fn stats(&self) -> LoopStats {
        self.state.stats()
    }

    async fn shutdown(&self) -> ControlResult<()> {
        self.stop().await?;
        let _guard = self.lifecycle.lock().await;
        self.client
            .disconnect()
            .await
            .map_err(|source| ControlError::ShutdownFailed {
                direction: Direction::Consumer,
                source,
            })
    }
}
