//! Wires one invocation: broker clients, loops, reporter and shutdown
//!
//! The consumer is started before the producer so that, subscribed at the
//! log end, it sees everything the producer writes. Shutdown runs in the
//! opposite order.

use crate::app::cli::LoopSelection;
use crate::app::config::{AppConfig, Backend};
use crate::app::error::AppResult;
use crate::app::reporter::{StatsLine, StatsReporter};
use crate::broker::memory::MemoryBroker;
use crate::broker::{ConsumerClient, ProducerClient};
use crate::consumer::ConsumerService;
use crate::core::controller::{ControllerConfig, Direction, LoadController};
use crate::core::error_handling::log_error_with_context;
use crate::core::loop_state::run_token;
use crate::core::retry::{retry_async, RetryPolicy};
use crate::producer::{ProducerService, ProducerStats};
use crate::stats::StatsSink;
use prettytable::{format, row, Table};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Broker clients for both directions
pub struct Clients {
    pub producer: Arc<dyn ProducerClient>,
    pub consumer: Arc<dyn ConsumerClient>,
}

impl Clients {
    pub fn memory(broker: &Arc<MemoryBroker>, group_id: &str) -> Self {
        Self {
            producer: Arc::new(broker.producer()),
            consumer: Arc::new(broker.consumer(group_id)),
        }
    }
}

pub fn build_clients(config: &AppConfig) -> AppResult<Clients> {
    match config.broker.backend {
        Backend::Memory => {
            let broker = MemoryBroker::new(config.broker.memory.clone());
            log::debug!(
                "In-memory broker with {} partitions per topic",
                broker.config().partitions
            );
            Ok(Clients::memory(&broker, &config.consumer.group_id))
        }
        Backend::Kafka => kafka_clients(config),
    }
}

#[cfg(feature = "kafka")]
fn kafka_clients(config: &AppConfig) -> AppResult<Clients> {
    use crate::broker::kafka::{KafkaConsumer, KafkaProducer};

    log::debug!("Kafka backend at {}", config.broker.cluster.brokers);
    Ok(Clients {
        producer: Arc::new(KafkaProducer::new(
            config.broker.cluster.clone(),
            config.producer.compression,
        )),
        consumer: Arc::new(KafkaConsumer::new(
            config.broker.cluster.clone(),
            &config.consumer.group_id,
        )),
    })
}

#[cfg(not(feature = "kafka"))]
fn kafka_clients(_config: &AppConfig) -> AppResult<Clients> {
    Err(crate::app::config::ConfigError::invalid(
        "broker.backend",
        "this build has no Kafka support; rebuild with `--features kafka`",
    )
    .into())
}

/// What a finished run leaves behind for the summary
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    /// Snapshots taken just before the loops were stopped
    pub lines: Vec<StatsLine>,
    pub producer: Option<ProducerStats>,
}

pub struct Runner {
    config: AppConfig,
    loops: LoopSelection,
    duration: Option<Duration>,
    stats: StatsSink,
    retry: RetryPolicy,
    controller_config: ControllerConfig,
}

impl Runner {
    pub fn new(config: AppConfig, loops: LoopSelection, duration: Option<Duration>) -> AppResult<Self> {
        Ok(Self {
            config,
            loops,
            duration,
            stats: StatsSink::new()?,
            retry: RetryPolicy::default(),
            controller_config: ControllerConfig::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn stats(&self) -> &StatsSink {
        &self.stats
    }

    /// Start the selected loops, wait for the duration or a shutdown signal,
    /// then stop them
    pub async fn run(
        &self,
        clients: Clients,
        mut shutdown: broadcast::Receiver<()>,
    ) -> AppResult<RunOutcome> {
        let mut controllers: Vec<Arc<dyn LoadController>> = Vec::new();
        if self.loops.consumer {
            controllers.push(Arc::new(ConsumerService::new(
                self.config.consumer_settings(),
                clients.consumer,
                self.stats.clone(),
            )));
        }
        let producer = self.loops.producer.then(|| {
            Arc::new(ProducerService::new(
                self.config.producer_settings(),
                clients.producer,
                self.stats.clone(),
            ))
        });
        if let Some(producer) = &producer {
            controllers.push(Arc::clone(producer) as Arc<dyn LoadController>);
        }

        for (index, controller) in controllers.iter().enumerate() {
            let operation = format!("Starting {}", controller.direction());
            let started = retry_async(&operation, self.retry.clone(), || controller.start()).await;
            match started {
                Ok(status) => log::info!("{}", status.message(controller.direction())),
                Err(e) => {
                    self.shutdown_all(&controllers[..index]).await;
                    return Err(e.into());
                }
            }
        }

        let (reporter_handle, reporter_token) = run_token();
        let reporter = self.config.report.stats.then(|| {
            StatsReporter::new(self.config.report_interval(), controllers.clone())
                .spawn(reporter_token)
        });

        let deadline = async {
            match self.duration {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = shutdown.recv() => log::info!("Shutdown requested"),
            _ = deadline => log::info!("Run duration reached"),
        }

        let lines = StatsReporter::new(self.config.report_interval(), controllers.clone()).snapshot();
        let producer_stats = producer.as_ref().map(|p| p.producer_stats());

        reporter_handle.cancel();
        if let Some(task) = reporter {
            if let Err(e) = task.await {
                log::debug!("Stats reporter ended abnormally: {}", e);
            }
        }
        self.shutdown_all(&controllers).await;

        Ok(RunOutcome {
            lines,
            producer: producer_stats,
        })
    }

    /// Stop and disconnect in reverse start order, each within the timeout
    async fn shutdown_all(&self, controllers: &[Arc<dyn LoadController>]) {
        let timeout = self.controller_config.shutdown_timeout;
        for controller in controllers.iter().rev() {
            match tokio::time::timeout(timeout, controller.shutdown()).await {
                Ok(Ok(())) => log::debug!("{} shut down", controller.direction()),
                Ok(Err(e)) => log_error_with_context(&e, "Shutting down"),
                Err(_) => log::warn!(
                    "{} did not shut down within {:?}",
                    controller.direction(),
                    timeout
                ),
            }
        }
    }
}

/// Final per-loop table printed when the run ends
pub fn summary_table(outcome: &RunOutcome) -> Table {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_NO_BORDER_LINE_SEPARATOR);
    table.set_titles(row![
        "Direction",
        "Messages",
        "Elapsed (s)",
        "Throughput (msg/s)",
        "Pacing delay (ms)"
    ]);
    for line in &outcome.lines {
        let pacing = match (&outcome.producer, line.direction) {
            (Some(producer), Direction::Producer) => {
                producer.pacing_delay_ms.to_string()
            }
            _ => "-".to_string(),
        };
        table.add_row(row![
            line.direction,
            line.stats.message_count,
            format!("{:.2}", line.stats.elapsed_seconds),
            format!("{:.2}", line.stats.throughput),
            pacing
        ]);
    }
    table
}
