//! Tests for the consumer lifecycle against the in-memory broker

#[cfg(test)]
mod tests {
    use crate::broker::memory::{MemoryBroker, MemoryBrokerConfig, MemoryConsumer};
    use crate::broker::{Compression, ProducerClient};
    use crate::consumer::tests::{SlowProcessor, GROUP, TOPIC};
    use crate::consumer::{ConsumerService, ConsumerSettings, JsonProcessor, LagSettings, MessageProcessor};
    use crate::core::controller::{ControlError, ControlStatus, LoadController};
    use crate::core::loop_state::LoopStats;
    use crate::core::time::TokioClock;
    use crate::producer::{encode_batch, generate_batch};
    use crate::stats::StatsSink;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::{sleep, timeout, Instant};

    struct Harness {
        broker: Arc<MemoryBroker>,
        client: Arc<MemoryConsumer>,
        stats: StatsSink,
        service: ConsumerService,
    }

    fn settings() -> ConsumerSettings {
        ConsumerSettings {
            topic: TOPIC.to_string(),
            group_id: GROUP.to_string(),
            concurrency: 4,
            lag: LagSettings {
                enabled: true,
                interval: Duration::from_secs(2),
            },
            ..Default::default()
        }
    }

    fn harness_with(settings: ConsumerSettings, processor: Arc<dyn MessageProcessor>) -> Harness {
        let broker = MemoryBroker::new(MemoryBrokerConfig {
            partitions: 4,
            max_batch_size: 50,
            poll_interval: Duration::from_millis(5),
            ..Default::default()
        });
        broker.create_topic(TOPIC, 4).unwrap();
        let client = Arc::new(broker.consumer(&settings.group_id));
        let stats = StatsSink::new().unwrap();
        let service = ConsumerService::with_parts(
            settings,
            client.clone(),
            stats.clone(),
            processor,
            Arc::new(TokioClock),
        );
        Harness {
            broker,
            client,
            stats,
            service,
        }
    }

    fn harness() -> Harness {
        harness_with(settings(), Arc::new(JsonProcessor))
    }

    async fn produce(broker: &Arc<MemoryBroker>, count: usize) {
        let producer = broker.producer();
        producer.connect().await.unwrap();
        let records = encode_batch(&generate_batch(count)).unwrap();
        producer.send(TOPIC, records, Compression::None).await.unwrap();
    }

    async fn wait_for_count(service: &ConsumerService, expected: u64) {
        timeout(Duration::from_secs(30), async {
            while service.stats().message_count < expected {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("consumer did not reach the expected count");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_before_start_are_quiescent() {
        let h = harness();
        assert_eq!(h.service.stats(), LoopStats::quiescent(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_consumes_records_produced_after_start() {
        let h = harness();
        produce(&h.broker, 25).await;

        assert_eq!(h.service.start().await.unwrap(), ControlStatus::Started);
        produce(&h.broker, 100).await;
        wait_for_count(&h.service, 100).await;

        sleep(Duration::from_millis(200)).await;
        // Records that predate the subscription are not read
        assert_eq!(h.service.stats().message_count, 100);
        assert_eq!(h.stats.consumer_messages(TOPIC, GROUP), 100);
        assert_eq!(h.stats.decode_errors(TOPIC, GROUP), 0);
        h.service.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_from_beginning_reads_the_whole_log() {
        let h = harness_with(
            ConsumerSettings {
                from_beginning: true,
                ..settings()
            },
            Arc::new(JsonProcessor),
        );
        produce(&h.broker, 60).await;

        h.service.start().await.unwrap();
        wait_for_count(&h.service, 60).await;
        h.service.stop().await.unwrap();

        let committed: i64 = h
            .broker
            .committed_offsets(GROUP, TOPIC)
            .unwrap()
            .iter()
            .map(|p| p.offset)
            .sum();
        assert_eq!(committed, 60);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_is_a_no_op() {
        let h = harness();
        let started_at = Instant::now();
        assert_eq!(h.service.start().await.unwrap(), ControlStatus::Started);
        produce(&h.broker, 30).await;
        wait_for_count(&h.service, 30).await;
        sleep(Duration::from_secs(1)).await;

        let before = h.service.stats();
        assert_eq!(
            h.service.start().await.unwrap(),
            ControlStatus::AlreadyRunning
        );
        let after = h.service.stats();
        assert!(h.client.is_delivering());
        assert_eq!(after.message_count, before.message_count);
        assert_eq!(after.message_count, 30);
        // The run keeps the clock of the first start
        let since_first_start = started_at.elapsed().as_secs_f64();
        assert!(since_first_start >= 1.0);
        assert!(
            (after.elapsed_seconds - since_first_start).abs() < 0.01,
            "elapsed {} vs {}",
            after.elapsed_seconds,
            since_first_start
        );
        h.service.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_broker_ends_the_run() {
        let h = harness();
        h.service.start().await.unwrap();
        produce(&h.broker, 40).await;
        wait_for_count(&h.service, 40).await;
        sleep(Duration::from_millis(2_500)).await;
        assert!(h.stats.lag_series() > 0);

        h.broker.close();
        sleep(Duration::from_millis(100)).await;

        let stats = h.service.stats();
        assert!(!stats.running);
        assert_eq!(stats.message_count, 0);
        assert!(!h.client.is_delivering());
        assert_eq!(h.stats.consumer_throughput(TOPIC, GROUP), 0.0);
        assert_eq!(h.stats.lag_series(), 0);

        // The lag monitor went down with the run
        sleep(Duration::from_secs(60)).await;
        assert_eq!(h.stats.lag_poll_errors(TOPIC, GROUP), 0);
        assert_eq!(h.stats.lag_series(), 0);
        assert_eq!(h.service.stop().await.unwrap(), ControlStatus::NotRunning);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_when_not_running() {
        let h = harness();
        assert_eq!(h.service.stop().await.unwrap(), ControlStatus::NotRunning);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_resets_stats_and_lag() {
        let h = harness();
        h.service.start().await.unwrap();
        produce(&h.broker, 40).await;
        wait_for_count(&h.service, 40).await;

        // Let the lag monitor publish at least once
        sleep(Duration::from_secs(3)).await;
        assert!(h.stats.lag_series() > 0);

        assert_eq!(h.service.stop().await.unwrap(), ControlStatus::Stopped);
        assert_eq!(h.service.stats(), LoopStats::quiescent(false));
        assert_eq!(h.stats.consumer_throughput(TOPIC, GROUP), 0.0);
        assert_eq!(h.stats.lag_series(), 0);
        assert!(!h.client.is_delivering());

        // Nothing is published once stopped
        sleep(Duration::from_secs(10)).await;
        assert_eq!(h.stats.lag_series(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lag_reflects_unprocessed_records() {
        let processor = Arc::new(SlowProcessor {
            per_message: Duration::from_secs(1),
            processed: AtomicUsize::new(0),
        });
        let h = harness_with(
            ConsumerSettings {
                concurrency: 1,
                ..settings()
            },
            processor,
        );
        produce(&h.broker, 200).await;
        for partition in 0..4 {
            h.broker.commit(GROUP, TOPIC, partition, 0).unwrap();
        }
        h.service.start().await.unwrap();

        sleep(Duration::from_millis(2_500)).await;
        let total: i64 = (0..4).filter_map(|p| h.stats.lag(TOPIC, GROUP, p)).sum();
        assert_eq!(total, 200);
        h.service.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_mid_batch_leaves_rest_uncommitted() {
        let processor = Arc::new(SlowProcessor {
            per_message: Duration::from_millis(100),
            processed: AtomicUsize::new(0),
        });
        let h = harness_with(
            ConsumerSettings {
                concurrency: 1,
                ..settings()
            },
            processor.clone(),
        );
        h.service.start().await.unwrap();
        produce(&h.broker, 400).await;

        sleep(Duration::from_millis(350)).await;
        h.service.stop().await.unwrap();

        let processed = processor.processed.load(Ordering::SeqCst);
        assert!(processed >= 3 && processed < 50, "processed {processed}");
        let committed: i64 = h
            .broker
            .committed_offsets(GROUP, TOPIC)
            .unwrap()
            .iter()
            .filter(|p| p.offset > 0)
            .map(|p| p.offset)
            .sum();
        assert!(committed <= processed as i64);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure_reports_start_failed() {
        let h = harness();
        h.broker.fail_next_connects(1);

        let error = h.service.start().await.unwrap_err();
        assert!(matches!(error, ControlError::StartFailed { .. }));
        assert!(!h.service.stats().running);

        assert_eq!(h.service.start().await.unwrap(), ControlStatus::Started);
        h.service.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_lag_poll_is_counted_and_skipped() {
        let h = harness();
        h.service.start().await.unwrap();
        produce(&h.broker, 20).await;
        wait_for_count(&h.service, 20).await;

        h.broker.fail_next_admin_calls(1);
        sleep(Duration::from_millis(2_100)).await;
        assert_eq!(h.stats.lag_poll_errors(TOPIC, GROUP), 1);

        sleep(Duration::from_secs(2)).await;
        assert!(h.stats.lag_series() > 0);
        h.service.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_lag_monitor_publishes_nothing() {
        let h = harness_with(
            ConsumerSettings {
                lag: LagSettings {
                    enabled: false,
                    ..Default::default()
                },
                ..settings()
            },
            Arc::new(JsonProcessor),
        );
        h.service.start().await.unwrap();
        produce(&h.broker, 20).await;
        wait_for_count(&h.service, 20).await;

        sleep(Duration::from_secs(30)).await;
        assert_eq!(h.stats.lag_series(), 0);
        h.service.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_resumes_from_commits() {
        let h = harness_with(
            ConsumerSettings {
                from_beginning: true,
                ..settings()
            },
            Arc::new(JsonProcessor),
        );
        h.service.start().await.unwrap();
        produce(&h.broker, 30).await;
        wait_for_count(&h.service, 30).await;
        h.service.stop().await.unwrap();

        produce(&h.broker, 12).await;
        h.service.start().await.unwrap();
        wait_for_count(&h.service, 12).await;
        sleep(Duration::from_millis(200)).await;
        assert_eq!(h.service.stats().message_count, 12);
        h.service.shutdown().await.unwrap();
    }
}
