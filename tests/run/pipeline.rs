//! Producer and consumer sharing one in-memory broker

use crate::common::{consumer_settings, memory_broker, producer_settings, wait_until, PARTITIONS};
use std::sync::Arc;
use std::time::Duration;
use streamload::broker::{BrokerError, ProducerClient};
use streamload::consumer::ConsumerService;
use streamload::core::controller::{ControlStatus, LoadController};
use streamload::producer::ProducerService;
use streamload::stats::StatsSink;

const GROUP: &str = "e2e-group";

#[tokio::test(start_paused = true)]
async fn test_consumer_receives_everything_produced() {
    let topic = "e2e-orders";
    let broker = memory_broker();
    broker.create_topic(topic, PARTITIONS).unwrap();
    let stats = StatsSink::new().unwrap();

    let consumer = ConsumerService::new(
        consumer_settings(topic, GROUP),
        Arc::new(broker.consumer(GROUP)),
        stats.clone(),
    );
    let producer = ProducerService::new(
        producer_settings(topic),
        Arc::new(broker.producer()),
        stats.clone(),
    );

    assert_eq!(consumer.start().await.unwrap(), ControlStatus::Started);
    assert_eq!(producer.start().await.unwrap(), ControlStatus::Started);
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(producer.stats().running);
    producer.shutdown().await.unwrap();

    let written = broker.retained_messages(topic).unwrap() as u64;
    assert!(written >= 50, "written {written}");
    assert_eq!(stats.producer_messages(topic), written);

    wait_until(Duration::from_secs(30), "the consumer to catch up", || {
        stats.consumer_messages(topic, GROUP) == written
    })
    .await;
    assert_eq!(consumer.stats().message_count, written);
    assert_eq!(stats.decode_errors(topic, GROUP), 0);

    // Two lag ticks after catching up every sampled partition reads zero
    tokio::time::sleep(Duration::from_millis(2_100)).await;
    assert!(stats.lag_series() > 0);
    for partition in 0..PARTITIONS as i32 {
        if let Some(lag) = stats.lag(topic, GROUP, partition) {
            assert_eq!(lag, 0, "partition {partition}");
        }
    }

    consumer.shutdown().await.unwrap();
    assert_eq!(stats.lag_series(), 0);
    assert_eq!(stats.consumer_throughput(topic, GROUP), 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_producer_throttles_above_the_band() {
    let topic = "e2e-throttle";
    let broker = memory_broker();
    let stats = StatsSink::new().unwrap();
    let settings = producer_settings(topic);
    let throttle_ms = settings.pacing.delay_too_high.as_millis() as u64;
    let producer = ProducerService::new(settings, Arc::new(broker.producer()), stats.clone());

    producer.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(4)).await;

    // 50 messages per iteration is far above a 10-20 msg/s band
    let snapshot = producer.producer_stats();
    assert!(snapshot.loop_stats.running);
    assert_eq!(snapshot.pacing_delay_ms, throttle_ms);
    assert!(stats.producer_throughput(topic) > 20.0);

    producer.stop().await.unwrap();
    assert_eq!(producer.producer_stats().pacing_delay_ms, 0);
    assert_eq!(stats.producer_throughput(topic), 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_consumer_group_resumes_after_restart() {
    let topic = "e2e-resume";
    let broker = memory_broker();
    broker.create_topic(topic, PARTITIONS).unwrap();
    let stats = StatsSink::new().unwrap();
    // Partitions that got nothing in the first run have no commit to resume from
    let mut settings = consumer_settings(topic, GROUP);
    settings.from_beginning = true;
    let consumer = ConsumerService::new(
        settings,
        Arc::new(broker.consumer(GROUP)),
        stats.clone(),
    );
    let producer = ProducerService::new(
        producer_settings(topic),
        Arc::new(broker.producer()),
        stats.clone(),
    );

    consumer.start().await.unwrap();
    producer.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    producer.stop().await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    let first = broker.retained_messages(topic).unwrap() as u64;
    wait_until(Duration::from_secs(30), "the first run to drain", || {
        consumer.stats().message_count == first
    })
    .await;
    consumer.stop().await.unwrap();

    // Written while nobody consumes
    producer.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    producer.stop().await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    let backlog = broker.retained_messages(topic).unwrap() as u64 - first;
    assert!(backlog > 0);

    consumer.start().await.unwrap();
    wait_until(Duration::from_secs(30), "the backlog to drain", || {
        consumer.stats().message_count == backlog
    })
    .await;
    assert_eq!(stats.consumer_messages(topic, GROUP), first + backlog);
    consumer.shutdown().await.unwrap();
    producer.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_broker_loss_ends_both_runs() {
    let topic = "e2e-loss";
    let broker = memory_broker();
    broker.create_topic(topic, PARTITIONS).unwrap();
    let stats = StatsSink::new().unwrap();
    let producer = ProducerService::new(
        producer_settings(topic),
        Arc::new(broker.producer()),
        stats.clone(),
    );
    let consumer = ConsumerService::new(
        consumer_settings(topic, GROUP),
        Arc::new(broker.consumer(GROUP)),
        stats.clone(),
    );

    consumer.start().await.unwrap();
    producer.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    broker.close();

    wait_until(Duration::from_secs(10), "both loops to stop", || {
        !producer.stats().running && !consumer.stats().running
    })
    .await;
    assert_eq!(stats.send_errors(topic), 1);
    assert_eq!(stats.consumer_throughput(topic, GROUP), 0.0);
    assert_eq!(stats.lag_series(), 0);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(stats.lag_poll_errors(topic, GROUP), 0);
    assert_eq!(producer.stop().await.unwrap(), ControlStatus::NotRunning);
    assert_eq!(consumer.stop().await.unwrap(), ControlStatus::NotRunning);

    let error = broker.producer().connect().await.unwrap_err();
    assert!(matches!(error, BrokerError::Closed));
}
