use crate::stats::error::{StatsError, StatsResult};
use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

/// Processing-time histogram boundaries, in seconds
pub const PROCESSING_TIME_BUCKETS: [f64; 7] = [0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0];

/// Operation label of the processing-time histogram
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, strum_macros::AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Operation {
    Produce,
    Consume,
}

const TOPIC: &str = "topic";
const GROUP: &str = "groupId";
const PARTITION: &str = "partition";
const OPERATION: &str = "operation";

const CONSUMER_LAG: &str = "kafka_consumer_lag";

/// Metrics both loops report into
///
/// Cloning is cheap; clones share the same registry and series.
#[derive(Debug, Clone)]
pub struct StatsSink {
    registry: Registry,
    producer_messages: IntCounterVec,
    producer_bytes: IntCounterVec,
    producer_throughput: GaugeVec,
    producer_send_errors: IntCounterVec,
    processing_time: HistogramVec,
    consumer_messages: IntCounterVec,
    consumer_bytes: IntCounterVec,
    consumer_throughput: GaugeVec,
    consumer_lag: IntGaugeVec,
    consumer_decode_errors: IntCounterVec,
    lag_poll_errors: IntCounterVec,
}

impl StatsSink {
    pub fn new() -> StatsResult<Self> {
        let registry = Registry::new();

        let producer_messages = IntCounterVec::new(
            Opts::new("kafka_producer_messages_total", "Total messages produced"),
            &[TOPIC],
        )?;
        let producer_bytes = IntCounterVec::new(
            Opts::new(
                "kafka_producer_messages_sent_bytes_total",
                "Total key and payload bytes produced",
            ),
            &[TOPIC],
        )?;
        let producer_throughput = GaugeVec::new(
            Opts::new("kafka_producer_throughput", "Producer messages per second"),
            &[TOPIC],
        )?;
        let producer_send_errors = IntCounterVec::new(
            Opts::new(
                "kafka_producer_send_errors_total",
                "Producer iterations that failed to send",
            ),
            &[TOPIC],
        )?;
        let processing_time = HistogramVec::new(
            HistogramOpts::new(
                "kafka_message_processing_time_seconds",
                "Time spent producing an iteration or consuming a batch",
            )
            .buckets(PROCESSING_TIME_BUCKETS.to_vec()),
            &[OPERATION, TOPIC],
        )?;
        let consumer_messages = IntCounterVec::new(
            Opts::new("kafka_consumer_messages_total", "Total messages consumed"),
            &[TOPIC, GROUP],
        )?;
        let consumer_bytes = IntCounterVec::new(
            Opts::new(
                "kafka_consumer_messages_consumed_bytes_total",
                "Total key and payload bytes consumed",
            ),
            &[TOPIC, GROUP],
        )?;
        let consumer_throughput = GaugeVec::new(
            Opts::new("kafka_consumer_throughput", "Consumer messages per second"),
            &[TOPIC, GROUP],
        )?;
        let consumer_lag = IntGaugeVec::new(
            Opts::new(CONSUMER_LAG, "Latest offset minus committed offset"),
            &[TOPIC, GROUP, PARTITION],
        )?;
        let consumer_decode_errors = IntCounterVec::new(
            Opts::new(
                "kafka_consumer_decode_errors_total",
                "Consumed messages whose payload could not be decoded",
            ),
            &[TOPIC, GROUP],
        )?;
        let lag_poll_errors = IntCounterVec::new(
            Opts::new(
                "kafka_consumer_lag_poll_errors_total",
                "Lag monitor ticks abandoned after a broker error",
            ),
            &[TOPIC, GROUP],
        )?;

        registry.register(Box::new(producer_messages.clone()))?;
        registry.register(Box::new(producer_bytes.clone()))?;
        registry.register(Box::new(producer_throughput.clone()))?;
        registry.register(Box::new(producer_send_errors.clone()))?;
        registry.register(Box::new(processing_time.clone()))?;
        registry.register(Box::new(consumer_messages.clone()))?;
        registry.register(Box::new(consumer_bytes.clone()))?;
        registry.register(Box::new(consumer_throughput.clone()))?;
        registry.register(Box::new(consumer_lag.clone()))?;
        registry.register(Box::new(consumer_decode_errors.clone()))?;
        registry.register(Box::new(lag_poll_errors.clone()))?;

        Ok(Self {
            registry,
            producer_messages,
            producer_bytes,
            producer_throughput,
            producer_send_errors,
            processing_time,
            consumer_messages,
            consumer_bytes,
            consumer_throughput,
            consumer_lag,
            consumer_decode_errors,
            lag_poll_errors,
        })
    }

    pub fn record_produced(&self, topic: &str, messages: u64, bytes: u64) {
        self.producer_messages.with_label_values(&[topic]).inc_by(messages);
        self.producer_bytes.with_label_values(&[topic]).inc_by(bytes);
    }

    pub fn set_producer_throughput(&self, topic: &str, messages_per_second: f64) {
        self.producer_throughput
            .with_label_values(&[topic])
            .set(messages_per_second);
    }

    pub fn record_send_error(&self, topic: &str) {
        self.producer_send_errors.with_label_values(&[topic]).inc();
    }

    pub fn observe_processing(&self, operation: Operation, topic: &str, seconds: f64) {
        self.processing_time
            .with_label_values(&[operation.as_ref(), topic])
            .observe(seconds);
    }

    pub fn record_consumed(&self, topic: &str, group_id: &str, messages: u64, bytes: u64) {
        self.consumer_messages
            .with_label_values(&[topic, group_id])
            .inc_by(messages);
        self.consumer_bytes
            .with_label_values(&[topic, group_id])
            .inc_by(bytes);
    }

    pub fn set_consumer_throughput(&self, topic: &str, group_id: &str, messages_per_second: f64) {
        self.consumer_throughput
            .with_label_values(&[topic, group_id])
            .set(messages_per_second);
    }

    pub fn record_decode_error(&self, topic: &str, group_id: &str) {
        self.consumer_decode_errors
            .with_label_values(&[topic, group_id])
            .inc();
    }

    pub fn set_lag(&self, topic: &str, group_id: &str, partition: i32, lag: i64) {
        let partition = partition.to_string();
        self.consumer_lag
            .with_label_values(&[topic, group_id, &partition])
            .set(lag);
    }

    /// Drop every lag series
    pub fn reset_lag(&self) {
        self.consumer_lag.reset();
    }

    pub fn record_lag_poll_error(&self, topic: &str, group_id: &str) {
        self.lag_poll_errors.with_label_values(&[topic, group_id]).inc();
    }

    pub fn producer_messages(&self, topic: &str) -> u64 {
        self.producer_messages.with_label_values(&[topic]).get()
    }

    pub fn producer_throughput(&self, topic: &str) -> f64 {
        self.producer_throughput.with_label_values(&[topic]).get()
    }

    pub fn send_errors(&self, topic: &str) -> u64 {
        self.producer_send_errors.with_label_values(&[topic]).get()
    }

    pub fn consumer_messages(&self, topic: &str, group_id: &str) -> u64 {
        self.consumer_messages
            .with_label_values(&[topic, group_id])
            .get()
    }

    pub fn consumer_throughput(&self, topic: &str, group_id: &str) -> f64 {
        self.consumer_throughput
            .with_label_values(&[topic, group_id])
            .get()
    }

    pub fn decode_errors(&self, topic: &str, group_id: &str) -> u64 {
        self.consumer_decode_errors
            .with_label_values(&[topic, group_id])
            .get()
    }

    pub fn lag_poll_errors(&self, topic: &str, group_id: &str) -> u64 {
        self.lag_poll_errors.with_label_values(&[topic, group_id]).get()
    }

    /// Number of processing-time observations for one series
    pub fn processing_samples(&self, operation: Operation, topic: &str) -> u64 {
        self.processing_time
            .with_label_values(&[operation.as_ref(), topic])
            .get_sample_count()
    }

    /// Current lag of a partition, without creating the series
    pub fn lag(&self, topic: &str, group_id: &str, partition: i32) -> Option<i64> {
        let partition = partition.to_string();
        self.registry
            .gather()
            .into_iter()
            .filter(|family| family.get_name() == CONSUMER_LAG)
            .flat_map(|family| family.get_metric().to_vec())
            .find(|metric| {
                let labels = metric.get_label();
                let has = |name: &str, value: &str| {
                    labels
                        .iter()
                        .any(|l| l.get_name() == name && l.get_value() == value)
                };
                has(TOPIC, topic) && has(GROUP, group_id) && has(PARTITION, &partition)
            })
            .map(|metric| metric.get_gauge().get_value() as i64)
    }

    /// Number of partitions with a lag series
    pub fn lag_series(&self) -> usize {
        self.registry
            .gather()
            .iter()
            .filter(|family| family.get_name() == CONSUMER_LAG)
            .map(|family| family.get_metric().len())
            .sum()
    }

    /// Prometheus text exposition of every series
    pub fn render(&self) -> StatsResult<String> {
        let metric_families = self.registry.gather();
        let mut output = Vec::new();
        TextEncoder::new()
            .encode(&metric_families, &mut output)
            .map_err(|e| StatsError::Encoding {
                message: e.to_string(),
            })?;
        String::from_utf8(output).map_err(|e| StatsError::Encoding {
            message: e.to_string(),
        })
    }
}
