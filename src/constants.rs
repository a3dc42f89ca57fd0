use const_format::formatcp;

/// Kafka internal topic that keeps track of Consumer's committed Offsets.
/// Partitions of this topic are never reported as consumed by a Group.
pub(crate) const KONSUMER_OFFSETS_DATA_TOPIC: &str = "__consumer_offsets";

/// Environment variable that overrides the `-v`/`-q` logging verbosity.
pub(crate) const LOG_ENV_VAR: &str = "KAFKA_LAG_EXPORTER_LOG";

pub(crate) const DEFAULT_LISTEN_PORT: u16 = 8080;
pub(crate) const DEFAULT_LISTEN_ADDRESS: &str = formatcp!(":{DEFAULT_LISTEN_PORT}");
pub(crate) const DEFAULT_TELEMETRY_PATH: &str = "/metrics";
pub(crate) const DEFAULT_BOOTSTRAP_BROKERS: &str = "localhost:9092";
pub(crate) const DEFAULT_CLUSTER_NAME: &str = "kafka-cluster";
pub(crate) const DEFAULT_REFRESH_INTERVAL_SECS: &str = "15";
pub(crate) const DEFAULT_FETCH_TIMEOUT_SECS: &str = "10";
pub(crate) const DEFAULT_STALE_AFTER_CYCLES: &str = "5";
pub(crate) const DEFAULT_FILTER: &str = ".*";
