// Inner modules
mod errors;
mod kafka;

use std::sync::Arc;

use async_trait::async_trait;
use rdkafka::{
    consumer::{BaseConsumer, Consumer},
    ClientConfig,
};
use tokio::{task::spawn_blocking, time::Duration};

use crate::kafka_types::{GroupOffsets, TopicPartition};

// Exports
pub use errors::{ClusterOffsetsError, ClusterOffsetsResult};
pub use kafka::{KafkaBrokerOffsetReader, KafkaGroupDirectory};

/// Directory of the Consumer Groups known to the Cluster.
#[async_trait]
pub trait GroupDirectory: Send + Sync {
    /// Names of all the Consumer Groups currently known to the Cluster.
    async fn list_groups(&self) -> ClusterOffsetsResult<Vec<String>>;

    /// Committed offsets of the given Consumer Group, as `topic -> (partition -> offset)`.
    ///
    /// Partitions for which the Group has no committed offset are omitted.
    async fn fetch_group_offsets(&self, group: &str) -> ClusterOffsetsResult<GroupOffsets>;
}

/// Reads the offsets that Brokers make available to consumers.
#[async_trait]
pub trait BrokerOffsetReader: Send + Sync {
    /// Newest offset (high watermark) of the given [`TopicPartition`].
    async fn fetch_newest_offset(&self, tp: &TopicPartition) -> ClusterOffsetsResult<i64>;
}

/// Connects to the Kafka Cluster and returns its [`GroupDirectory`] and [`BrokerOffsetReader`].
///
/// Fails if the Kafka client can't be created, or if the Cluster metadata can't be fetched
/// within `fetch_timeout`: without them there is nothing to collect.
pub async fn init(
    client_config: ClientConfig,
    fetch_timeout: Duration,
) -> ClusterOffsetsResult<(KafkaGroupDirectory, KafkaBrokerOffsetReader)> {
    let consumer: Arc<BaseConsumer> = Arc::new(client_config.create()?);

    let probe = consumer.clone();
    let brokers_count =
        spawn_blocking(move || probe.fetch_metadata(None, fetch_timeout).map(|m| m.brokers().len()))
            .await??;
    info!("Connected to Kafka Cluster: {brokers_count} Brokers");

    let directory = KafkaGroupDirectory::new(client_config, consumer.clone(), fetch_timeout);
    let reader = KafkaBrokerOffsetReader::new(consumer, fetch_timeout);

    debug!("Initialized");
    Ok((directory, reader))
}
