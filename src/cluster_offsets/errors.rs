use rdkafka::error::KafkaError;
use thiserror::Error;
use tokio::task::JoinError;

/// Possible errors from the [`super`] module.
#[derive(Error, Debug)]
pub enum ClusterOffsetsError {
    /// A request to the Kafka Cluster failed.
    #[error("Kafka request failed: {0}")]
    Kafka(#[from] KafkaError),

    /// The blocking task issuing a Kafka request panicked or was cancelled.
    #[error("Kafka request task aborted: {0}")]
    Aborted(#[from] JoinError),
}

pub type ClusterOffsetsResult<T> = Result<T, ClusterOffsetsError>;
