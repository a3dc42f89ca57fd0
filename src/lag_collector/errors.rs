use thiserror::Error;
use tokio::time::Duration;

use crate::cluster_offsets::ClusterOffsetsError;

/// Why a request to a [`crate::cluster_offsets::GroupDirectory`] or
/// [`crate::cluster_offsets::BrokerOffsetReader`] did not produce a result.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error(transparent)]
    Cluster(#[from] ClusterOffsetsError),

    #[error("Timed out after {0:?}")]
    TimedOut(Duration),
}

/// Possible errors from the [`super`] module.
#[derive(Error, Debug)]
pub enum LagCollectorError {
    /// Consumer Groups could not be listed: nothing can be collected in this cycle.
    #[error("Failed to list Consumer Groups: {0}")]
    ListGroups(#[source] FetchError),
}

pub type LagCollectorResult<T> = Result<T, LagCollectorError>;
