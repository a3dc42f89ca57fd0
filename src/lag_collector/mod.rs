// Inner modules
mod collector;
mod errors;
mod scheduler;

#[cfg(test)]
mod fakes;

use std::sync::Arc;

use prometheus::Registry;
use tokio::{task::JoinHandle, time::Duration};
use tokio_util::sync::CancellationToken;

use crate::cluster_offsets::{BrokerOffsetReader, GroupDirectory};
use crate::prometheus_metrics::{MetricSink, MetricsResult};

// Exports
pub use collector::{CollectorSettings, CycleReport, LagCollector};
pub use errors::{FetchError, LagCollectorError, LagCollectorResult};
pub use scheduler::Scheduler;

/// Starts collecting Consumer Groups lag every `refresh_interval`,
/// until `shutdown_token` is cancelled.
///
/// Returns the [`JoinHandle`] of the collection task.
pub fn init<D, R>(
    directory: D,
    reader: R,
    sink: Arc<MetricSink>,
    settings: CollectorSettings,
    refresh_interval: Duration,
    metrics: &Registry,
    shutdown_token: CancellationToken,
) -> MetricsResult<JoinHandle<()>>
where
    D: GroupDirectory + 'static,
    R: BrokerOffsetReader + 'static,
{
    info!(
        "Collecting every {refresh_interval:?} (fetch timeout: {:?}, cycle timeout: {:?})",
        settings.fetch_timeout, settings.cycle_timeout
    );
    debug!(
        "Group filter: '{}', Topic filter: '{}'",
        settings.group_filter, settings.topic_filter
    );

    let collector = LagCollector::new(directory, reader, sink, settings, metrics)?;
    let join_handle = Scheduler::new(collector, refresh_interval).spawn(shutdown_token);

    debug!("Initialized");
    Ok(join_handle)
}
