use tokio::{
    task::JoinHandle,
    time::{interval, Duration, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use super::LagCollector;
use crate::cluster_offsets::{BrokerOffsetReader, GroupDirectory};

/// Runs a [`LagCollector`] cycle every `refresh_interval`.
///
/// Cycles never overlap: a cycle that runs longer than `refresh_interval` delays the next one,
/// and the ticks missed in the meantime are skipped.
pub struct Scheduler<D, R> {
    collector: LagCollector<D, R>,
    refresh_interval: Duration,
}

impl<D, R> Scheduler<D, R>
where
    D: GroupDirectory + 'static,
    R: BrokerOffsetReader + 'static,
{
    pub fn new(collector: LagCollector<D, R>, refresh_interval: Duration) -> Self {
        Self {
            collector,
            refresh_interval,
        }
    }

    /// Spawn a new async task that runs a collection cycle at every tick.
    ///
    /// The first cycle starts immediately. A failed cycle is logged, and collection carries on
    /// at the next tick.
    ///
    /// # Arguments
    ///
    /// * `shutdown_token`: A [`CancellationToken`] that, when cancelled, will make the internal
    ///   loop terminate. A cycle in progress is abandoned.
    pub fn spawn(self, shutdown_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = interval(self.refresh_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {},
                    _ = shutdown_token.cancelled() => {
                        info!("Shutting down");
                        break;
                    },
                }

                tokio::select! {
                    res = self.collector.collect() => match res {
                        Ok(report) if report.elapsed > self.refresh_interval => {
                            warn!(
                                "Collection cycle {} took {:?}, longer than the refresh interval of {:?}: next cycle is delayed",
                                report.cycle, report.elapsed, self.refresh_interval
                            );
                        },
                        Ok(_) => {},
                        Err(e) => {
                            error!(
                                "Collection cycle failed, retrying in {:?}: {e}",
                                self.refresh_interval
                            );
                        },
                    },
                    _ = shutdown_token.cancelled() => {
                        info!("Shutting down, abandoning collection cycle in progress");
                        break;
                    },
                }
            }
        })
    }
}
