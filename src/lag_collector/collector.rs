use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use const_format::formatcp;
use prometheus::{
    register_histogram_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_with_registry, Histogram, IntCounter,
    IntCounterVec, IntGauge, Registry,
};
use regex::Regex;
use tokio::time::{timeout_at, Duration, Instant};

use super::errors::{FetchError, LagCollectorError, LagCollectorResult};
use crate::cluster_offsets::{BrokerOffsetReader, ClusterOffsetsResult, GroupDirectory};
use crate::kafka_types::{GroupTopicPartition, TopicPartition};
use crate::prometheus_metrics::{
    MetricSink, MetricsError, MetricsResult, EXPORTER_NAMESPACE, LABEL_SOURCE,
};

const MET_DURATION_NAME: &str = formatcp!("{EXPORTER_NAMESPACE}_collect_duration_seconds");
const MET_DURATION_HELP: &str = "Time (s) taken by a collection cycle";
const MET_FETCH_ERRORS_NAME: &str = formatcp!("{EXPORTER_NAMESPACE}_fetch_errors_total");
const MET_FETCH_ERRORS_HELP: &str = "Requests to the cluster that failed or timed out, by source";
const MET_SKIPPED_NAME: &str = formatcp!("{EXPORTER_NAMESPACE}_skipped_partitions_total");
const MET_SKIPPED_HELP: &str = "Consumer group partitions skipped because a cycle ran out of time";
const MET_GROUPS_NAME: &str = formatcp!("{EXPORTER_NAMESPACE}_consumer_groups");
const MET_GROUPS_HELP: &str = "Consumer groups collected in the last cycle";

const SOURCE_LIST_GROUPS: &str = "list_groups";
const SOURCE_GROUP_OFFSETS: &str = "group_offsets";
const SOURCE_BROKER_OFFSET: &str = "broker_offset";

/// Settings that bound and filter every collection cycle.
#[derive(Debug, Clone)]
pub struct CollectorSettings {
    /// Maximum time to wait for a single request to the Cluster.
    pub fetch_timeout: Duration,
    /// Maximum time a cycle can take: what is left to collect after it, is skipped.
    pub cycle_timeout: Duration,
    /// Only Consumer Groups matching this are collected.
    pub group_filter: Regex,
    /// Only Topics matching this are collected.
    pub topic_filter: Regex,
}

/// Outcome of a single collection cycle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CycleReport {
    pub cycle: u64,
    /// Consumer Groups selected for collection
    pub groups: usize,
    /// Consumer Groups whose committed offsets could not be fetched
    pub groups_failed: usize,
    /// Consumer Groups not reached before the cycle deadline
    pub groups_skipped: usize,
    /// Consumer Group partitions whose committed offset was published
    pub partitions: usize,
    /// Consumer Group partitions not reached before the cycle deadline
    pub partitions_skipped: usize,
    /// Topic partitions whose newest offset could not be fetched
    pub broker_failures: usize,
    /// Metric series removed because stale
    pub expired: usize,
    pub elapsed: Duration,
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cycle {} took {:?}: {} groups ({} failed, {} skipped), {} partitions ({} skipped, {} without broker offset), {} expired series",
            self.cycle,
            self.elapsed,
            self.groups,
            self.groups_failed,
            self.groups_skipped,
            self.partitions,
            self.partitions_skipped,
            self.broker_failures,
            self.expired
        )
    }
}

/// Runs `fut`, giving up after `fetch_timeout` or at `deadline`, whichever comes first.
async fn fetch_bounded<T>(
    deadline: Instant,
    fetch_timeout: Duration,
    fut: impl Future<Output = ClusterOffsetsResult<T>>,
) -> Result<T, FetchError> {
    let fetch_deadline = deadline.min(Instant::now() + fetch_timeout);
    let allowed = fetch_deadline.saturating_duration_since(Instant::now());

    match timeout_at(fetch_deadline, fut).await {
        Ok(res) => res.map_err(FetchError::from),
        Err(_) => Err(FetchError::TimedOut(allowed)),
    }
}

/// Collects the Consumer Groups offsets, the Brokers offsets and computes the Consumer Groups lag.
///
/// Every call to [`Self::collect`] is a full cycle: the results are published to the
/// [`MetricSink`].
/// Failures are contained to what they concern: a Group whose committed offsets can't be fetched is
/// skipped, and a Partition whose newest offset can't be fetched only publishes the Group offset.
/// Retrying is left to the next cycle.
pub struct LagCollector<D, R> {
    directory: D,
    reader: R,
    sink: Arc<MetricSink>,
    settings: CollectorSettings,

    // Prometheus Metrics
    metric_duration: Histogram,
    metric_fetch_errors: IntCounterVec,
    metric_skipped: IntCounter,
    metric_groups: IntGauge,
}

impl<D: GroupDirectory, R: BrokerOffsetReader> LagCollector<D, R> {
    /// Create a new [`LagCollector`]
    ///
    /// # Arguments
    ///
    /// * `directory` - Source of the Consumer Groups and their committed offsets
    /// * `reader` - Source of the newest offset of every Topic Partition
    /// * `sink` - Where offsets and lag are published
    /// * `settings` - Timeouts and filters applied to every cycle
    /// * `metrics` - Registry for the metrics describing the collection itself
    pub fn new(
        directory: D,
        reader: R,
        sink: Arc<MetricSink>,
        settings: CollectorSettings,
        metrics: &Registry,
    ) -> MetricsResult<Self> {
        Ok(Self {
            directory,
            reader,
            sink,
            settings,
            metric_duration: register_histogram_with_registry!(
                MET_DURATION_NAME,
                MET_DURATION_HELP,
                metrics
            )
            .map_err(|e| MetricsError::Metric(MET_DURATION_NAME, e))?,
            metric_fetch_errors: register_int_counter_vec_with_registry!(
                MET_FETCH_ERRORS_NAME,
                MET_FETCH_ERRORS_HELP,
                &[LABEL_SOURCE],
                metrics
            )
            .map_err(|e| MetricsError::Metric(MET_FETCH_ERRORS_NAME, e))?,
            metric_skipped: register_int_counter_with_registry!(
                MET_SKIPPED_NAME,
                MET_SKIPPED_HELP,
                metrics
            )
            .map_err(|e| MetricsError::Metric(MET_SKIPPED_NAME, e))?,
            metric_groups: register_int_gauge_with_registry!(
                MET_GROUPS_NAME,
                MET_GROUPS_HELP,
                metrics
            )
            .map_err(|e| MetricsError::Metric(MET_GROUPS_NAME, e))?,
        })
    }

    /// Performs one collection cycle.
    ///
    /// Returns an error only if the Consumer Groups could not be listed: in that case
    /// nothing is published.
    pub async fn collect(&self) -> LagCollectorResult<CycleReport> {
        let started = Instant::now();
        let deadline = started + self.settings.cycle_timeout;
        let fetch_timeout = self.settings.fetch_timeout;

        let mut report = CycleReport {
            cycle: self.sink.begin_cycle(),
            ..Default::default()
        };
        info!("Collection cycle {} started at {}", report.cycle, Utc::now().to_rfc3339());

        let listed = fetch_bounded(deadline, fetch_timeout, self.directory.list_groups()).await;
        let groups = match listed {
            Ok(groups) => groups
                .into_iter()
                .filter(|g| self.settings.group_filter.is_match(g))
                .collect::<Vec<String>>(),
            Err(e) => {
                self.metric_fetch_errors.with_label_values(&[SOURCE_LIST_GROUPS]).inc();
                let elapsed = started.elapsed();
                self.metric_duration.observe(elapsed.as_secs_f64());
                info!("Collection cycle {} failed after {elapsed:?}", report.cycle);
                return Err(LagCollectorError::ListGroups(e));
            },
        };
        report.groups = groups.len();
        self.metric_groups.set(groups.len() as i64);

        // Newest offset of every Topic Partition, fetched at most once per cycle
        let mut newest_offsets: HashMap<TopicPartition, Option<i64>> = HashMap::new();

        for (idx, group) in groups.iter().enumerate() {
            if Instant::now() >= deadline {
                report.groups_skipped = groups.len() - idx;
                break;
            }

            let offsets = match fetch_bounded(
                deadline,
                fetch_timeout,
                self.directory.fetch_group_offsets(group),
            )
            .await
            {
                Ok(o) => o,
                Err(e) => {
                    warn!(
                        "Failed to fetch committed offsets of Group '{group}', skipping it this cycle: {e}"
                    );
                    self.metric_fetch_errors.with_label_values(&[SOURCE_GROUP_OFFSETS]).inc();
                    report.groups_failed += 1;
                    continue;
                },
            };

            for (topic, partitions) in offsets.iter() {
                if !self.settings.topic_filter.is_match(topic) {
                    continue;
                }

                for (partition, group_offset) in partitions.iter() {
                    if Instant::now() >= deadline {
                        report.partitions_skipped += 1;
                        continue;
                    }

                    let gtp = GroupTopicPartition::new(group.as_str(), topic.as_str(), *partition);
                    self.sink.set_group_offset(&gtp, *group_offset).await;
                    report.partitions += 1;

                    let newest_offset = match newest_offsets.get(&gtp.topic_partition) {
                        Some(known) => *known,
                        None => {
                            let res = fetch_bounded(
                                deadline,
                                fetch_timeout,
                                self.reader.fetch_newest_offset(&gtp.topic_partition),
                            )
                            .await;

                            let fetched = match res {
                                Ok(o) => Some(o),
                                Err(e) => {
                                    error!(
                                        "Failed to fetch newest offset of '{}': {e}",
                                        gtp.topic_partition
                                    );
                                    self.metric_fetch_errors
                                        .with_label_values(&[SOURCE_BROKER_OFFSET])
                                        .inc();
                                    report.broker_failures += 1;
                                    None
                                },
                            };
                            newest_offsets.insert(gtp.topic_partition.clone(), fetched);
                            fetched
                        },
                    };

                    if let Some(broker_offset) = newest_offset {
                        self.sink.set_broker_offset(&gtp.topic_partition, broker_offset).await;
                        self.sink.set_lag(&gtp, broker_offset - group_offset).await;
                    }
                }
            }
        }

        if report.groups_skipped > 0 || report.partitions_skipped > 0 {
            warn!(
                "Collection cycle {} ran out of time after {:?}: skipped {} Groups and {} partitions",
                report.cycle,
                self.settings.cycle_timeout,
                report.groups_skipped,
                report.partitions_skipped
            );
            self.metric_skipped.inc_by(report.partitions_skipped as u64);
        }

        report.expired = self.sink.expire_stale().await;
        report.elapsed = started.elapsed();
        self.metric_duration.observe(report.elapsed.as_secs_f64());

        info!("Collection {report}");
        debug!(
            "Reporting {} Group partitions and {} Topic partitions",
            self.sink.group_partitions_count().await,
            self.sink.topic_partitions_count().await
        );

        Ok(report)
    }
}
