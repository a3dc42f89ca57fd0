use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    OnceLock,
};

use const_format::formatcp;
use prometheus::{
    register_int_counter_with_registry, register_int_gauge_vec_with_registry, IntCounter, IntGauge,
    IntGaugeVec, Registry,
};
use tokio::sync::RwLock;

use super::{
    MetricsError, MetricsResult, EXPORTER_NAMESPACE, LABEL_CONSUMER_GROUP, LABEL_PARTITION,
    LABEL_TOPIC, NAMESPACE,
};
use crate::kafka_types::{GroupTopicPartition, TopicPartition};

const MET_GROUP_OFFSET_NAME: &str = formatcp!("{NAMESPACE}_consumergroup_current_offset");
const MET_GROUP_OFFSET_HELP: &str = "Current Offset of a ConsumerGroup at Topic/Partition";
const MET_LAG_NAME: &str = formatcp!("{NAMESPACE}_consumergroup_lag");
const MET_LAG_HELP: &str = "Current Approximate Lag of a ConsumerGroup at Topic/Partition";
const MET_BROKER_OFFSET_NAME: &str = formatcp!("{NAMESPACE}_broker_current_offset");
const MET_BROKER_OFFSET_HELP: &str = "Current Offset of a Broker at Topic/Partition";
const MET_EXPIRED_NAME: &str = formatcp!("{EXPORTER_NAMESPACE}_expired_series_total");
const MET_EXPIRED_HELP: &str = "Metric series removed because not refreshed for too many cycles";

/// Label values of a Consumer Group series, resolved once and reused every cycle.
struct GroupSeries {
    labels: [String; 3],
    current_offset: IntGauge,
    /// Created only once a lag is known: until then, no lag series is exported.
    lag: OnceLock<IntGauge>,
    last_seen: AtomicU64,
    /// The lag can stop being updated while the offset still is.
    lag_last_seen: AtomicU64,
}

impl GroupSeries {
    fn new(vec: &IntGaugeVec, gtp: &GroupTopicPartition) -> Self {
        let labels = [gtp.group.clone(), gtp.topic().to_string(), gtp.partition().to_string()];

        Self {
            current_offset: vec.with_label_values(&label_refs(&labels)),
            labels,
            lag: OnceLock::new(),
            last_seen: AtomicU64::new(0),
            lag_last_seen: AtomicU64::new(0),
        }
    }
}

/// Label values of a Broker series, resolved once and reused every cycle.
struct BrokerSeries {
    labels: [String; 2],
    current_offset: IntGauge,
    last_seen: AtomicU64,
}

impl BrokerSeries {
    fn new(vec: &IntGaugeVec, tp: &TopicPartition) -> Self {
        let labels = [tp.topic.clone(), tp.partition.to_string()];

        Self {
            current_offset: vec.with_label_values(&label_refs(&labels)),
            labels,
            last_seen: AtomicU64::new(0),
        }
    }
}

fn label_refs<const N: usize>(labels: &[String; N]) -> [&str; N] {
    std::array::from_fn(|i| labels[i].as_str())
}

/// `true` if a series last seen in `last_seen` must be forgotten during `cycle`.
fn is_stale(last_seen: &AtomicU64, cycle: u64, stale_after_cycles: u64) -> bool {
    stale_after_cycles > 0
        && cycle.saturating_sub(last_seen.load(Ordering::Relaxed)) >= stale_after_cycles
}

fn remove_series(vec: &IntGaugeVec, labels: &[&str]) {
    if let Err(e) = vec.remove_label_values(labels) {
        warn!("Unable to remove metric series {:?}: {e}", labels);
    }
}

/// Where the Consumer Group and Broker offsets, and the resulting lag, are published.
///
/// Holds three [`IntGaugeVec`] families, registered in the Prometheus [`Registry`] given
/// at creation: scraping the registry reads them concurrently with the updates.
/// Updates are last-write-wins, per series.
///
/// The label values of every series are resolved on first use, then cached together with
/// the cycle when the series was last updated. At the end of a cycle, [`Self::expire_stale`]
/// removes the series not updated for `stale_after_cycles` cycles, so that Groups and
/// Partitions that disappear from the Cluster stop being reported.
pub struct MetricSink {
    group_offset: IntGaugeVec,
    lag: IntGaugeVec,
    broker_offset: IntGaugeVec,

    /// Series not updated for this many cycles are removed; `0` never removes.
    stale_after_cycles: u64,
    cycle: AtomicU64,

    group_series: RwLock<HashMap<GroupTopicPartition, GroupSeries>>,
    broker_series: RwLock<HashMap<TopicPartition, BrokerSeries>>,

    // Prometheus Metrics
    metric_expired: IntCounter,
}

impl MetricSink {
    /// Creates a new [`MetricSink`], registering its metrics in the given [`Registry`].
    ///
    /// # Arguments
    ///
    /// * `metrics` - Registry where the offset and lag metrics are registered
    /// * `stale_after_cycles` - Series not updated for this many cycles are removed
    ///   (`0` to never remove)
    pub fn new(metrics: &Registry, stale_after_cycles: u64) -> MetricsResult<Self> {
        Ok(Self {
            group_offset: register_int_gauge_vec_with_registry!(
                MET_GROUP_OFFSET_NAME,
                MET_GROUP_OFFSET_HELP,
                &[LABEL_CONSUMER_GROUP, LABEL_TOPIC, LABEL_PARTITION],
                metrics
            )
            .map_err(|e| MetricsError::Metric(MET_GROUP_OFFSET_NAME, e))?,
            lag: register_int_gauge_vec_with_registry!(
                MET_LAG_NAME,
                MET_LAG_HELP,
                &[LABEL_CONSUMER_GROUP, LABEL_TOPIC, LABEL_PARTITION],
                metrics
            )
            .map_err(|e| MetricsError::Metric(MET_LAG_NAME, e))?,
            broker_offset: register_int_gauge_vec_with_registry!(
                MET_BROKER_OFFSET_NAME,
                MET_BROKER_OFFSET_HELP,
                &[LABEL_TOPIC, LABEL_PARTITION],
                metrics
            )
            .map_err(|e| MetricsError::Metric(MET_BROKER_OFFSET_NAME, e))?,
            stale_after_cycles,
            cycle: AtomicU64::new(0),
            group_series: RwLock::new(HashMap::new()),
            broker_series: RwLock::new(HashMap::new()),
            metric_expired: register_int_counter_with_registry!(
                MET_EXPIRED_NAME,
                MET_EXPIRED_HELP,
                metrics
            )
            .map_err(|e| MetricsError::Metric(MET_EXPIRED_NAME, e))?,
        })
    }

    /// Marks the beginning of a new collection cycle, and returns its (1-based) number.
    ///
    /// Every update that follows counts as "seen" in this cycle.
    pub fn begin_cycle(&self) -> u64 {
        self.cycle.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn current_cycle(&self) -> u64 {
        self.cycle.load(Ordering::Relaxed)
    }

    /// Applies `f` to the [`GroupSeries`] of `gtp`, creating it if missing, and marks it seen.
    async fn with_group_series<F: FnOnce(&GroupSeries)>(&self, gtp: &GroupTopicPartition, f: F) {
        let cycle = self.current_cycle();

        if let Some(s) = self.group_series.read().await.get(gtp) {
            s.last_seen.store(cycle, Ordering::Relaxed);
            return f(s);
        }

        let mut w_guard = self.group_series.write().await;
        let s = w_guard
            .entry(gtp.clone())
            .or_insert_with(|| GroupSeries::new(&self.group_offset, gtp));
        s.last_seen.store(cycle, Ordering::Relaxed);
        f(s)
    }

    /// Sets the committed offset of a Consumer Group at a Topic Partition.
    pub async fn set_group_offset(&self, gtp: &GroupTopicPartition, offset: i64) {
        self.with_group_series(gtp, |s| s.current_offset.set(offset)).await;
    }

    /// Sets the lag of a Consumer Group at a Topic Partition.
    pub async fn set_lag(&self, gtp: &GroupTopicPartition, lag: i64) {
        let cycle = self.current_cycle();

        self.with_group_series(gtp, |s| {
            s.lag.get_or_init(|| self.lag.with_label_values(&label_refs(&s.labels))).set(lag);
            s.lag_last_seen.store(cycle, Ordering::Relaxed);
        })
        .await;
    }

    /// Sets the newest offset available at the Broker for a Topic Partition.
    pub async fn set_broker_offset(&self, tp: &TopicPartition, offset: i64) {
        let cycle = self.current_cycle();

        if let Some(s) = self.broker_series.read().await.get(tp) {
            s.last_seen.store(cycle, Ordering::Relaxed);
            s.current_offset.set(offset);
            return;
        }

        let mut w_guard = self.broker_series.write().await;
        let s = w_guard
            .entry(tp.clone())
            .or_insert_with(|| BrokerSeries::new(&self.broker_offset, tp));
        s.last_seen.store(cycle, Ordering::Relaxed);
        s.current_offset.set(offset);
    }

    /// Removes the series that were not updated in the last `stale_after_cycles` cycles.
    ///
    /// Returns how many series were removed. A Consumer Group series removes both
    /// its offset and lag metrics. A lag not updated for too long is removed on its own,
    /// even if the offset of the same Consumer Group is still being updated.
    /// It is created again the next time a lag is set.
    pub async fn expire_stale(&self) -> usize {
        if self.stale_after_cycles == 0 {
            return 0;
        }

        let cycle = self.current_cycle();
        let mut expired: usize = 0;

        self.group_series.write().await.retain(|gtp, s| {
            if !is_stale(&s.last_seen, cycle, self.stale_after_cycles) {
                if s.lag.get().is_some()
                    && is_stale(&s.lag_last_seen, cycle, self.stale_after_cycles)
                {
                    debug!(
                        "Expiring lag of '{gtp}': last seen in cycle {}",
                        s.lag_last_seen.load(Ordering::Relaxed)
                    );
                    remove_series(&self.lag, &label_refs(&s.labels));
                    s.lag.take();
                    expired += 1;
                }
                return true;
            }

            debug!(
                "Expiring metrics of '{gtp}': last seen in cycle {}",
                s.last_seen.load(Ordering::Relaxed)
            );
            remove_series(&self.group_offset, &label_refs(&s.labels));
            if s.lag.get().is_some() {
                remove_series(&self.lag, &label_refs(&s.labels));
            }
            expired += 1;
            false
        });

        self.broker_series.write().await.retain(|tp, s| {
            if !is_stale(&s.last_seen, cycle, self.stale_after_cycles) {
                return true;
            }

            debug!(
                "Expiring metrics of '{tp}': last seen in cycle {}",
                s.last_seen.load(Ordering::Relaxed)
            );
            remove_series(&self.broker_offset, &label_refs(&s.labels));
            expired += 1;
            false
        });

        self.metric_expired.inc_by(expired as u64);
        expired
    }

    /// Count of (Group, Topic, Partition) currently reported.
    pub async fn group_partitions_count(&self) -> usize {
        self.group_series.read().await.len()
    }

    /// Count of (Topic, Partition) currently reported.
    pub async fn topic_partitions_count(&self) -> usize {
        self.broker_series.read().await.len()
    }

    /// Returns the last committed offset set for a Consumer Group at a Topic Partition, if any.
    #[cfg(test)]
    pub async fn group_offset(&self, gtp: &GroupTopicPartition) -> Option<i64> {
        self.group_series.read().await.get(gtp).map(|s| s.current_offset.get())
    }

    /// Returns the last lag set for a Consumer Group at a Topic Partition, if any.
    #[cfg(test)]
    pub async fn lag(&self, gtp: &GroupTopicPartition) -> Option<i64> {
        self.group_series.read().await.get(gtp).and_then(|s| s.lag.get().map(IntGauge::get))
    }

    /// Returns the last Broker offset set for a Topic Partition, if any.
    #[cfg(test)]
    pub async fn broker_offset(&self, tp: &TopicPartition) -> Option<i64> {
        self.broker_series.read().await.get(tp).map(|s| s.current_offset.get())
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use prometheus::Registry;

    use super::MetricSink;
    use crate::kafka_types::{GroupTopicPartition, TopicPartition};

    fn gauge_families(registry: &Registry) -> Vec<(String, usize)> {
        let mut families = registry
            .gather()
            .iter()
            .map(|mf| (mf.get_name().to_string(), mf.get_metric().len()))
            .collect::<Vec<_>>();
        families.sort();
        families
    }

    #[tokio::test]
    async fn should_keep_last_write() {
        let registry = Registry::new();
        let sink = MetricSink::new(&registry, 0).unwrap();
        let gtp = GroupTopicPartition::new("g1", "t", 0);

        sink.begin_cycle();
        sink.set_group_offset(&gtp, 100).await;
        sink.set_group_offset(&gtp, 120).await;
        sink.set_lag(&gtp, 7).await;
        sink.set_lag(&gtp, -3).await;

        assert_eq!(sink.group_offset(&gtp).await, Some(120));
        assert_eq!(sink.lag(&gtp).await, Some(-3));
        assert_eq!(sink.group_partitions_count().await, 1);
    }

    #[tokio::test]
    async fn should_not_export_lag_before_it_is_set() {
        let registry = Registry::new();
        let sink = MetricSink::new(&registry, 0).unwrap();
        let gtp = GroupTopicPartition::new("g1", "t", 1);

        sink.begin_cycle();
        sink.set_group_offset(&gtp, 50).await;

        assert_eq!(sink.lag(&gtp).await, None);
        assert_eq!(
            gauge_families(&registry),
            vec![
                ("kafka_consumergroup_current_offset".to_string(), 1),
                ("kafka_lag_exporter_expired_series_total".to_string(), 1),
            ]
        );
    }

    #[tokio::test]
    async fn should_never_expire_when_disabled() {
        let registry = Registry::new();
        let sink = MetricSink::new(&registry, 0).unwrap();
        let gtp = GroupTopicPartition::new("g1", "t", 0);
        let tp = TopicPartition::new("t", 0);

        sink.begin_cycle();
        sink.set_group_offset(&gtp, 1).await;
        sink.set_broker_offset(&tp, 2).await;

        for _ in 0..100 {
            sink.begin_cycle();
            assert_eq!(sink.expire_stale().await, 0);
        }
        assert_eq!(sink.group_offset(&gtp).await, Some(1));
        assert_eq!(sink.broker_offset(&tp).await, Some(2));
    }

    #[tokio::test]
    async fn should_expire_series_not_seen_for_too_long() {
        let registry = Registry::new();
        let sink = MetricSink::new(&registry, 2).unwrap();
        let gone = GroupTopicPartition::new("gone", "t", 0);
        let kept = GroupTopicPartition::new("kept", "t", 0);
        let tp = TopicPartition::new("t", 0);

        // Cycle 1: both groups are seen
        sink.begin_cycle();
        for gtp in [&gone, &kept] {
            sink.set_group_offset(gtp, 10).await;
            sink.set_lag(gtp, 5).await;
        }
        sink.set_broker_offset(&tp, 15).await;
        assert_eq!(sink.expire_stale().await, 0);

        // Cycle 2: "gone" disappears, but is still within the allowed age
        sink.begin_cycle();
        sink.set_group_offset(&kept, 11).await;
        sink.set_lag(&kept, 5).await;
        sink.set_broker_offset(&tp, 16).await;
        assert_eq!(sink.expire_stale().await, 0);
        assert_eq!(sink.group_offset(&gone).await, Some(10));

        // Cycle 3: "gone" was last seen 2 cycles ago
        sink.begin_cycle();
        sink.set_group_offset(&kept, 12).await;
        sink.set_broker_offset(&tp, 17).await;
        assert_eq!(sink.expire_stale().await, 1);

        assert_eq!(sink.group_offset(&gone).await, None);
        assert_eq!(sink.lag(&gone).await, None);
        assert_eq!(sink.group_offset(&kept).await, Some(12));
        assert_eq!(sink.group_partitions_count().await, 1);
        assert_eq!(
            gauge_families(&registry),
            vec![
                ("kafka_broker_current_offset".to_string(), 1),
                ("kafka_consumergroup_current_offset".to_string(), 1),
                ("kafka_consumergroup_lag".to_string(), 1),
                ("kafka_lag_exporter_expired_series_total".to_string(), 1),
            ]
        );
    }

    #[tokio::test]
    async fn should_expire_lag_not_updated_while_offset_is() {
        let registry = Registry::new();
        let sink = MetricSink::new(&registry, 2).unwrap();
        let gtp = GroupTopicPartition::new("g1", "t", 0);

        sink.begin_cycle();
        sink.set_group_offset(&gtp, 100).await;
        sink.set_lag(&gtp, 30).await;
        assert_eq!(sink.expire_stale().await, 0);

        // Only the offset keeps being updated
        for (offset, expected_expired) in [(110, 0), (120, 1), (125, 0)] {
            sink.begin_cycle();
            sink.set_group_offset(&gtp, offset).await;
            assert_eq!(sink.expire_stale().await, expected_expired);
        }

        assert_eq!(sink.group_offset(&gtp).await, Some(125));
        assert_eq!(sink.lag(&gtp).await, None);
        assert_eq!(
            gauge_families(&registry),
            vec![
                ("kafka_consumergroup_current_offset".to_string(), 1),
                ("kafka_lag_exporter_expired_series_total".to_string(), 1),
            ]
        );

        // A new lag brings the series back
        sink.begin_cycle();
        sink.set_lag(&gtp, 5).await;
        assert_eq!(sink.lag(&gtp).await, Some(5));
        assert_eq!(sink.expire_stale().await, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn should_accept_concurrent_updates() {
        let registry = Registry::new();
        let sink = Arc::new(MetricSink::new(&registry, 0).unwrap());
        sink.begin_cycle();

        let mut handles = Vec::new();
        for w in 0..8 {
            let sink = sink.clone();
            handles.push(tokio::spawn(async move {
                for p in 0..50u32 {
                    let gtp = GroupTopicPartition::new(format!("g{}", w % 2), "t", p);
                    sink.set_group_offset(&gtp, p as i64).await;
                    sink.set_lag(&gtp, 1).await;
                    sink.set_broker_offset(&gtp.topic_partition, p as i64 + 1).await;
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(sink.group_partitions_count().await, 100);
        assert_eq!(sink.topic_partitions_count().await, 50);
        assert_eq!(sink.group_offset(&GroupTopicPartition::new("g1", "t", 49)).await, Some(49));
    }
}
